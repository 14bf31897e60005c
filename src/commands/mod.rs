// ABOUTME: Command implementations behind the CLI subcommands
// ABOUTME: Exports the transport and inspect commands

pub mod inspect;
pub mod transport;

pub use inspect::inspect;
pub use transport::transport;
