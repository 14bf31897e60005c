// ABOUTME: Library module for tidb-snapshot-transport
// ABOUTME: Exports all core functionality for use in binary and tests

pub mod client;
pub mod commands;
pub mod config;
pub mod diagnostic;
pub mod endpoint;
pub mod error;
pub mod filters;
pub mod instance;
pub mod interactive;
pub mod mysql;
pub mod snapshot;
pub mod transport;
pub mod utils;
