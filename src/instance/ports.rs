// ABOUTME: Process-wide reservation of OS-assigned ports for ephemeral instances
// ABOUTME: Prevents two concurrently starting instances from receiving the same port

use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::net::TcpListener;
use std::sync::{Mutex, OnceLock};

const MAX_ATTEMPTS: usize = 16;

fn reserved() -> &'static Mutex<BTreeSet<u16>> {
    static RESERVED: OnceLock<Mutex<BTreeSet<u16>>> = OnceLock::new();
    RESERVED.get_or_init(|| Mutex::new(BTreeSet::new()))
}

#[cfg(test)]
thread_local! {
    static ALLOCATIONS: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

/// Successful allocations made by the current thread
#[cfg(test)]
pub(crate) fn allocations_on_this_thread() -> usize {
    ALLOCATIONS.with(|n| n.get())
}

/// Ports held for one instance; returned to the pool on drop.
#[derive(Debug)]
pub struct PortReservation {
    ports: Vec<u16>,
}

impl PortReservation {
    /// Reserve `count` distinct ports the OS reports as free.
    pub fn allocate(count: usize) -> Result<Self> {
        // Listeners stay bound until every port is picked so the OS cannot
        // hand out the same one twice.
        let mut listeners = Vec::with_capacity(count);
        let mut ports = Vec::with_capacity(count);
        let mut registry = reserved().lock().unwrap_or_else(|e| e.into_inner());

        let mut attempts = 0;
        while ports.len() < count {
            attempts += 1;
            if attempts > MAX_ATTEMPTS * count {
                bail!("Could not find {} free local port(s)", count);
            }

            let listener = TcpListener::bind("127.0.0.1:0")
                .context("Failed to bind an ephemeral local port")?;
            let port = listener
                .local_addr()
                .context("Failed to read ephemeral port")?
                .port();

            if registry.contains(&port) {
                continue;
            }
            ports.push(port);
            listeners.push(listener);
        }

        registry.extend(ports.iter().copied());
        drop(listeners);

        tracing::debug!("Reserved local ports {:?}", ports);
        #[cfg(test)]
        ALLOCATIONS.with(|n| n.set(n.get() + 1));

        Ok(Self { ports })
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        let mut registry = reserved().lock().unwrap_or_else(|e| e.into_inner());
        for port in &self.ports {
            registry.remove(port);
        }
    }
}

/// Whether `port` is currently held by a reservation in this process
pub fn is_reserved(port: u16) -> bool {
    reserved()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .contains(&port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocates_distinct_ports() {
        let reservation = PortReservation::allocate(2).unwrap();
        let ports = reservation.ports().to_vec();
        assert_eq!(ports.len(), 2);
        assert_ne!(ports[0], ports[1]);
        assert!(ports.iter().all(|p| is_reserved(*p)));

        drop(reservation);
        assert!(ports.iter().all(|p| !is_reserved(*p)));
    }

    #[test]
    fn test_allocations_are_counted_per_thread() {
        let before = allocations_on_this_thread();
        let _reservation = PortReservation::allocate(1).unwrap();
        assert_eq!(allocations_on_this_thread(), before + 1);
    }

    #[test]
    fn test_concurrent_reservations_do_not_overlap() {
        let a = PortReservation::allocate(2).unwrap();
        let b = PortReservation::allocate(2).unwrap();
        for port in a.ports() {
            assert!(!b.ports().contains(port));
        }
    }

    #[test]
    fn test_reserved_ports_are_bindable_after_allocation() {
        let reservation = PortReservation::allocate(1).unwrap();
        let port = reservation.ports()[0];
        let listener = TcpListener::bind(("127.0.0.1", port));
        assert!(listener.is_ok());
    }
}
