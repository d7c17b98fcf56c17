//! Registry of live client connections.
//!
//! Each accepted connection registers a cancellation token under its id.
//! Terminating an entry cancels the token; the owning session task notices,
//! closes its backend connection and deregisters itself.

use std::net::SocketAddr;
use std::time::Instant;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Registry-side view of one connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: u32,
    pub peer_addr: Option<SocketAddr>,
    pub connected_at: Instant,
    token: CancellationToken,
}

#[cfg(test)]
impl ConnectionHandle {
    pub fn is_terminated(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Process-wide map of connection id to handle
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<u32, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection, returning the token its task must watch
    pub fn register(&self, id: u32, peer_addr: Option<SocketAddr>) -> CancellationToken {
        let token = CancellationToken::new();
        self.connections.insert(
            id,
            ConnectionHandle {
                id,
                peer_addr,
                connected_at: Instant::now(),
                token: token.clone(),
            },
        );
        debug!(connection_id = id, "Connection registered");
        token
    }

    pub fn deregister(&self, id: u32) {
        if let Some((_, handle)) = self.connections.remove(&id) {
            debug!(
                connection_id = handle.id,
                peer = ?handle.peer_addr,
                elapsed_ms = handle.connected_at.elapsed().as_millis() as u64,
                "Connection deregistered"
            );
        }
    }

    /// Ask one connection to terminate. Returns false if it is not registered.
    pub fn terminate(&self, id: u32) -> bool {
        match self.connections.get(&id) {
            Some(handle) => {
                handle.token.cancel();
                info!(connection_id = id, "Connection termination requested");
                true
            }
            None => false,
        }
    }

    /// Ask every registered connection to terminate
    pub fn terminate_all(&self) -> usize {
        let mut count = 0;
        for entry in self.connections.iter() {
            entry.token.cancel();
            count += 1;
        }
        if count > 0 {
            info!(connections = count, "Terminating all connections");
        }
        count
    }
}

#[cfg(test)]
impl ConnectionRegistry {
    pub fn get(&self, id: u32) -> Option<ConnectionHandle> {
        self.connections.get(&id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_deregister() {
        let registry = ConnectionRegistry::new();
        let token = registry.register(1, None);
        registry.register(2, Some("127.0.0.1:5000".parse().unwrap()));
        assert_eq!(registry.len(), 2);
        assert!(!token.is_cancelled());

        registry.deregister(1);
        registry.deregister(1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(1).is_none());
        assert_eq!(registry.get(2).unwrap().peer_addr.unwrap().port(), 5000);
    }

    #[test]
    fn test_terminate_cancels_only_target() {
        let registry = ConnectionRegistry::new();
        let first = registry.register(1, None);
        let second = registry.register(2, None);

        assert!(registry.terminate(1));
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(registry.get(1).unwrap().is_terminated());
        assert!(!registry.terminate(99));
    }

    #[test]
    fn test_terminate_all() {
        let registry = ConnectionRegistry::new();
        let tokens: Vec<_> = (0..3).map(|id| registry.register(id, None)).collect();
        assert_eq!(registry.terminate_all(), 3);
        assert!(tokens.iter().all(|t| t.is_cancelled()));
    }
}
