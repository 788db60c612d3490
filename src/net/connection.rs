use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;

/// Failure writing to a viewer's transport
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("Connection closed")]
    Closed,
    #[error("Outbound buffer full")]
    Full,
}

/// Outbound half of one viewer connection
///
/// `send` receives one encoded message; framing is the transport's job.
pub trait ClientSink: Send + Sync {
    fn send(&self, payload: Arc<[u8]>) -> Result<(), SinkError>;

    /// Close with an application code and human-readable reason
    fn close(&self, code: u32, reason: &str);

    fn is_open(&self) -> bool;
}

/// Handshake state. Starts unjoined; only a matching join flips it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub joined: bool,
    pub protocol_version: Option<u32>,
}

pub struct Connection {
    pub id: u64,
    pub state: ConnectionState,
    pub sink: Arc<dyn ClientSink>,
    pub created_at: Instant,
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub messages_received: u64,
}

impl Connection {
    pub fn new(id: u64, sink: Arc<dyn ClientSink>) -> Self {
        Self {
            id,
            state: ConnectionState::default(),
            sink,
            created_at: Instant::now(),
            messages_sent: 0,
            bytes_sent: 0,
            messages_received: 0,
        }
    }

    pub fn is_joined(&self) -> bool {
        self.state.joined
    }

    pub fn mark_joined(&mut self, protocol_version: u32) {
        self.state = ConnectionState {
            joined: true,
            protocol_version: Some(protocol_version),
        };
    }

    /// Send one payload, counting it on success
    pub fn send(&mut self, payload: Arc<[u8]>) -> Result<(), SinkError> {
        let len = payload.len();
        self.sink.send(payload)?;
        self.messages_sent += 1;
        self.bytes_sent += len as u64;
        Ok(())
    }

    pub fn record_received(&mut self) {
        self.messages_received += 1;
    }
}

/// Live connections keyed by id. Entries are removed on disconnect.
#[derive(Default)]
pub struct ConnectionManager {
    connections: HashMap<u64, Connection>,
    next_id: u64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, sink: Arc<dyn ClientSink>) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.connections.insert(id, Connection::new(id, sink));
        id
    }

    pub fn get(&self, id: u64) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn remove(&mut self, id: u64) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn joined_count(&self) -> usize {
        self.connections.values().filter(|c| c.is_joined()).count()
    }

    /// Ids in ascending order
    pub fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct NullSink(AtomicBool);

    impl ClientSink for NullSink {
        fn send(&self, _payload: Arc<[u8]>) -> Result<(), SinkError> {
            if self.is_open() {
                Ok(())
            } else {
                Err(SinkError::Closed)
            }
        }

        fn close(&self, _code: u32, _reason: &str) {
            self.0.store(false, Ordering::SeqCst);
        }

        fn is_open(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn sink() -> Arc<dyn ClientSink> {
        Arc::new(NullSink(AtomicBool::new(true)))
    }

    #[test]
    fn test_new_connection_unjoined() {
        let conn = Connection::new(1, sink());
        assert!(!conn.is_joined());
        assert_eq!(conn.state.protocol_version, None);
    }

    #[test]
    fn test_mark_joined() {
        let mut conn = Connection::new(1, sink());
        conn.mark_joined(1);
        assert!(conn.is_joined());
        assert_eq!(conn.state.protocol_version, Some(1));
    }

    #[test]
    fn test_send_counts_only_success() {
        let mut conn = Connection::new(1, sink());
        conn.send(Arc::from(&b"abc"[..])).unwrap();
        assert_eq!((conn.messages_sent, conn.bytes_sent), (1, 3));

        conn.sink.close(1000, "bye");
        assert_eq!(conn.send(Arc::from(&b"abc"[..])), Err(SinkError::Closed));
        assert_eq!(conn.messages_sent, 1);
    }

    #[test]
    fn test_manager_ids_unique_and_removed() {
        let mut manager = ConnectionManager::new();
        let a = manager.create(sink());
        let b = manager.create(sink());
        assert_ne!(a, b);
        assert_eq!(manager.ids(), vec![a, b]);

        manager.get_mut(a).unwrap().mark_joined(1);
        assert_eq!(manager.joined_count(), 1);

        assert!(manager.remove(a).is_some());
        assert!(manager.remove(a).is_none());
        assert_eq!(manager.count(), 1);
        assert_eq!(manager.joined_count(), 0);
    }
}
