//! Client registry — the set of live connection handles, with a "drain to
//! empty" wait primitive and a broadcast "shut down the read side"
//! operation.
//!
//! `register`/`unregister` are keyed by a monotonically increasing
//! connection id rather than a raw file descriptor, since Rust's
//! `TcpStream` does not expose one portably; a cloned stream handle
//! (`TcpStream::try_clone`) plays the role of "the fd" for the purposes of
//! `shutdown_all`.

use std::collections::HashMap;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

pub type ConnId = u64;

struct RegistryState {
    handles: HashMap<ConnId, TcpStream>,
}

/// Multiset of live connection handles.
pub struct ClientRegistry {
    next_id: AtomicU64,
    state: Mutex<RegistryState>,
    drained: Condvar,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        ClientRegistry {
            next_id: AtomicU64::new(1),
            state: Mutex::new(RegistryState {
                handles: HashMap::new(),
            }),
            drained: Condvar::new(),
        }
    }
}

impl ClientRegistry {
    pub fn new() -> ClientRegistry {
        ClientRegistry::default()
    }

    /// Allocate a fresh connection id for a just-accepted stream. Callers
    /// should `register` the returned id immediately.
    pub fn next_id(&self) -> ConnId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// `register(fd)`: inserts `fd`, increments `n`.
    pub fn register(&self, id: ConnId, handle: TcpStream) {
        let mut state = self.state.lock();
        state.handles.insert(id, handle);
        debug!(conn = id, live = state.handles.len(), "registered connection");
    }

    /// `unregister(fd)`: removes `fd`, decrements `n`; posts the drained
    /// signal when `n` reaches 0.
    pub fn unregister(&self, id: ConnId) {
        let mut state = self.state.lock();
        state.handles.remove(&id);
        debug!(conn = id, live = state.handles.len(), "unregistered connection");
        if state.handles.is_empty() {
            self.drained.notify_all();
        }
    }

    /// `wait_for_empty()`: returns immediately if already empty; otherwise
    /// blocks until a post.
    pub fn wait_for_empty(&self) {
        let mut state = self.state.lock();
        while !state.handles.is_empty() {
            self.drained.wait(&mut state);
        }
    }

    /// `shutdown_all()`: shuts down the read side of every live connection,
    /// leaving the write side open so any final frames drain. This unblocks
    /// every service task stuck in `recv`.
    pub fn shutdown_all(&self) {
        let state = self.state.lock();
        for (id, handle) in state.handles.iter() {
            if let Err(e) = handle.shutdown(Shutdown::Read) {
                debug!(conn = id, error = %e, "shutdown(Read) failed (already closed?)");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn wait_for_empty_returns_immediately_when_already_empty() {
        let registry = ClientRegistry::new();
        registry.wait_for_empty();
    }

    #[test]
    fn register_unregister_tracks_count() {
        let registry = ClientRegistry::new();
        let (_client, server) = connected_pair();
        let id = registry.next_id();
        registry.register(id, server);
        assert_eq!(registry.len(), 1);
        registry.unregister(id);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn wait_for_empty_unblocks_after_last_unregister() {
        let registry = std::sync::Arc::new(ClientRegistry::new());
        let (_client, server) = connected_pair();
        let id = registry.next_id();
        registry.register(id, server);

        let waiter_registry = registry.clone();
        let waiter = thread::spawn(move || {
            waiter_registry.wait_for_empty();
        });

        thread::sleep(Duration::from_millis(50));
        registry.unregister(id);
        waiter.join().unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn shutdown_all_causes_blocked_read_to_return() {
        use std::io::Read;

        let registry = ClientRegistry::new();
        let (_client, server) = connected_pair();
        let server_clone = server.try_clone().unwrap();
        let id = registry.next_id();
        registry.register(id, server_clone);

        let reader = thread::spawn(move || {
            let mut server = server;
            let mut buf = [0u8; 1];
            // Blocks until shutdown_all() shuts down the read side.
            server.read(&mut buf).unwrap_or(0)
        });

        thread::sleep(Duration::from_millis(20));
        registry.shutdown_all();
        let n = reader.join().unwrap();
        assert_eq!(n, 0);
    }
}
