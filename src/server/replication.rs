use crate::protocol::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

struct ReplicaLink {
    peer: SocketAddr,
    sender: UnboundedSender<Value>,
}

/// Leader-side replica registry plus the two counters replication needs:
/// the WAIT ack count, and the follower's applied-bytes offset (which
/// stays 0 on a leader).
///
/// Each link's sender feeds the owning connection's writer task, so a
/// link is an outbound FIFO drained in order; enqueueing never blocks.
pub struct ReplicationManager {
    replicas: Mutex<Vec<ReplicaLink>>,
    replica_present: AtomicBool,
    ack_count: Mutex<usize>,
    master_repl_offset: Mutex<u64>,
}

impl ReplicationManager {
    pub fn new() -> Self {
        Self {
            replicas: Mutex::new(Vec::new()),
            replica_present: AtomicBool::new(false),
            ack_count: Mutex::new(0),
            master_repl_offset: Mutex::new(0),
        }
    }

    pub fn register(&self, peer: SocketAddr, sender: UnboundedSender<Value>) {
        let mut replicas = self.replicas.lock().unwrap();
        info!("registering replica {}", peer);
        replicas.push(ReplicaLink { peer, sender });
        self.replica_present.store(true, Ordering::SeqCst);
    }

    pub fn unregister(&self, peer: SocketAddr) {
        let mut replicas = self.replicas.lock().unwrap();
        replicas.retain(|link| link.peer != peer);
    }

    pub fn replica_present(&self) -> bool {
        self.replica_present.load(Ordering::SeqCst)
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.lock().unwrap().len()
    }

    /// Run a store mutation and enqueue its wire form onto every replica
    /// link inside one registry-lock scope, so concurrent writers cannot
    /// interleave the store order and the propagation order differently.
    pub fn apply_write<R>(&self, raw: Option<Value>, mutate: impl FnOnce() -> R) -> R {
        match raw {
            None => mutate(),
            Some(value) => {
                let mut replicas = self.replicas.lock().unwrap();
                let result = mutate();
                Self::send_to_all(&mut replicas, &value);
                result
            }
        }
    }

    /// Enqueue a frame onto every link; used for REPLCONF GETACK.
    pub fn broadcast(&self, value: Value) {
        let mut replicas = self.replicas.lock().unwrap();
        Self::send_to_all(&mut replicas, &value);
    }

    // A failed send means the writer task is gone; drop the link and keep
    // serving the rest.
    fn send_to_all(replicas: &mut Vec<ReplicaLink>, value: &Value) {
        replicas.retain(|link| match link.sender.send(value.clone()) {
            Ok(()) => true,
            Err(_) => {
                warn!("dropping replica {}: connection closed", link.peer);
                false
            }
        });
    }

    pub fn increment_ack(&self) {
        *self.ack_count.lock().unwrap() += 1;
    }

    pub fn reset_ack(&self) {
        *self.ack_count.lock().unwrap() = 0;
    }

    pub fn ack_count(&self) -> usize {
        *self.ack_count.lock().unwrap()
    }

    pub fn add_offset(&self, bytes: u64) {
        *self.master_repl_offset.lock().unwrap() += bytes;
    }

    pub fn offset(&self) -> u64 {
        *self.master_repl_offset.lock().unwrap()
    }
}
