//! The object contract and the per-connection object table.
//!
//! Objects are capability-addressed: the peer can only reach an object whose
//! id it has been told, starting from the bootstrap object at id 0. Ids are
//! opaque integers allocated from a monotone counter, so a clunked id is
//! never reused within a connection's lifetime.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::message::Message;
use crate::messages::UnexpectedMessage;
use crate::server::{ConnServer, Responder};

/// The id of the bootstrap object installed when a connection starts.
pub const BOOTSTRAP_OBJECT_ID: u64 = 0;

/// Boxed future returned by object handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An entity living inside one connection, dispatched to by object id.
///
/// Handlers for the same object may run concurrently; an object is
/// responsible for its own internal synchronisation. Each handler must cause
/// `respond` to be invoked exactly once, either before its future completes
/// or later from a task spawned through [`ConnServer::spawn`] so that
/// shutdown drains it.
pub trait Object: Send + Sync + 'static {
    /// Handle a message whose type was registered and which unmarshalled
    /// successfully.
    fn message(
        self: Arc<Self>,
        shutdown: CancellationToken,
        server: ConnServer,
        msg: Box<dyn Message>,
        respond: Responder,
    ) -> BoxFuture<'static, ()>;

    /// Handle a message whose type code is not in the connection's registry.
    ///
    /// The default replies [`UnexpectedMessage`].
    fn unknown_message(
        self: Arc<Self>,
        shutdown: CancellationToken,
        server: ConnServer,
        type_code: u64,
        data: Bytes,
        respond: Responder,
    ) -> BoxFuture<'static, ()> {
        let _ = (shutdown, server, type_code, data);
        respond.respond(&UnexpectedMessage);
        Box::pin(async {})
    }

    /// Cleanup hook, called exactly once after the object is removed from
    /// the table. After this returns the object is destroyed.
    fn clunk(self: Arc<Self>, server: &ConnServer) {
        let _ = server;
    }
}

/// Per-connection mapping from object id to live object.
///
/// Lookup, insert and remove are serialised by a mutex and brief; no lock is
/// ever held across handler execution.
pub struct ObjectTable {
    entries: Mutex<HashMap<u64, Arc<dyn Object>>>,
    next_id: AtomicU64,
}

impl ObjectTable {
    /// Create an empty table. Id 0 is reserved for the bootstrap object;
    /// allocation starts at 1.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Install the bootstrap object at id 0.
    pub fn insert_bootstrap(&self, object: Arc<dyn Object>) {
        self.entries
            .lock()
            .expect("object table lock poisoned")
            .insert(BOOTSTRAP_OBJECT_ID, object);
    }

    /// Insert `object` under a freshly allocated id and return the id.
    pub fn register(&self, object: Arc<dyn Object>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .expect("object table lock poisoned")
            .insert(id, object);
        id
    }

    /// Look up a live object.
    pub fn get(&self, id: u64) -> Option<Arc<dyn Object>> {
        self.entries
            .lock()
            .expect("object table lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Remove an object from the table, returning it if it was present.
    ///
    /// Removal is atomic, so the caller that receives the object is the only
    /// one that may invoke its clunk hook.
    pub fn remove(&self, id: u64) -> Option<Arc<dyn Object>> {
        self.entries
            .lock()
            .expect("object table lock poisoned")
            .remove(&id)
    }

    /// Remove every remaining object, highest id first. Used at teardown.
    pub fn drain_descending(&self) -> Vec<(u64, Arc<dyn Object>)> {
        let mut entries = self.entries.lock().expect("object table lock poisoned");
        let mut drained: Vec<_> = entries.drain().collect();
        drained.sort_by(|a, b| b.0.cmp(&a.0));
        drained
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("object table lock poisoned")
            .len()
    }

    /// Whether the table holds no objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self::new()
    }
}
