//! Mailbox runtime surface: stable identities and serialized delivery.
//!
//! The consensus core only consumes three runtime capabilities: a stable
//! identity per actor, serialized delivery of messages to an actor's step
//! function, and a send primitive. [`Router`] provides all three in-process
//! over tokio channels; a network transport would replace it without
//! touching the roles or combinators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::task::JoinMap;
use tracing::{debug, trace};

use crate::messages::Envelope;
use crate::traits::{BatchMachine, Machine};

/// Stable, opaque identity of one mailbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActorId(u64);

impl ActorId {
    /// Build an identity from a raw number.
    ///
    /// Intended for model checking and tests that bring their own identity
    /// scheme; normal code receives identities from [`Router::register`].
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw number behind this identity.
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

struct RouterInner<M> {
    next_id: AtomicU64,
    routes: Mutex<HashMap<ActorId, mpsc::UnboundedSender<M>>>,
}

/// In-process message router: the registry of live mailboxes.
///
/// Cloning is cheap and all clones share the same registry. Delivery to one
/// mailbox is serialized by its channel; delivery between mailboxes carries
/// no ordering guarantee, which is all the protocol assumes.
pub struct Router<M> {
    inner: Arc<RouterInner<M>>,
}

impl<M> Clone for Router<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> Default for Router<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Router<M> {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RouterInner {
                next_id: AtomicU64::new(0),
                routes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a new mailbox, returning its identity and receive side.
    pub fn register(&self) -> (ActorId, mpsc::UnboundedReceiver<M>) {
        let id = ActorId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.routes.lock().unwrap().insert(id, tx);
        trace!(id = id.0, "registered mailbox");
        (id, rx)
    }

    /// Send a message to a mailbox.
    ///
    /// Messages to unknown or closed mailboxes are dropped; lost messages
    /// are recovered by quorum-based retry at higher layers.
    pub fn send(&self, to: ActorId, message: M) {
        let routes = self.inner.routes.lock().unwrap();
        let Some(tx) = routes.get(&to) else {
            trace!(to = to.0, "dropping message to unknown mailbox");
            return;
        };
        if tx.send(message).is_err() {
            trace!(to = to.0, "dropping message to closed mailbox");
        }
    }

    /// Send a collection of addressed messages.
    pub fn deliver(&self, envelopes: impl IntoIterator<Item = Envelope<M>>) {
        for Envelope { to, message } in envelopes {
            self.send(to, message);
        }
    }
}

/// Spawn a machine on its mailbox: one message per step, outputs routed.
pub(crate) fn spawn_machine<M, S>(
    tasks: &mut JoinMap<ActorId, ()>,
    router: &Router<M>,
    id: ActorId,
    mut rx: mpsc::UnboundedReceiver<M>,
    mut machine: S,
) where
    M: Send + 'static,
    S: Machine<M> + Send + 'static,
{
    let router = router.clone();
    tasks.spawn(id, async move {
        while let Some(message) = rx.recv().await {
            router.deliver(machine.step(message));
        }
        debug!(id = id.raw(), "mailbox closed, actor stopping");
    });
}

/// Spawn a batching machine: each tick drains the mailbox and delivers
/// everything pending as one batch.
pub(crate) fn spawn_batch_machine<M, S>(
    tasks: &mut JoinMap<ActorId, ()>,
    router: &Router<M>,
    id: ActorId,
    mut rx: mpsc::UnboundedReceiver<M>,
    mut machine: S,
) where
    M: Send + 'static,
    S: BatchMachine<M> + Send + 'static,
{
    let router = router.clone();
    tasks.spawn(id, async move {
        while let Some(first) = rx.recv().await {
            let mut batch = vec![first];
            while let Ok(next) = rx.try_recv() {
                batch.push(next);
            }
            trace!(id = id.raw(), len = batch.len(), "tick");
            router.deliver(machine.step_batch(batch));
        }
        debug!(id = id.raw(), "mailbox closed, actor stopping");
    });
}
