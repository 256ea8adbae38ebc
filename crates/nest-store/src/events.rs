//! Post-commit entity events.
//!
//! Mutations queue [`EntityEvent`]s on their context; the batch is handed to
//! the [`EventBus`] only after the key-space transaction commits. Delivery
//! happens on a dedicated dispatcher thread, so a slow listener never holds
//! the writer slot. With a bounded queue, a batch that finds the queue full
//! is dropped with a warning instead of stalling the committer.
//!
//! The listener table is an immutable snapshot behind an [`ArcSwap`]:
//! dispatch loads it without locking, registration copies and swaps it under
//! a mutex.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// What happened to an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

/// One committed change to one entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityEvent {
    pub kind: EventKind,
    pub entity_type: String,
    pub id: String,
}

impl EntityEvent {
    pub fn new(kind: EventKind, entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind,
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}

/// Handle returned by [`EventBus::add_listener`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler = Arc<dyn Fn(&EntityEvent) + Send + Sync>;

#[derive(Clone)]
struct Registration {
    id: ListenerId,
    kind: EventKind,
    entity_type: Option<String>,
    handler: Handler,
}

impl Registration {
    fn matches(&self, event: &EntityEvent) -> bool {
        self.kind == event.kind
            && self
                .entity_type
                .as_deref()
                .map_or(true, |t| t == event.entity_type)
    }
}

enum Message {
    Batch(Vec<EntityEvent>),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
enum Outbox {
    Unbounded(mpsc::UnboundedSender<Message>),
    Bounded(mpsc::Sender<Message>),
}

impl Outbox {
    /// Queue without waiting. Committers go through here so a slow
    /// dispatcher never holds them up.
    fn try_send(&self, msg: Message) -> Result<(), &'static str> {
        match self {
            Self::Unbounded(tx) => tx.send(msg).map_err(|_| "closed"),
            Self::Bounded(tx) => tx.try_send(msg).map_err(|e| match e {
                TrySendError::Full(_) => "full",
                TrySendError::Closed(_) => "closed",
            }),
        }
    }

    /// Queue, waiting for room. Must not be called from async code.
    fn send(&self, msg: Message) -> bool {
        match self {
            Self::Unbounded(tx) => tx.send(msg).is_ok(),
            Self::Bounded(tx) => tx.blocking_send(msg).is_ok(),
        }
    }
}

enum Inbox {
    Unbounded(mpsc::UnboundedReceiver<Message>),
    Bounded(mpsc::Receiver<Message>),
}

impl Inbox {
    fn recv(&mut self) -> Option<Message> {
        match self {
            Self::Unbounded(rx) => rx.blocking_recv(),
            Self::Bounded(rx) => rx.blocking_recv(),
        }
    }
}

/// Cloneable sending half, moved into commit hooks.
#[derive(Clone)]
pub(crate) struct Publisher(Outbox);

impl Publisher {
    pub(crate) fn publish(&self, events: Vec<EntityEvent>) {
        if events.is_empty() {
            return;
        }
        let count = events.len();
        if let Err(reason) = self.0.try_send(Message::Batch(events)) {
            warn!(count, reason, "event queue rejected batch; dropping events");
        }
    }
}

/// Registry of listeners plus the dispatcher thread that feeds them.
pub struct EventBus {
    listeners: Arc<ArcSwap<Vec<Registration>>>,
    write_lock: Mutex<()>,
    next_id: AtomicU64,
    outbox: Option<Outbox>,
    worker: Option<JoinHandle<()>>,
}

impl EventBus {
    /// Start a bus. `capacity` bounds the number of queued batches; 0 means
    /// unbounded.
    pub fn new(capacity: usize) -> StoreResult<Self> {
        let (outbox, inbox) = if capacity == 0 {
            let (tx, rx) = mpsc::unbounded_channel();
            (Outbox::Unbounded(tx), Inbox::Unbounded(rx))
        } else {
            let (tx, rx) = mpsc::channel(capacity);
            (Outbox::Bounded(tx), Inbox::Bounded(rx))
        };

        let listeners: Arc<ArcSwap<Vec<Registration>>> = Arc::new(ArcSwap::from_pointee(Vec::new()));
        let table = listeners.clone();
        let worker = std::thread::Builder::new()
            .name("nest-events".into())
            .spawn(move || dispatch_loop(inbox, table))
            .map_err(|e| StoreError::Dispatcher(e.to_string()))?;

        Ok(Self {
            listeners,
            write_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
            outbox: Some(outbox),
            worker: Some(worker),
        })
    }

    /// Register `handler` for events of `kind`, optionally restricted to one
    /// entity type.
    pub fn add_listener(
        &self,
        kind: EventKind,
        entity_type: Option<&str>,
        handler: impl Fn(&EntityEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let registration = Registration {
            id,
            kind,
            entity_type: entity_type.map(str::to_string),
            handler: Arc::new(handler),
        };
        let _guard = self.write_lock.lock();
        let mut table = Vec::clone(&self.listeners.load());
        table.push(registration);
        self.listeners.store(Arc::new(table));
        debug!(listener = id.0, %kind, entity_type, "listener registered");
        id
    }

    /// Unregister a listener. Returns `true` if it was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let _guard = self.write_lock.lock();
        let mut table = Vec::clone(&self.listeners.load());
        let before = table.len();
        table.retain(|r| r.id != id);
        let removed = table.len() != before;
        self.listeners.store(Arc::new(table));
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.load().len()
    }

    pub(crate) fn publisher(&self) -> Option<Publisher> {
        self.outbox.clone().map(Publisher)
    }

    /// Queue a batch for delivery.
    pub fn publish(&self, events: Vec<EntityEvent>) {
        if let Some(p) = self.publisher() {
            p.publish(events);
        }
    }

    /// Block until every batch queued before this call has been delivered.
    ///
    /// Returns immediately when called from a listener. Must not be called
    /// from async code.
    pub fn flush(&self) {
        if self.on_worker_thread() {
            return;
        }
        let Some(outbox) = &self.outbox else {
            return;
        };
        let (done, wait) = oneshot::channel();
        if outbox.send(Message::Flush(done)) {
            let _ = wait.blocking_recv();
        }
    }

    fn on_worker_thread(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| w.thread().id() == std::thread::current().id())
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        // Closing the channel ends the loop once queued batches are drained.
        self.outbox.take();
        if self.on_worker_thread() {
            return;
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

fn dispatch_loop(mut inbox: Inbox, listeners: Arc<ArcSwap<Vec<Registration>>>) {
    while let Some(msg) = inbox.recv() {
        match msg {
            Message::Batch(events) => {
                let table = listeners.load();
                for event in &events {
                    for registration in table.iter().filter(|r| r.matches(event)) {
                        let handler = &registration.handler;
                        if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                            warn!(
                                listener = registration.id.0,
                                kind = %event.kind,
                                entity_type = %event.entity_type,
                                id = %event.id,
                                "event listener panicked"
                            );
                        }
                    }
                }
            }
            Message::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("event dispatcher stopped");
}
