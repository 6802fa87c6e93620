//! Sessions: one canonical grid, its observers and its turn queue.

pub mod broadcast;
pub mod history;
pub mod registry;
pub mod worker;

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use gridchat_engine::{Extent, Snapshot, SpreadsheetEngine};
use gridchat_protocol::EventPayload;

pub use broadcast::{ObserverId, SyncBroadcaster};
pub use history::{History, Message, Role, ToolCall};
pub use registry::{RegistryError, SessionRegistry, SessionSettings};
pub use worker::{Origin, TurnTicket, TurnWorker};

/// What an observer gets when it joins: a snapshot and the events after it.
pub struct Attachment {
    pub observer: ObserverId,
    pub snapshot: Snapshot,
    pub events: Receiver<EventPayload>,
}

/// Summary for `list` and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub sequence: u64,
    pub rows: usize,
    pub cols: usize,
    pub observers: usize,
    pub pending_turns: usize,
}

pub struct Session {
    id: String,
    name: String,
    created_at: DateTime<Utc>,
    engine: Arc<Mutex<SpreadsheetEngine>>,
    broadcaster: Arc<SyncBroadcaster>,
    worker: TurnWorker,
    last_active: Mutex<Instant>,
}

impl Session {
    pub(crate) fn new(
        name: String,
        engine: Arc<Mutex<SpreadsheetEngine>>,
        broadcaster: Arc<SyncBroadcaster>,
        worker: TurnWorker,
    ) -> Self {
        let id = broadcaster.session_id().to_string();
        Self {
            id,
            name,
            created_at: Utc::now(),
            engine,
            broadcaster,
            worker,
            last_active: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Join as an observer.
    ///
    /// The snapshot is taken and the subscription made under the engine
    /// lock, so the first event received is the commit right after the
    /// snapshot's sequence.
    pub fn attach(&self) -> Attachment {
        let (snapshot, observer, events) = {
            let engine = self.engine.lock();
            let snapshot = engine.snapshot();
            let (observer, events) = self.broadcaster.subscribe();
            (snapshot, observer, events)
        };
        self.touch();
        Attachment { observer, snapshot, events }
    }

    pub fn detach(&self, observer: ObserverId) -> bool {
        self.touch();
        self.broadcaster.unsubscribe(observer)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.touch();
        self.engine.lock().snapshot()
    }

    pub fn sequence(&self) -> u64 {
        self.engine.lock().sequence()
    }

    pub fn extent(&self) -> Extent {
        self.engine.lock().extent()
    }

    /// Queue a chat turn on this session.
    pub fn submit(&self, text: impl Into<String>, origin: Origin) -> Option<TurnTicket> {
        self.touch();
        self.worker.submit(text, origin)
    }

    /// Cancel turns submitted by `origin` (a closed connection).
    pub fn cancel_origin(&self, origin: Origin) -> usize {
        self.worker.cancel_from(origin)
    }

    pub fn pending_turns(&self) -> usize {
        self.worker.pending()
    }

    pub fn observer_count(&self) -> usize {
        self.broadcaster.observer_count()
    }

    /// Set once the session has been closed.
    pub fn closed_reason(&self) -> Option<String> {
        self.broadcaster.closed_reason()
    }

    pub fn info(&self) -> SessionInfo {
        let (sequence, extent) = {
            let engine = self.engine.lock();
            (engine.sequence(), engine.extent())
        };
        SessionInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            created_at: self.created_at,
            sequence,
            rows: extent.rows,
            cols: extent.cols,
            observers: self.observer_count(),
            pending_turns: self.pending_turns(),
        }
    }

    /// No observers, no turns and nothing happened for `ttl`.
    pub fn is_idle(&self, now: Instant, ttl: Duration) -> bool {
        self.observer_count() == 0
            && self.pending_turns() == 0
            && now.saturating_duration_since(*self.last_active.lock()) >= ttl
    }

    /// Stop the turn queue and tell observers the session is gone.
    pub(crate) fn close(&self, reason: &str) {
        self.worker.shutdown();
        self.broadcaster.close(reason);
    }

    fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }
}
