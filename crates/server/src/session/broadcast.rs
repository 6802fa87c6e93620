//! Per-session push fan-out.
//!
//! Every observer gets a bounded channel. Publishing never blocks: an observer
//! whose queue is full is detached on the spot, which drops its sender. The
//! connection drains what was already queued, sees the channel disconnect, and
//! tells its client to re-attach for a fresh snapshot. An observer therefore
//! either receives a gap-free run of deltas or is told it fell behind.
//!
//! Closing records the reason before dropping every sender, so a connection
//! whose queue was too full for the final `session-closed` can still tell a
//! close from an overflow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, TrySendError};

use parking_lot::Mutex;

use gridchat_protocol::EventPayload;

pub type ObserverId = u64;

pub struct SyncBroadcaster {
    session_id: String,
    observers: Mutex<Vec<(ObserverId, mpsc::SyncSender<EventPayload>)>>,
    next_id: AtomicU64,
    queue_depth: usize,
    /// Observers detached because their queue overflowed.
    overflowed: AtomicU64,
    closed: Mutex<Option<String>>,
}

impl SyncBroadcaster {
    pub fn new(session_id: impl Into<String>, queue_depth: usize) -> Self {
        Self {
            session_id: session_id.into(),
            observers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            queue_depth: queue_depth.max(1),
            overflowed: AtomicU64::new(0),
            closed: Mutex::new(None),
        }
    }

    /// Register an observer. Callers that need the subscription to line up
    /// with a snapshot must hold the engine lock across both.
    pub fn subscribe(&self) -> (ObserverId, mpsc::Receiver<EventPayload>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::sync_channel(self.queue_depth);
        self.observers.lock().push((id, tx));
        log::debug!("session {}: observer {} attached", self.session_id, id);
        (id, rx)
    }

    /// Returns false when the observer was already gone.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        before != observers.len()
    }

    /// Deliver `payload` to every attached observer. Returns how many
    /// observers received it.
    pub fn publish(&self, payload: EventPayload) -> usize {
        let mut observers = self.observers.lock();
        let mut delivered = 0;
        observers.retain(|(id, tx)| match tx.try_send(payload.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                self.overflowed.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "session {}: observer {} fell behind ({} queued), detaching",
                    self.session_id,
                    id,
                    self.queue_depth
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        delivered
    }

    /// Push a final `session-closed` and detach everyone.
    pub fn close(&self, reason: &str) {
        let mut observers = self.observers.lock();
        *self.closed.lock() = Some(reason.to_string());
        for (_, tx) in observers.iter() {
            let _ = tx.try_send(EventPayload::SessionClosed { reason: reason.to_string() });
        }
        observers.clear();
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Reason given to [`SyncBroadcaster::close`], once closed.
    pub fn closed_reason(&self) -> Option<String> {
        self.closed.lock().clone()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn overflowed(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::TryRecvError;

    fn reply(turn: u64) -> EventPayload {
        EventPayload::ChatReply { turn, text: format!("turn {}", turn), error: None }
    }

    fn turn_of(payload: EventPayload) -> u64 {
        match payload {
            EventPayload::ChatReply { turn, .. } => turn,
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_publish_reaches_every_observer_in_order() {
        let broadcaster = SyncBroadcaster::new("s", 8);
        let (_a, rx_a) = broadcaster.subscribe();
        let (_b, rx_b) = broadcaster.subscribe();

        for turn in 1..=3 {
            assert_eq!(broadcaster.publish(reply(turn)), 2);
        }

        for rx in [rx_a, rx_b] {
            let turns: Vec<u64> = rx.try_iter().map(turn_of).collect();
            assert_eq!(turns, vec![1, 2, 3]);
        }
    }

    #[test]
    fn test_slow_observer_is_detached_without_affecting_others() {
        let broadcaster = SyncBroadcaster::new("s", 2);
        let (_slow, rx_slow) = broadcaster.subscribe();
        let (_fast, rx_fast) = broadcaster.subscribe();

        broadcaster.publish(reply(1));
        assert_eq!(turn_of(rx_fast.try_recv().unwrap()), 1);
        broadcaster.publish(reply(2));
        assert_eq!(turn_of(rx_fast.try_recv().unwrap()), 2);
        // Slow observer's queue is now full
        assert_eq!(broadcaster.publish(reply(3)), 1);
        assert_eq!(turn_of(rx_fast.try_recv().unwrap()), 3);

        assert_eq!(broadcaster.observer_count(), 1);
        assert_eq!(broadcaster.overflowed(), 1);

        // What was queued is still delivered, then the channel reports the detach
        let turns: Vec<u64> = rx_slow.try_iter().map(turn_of).collect();
        assert_eq!(turns, vec![1, 2]);
        assert_eq!(rx_slow.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let broadcaster = SyncBroadcaster::new("s", 4);
        let (id, rx) = broadcaster.subscribe();
        assert!(broadcaster.unsubscribe(id));
        assert!(!broadcaster.unsubscribe(id));
        assert_eq!(broadcaster.publish(reply(1)), 0);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let broadcaster = SyncBroadcaster::new("s", 4);
        let (_id, rx) = broadcaster.subscribe();
        drop(rx);
        broadcaster.publish(reply(1));
        assert_eq!(broadcaster.observer_count(), 0);
        assert_eq!(broadcaster.overflowed(), 0);
    }

    #[test]
    fn test_close_notifies_and_detaches() {
        let broadcaster = SyncBroadcaster::new("s", 4);
        let (_id, rx) = broadcaster.subscribe();
        broadcaster.close("closed by client");

        match rx.try_recv().unwrap() {
            EventPayload::SessionClosed { reason } => assert_eq!(reason, "closed by client"),
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
        assert_eq!(broadcaster.observer_count(), 0);
    }

    #[test]
    fn test_close_with_full_queue_keeps_reason() {
        let broadcaster = SyncBroadcaster::new("s", 1);
        let (_id, rx) = broadcaster.subscribe();
        broadcaster.publish(reply(1));
        assert_eq!(broadcaster.closed_reason(), None);

        broadcaster.close("closed by client");
        assert_eq!(broadcaster.closed_reason().as_deref(), Some("closed by client"));

        // The notice did not fit; the queued reply drains, then the channel ends
        assert_eq!(turn_of(rx.try_recv().unwrap()), 1);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
    }
}
