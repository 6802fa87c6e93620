//! Per-session turn worker.
//!
//! One thread per session owns the conversation history and drains a FIFO of
//! chat turns, so turns on a session never interleave while turns on
//! different sessions run in parallel. A slow reasoning call only delays the
//! turns queued behind it on the same session.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use gridchat_protocol::EventPayload;

use crate::orchestrator::AgentOrchestrator;
use crate::session::broadcast::SyncBroadcaster;
use crate::session::history::History;

/// Identifies who submitted a turn, so their turns can be cancelled together.
pub type Origin = u64;

struct TurnRequest {
    turn: u64,
    text: String,
    cancel: Arc<AtomicBool>,
}

/// A turn that has been queued or is running.
struct Ticket {
    turn: u64,
    origin: Origin,
    cancel: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnTicket {
    pub turn: u64,
    /// Turns ahead of this one when it was queued.
    pub queued_behind: usize,
}

pub struct TurnWorker {
    tx: Mutex<Option<mpsc::Sender<TurnRequest>>>,
    tickets: Arc<Mutex<Vec<Ticket>>>,
    next_turn: AtomicU64,
}

impl TurnWorker {
    pub fn spawn(
        session_id: &str,
        orchestrator: AgentOrchestrator,
        history: History,
        broadcaster: Arc<SyncBroadcaster>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<TurnRequest>();
        let tickets: Arc<Mutex<Vec<Ticket>>> = Arc::new(Mutex::new(Vec::new()));

        let thread_tickets = tickets.clone();
        let thread_session = session_id.to_string();
        let short_id: String = session_id.chars().take(8).collect();
        thread::Builder::new()
            .name(format!("turns-{}", short_id))
            .spawn(move || {
                run_worker(thread_session, orchestrator, history, broadcaster, rx, thread_tickets)
            })?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            tickets,
            next_turn: AtomicU64::new(1),
        })
    }

    /// Queue a chat turn. Returns `None` once the worker has been shut down.
    pub fn submit(&self, text: impl Into<String>, origin: Origin) -> Option<TurnTicket> {
        let tx = self.tx.lock();
        let tx = tx.as_ref()?;

        let turn = self.next_turn.fetch_add(1, Ordering::SeqCst);
        let cancel = Arc::new(AtomicBool::new(false));
        let queued_behind = {
            let mut tickets = self.tickets.lock();
            let ahead = tickets.len();
            tickets.push(Ticket { turn, origin, cancel: cancel.clone() });
            ahead
        };

        if tx.send(TurnRequest { turn, text: text.into(), cancel }).is_err() {
            self.tickets.lock().retain(|t| t.turn != turn);
            return None;
        }
        Some(TurnTicket { turn, queued_behind })
    }

    /// Queued plus running turns.
    pub fn pending(&self) -> usize {
        self.tickets.lock().len()
    }

    /// Cancel every queued or running turn from `origin`. Returns how many
    /// were flagged.
    pub fn cancel_from(&self, origin: Origin) -> usize {
        let tickets = self.tickets.lock();
        let mut cancelled = 0;
        for ticket in tickets.iter().filter(|t| t.origin == origin) {
            ticket.cancel.store(true, Ordering::SeqCst);
            cancelled += 1;
        }
        cancelled
    }

    /// Stop accepting turns and cancel everything outstanding. The thread
    /// exits once its queue is drained.
    pub fn shutdown(&self) {
        self.tx.lock().take();
        for ticket in self.tickets.lock().iter() {
            ticket.cancel.store(true, Ordering::SeqCst);
        }
    }
}

impl Drop for TurnWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    session_id: String,
    orchestrator: AgentOrchestrator,
    mut history: History,
    broadcaster: Arc<SyncBroadcaster>,
    rx: mpsc::Receiver<TurnRequest>,
    tickets: Arc<Mutex<Vec<Ticket>>>,
) {
    log::debug!("session {}: turn worker started", session_id);

    while let Ok(request) = rx.recv() {
        let TurnRequest { turn, text, cancel } = request;

        if cancel.load(Ordering::SeqCst) {
            log::debug!("session {}: turn {} cancelled before it started", session_id, turn);
        } else {
            match orchestrator.run_turn(&mut history, &text, &cancel) {
                Ok(_) if cancel.load(Ordering::SeqCst) => {
                    log::info!("session {}: turn {} cancelled after it finished", session_id, turn);
                }
                Ok(outcome) => {
                    broadcaster.publish(EventPayload::ChatReply {
                        turn,
                        text: outcome.reply,
                        error: None,
                    });
                }
                Err(failure) if cancel.load(Ordering::SeqCst) => {
                    // Partial results of a cancelled turn are not announced
                    log::info!(
                        "session {}: turn {} cancelled ({} changes kept)",
                        session_id,
                        turn,
                        failure.deltas.len()
                    );
                }
                Err(failure) => {
                    broadcaster.publish(EventPayload::ChatReply {
                        turn,
                        text: failure.note,
                        error: Some(failure.error.code().to_string()),
                    });
                }
            }
        }

        tickets.lock().retain(|t| t.turn != turn);
    }

    log::debug!("session {}: turn worker stopped", session_id);
}
