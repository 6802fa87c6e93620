//! Map of live sessions.
//!
//! Sessions share nothing. Each has its own engine, broadcaster, history and
//! turn worker; the registry only hands out `Arc<Session>` by id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use gridchat_config::Settings;
use gridchat_core::{InitialGrid, MatchMode};
use gridchat_engine::SpreadsheetEngine;
use gridchat_protocol::codes;

use crate::ai::{build_system_prompt, ReasoningAgent};
use crate::orchestrator::{AgentOrchestrator, DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_TOOL_RESULT_CHARS};
use crate::session::broadcast::SyncBroadcaster;
use crate::session::history::History;
use crate::session::worker::TurnWorker;
use crate::session::{Session, SessionInfo};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no session with id '{0}'")]
    NotFound(String),
    #[error("failed to start session worker: {0}")]
    Spawn(#[from] std::io::Error),
}

impl RegistryError {
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::NotFound(_) => codes::NOT_FOUND,
            RegistryError::Spawn(_) => codes::INTERNAL_ERROR,
        }
    }
}

/// Per-session knobs, taken from [`Settings`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub match_mode: MatchMode,
    pub max_iterations: u32,
    pub max_tool_result_chars: usize,
    pub sample_rows: usize,
    pub sample_cols: usize,
    pub observer_queue_depth: usize,
    pub idle_ttl: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            match_mode: MatchMode::Exact,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tool_result_chars: DEFAULT_MAX_TOOL_RESULT_CHARS,
            sample_rows: 10,
            sample_cols: 12,
            observer_queue_depth: 256,
            idle_ttl: Duration::from_secs(300),
        }
    }
}

impl From<&Settings> for SessionSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            match_mode: settings.engine.match_mode,
            max_iterations: settings.agent.max_iterations,
            max_tool_result_chars: settings.agent.max_tool_result_chars,
            sample_rows: settings.agent.sample_rows,
            sample_cols: settings.agent.sample_cols,
            observer_queue_depth: settings.server.observer_queue_depth,
            idle_ttl: Duration::from_secs(settings.server.idle_session_ttl_secs),
        }
    }
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    agent: Arc<dyn ReasoningAgent>,
    settings: SessionSettings,
}

impl SessionRegistry {
    pub fn new(agent: Arc<dyn ReasoningAgent>, settings: SessionSettings) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            agent,
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Start a session from an uploaded grid.
    pub fn create(&self, grid: InitialGrid) -> Result<Arc<Session>, RegistryError> {
        let id = uuid::Uuid::new_v4().to_string();
        let name = grid.name.clone();
        let engine = SpreadsheetEngine::new(id.clone(), grid, self.settings.match_mode);
        let prompt = build_system_prompt(&engine.describe(self.settings.sample_rows, self.settings.sample_cols));

        let engine = Arc::new(Mutex::new(engine));
        let broadcaster = Arc::new(SyncBroadcaster::new(id.clone(), self.settings.observer_queue_depth));
        let dispatcher = crate::tools::ToolDispatcher::new(engine.clone(), broadcaster.clone())
            .with_sample(self.settings.sample_rows, self.settings.sample_cols);
        let orchestrator = AgentOrchestrator::new(self.agent.clone(), dispatcher)
            .with_max_iterations(self.settings.max_iterations)
            .with_max_tool_result_chars(self.settings.max_tool_result_chars);
        let worker = TurnWorker::spawn(&id, orchestrator, History::new(prompt), broadcaster.clone())?;

        let session = Arc::new(Session::new(name, engine, broadcaster, worker));
        self.sessions.write().insert(id.clone(), session.clone());
        log::info!("session {} created ('{}')", id, session.name());
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Result<Arc<Session>, RegistryError> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Remove a session, cancel its turns and notify its observers.
    pub fn close(&self, id: &str, reason: &str) -> Result<(), RegistryError> {
        let session = self
            .sessions
            .write()
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        session.close(reason);
        log::info!("session {} closed: {}", id, reason);
        Ok(())
    }

    /// Cancel turns from a disconnected connection across all sessions.
    pub fn cancel_origin(&self, origin: u64) -> usize {
        self.sessions
            .read()
            .values()
            .map(|s| s.cancel_origin(origin))
            .sum()
    }

    /// Close sessions that have been idle longer than the configured TTL.
    pub fn reap_idle(&self) -> Vec<String> {
        self.reap_idle_at(Instant::now())
    }

    pub fn reap_idle_at(&self, now: Instant) -> Vec<String> {
        let idle: Vec<String> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.is_idle(now, self.settings.idle_ttl))
            .map(|s| s.id().to_string())
            .collect();

        for id in &idle {
            // Already gone if a client closed it in between
            let _ = self.close(id, "idle timeout");
        }
        idle
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self.sessions.read().values().map(|s| s.info()).collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        infos
    }

    pub fn close_all(&self, reason: &str) {
        let sessions: Vec<Arc<Session>> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::RecvTimeoutError;

    use gridchat_protocol::EventPayload;

    use crate::ai::AgentReply;
    use crate::orchestrator::tests::{call, ScriptedAgent};

    const WAIT: Duration = Duration::from_secs(5);

    fn registry(agent: ScriptedAgent) -> SessionRegistry {
        SessionRegistry::new(Arc::new(agent), SessionSettings::default())
    }

    fn grid() -> InitialGrid {
        InitialGrid::from_text_rows("nums", vec![vec!["1", "2"], vec!["3", "4"]])
    }

    #[test]
    fn test_create_get_close() {
        let registry = registry(ScriptedAgent::new(vec![]));
        let session = registry.create(grid()).unwrap();
        let id = session.id().to_string();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&id).unwrap().name(), "nums");
        assert_eq!(session.sequence(), 0);

        registry.close(&id, "bye").unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.get(&id).err().map(|e| e.code()), Some("not_found"));
        assert!(matches!(registry.close(&id, "again"), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_close_notifies_observers() {
        let registry = registry(ScriptedAgent::new(vec![]));
        let session = registry.create(grid()).unwrap();
        let attachment = session.attach();
        assert_eq!(attachment.snapshot.sequence, 0);

        registry.close(session.id(), "done").unwrap();
        assert_eq!(
            attachment.events.recv_timeout(WAIT).unwrap(),
            EventPayload::SessionClosed { reason: "done".into() }
        );
    }

    #[test]
    fn test_close_reason_survives_full_queue() {
        let settings = SessionSettings { observer_queue_depth: 1, ..SessionSettings::default() };
        let registry = SessionRegistry::new(Arc::new(ScriptedAgent::new(vec![])), settings);
        let session = registry.create(grid()).unwrap();
        let attachment = session.attach();

        // One chat reply fills the queue
        session.submit("hi", 1).unwrap();
        let deadline = std::time::Instant::now() + WAIT;
        while session.pending_turns() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        registry.close(session.id(), "done").unwrap();
        assert_eq!(session.closed_reason().as_deref(), Some("done"));
        assert!(matches!(attachment.events.recv_timeout(WAIT).unwrap(), EventPayload::ChatReply { .. }));
        assert_eq!(attachment.events.recv_timeout(WAIT), Err(RecvTimeoutError::Disconnected));
    }

    #[test]
    fn test_sessions_are_isolated() {
        let agent = ScriptedAgent::new(vec![
            Ok(AgentReply::calls(vec![call("c1", "write_range", r#"{"range":"A1","values":[[99]]}"#)])),
            Ok(AgentReply::text("ok")),
        ]);
        let registry = registry(agent);
        let a = registry.create(grid()).unwrap();
        let b = registry.create(grid()).unwrap();
        assert_ne!(a.id(), b.id());

        let a_events = a.attach().events;
        let b_events = b.attach().events;
        a.submit("write", 1).unwrap();

        match a_events.recv_timeout(WAIT).unwrap() {
            EventPayload::StateDelta { sequence, .. } => assert_eq!(sequence, 1),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(a_events.recv_timeout(WAIT).unwrap(), EventPayload::ChatReply { .. }));
        assert_eq!(
            b_events.recv_timeout(Duration::from_millis(100)).unwrap_err(),
            RecvTimeoutError::Timeout
        );
        assert_eq!(b.sequence(), 0);
        assert_eq!(a.sequence(), 1);
    }

    #[test]
    fn test_reap_idle() {
        let registry = SessionRegistry::new(
            Arc::new(ScriptedAgent::new(vec![])),
            SessionSettings { idle_ttl: Duration::from_secs(60), ..SessionSettings::default() },
        );
        let idle = registry.create(grid()).unwrap();
        let watched = registry.create(grid()).unwrap();
        let _attachment = watched.attach();

        assert!(registry.reap_idle_at(Instant::now()).is_empty());

        let later = Instant::now() + Duration::from_secs(120);
        assert_eq!(registry.reap_idle_at(later), vec![idle.id().to_string()]);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(watched.id()).is_ok());
    }

    #[test]
    fn test_list_reports_sessions() {
        let registry = registry(ScriptedAgent::new(vec![]));
        registry.create(grid()).unwrap();
        registry.create(InitialGrid::empty("blank", 5, 3)).unwrap();

        let infos = registry.list();
        assert_eq!(infos.len(), 2);
        let blank = infos.iter().find(|i| i.name == "blank").unwrap();
        assert_eq!((blank.rows, blank.cols), (5, 3));
        assert_eq!(blank.pending_turns, 0);
    }
}
