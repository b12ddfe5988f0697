//! Session management for WebSocket connections
//!
//! One session per connection. A session runs at most one analysis at a
//! time and keeps a short history of the runs it has served.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{GatewayError, Result};

/// Unique session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("session:{}", Uuid::new_v4()))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Connected, backend probe pending
    Connecting,
    /// Waiting for a scenario
    Idle,
    /// Running an analysis
    Busy,
    /// Connection closed
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// One analysis served by a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRun {
    /// Pipeline session id
    pub id: Uuid,

    pub scenario: String,

    pub status: RunStatus,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Error (if failed)
    pub error: Option<String>,
}

/// Session - one WebSocket connection
#[derive(Debug, Clone)]
pub struct Session {
    /// Session ID
    pub id: SessionId,

    /// Current state
    pub state: SessionState,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last activity timestamp
    pub last_activity: DateTime<Utc>,

    /// Cancelled when the connection goes away
    cancel: CancellationToken,

    runs: VecDeque<AnalysisRun>,

    history_limit: usize,
}

impl Session {
    /// Create a new session
    pub fn new(history_limit: usize) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            state: SessionState::Connecting,
            created_at: now,
            last_activity: now,
            cancel: CancellationToken::new(),
            runs: VecDeque::new(),
            history_limit: history_limit.max(1),
        }
    }

    /// Backend probe passed
    pub fn activate(&mut self) {
        self.state = SessionState::Idle;
        self.touch();
    }

    /// End the session and abandon any running analysis
    pub fn end(&mut self) {
        self.state = SessionState::Ended;
        self.cancel.cancel();
        self.touch();
    }

    /// Update last activity
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.state == SessionState::Busy
    }

    /// Record the start of an analysis
    pub fn start_run(&mut self, id: Uuid, scenario: impl Into<String>) {
        if self.runs.len() >= self.history_limit {
            self.runs.pop_front();
        }
        self.runs.push_back(AnalysisRun {
            id,
            scenario: scenario.into(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        });
        self.state = SessionState::Busy;
        self.touch();
    }

    /// Complete an analysis
    pub fn complete_run(&mut self, id: Uuid) -> Result<()> {
        self.finish_run(id, RunStatus::Completed, None)
    }

    /// Fail an analysis
    pub fn fail_run(&mut self, id: Uuid, error: impl Into<String>) -> Result<()> {
        self.finish_run(id, RunStatus::Failed, Some(error.into()))
    }

    fn finish_run(&mut self, id: Uuid, status: RunStatus, error: Option<String>) -> Result<()> {
        let run = self
            .runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| GatewayError::SessionNotFound(format!("Run not found: {}", id)))?;

        run.status = status;
        run.completed_at = Some(Utc::now());
        run.error = error;
        if self.state == SessionState::Busy {
            self.state = SessionState::Idle;
        }
        self.touch();
        Ok(())
    }

    pub fn runs(&self) -> impl Iterator<Item = &AnalysisRun> {
        self.runs.iter()
    }

    /// Get session info
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            state: self.state,
            created_at: self.created_at,
            last_activity: self.last_activity,
            current_scenario: self
                .runs
                .back()
                .filter(|r| r.status == RunStatus::Running)
                .map(|r| r.scenario.clone()),
            total_runs: self.runs.len(),
        }
    }
}

/// Session summary info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub current_scenario: Option<String>,
    pub total_runs: usize,
}

/// Session manager - handles all sessions
pub struct SessionManager {
    /// Active sessions
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,

    /// Maximum concurrent sessions
    max_sessions: usize,

    history_limit: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize, history_limit: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_sessions,
            history_limit,
        }
    }

    /// Create a new session
    pub fn create_session(&self) -> Result<(SessionId, CancellationToken)> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.max_sessions {
            return Err(GatewayError::Internal(format!(
                "Connection limit reached ({})",
                self.max_sessions
            )));
        }

        let session = Session::new(self.history_limit);
        let id = session.id.clone();
        let token = session.cancellation();
        sessions.insert(id.clone(), session);

        tracing::info!("Session created: {}", id);
        Ok((id, token))
    }

    /// Whether another connection would be accepted
    pub fn has_capacity(&self) -> bool {
        self.sessions.read().len() < self.max_sessions
    }

    /// Get a session by ID
    pub fn get_session(&self, id: &SessionId) -> Option<Session> {
        self.sessions.read().get(id).cloned()
    }

    /// Update a session
    pub fn update_session<F, T>(&self, id: &SessionId, f: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> T,
    {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(id) {
            Some(session) => Ok(f(session)),
            None => Err(GatewayError::SessionNotFound(id.to_string())),
        }
    }

    /// End a session
    pub fn end_session(&self, id: &SessionId) -> Result<()> {
        match self.sessions.write().remove(id) {
            Some(mut session) => {
                session.end();
                tracing::info!("Session ended: {}", id);
                Ok(())
            }
            None => Err(GatewayError::SessionNotFound(id.to_string())),
        }
    }

    /// Get all active sessions
    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        self.sessions.read().values().map(Session::info).collect()
    }

    /// Sessions currently running an analysis
    pub fn busy_count(&self) -> usize {
        self.sessions.read().values().filter(|s| s.is_busy()).count()
    }

    /// Get session count
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}
