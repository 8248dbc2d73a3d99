//! Session Registry
//!
//! Per-session streaming-state ledger. A session is a client-visible channel
//! that allows at most one active generation at a time.
//!
//! # Design Philosophy
//!
//! The registry is the only state shared between concurrently running jobs.
//! Every operation is atomic with respect to a single session entry (the
//! `DashMap` shard lock), and no operation ever holds a lock across sessions
//! or across an await point. Operations never fail; they report what they did
//! with booleans and counts.
//!
//! Cancellation is cooperative: [`SessionRegistry::cancel`] triggers the job's
//! [`CancellationToken`], and the task running the job observes it at its next
//! poll point.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::messages::{JobId, SessionId};

// ============================================================================
// Session State
// ============================================================================

/// State for one session
///
/// Invariant: `streaming == false` implies `current_job_id.is_none()` and
/// `cancel.is_none()`.
#[derive(Debug)]
struct Session {
    streaming: bool,
    current_job_id: Option<JobId>,
    cancel: Option<CancellationToken>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    active_tasks: Vec<AbortHandle>,
}

impl Session {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            streaming: false,
            current_job_id: None,
            cancel: None,
            created_at: now,
            last_activity: now,
            active_tasks: Vec::new(),
        }
    }

    fn release(&mut self) {
        self.streaming = false;
        self.current_job_id = None;
        self.cancel = None;
        self.active_tasks.clear();
        self.last_activity = Utc::now();
    }
}

/// Snapshot of a session for status queries
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Whether a job is currently streaming
    pub streaming: bool,
    /// The streaming job, if any
    pub job_id: Option<JobId>,
    /// When the session was first seen
    pub created_at: DateTime<Utc>,
    /// Last time the session started, stopped or was touched
    pub last_activity: DateTime<Utc>,
}

// ============================================================================
// Registry
// ============================================================================

/// Registry of all sessions known to this process
///
/// Sessions are created lazily on first use and reaped by
/// [`sweep_expired`](Self::sweep_expired) once idle for long enough.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Session>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically mark the session as streaming `job_id`
    ///
    /// Returns `true` iff the session was not already streaming. A `false`
    /// return has no side effect.
    pub fn try_start(&self, session_id: &SessionId, job_id: JobId) -> bool {
        self.start_job(session_id, job_id).is_some()
    }

    /// Like [`try_start`](Self::try_start), but hands back the job's cancel token
    pub fn start_job(&self, session_id: &SessionId, job_id: JobId) -> Option<CancellationToken> {
        let now = Utc::now();
        let mut session = self
            .sessions
            .entry(session_id.clone())
            .or_insert_with(|| Session::new(now));

        if session.streaming {
            return None;
        }

        let token = CancellationToken::new();
        session.streaming = true;
        session.current_job_id = Some(job_id);
        session.cancel = Some(token.clone());
        session.last_activity = now;
        Some(token)
    }

    /// Start a job and return a guard that releases the session when dropped
    pub fn begin(self: &Arc<Self>, session_id: &SessionId, job_id: JobId) -> Option<SessionGuard> {
        let token = self.start_job(session_id, job_id)?;
        Some(SessionGuard {
            registry: Arc::clone(self),
            session_id: session_id.clone(),
            job_id,
            token,
            released: false,
        })
    }

    /// Mark the session as not streaming. Idempotent.
    pub fn stop(&self, session_id: &SessionId) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.release();
        }
    }

    /// Stop the session only if `job_id` is the job currently streaming
    ///
    /// Returns whether the session was released.
    pub fn stop_job(&self, session_id: &SessionId, job_id: JobId) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut session) if session.current_job_id == Some(job_id) => {
                session.release();
                true
            }
            _ => false,
        }
    }

    /// Request cancellation of the session's active job
    ///
    /// Returns `false` with no effect when the session is not streaming.
    pub fn cancel(&self, session_id: &SessionId) -> bool {
        let Some(session) = self.sessions.get(session_id) else {
            return false;
        };
        match (&session.cancel, session.streaming) {
            (Some(token), true) => {
                token.cancel();
                tracing::debug!(session_id = %session_id, "Cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Request cancellation only if `job_id` is the job currently streaming
    ///
    /// A caller that owns one job can never cancel a later job that reused
    /// the same session.
    pub fn cancel_job(&self, session_id: &SessionId, job_id: JobId) -> bool {
        let Some(session) = self.sessions.get(session_id) else {
            return false;
        };
        match &session.cancel {
            Some(token) if session.streaming && session.current_job_id == Some(job_id) => {
                token.cancel();
                tracing::debug!(
                    session_id = %session_id,
                    job_id = %job_id,
                    "Cancellation requested for job"
                );
                true
            }
            _ => false,
        }
    }

    /// Whether the session's active job has been asked to cancel
    #[must_use]
    pub fn is_cancelled(&self, session_id: &SessionId) -> bool {
        self.sessions
            .get(session_id)
            .and_then(|s| s.cancel.as_ref().map(CancellationToken::is_cancelled))
            .unwrap_or(false)
    }

    /// Whether the session currently has a streaming job
    #[must_use]
    pub fn is_streaming(&self, session_id: &SessionId) -> bool {
        self.sessions
            .get(session_id)
            .map(|s| s.streaming)
            .unwrap_or(false)
    }

    /// Refresh the session's activity timestamp
    pub fn touch(&self, session_id: &SessionId) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.last_activity = Utc::now();
        }
    }

    /// Track a task working on the session's active job
    ///
    /// Returns `false` (and drops the handle) if the session is not streaming.
    pub fn register_task(&self, session_id: &SessionId, handle: AbortHandle) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut session) if session.streaming => {
                session.active_tasks.push(handle);
                true
            }
            _ => false,
        }
    }

    /// Abort every tracked task in every session
    ///
    /// Used at shutdown. Returns the number of tasks aborted.
    pub fn abort_all(&self) -> usize {
        let mut handles = Vec::new();
        for mut entry in self.sessions.iter_mut() {
            handles.append(&mut entry.active_tasks);
        }
        // Locks are released before aborting; aborted jobs touch the map on drop
        for handle in &handles {
            handle.abort();
        }
        handles.len()
    }

    /// Status snapshot for a session
    #[must_use]
    pub fn status(&self, session_id: &SessionId) -> Option<SessionStatus> {
        self.sessions.get(session_id).map(|s| SessionStatus {
            streaming: s.streaming,
            job_id: s.current_job_id,
            created_at: s.created_at,
            last_activity: s.last_activity,
        })
    }

    /// Number of known sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are known
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove idle sessions older than `max_age`
    ///
    /// Streaming sessions are never removed. Returns the number removed.
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        self.sweep_expired_at(Utc::now(), max_age)
    }

    /// [`sweep_expired`](Self::sweep_expired) against an explicit clock
    pub fn sweep_expired_at(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| {
            if session.streaming {
                return true;
            }
            // A last_activity in the future converts to Err and is kept
            match (now - session.last_activity).to_std() {
                Ok(age) => age <= max_age,
                Err(_) => true,
            }
        });
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            tracing::debug!(
                removed = removed,
                remaining = self.sessions.len(),
                "Swept expired sessions"
            );
        }
        removed
    }

    /// Spawn a background task that sweeps expired sessions every `interval`
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, max_age: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registry.sweep_expired(max_age);
            }
        })
    }
}

// ============================================================================
// Guard
// ============================================================================

/// Holds a session in the streaming state for one job
///
/// Dropping the guard releases the session if it is still held by the same
/// job, so the session is freed on every exit path including task abort.
#[derive(Debug)]
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    session_id: SessionId,
    job_id: JobId,
    token: CancellationToken,
    released: bool,
}

impl SessionGuard {
    /// The job's cancel token
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Session held by this guard
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Job held by this guard
    #[must_use]
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Release the session now
    ///
    /// Returns whether the session was still held by this job.
    pub fn release(mut self) -> bool {
        self.released = true;
        self.registry.stop_job(&self.session_id, self.job_id)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.released {
            self.registry.stop_job(&self.session_id, self.job_id);
        }
    }
}
