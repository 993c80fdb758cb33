//! Conversation lifecycle between a skill and its host.
//!
//! Small state machine governing session teardown:
//! `Active -> EndRequested -> Closed`, with a direct
//! `Active -> Closed` edge for host-initiated termination. A session
//! that reaches `Closed` must receive no further proactive messages;
//! the dispatcher consults this controller before producing an
//! instruction.
//!
//! The `EndRequested -> Closed` transition has a timeout fallback so
//! a session cannot stay in `EndRequested` indefinitely when the host
//! never acknowledges.

use courier_common::{Error, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    /// Session is live; dispatches are allowed
    Active,
    /// The skill signalled end-of-conversation and awaits the host
    EndRequested,
    /// Session is torn down; dispatches fail with `SessionClosed`
    Closed,
}

/// Exit status surfaced to the host on closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionCode {
    Success,
    Failure,
}

/// End-of-conversation signal: completion code plus optional result
/// payload carried to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndOfConversation {
    pub code: CompletionCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

#[derive(Debug, Clone)]
struct SessionState {
    phase: SessionPhase,
    completion: Option<EndOfConversation>,
}

/// Tracks lifecycle phases per correlation id.
///
/// Sessions are implicitly `Active` until a teardown signal is
/// observed, so only ending sessions occupy an entry.
pub struct LifecycleController {
    sessions: Arc<DashMap<String, SessionState>>,
    ack_timeout: Duration,
}

impl LifecycleController {
    /// Create a controller with the given host-acknowledgment timeout.
    pub fn new(ack_timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            ack_timeout,
        }
    }

    /// Current phase for a correlation id.
    pub fn phase(&self, correlation_id: &str) -> SessionPhase {
        self.sessions
            .get(correlation_id)
            .map(|s| s.phase)
            .unwrap_or(SessionPhase::Active)
    }

    /// Completion payload recorded for a session, if any.
    pub fn completion(&self, correlation_id: &str) -> Option<EndOfConversation> {
        self.sessions
            .get(correlation_id)
            .and_then(|s| s.completion.clone())
    }

    /// Fail with `SessionClosed` when the session is torn down.
    pub fn ensure_open(&self, correlation_id: &str) -> Result<()> {
        match self.phase(correlation_id) {
            SessionPhase::Closed => Err(Error::SessionClosed(correlation_id.to_string())),
            _ => Ok(()),
        }
    }

    /// Skill-side completion: `Active -> EndRequested`.
    ///
    /// Returns the end-of-conversation signal to surface to the host
    /// and arms the acknowledgment timeout. If the host never calls
    /// [`acknowledge`](Self::acknowledge), the session is forced to
    /// `Closed` when the timeout elapses.
    pub fn request_end(
        &self,
        correlation_id: &str,
        completion: EndOfConversation,
    ) -> Result<EndOfConversation> {
        if self.phase(correlation_id) == SessionPhase::Closed {
            return Err(Error::SessionClosed(correlation_id.to_string()));
        }

        self.sessions.insert(
            correlation_id.to_string(),
            SessionState {
                phase: SessionPhase::EndRequested,
                completion: Some(completion.clone()),
            },
        );

        tracing::info!(
            correlation_id = %correlation_id,
            code = ?completion.code,
            "End of conversation requested, awaiting host acknowledgment"
        );

        let sessions = self.sessions.clone();
        let id = correlation_id.to_string();
        let timeout = self.ack_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(mut state) = sessions.get_mut(&id) {
                if state.phase == SessionPhase::EndRequested {
                    state.phase = SessionPhase::Closed;
                    tracing::warn!(
                        correlation_id = %id,
                        timeout_secs = timeout.as_secs(),
                        "Host never acknowledged end of conversation, forcing close"
                    );
                }
            }
        });

        Ok(completion)
    }

    /// Host acknowledgment: `EndRequested -> Closed`.
    ///
    /// Acknowledging an already closed session is a no-op; an
    /// acknowledgment for a session that never requested an end is
    /// rejected.
    pub fn acknowledge(&self, correlation_id: &str) -> Result<()> {
        let Some(mut state) = self.sessions.get_mut(correlation_id) else {
            return Err(Error::InvalidInput(format!(
                "no pending end of conversation for '{correlation_id}'"
            )));
        };

        match state.phase {
            SessionPhase::EndRequested => {
                state.phase = SessionPhase::Closed;
                tracing::info!(correlation_id = %correlation_id, "Session closed");
                Ok(())
            }
            SessionPhase::Closed => Ok(()),
            SessionPhase::Active => Err(Error::InvalidInput(format!(
                "no pending end of conversation for '{correlation_id}'"
            ))),
        }
    }

    /// Host-initiated termination: any phase goes directly to
    /// `Closed`. The skill must stop proactive messaging for this
    /// session immediately.
    pub fn host_ended(&self, correlation_id: &str) {
        self.sessions.insert(
            correlation_id.to_string(),
            SessionState {
                phase: SessionPhase::Closed,
                completion: self.completion(correlation_id),
            },
        );
        tracing::info!(correlation_id = %correlation_id, "Session closed by host");
    }
}
