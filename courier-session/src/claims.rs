//! Caller identity validation for inbound skill-to-skill calls.
//!
//! Claims are produced by the external authentication collaborator
//! and consumed read-only here. A dedicated claim distinguishes skill
//! callers from ordinary channel traffic; only skill callers are
//! checked against the configured allow-list. The allow-list is fixed
//! at process start; reload requires a restart.

use courier_common::{Error, Result};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Claim holding the caller application identifier.
pub const APP_ID_CLAIM: &str = "appid";

/// Claim flagging a skill-to-skill call.
pub const SKILL_CALL_CLAIM: &str = "skill";

/// Identity assertions attached to an inbound request.
#[derive(Debug, Clone, Default)]
pub struct CallerClaims {
    /// Caller application identifier, when present
    pub app_id: Option<String>,
    /// Whether the claims mark this as a skill-to-skill call
    pub is_skill_call: bool,
}

impl CallerClaims {
    /// Extract caller identity from a raw claim set.
    pub fn from_claim_set(claims: &HashMap<String, Value>) -> Self {
        let app_id = claims
            .get(APP_ID_CLAIM)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let is_skill_call = claims
            .get(SKILL_CALL_CLAIM)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Self {
            app_id,
            is_skill_call,
        }
    }

    /// Convenience constructor for a skill caller.
    pub fn skill(app_id: impl Into<String>) -> Self {
        Self {
            app_id: Some(app_id.into()),
            is_skill_call: true,
        }
    }

    /// Convenience constructor for ordinary channel traffic.
    pub fn channel() -> Self {
        Self::default()
    }
}

/// Validates skill-caller claims against the configured allow-list.
///
/// A single `*` entry admits any caller.
#[derive(Debug, Clone)]
pub struct CallerValidator {
    allowed: HashSet<String>,
    allow_any: bool,
}

impl CallerValidator {
    /// Build a validator from the configured allow-list.
    pub fn new(allowed_callers: &[String]) -> Self {
        let allow_any = allowed_callers.iter().any(|c| c == "*");
        Self {
            allowed: allowed_callers.iter().cloned().collect(),
            allow_any,
        }
    }

    /// Validate the caller identity.
    ///
    /// Non-skill traffic bypasses allow-list checking. Skill calls
    /// with a missing or unlisted app id are rejected with
    /// `Unauthorized`.
    pub fn validate(&self, claims: &CallerClaims) -> Result<()> {
        if !claims.is_skill_call {
            return Ok(());
        }

        if self.allow_any {
            return Ok(());
        }

        let app_id = match claims.app_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => {
                tracing::warn!("Skill call rejected: no caller app id claim");
                return Err(Error::Unauthorized("<missing app id>".into()));
            }
        };

        if self.allowed.contains(app_id) {
            Ok(())
        } else {
            tracing::warn!(app_id = %app_id, "Skill call rejected: caller not in allow-list");
            Err(Error::Unauthorized(app_id.to_string()))
        }
    }
}
