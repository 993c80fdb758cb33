//! Caller authentication middleware.
//!
//! Inbound calls carry a bearer token whose claims identify the
//! calling application and whether this is a skill-to-skill call.
//! The token format is owned by the authentication collaborator; this
//! layer verifies the signature, maps the claim set to
//! [`CallerClaims`], and enforces the allow-list before a request
//! reaches the conversation routes.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use courier_common::Result;
use courier_session::{CallerClaims, CallerValidator};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Claims carried by an inbound bearer token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TokenClaims {
    /// Caller application identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appid: Option<String>,
    /// Marks a skill-to-skill call; absent for channel traffic
    #[serde(default)]
    pub skill: bool,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
    /// Issued at (Unix timestamp)
    pub iat: usize,
}

/// Caller identity attached to admitted requests.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub app_id: Option<String>,
    pub is_skill_call: bool,
}

/// Authentication state shared across requests.
#[derive(Clone)]
pub struct AuthState {
    secret: Arc<String>,
    validator: Arc<CallerValidator>,
}

impl AuthState {
    /// Create auth state from the shared token secret and the
    /// configured allow-list validator.
    pub fn new(secret: impl Into<String>, validator: CallerValidator) -> Self {
        Self {
            secret: Arc::new(secret.into()),
            validator: Arc::new(validator),
        }
    }

    /// Issue a token for a caller. Used by tests and local tooling;
    /// production callers bring tokens minted by the authentication
    /// collaborator.
    pub fn issue_token(&self, app_id: Option<&str>, skill: bool) -> Result<String> {
        let now = chrono::Utc::now().timestamp() as usize;
        let claims = TokenClaims {
            appid: app_id.map(|s| s.to_string()),
            skill,
            exp: now + 3600,
            iat: now,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| courier_common::Error::Internal(format!("token encoding failed: {e}")))
    }

    /// Verify a bearer token and map it to caller claims.
    pub fn verify_token(&self, token: &str) -> Result<CallerClaims> {
        let data = decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| courier_common::Error::InvalidInput(format!("invalid token: {e}")))?;

        Ok(CallerClaims {
            app_id: data.claims.appid,
            is_skill_call: data.claims.skill,
        })
    }
}

/// Authentication middleware for the conversation routes.
///
/// Rejects requests without a valid bearer token (401) and skill
/// callers outside the allow-list (403). Admitted requests carry a
/// [`CallerIdentity`] extension.
pub async fn caller_auth_middleware(
    State(auth): State<AuthState>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, StatusCode> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.to_string());

    let Some(token) = token else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    let claims = match auth.verify_token(&token) {
        Ok(claims) => claims,
        Err(_) => return Err(StatusCode::UNAUTHORIZED),
    };

    if let Err(err) = auth.validator.validate(&claims) {
        tracing::warn!(error = %err, "Rejected skill caller");
        return Err(StatusCode::FORBIDDEN);
    }

    request.extensions_mut().insert(CallerIdentity {
        app_id: claims.app_id,
        is_skill_call: claims.is_skill_call,
    });
    Ok(next.run(request).await)
}
