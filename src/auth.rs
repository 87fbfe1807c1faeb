//! Login against the target API and the shared bearer-token session.
//!
//! The [`Session`] owns the process-wide token and the count of calls made
//! since the last login. Every worker snapshots the token before a call and
//! reports the call afterwards; once the count reaches the configured quota the
//! reporting worker logs in again while holding the counter lock, so only one
//! refresh can be in flight at a time.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::AuthConfig;
use crate::operations::header_map;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication rejected: HTTP {status}")]
    Rejected { status: u16 },
    #[error("authentication response has no `{field}` token")]
    MissingToken { field: String },
    #[error("authentication response is not valid JSON: {0}")]
    InvalidBody(String),
    #[error("authentication request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid authentication headers: {0}")]
    InvalidHeaders(String),
}

/// Opaque bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<AuthToken, AuthError>;
}

/// Logs in with a form-encoded `POST` and reads the token from the JSON body.
pub struct HttpAuthenticator {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    form: Vec<(String, String)>,
    token_field: String,
}

impl HttpAuthenticator {
    pub fn new(client: reqwest::Client, cfg: &AuthConfig) -> Result<Self, AuthError> {
        let headers = header_map(&cfg.headers).map_err(|e| AuthError::InvalidHeaders(e.to_string()))?;
        let form = cfg
            .payload
            .iter()
            .map(|(k, v)| (k.clone(), form_value(v)))
            .collect();
        Ok(Self {
            client,
            url: cfg.url.clone(),
            headers,
            form,
            token_field: cfg.token_field.clone(),
        })
    }
}

fn form_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl TokenSource for HttpAuthenticator {
    async fn fetch_token(&self) -> Result<AuthToken, AuthError> {
        info!(url = %self.url, "authenticating");
        let resp = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .form(&self.form)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "authentication request failed");
                AuthError::Transport(e)
            })?;

        let status = resp.status();
        if status != StatusCode::OK {
            warn!(status = status.as_u16(), "authentication failed");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
            });
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AuthError::InvalidBody(e.to_string()))?;
        match body.get(&self.token_field).and_then(|v| v.as_str()) {
            Some(token) if !token.is_empty() => {
                info!("authentication successful");
                Ok(AuthToken::new(token))
            }
            _ => {
                warn!(field = %self.token_field, "authentication response carried no token");
                Err(AuthError::MissingToken {
                    field: self.token_field.clone(),
                })
            }
        }
    }
}

/// Shared token plus the call quota that drives proactive refreshes.
pub struct Session {
    source: Arc<dyn TokenSource>,
    token: RwLock<AuthToken>,
    calls_since_auth: Mutex<u64>,
    reauth_every: u64,
    refreshes: AtomicU64,
}

impl Session {
    /// Performs the initial login. Failure here must stop the run.
    pub async fn start(source: Arc<dyn TokenSource>, reauth_every: u64) -> Result<Self, AuthError> {
        let token = source.fetch_token().await?;
        Ok(Self {
            source,
            token: RwLock::new(token),
            calls_since_auth: Mutex::new(0),
            reauth_every: reauth_every.max(1),
            refreshes: AtomicU64::new(0),
        })
    }

    /// Snapshot of the current token.
    pub async fn token(&self) -> AuthToken {
        self.token.read().await.clone()
    }

    /// Counts one finished call and refreshes the token when the quota is hit.
    ///
    /// On a failed refresh the old token stays in place and the counter keeps
    /// its value, so the next reported call tries again.
    pub async fn record_call(&self) -> Result<(), AuthError> {
        let mut calls = self.calls_since_auth.lock().await;
        *calls += 1;
        if *calls < self.reauth_every {
            return Ok(());
        }

        info!(calls = *calls, "call quota reached, re-authenticating");
        let token = self.source.fetch_token().await?;
        *self.token.write().await = token;
        *calls = 0;
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub async fn calls_since_auth(&self) -> u64 {
        *self.calls_since_auth.lock().await
    }

    /// Successful refreshes after the initial login.
    pub fn refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }
}
