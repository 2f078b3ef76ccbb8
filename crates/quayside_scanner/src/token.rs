//! Bearer tokens for the remote document store.
//!
//! Client-credentials flow against the tenant's token endpoint. A
//! background timer refreshes the token one minute before expiry; command
//! handlers read the current token under a brief lock. Fetches have a hard
//! 10 s deadline with a single retry (token fetch is idempotent).

use quayside_protocol::config::RemoteStoreConfig;
use quayside_protocol::defaults;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum TokenError {
    #[error("token endpoint returned {status}: {detail}")]
    Endpoint { status: u16, detail: String },
    #[error("token fetch failed: {0}")]
    Transport(String),
    #[error("token fetch timed out")]
    Timeout,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Seconds until expiry.
    expires_in: u64,
}

#[derive(Clone)]
struct CachedToken {
    bearer: String,
    expires_at: Instant,
}

/// Where commands get their bearer token from.
#[derive(Clone)]
pub enum TokenSource {
    /// Fixed token (tests, local fakes).
    Static(String),
    /// Live client-credentials manager.
    Managed(Arc<TokenManager>),
}

impl TokenSource {
    pub async fn bearer_token(&self) -> Result<String, TokenError> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Managed(manager) => manager.bearer_token().await,
        }
    }
}

/// OAuth2 client-credentials token manager.
pub struct TokenManager {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    cached: Mutex<Option<CachedToken>>,
    margin: Duration,
}

impl TokenManager {
    pub fn new(config: &RemoteStoreConfig) -> Arc<Self> {
        Arc::new(Self {
            http: reqwest::Client::new(),
            token_url: format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
                config.tenant_id
            ),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: "https://graph.microsoft.com/.default".to_string(),
            cached: Mutex::new(None),
            margin: Duration::from_secs(defaults::TOKEN_EXPIRY_MARGIN_SECS),
        })
    }

    /// Spawn the proactive refresh loop. The loop wakes shortly before the
    /// cached token expires; a failed refresh is retried on the next tick
    /// and surfaces to callers only if the token actually lapses.
    pub fn spawn_refresh(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let sleep_for = match manager.time_to_refresh() {
                    Some(wait) => wait,
                    None => Duration::from_secs(1),
                };
                tokio::time::sleep(sleep_for).await;
                if let Err(e) = manager.refresh().await {
                    tracing::warn!(error = %e, "proactive token refresh failed");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        });
    }

    fn time_to_refresh(&self) -> Option<Duration> {
        let guard = self.cached.lock().unwrap_or_else(|p| p.into_inner());
        let cached = guard.as_ref()?;
        Some(
            cached
                .expires_at
                .saturating_duration_since(Instant::now())
                .saturating_sub(self.margin),
        )
    }

    /// Current token, fetching if absent or inside the expiry margin.
    pub async fn bearer_token(&self) -> Result<String, TokenError> {
        {
            let guard = self.cached.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(cached) = guard.as_ref() {
                if cached.expires_at.saturating_duration_since(Instant::now()) > self.margin {
                    return Ok(cached.bearer.clone());
                }
            }
        }
        self.refresh().await
    }

    async fn refresh(&self) -> Result<String, TokenError> {
        // One retry: token fetch is idempotent.
        let mut last_err = None;
        for attempt in 0..2 {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
            match self.fetch_once().await {
                Ok(token) => return Ok(token),
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "token fetch attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(TokenError::Timeout))
    }

    async fn fetch_once(&self) -> Result<String, TokenError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];
        let deadline = Duration::from_secs(defaults::TOKEN_FETCH_TIMEOUT_SECS);
        let response = tokio::time::timeout(
            deadline,
            self.http.post(&self.token_url).form(&params).send(),
        )
        .await
        .map_err(|_| TokenError::Timeout)?
        .map_err(|e| TokenError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TokenError::Endpoint {
                status: status.as_u16(),
                detail,
            });
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| TokenError::Transport(e.to_string()))?;

        let cached = CachedToken {
            bearer: body.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        };
        let mut guard = self.cached.lock().unwrap_or_else(|p| p.into_inner());
        *guard = Some(cached);
        Ok(body.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source() {
        let source = TokenSource::Static("fixed".to_string());
        assert_eq!(source.bearer_token().await.unwrap(), "fixed");
    }
}
