//! OAuth2 client-credentials token cache for the ledger's gRPC boundary.
//!
//! Grounded on the teacher's `confirmation/evm.rs` reqwest-client shape
//! (typed `Deserialize` response struct, one `Client` built once and reused).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use eyre::{eyre, Result};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::config::CantonAuthConfig;

const DEFAULT_LEEWAY_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Fetches and caches a bearer token for the ledger's gRPC calls. In
/// wildcard mode (no client id/secret configured) every call returns `None`
/// and callers skip the authorization header entirely.
#[derive(Clone)]
pub struct TokenCache {
    client: Client,
    config: Option<CantonAuthConfig>,
    cached: Arc<RwLock<Option<CachedToken>>>,
}

impl TokenCache {
    pub fn new(config: CantonAuthConfig) -> Self {
        let wildcard = config.client_id.is_empty() || config.client_secret.is_empty();
        Self {
            client: Client::new(),
            config: if wildcard { None } else { Some(config) },
            cached: Arc::new(RwLock::new(None)),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.config.is_none()
    }

    /// Returns a bearer token, refreshing if absent or within the expiry
    /// leeway. Returns `None` in wildcard mode.
    pub async fn token(&self) -> Result<Option<String>> {
        let Some(auth) = self.config.as_ref() else {
            return Ok(None);
        };

        {
            let guard = self.cached.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.expires_at > Utc::now() {
                    return Ok(Some(cached.token.clone()));
                }
            }
        }

        let fetched = self.fetch(auth).await?;
        let mut guard = self.cached.write().await;
        *guard = Some(fetched.clone());
        Ok(Some(fetched.token))
    }

    /// Invalidates the cache. Called after a call fails with
    /// `UNAUTHENTICATED`/`PERMISSION_DENIED` so the next call refetches.
    pub async fn invalidate(&self) {
        let mut guard = self.cached.write().await;
        *guard = None;
    }

    async fn fetch(&self, auth: &CantonAuthConfig) -> Result<CachedToken> {
        let mut params = vec![
            ("grant_type", "client_credentials"),
            ("client_id", auth.client_id.as_str()),
            ("client_secret", auth.client_secret.as_str()),
        ];
        if let Some(audience) = auth.audience.as_deref() {
            params.push(("audience", audience));
        }

        let response = self
            .client
            .post(&auth.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| eyre!("token request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(eyre!("token endpoint returned {}", response.status()));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| eyre!("malformed token response: {e}"))?;

        let leeway = if body.expires_in <= DEFAULT_LEEWAY_SECS {
            DEFAULT_LEEWAY_SECS / 2
        } else {
            DEFAULT_LEEWAY_SECS
        };
        let ttl = (body.expires_in - leeway).max(0);

        Ok(CachedToken {
            token: body.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(ttl),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_config(client_id: &str, client_secret: &str) -> CantonAuthConfig {
        CantonAuthConfig {
            token_url: "https://auth.example/token".to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            audience: None,
        }
    }

    #[tokio::test]
    async fn test_wildcard_mode_skips_token_fetch() {
        let cache = TokenCache::new(auth_config("", ""));
        assert!(cache.is_wildcard());
        assert_eq!(cache.token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_configured_mode_is_not_wildcard() {
        let cache = TokenCache::new(auth_config("id", "secret"));
        assert!(!cache.is_wildcard());
    }

    #[test]
    fn test_leeway_halves_when_ttl_short() {
        let short = 30i64;
        let leeway = if short <= DEFAULT_LEEWAY_SECS {
            DEFAULT_LEEWAY_SECS / 2
        } else {
            DEFAULT_LEEWAY_SECS
        };
        assert_eq!(leeway, 30);
        assert_eq!((short - leeway).max(0), 0);
    }
}
