//! Token caching for store authentication.
//!
//! Provides a thread-safe, async-aware token cache with:
//! - Refresh margin to avoid token expiry during long transfers
//! - Single-flight pattern to prevent thundering herd on refresh
//! - Graceful fallback to existing valid token on refresh failure

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::credential::CredentialProvider;
use crate::error::{StorageError, StorageResult};

// =============================================================================
// Constants
// =============================================================================

/// Refresh margin: refresh token 5 minutes before expiry.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Conservative token TTL when expiry is unknown (50 minutes).
const TOKEN_DEFAULT_TTL: Duration = Duration::from_secs(50 * 60);

// =============================================================================
// Token Cache
// =============================================================================

/// Cached token with expiration tracking.
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    /// Check if token is still valid with refresh margin.
    fn is_valid(&self) -> bool {
        Instant::now() + TOKEN_REFRESH_MARGIN < self.expires_at
    }

    /// Check if token is technically still usable (even if refresh is needed).
    fn is_usable(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Process-wide token cache for one resource.
pub struct TokenCache {
    provider: Arc<dyn CredentialProvider>,
    resource: String,
    cache: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    /// Create a new token cache. No token is requested until first use.
    pub fn new(provider: Arc<dyn CredentialProvider>, resource: impl Into<String>) -> Self {
        Self {
            provider,
            resource: resource.into(),
            cache: RwLock::new(None),
        }
    }

    /// Invalidate the cached token.
    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        *cache = None;
    }

    /// Get a valid access token, refreshing if necessary.
    pub async fn get_token(&self) -> StorageResult<String> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;

        // Another task may have refreshed while we waited
        if let Some(cached) = cache.as_ref() {
            if cached.is_valid() {
                return Ok(cached.access_token.clone());
            }
        }

        self.refresh_token(&mut cache).await
    }

    async fn refresh_token(&self, cache: &mut Option<CachedToken>) -> StorageResult<String> {
        match self.provider.get_token(&self.resource).await {
            Ok(token) => {
                let expires_at = match token.expires_at {
                    Some(exp) => {
                        let now = Utc::now();
                        if exp > now {
                            match (exp - now).to_std() {
                                Ok(ttl) => Instant::now() + ttl,
                                Err(_) => Instant::now() + TOKEN_DEFAULT_TTL,
                            }
                        } else {
                            // Already expired: force a refresh on the next request.
                            Instant::now()
                        }
                    }
                    None => Instant::now() + TOKEN_DEFAULT_TTL,
                };

                *cache = Some(CachedToken {
                    access_token: token.token.clone(),
                    expires_at,
                });

                debug!(resource = %self.resource, "Refreshed store access token");
                Ok(token.token)
            }
            Err(e) => {
                if let Some(cached) = cache.as_ref() {
                    if cached.is_usable() {
                        warn!("Token refresh failed, using existing token: {}", e);
                        return Ok(cached.access_token.clone());
                    }
                }

                Err(match e {
                    StorageError::Credential(_) => e,
                    other => StorageError::credential(other.to_string()),
                })
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
