//! Credential lifecycle for the remote contact-center API.
//!
//! One credential per conversational session, acquired from the identity
//! endpoint and resolved through discovery, stored in the session slot and
//! refreshed when it runs out. Linked sessions borrow the primary
//! session's credential through the shared cache instead of minting their
//! own.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::remote::ContactCenterApi;
use crate::session::{CredentialCache, SessionIdentity, SessionStore, keys};

/// Safety margin subtracted from the expiry before a token is trusted.
pub const EXPIRY_GRACE_SECS: i64 = 5;

/// Access credential plus the discovered API base it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: String,
    pub api_endpoint: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Usable at `now`? The expiry is always read as "valid until
    /// `expires_at` minus the grace margin".
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - TimeDelta::seconds(EXPIRY_GRACE_SECS) > now
    }

    /// Value for the outgoing `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Acquires, validates, and refreshes the per-session credential.
pub struct TokenManager {
    api: Arc<dyn ContactCenterApi>,
    store: Arc<dyn SessionStore>,
    cache: Arc<dyn CredentialCache>,
}

impl TokenManager {
    pub fn new(
        api: Arc<dyn ContactCenterApi>,
        store: Arc<dyn SessionStore>,
        cache: Arc<dyn CredentialCache>,
    ) -> Self {
        Self { api, store, cache }
    }

    /// Return a usable credential for this identity, acquiring or
    /// refreshing as needed.
    ///
    /// Behaves as one atomic read-check-refresh unit: an expired stored
    /// credential is discarded and re-acquired at most once per call, and
    /// an unusable identity/discovery payload is terminal for this call.
    /// Every successful path leaves the session slot holding the returned
    /// credential.
    pub async fn ensure_valid_credential(
        &self,
        identity: &SessionIdentity,
    ) -> Result<Credential, AuthError> {
        // Two passes at most: one to discard an expired credential, one to
        // acquire its replacement.
        for _ in 0..2 {
            match self.stored(identity).await {
                Some(credential) if credential.is_valid_at(Utc::now()) => return Ok(credential),
                Some(_) => {
                    tracing::debug!(session = identity.raw(), "Stored credential expired");
                    self.store.delete(identity, keys::CREDENTIAL).await;
                }
                None => return self.acquire(identity).await,
            }
        }
        self.acquire(identity).await
    }

    async fn stored(&self, identity: &SessionIdentity) -> Option<Credential> {
        let raw = self.store.get(identity, keys::CREDENTIAL).await?;
        match serde_json::from_str(&raw) {
            Ok(credential) => Some(credential),
            Err(e) => {
                tracing::warn!(session = identity.raw(), "Discarding unreadable credential: {e}");
                self.store.delete(identity, keys::CREDENTIAL).await;
                None
            }
        }
    }

    async fn acquire(&self, identity: &SessionIdentity) -> Result<Credential, AuthError> {
        if identity.is_linked() {
            if let Some(credential) = self.try_import(identity).await {
                tracing::info!(session = identity.raw(), "Adopted linked-session credential");
                self.remember(identity, &credential).await;
                return Ok(credential);
            }
        }

        let grant = self.api.obtain_access_key().await?;
        let api_endpoint = self
            .api
            .discover_endpoint(&grant.access_token, &grant.token_type)
            .await?;

        let credential = Credential {
            access_token: grant.access_token,
            token_type: grant.token_type,
            refresh_token: grant.refresh_token,
            api_endpoint,
            expires_at: Utc::now() + TimeDelta::seconds(grant.expires_in),
        };

        self.remember(identity, &credential).await;

        // Persist under the suffix-stripped key so a linked session can
        // pick it up. Best-effort: a broken cache only degrades linking.
        if let Err(e) = self.cache.put(identity.cache_key(), &credential).await {
            tracing::warn!("Failed to persist credential for linked sessions: {e}");
        }

        tracing::info!(session = identity.raw(), "Acquired fresh credential");
        Ok(credential)
    }

    /// Import the primary session's persisted credential, if this is a
    /// linked session and the persisted copy is still usable. Any
    /// validation failure falls back to a normal fresh authentication.
    async fn try_import(&self, identity: &SessionIdentity) -> Option<Credential> {
        let credential = match self.cache.get(identity.cache_key()).await {
            Ok(Some(credential)) => credential,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!("Credential cache read failed: {e}");
                return None;
            }
        };

        if credential.access_token.is_empty() || !credential.is_valid_at(Utc::now()) {
            return None;
        }
        Some(credential)
    }

    async fn remember(&self, identity: &SessionIdentity, credential: &Credential) {
        if let Ok(raw) = serde_json::to_string(credential) {
            self.store.set(identity, keys::CREDENTIAL, raw).await;
        }
    }

    /// Drop the stored credential and the shared cache entry (chat ended
    /// or explicit logout).
    pub async fn forget(&self, identity: &SessionIdentity) {
        self.store.delete(identity, keys::CREDENTIAL).await;
        if let Err(e) = self.cache.delete(identity.cache_key()).await {
            tracing::warn!("Failed to delete cached credential: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::FakeContactCenter;
    use crate::session::{FileCredentialCache, MemorySessionStore};
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;

    struct Fixture {
        api: Arc<FakeContactCenter>,
        store: Arc<MemorySessionStore>,
        cache: Arc<FileCredentialCache>,
        manager: TokenManager,
        _dir: tempfile::TempDir,
    }

    fn fixture(api: FakeContactCenter) -> Fixture {
        let dir = tempdir().unwrap();
        let api = Arc::new(api);
        let store = Arc::new(MemorySessionStore::new());
        let cache = Arc::new(FileCredentialCache::new(dir.path()));
        let manager = TokenManager::new(api.clone(), store.clone(), cache.clone());
        Fixture {
            api,
            store,
            cache,
            manager,
            _dir: dir,
        }
    }

    fn identity(raw: &str) -> SessionIdentity {
        SessionIdentity::new(raw, "-linked")
    }

    fn expired_credential() -> Credential {
        Credential {
            access_token: "OLD".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: String::new(),
            api_endpoint: "https://old".to_string(),
            expires_at: Utc::now() + TimeDelta::seconds(EXPIRY_GRACE_SECS),
        }
    }

    #[tokio::test]
    async fn fresh_auth_combines_grant_and_discovery() {
        let fx = fixture(FakeContactCenter::new().with_grant(60));
        let identity = identity("sess");

        let before = Utc::now();
        let credential = fx.manager.ensure_valid_credential(&identity).await.unwrap();

        assert_eq!(credential.authorization(), "Bearer T1");
        assert_eq!(credential.api_endpoint, "https://x");
        let expected = before + TimeDelta::seconds(60);
        let drift = (credential.expires_at - expected).num_seconds().abs();
        assert!(drift <= 1, "expiry should be about now+60s");

        // The session slot and the shared cache both hold the credential.
        assert!(fx.store.get(&identity, keys::CREDENTIAL).await.is_some());
        assert!(fx.cache.get("sess").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn valid_credential_is_reused_without_remote_calls() {
        let fx = fixture(FakeContactCenter::new().with_grant(60));
        let identity = identity("sess");

        fx.manager.ensure_valid_credential(&identity).await.unwrap();
        fx.manager.ensure_valid_credential(&identity).await.unwrap();

        assert_eq!(fx.api.auth_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.api.discovery_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_credential_is_reacquired_exactly_once() {
        let fx = fixture(FakeContactCenter::new().with_grant(60));
        let identity = identity("sess");
        fx.manager.remember(&identity, &expired_credential()).await;

        let credential = fx.manager.ensure_valid_credential(&identity).await.unwrap();

        assert_eq!(credential.access_token, "T1");
        assert_eq!(fx.api.auth_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_failure_is_terminal_not_a_loop() {
        // Identity endpoint hands back an unusable payload.
        let fx = fixture(FakeContactCenter::new());
        let identity = identity("sess");
        fx.manager.remember(&identity, &expired_credential()).await;

        let err = fx
            .manager
            .ensure_valid_credential(&identity)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::MissingField {
                field: "access_token"
            }
        ));
        // Exactly one attempt, no unbounded retries.
        assert_eq!(fx.api.auth_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn linked_session_imports_without_remote_auth() {
        let fx = fixture(FakeContactCenter::new().with_grant(60));
        let primary = identity("sess");
        let linked = identity("sess-linked");

        fx.manager.ensure_valid_credential(&primary).await.unwrap();
        let imported = fx.manager.ensure_valid_credential(&linked).await.unwrap();

        assert_eq!(imported.access_token, "T1");
        // Only the primary session hit the identity endpoint.
        assert_eq!(fx.api.auth_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn linked_session_with_stale_cache_authenticates_fresh() {
        let fx = fixture(FakeContactCenter::new().with_grant(60));
        let linked = identity("sess-linked");
        fx.cache.put("sess", &expired_credential()).await.unwrap();

        let credential = fx.manager.ensure_valid_credential(&linked).await.unwrap();

        assert_eq!(credential.access_token, "T1");
        assert_eq!(fx.api.auth_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn forget_clears_slot_and_cache() {
        let fx = fixture(FakeContactCenter::new().with_grant(60));
        let identity = identity("sess");
        fx.manager.ensure_valid_credential(&identity).await.unwrap();

        fx.manager.forget(&identity).await;

        assert!(fx.store.get(&identity, keys::CREDENTIAL).await.is_none());
        assert!(fx.cache.get("sess").await.unwrap().is_none());
    }

    #[test]
    fn grace_margin_is_exact() {
        let mut credential = expired_credential();
        let now = Utc::now();

        // Right at the boundary: expires_at - grace == now is expired.
        credential.expires_at = now + TimeDelta::seconds(EXPIRY_GRACE_SECS);
        assert!(!credential.is_valid_at(now));

        credential.expires_at = now + TimeDelta::seconds(EXPIRY_GRACE_SECS + 1);
        assert!(credential.is_valid_at(now));
    }
}
