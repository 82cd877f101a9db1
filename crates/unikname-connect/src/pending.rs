//! Pending login storage.
//!
//! Between the provider redirect and the callback, the engine keeps the
//! values it must check the callback against: nonce, PKCE verifier and the
//! redirect URI. Entries are keyed by `state` and can be taken exactly once.
//! Logins that never come back are purged by later inserts, so the store
//! stays bounded without a background task.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

use crate::authorize::AuthorizationRequest;
use crate::pkce::PkceVerifier;

/// Values remembered for one login attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingLogin {
    /// State token sent to the provider.
    pub state: String,
    /// Nonce expected in the ID token.
    pub nonce: String,
    /// PKCE verifier for the token exchange.
    pub pkce_verifier: PkceVerifier,
    /// Callback URL used in the authorization request.
    pub redirect_uri: Url,
    /// When the login started.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl PendingLogin {
    /// Captures the values of an authorization request.
    #[must_use]
    pub fn from_request(request: &AuthorizationRequest) -> Self {
        Self {
            state: request.state.clone(),
            nonce: request.nonce.clone(),
            pkce_verifier: request.pkce_verifier.clone(),
            redirect_uri: request.redirect_uri.clone(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Returns `true` if the login is older than `ttl`.
    #[must_use]
    pub fn is_expired(&self, ttl: Duration) -> bool {
        OffsetDateTime::now_utc() - self.created_at > ttl
    }
}

/// Storage for pending logins.
///
/// Hosts running several processes behind a load balancer should provide a
/// shared implementation.
#[async_trait]
pub trait PendingLoginStore: Send + Sync {
    /// Stores a pending login under its state.
    ///
    /// Implementations may drop entries older than `ttl` while storing.
    async fn store(&self, login: PendingLogin, ttl: Duration);

    /// Removes and returns the pending login for `state`.
    ///
    /// Expired entries are removed and reported as absent.
    async fn take(&self, state: &str, ttl: Duration) -> Option<PendingLogin>;

    /// Removes expired entries and returns how many were removed.
    async fn cleanup_expired(&self, ttl: Duration) -> usize;
}

/// In-process pending login store.
///
/// Every insert checks whether a sweep is due. Sweeps run at most once per
/// TTL, so an abandoned entry lives for at most two TTLs.
#[derive(Debug, Default)]
pub struct MemoryPendingLoginStore {
    logins: DashMap<String, PendingLogin>,
    /// Unix time in milliseconds before which no sweep runs.
    next_sweep_ms: AtomicI64,
}

impl MemoryPendingLoginStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored logins, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.logins.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.logins.is_empty()
    }

    /// Claims the next sweep if it is due. Only one concurrent caller wins.
    fn sweep_due(&self, ttl: Duration) -> bool {
        let now_ms = unix_millis(OffsetDateTime::now_utc());
        let next = self.next_sweep_ms.load(Ordering::Relaxed);
        if now_ms < next {
            return false;
        }
        let interval_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        self.next_sweep_ms
            .compare_exchange(
                next,
                now_ms.saturating_add(interval_ms),
                Ordering::Relaxed,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    fn purge_expired(&self, ttl: Duration) -> usize {
        let before = self.logins.len();
        self.logins.retain(|_, login| !login.is_expired(ttl));
        before.saturating_sub(self.logins.len())
    }
}

fn unix_millis(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

#[async_trait]
impl PendingLoginStore for MemoryPendingLoginStore {
    async fn store(&self, login: PendingLogin, ttl: Duration) {
        if self.sweep_due(ttl) {
            let removed = self.purge_expired(ttl);
            if removed > 0 {
                tracing::debug!(removed, "Purged abandoned pending logins");
            }
        }
        self.logins.insert(login.state.clone(), login);
    }

    async fn take(&self, state: &str, ttl: Duration) -> Option<PendingLogin> {
        let (_, login) = self.logins.remove(state)?;
        if login.is_expired(ttl) {
            tracing::debug!("Pending login expired before callback");
            return None;
        }
        Some(login)
    }

    async fn cleanup_expired(&self, ttl: Duration) -> usize {
        let removed = self.purge_expired(ttl);
        if removed > 0 {
            tracing::debug!(removed, "Cleaned up expired pending logins");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(600);

    fn login(state: &str, age: Duration) -> PendingLogin {
        PendingLogin {
            state: state.to_string(),
            nonce: "nonce".to_string(),
            pkce_verifier: PkceVerifier::generate(),
            redirect_uri: Url::parse("https://forum.example.com/auth/unikname/callback").unwrap(),
            created_at: OffsetDateTime::now_utc() - age,
        }
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let store = MemoryPendingLoginStore::new();
        store.store(login("s1", Duration::ZERO), TTL).await;

        assert_eq!(store.take("s1", TTL).await.unwrap().nonce, "nonce");
        assert!(store.take("s1", TTL).await.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_state() {
        let store = MemoryPendingLoginStore::new();
        assert!(store.take("missing", TTL).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_login_is_rejected() {
        let store = MemoryPendingLoginStore::new();
        store.store(login("old", Duration::from_secs(601)), TTL).await;

        assert!(store.take("old", TTL).await.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let store = MemoryPendingLoginStore::new();
        store.store(login("fresh", Duration::ZERO), TTL).await;
        store.store(login("old", Duration::from_secs(3600)), TTL).await;

        assert_eq!(store.cleanup_expired(TTL).await, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_logins_are_purged_by_later_inserts() {
        let ttl = Duration::from_millis(1);
        let store = MemoryPendingLoginStore::new();
        for i in 0..500 {
            store.store(login(&format!("a{i}"), Duration::ZERO), ttl).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        for i in 0..500 {
            store.store(login(&format!("b{i}"), Duration::ZERO), ttl).await;
        }

        assert!(store.len() <= 500, "{} entries left", store.len());
        assert!((0..500).all(|i| !store.logins.contains_key(&format!("a{i}"))));
    }

    #[tokio::test]
    async fn test_sweep_waits_for_ttl() {
        let store = MemoryPendingLoginStore::new();
        store.store(login("first", Duration::ZERO), TTL).await;
        store.store(login("stale", Duration::from_secs(3600)), TTL).await;
        store.store(login("next", Duration::ZERO), TTL).await;

        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_serialized_form() {
        let login = login("s1", Duration::ZERO);
        let json = serde_json::to_value(&login).unwrap();
        assert_eq!(json["state"], "s1");
        assert_eq!(json["pkce_verifier"], login.pkce_verifier.as_str());

        let back: PendingLogin = serde_json::from_value(json).unwrap();
        assert_eq!(back.pkce_verifier, login.pkce_verifier);
    }
}
