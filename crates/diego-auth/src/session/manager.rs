//! Login, refresh and logout on top of the session table.

use std::sync::Arc;

use time::OffsetDateTime;

use super::{NewSession, RefreshedTokens, Session, SessionStore};
use crate::broker::{BrokerError, IdentityBroker, TokenGrant};
use crate::error::AuthError;
use crate::role::Role;
use crate::token::scopes_from_unverified_token;

/// Drives session lifecycle through the identity provider.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<SessionStore>,
    broker: Option<Arc<dyn IdentityBroker>>,
}

impl SessionManager {
    /// `broker` is `None` when no identity provider is configured; logins
    /// then fail with `UpstreamUnavailable`.
    #[must_use]
    pub fn new(store: Arc<SessionStore>, broker: Option<Arc<dyn IdentityBroker>>) -> Self {
        Self { store, broker }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    fn broker(&self) -> Result<&Arc<dyn IdentityBroker>, AuthError> {
        self.broker
            .as_ref()
            .ok_or_else(|| AuthError::upstream("identity provider not configured"))
    }

    /// Exchanges a username and password for a new session.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` if the provider rejects the credentials,
    /// `UpstreamUnavailable` if it cannot be reached.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        let grant = self
            .broker()?
            .password_grant(username, password)
            .await
            .map_err(|e| match e {
                BrokerError::Rejected { .. } => AuthError::InvalidCredentials,
                other => AuthError::upstream(other.to_string()),
            })?;

        let scopes = grant_scopes(&grant);
        let role = Role::from_scopes(&scopes);
        let user_id = grant
            .user_id
            .clone()
            .unwrap_or_else(|| username.to_string());

        let session = self
            .store
            .create(NewSession {
                username: username.to_string(),
                user_id,
                role,
                token_expiry: expiry_from_now(grant.expires_in),
                access_token: grant.access_token,
                refresh_token: grant.refresh_token,
                scopes,
            })
            .await;

        tracing::info!(username = %session.username, role = %session.role, "User logged in");
        Ok(session)
    }

    /// Resolves a session cookie to a live session, refreshing its tokens
    /// first if they are about to expire.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` for unknown or expired ids, `SessionExpired` when a
    /// needed refresh failed (the session is deleted).
    pub async fn authenticate(&self, session_id: &str) -> Result<Session, AuthError> {
        let session = self
            .store
            .get(session_id)
            .await
            .ok_or(AuthError::SessionNotFound)?;
        let (session, _) = self.refresh_if_needed(session).await?;
        Ok(session)
    }

    /// Refreshes the session's tokens if they expire within the refresh
    /// window. Returns the current session and whether a refresh happened.
    ///
    /// Concurrent calls for the same session are serialized; the second
    /// caller sees the first caller's result instead of reusing a spent
    /// refresh token.
    ///
    /// # Errors
    ///
    /// `SessionExpired` when the refresh failed. The session is deleted.
    pub async fn refresh_if_needed(&self, session: Session) -> Result<(Session, bool), AuthError> {
        if !self
            .store
            .needs_refresh(&session, OffsetDateTime::now_utc())
        {
            return Ok((session, false));
        }

        let lock = self
            .store
            .refresh_lock(&session.id)
            .await
            .ok_or(AuthError::SessionNotFound)?;
        let _guard = lock.lock().await;

        let current = self
            .store
            .get(&session.id)
            .await
            .ok_or(AuthError::SessionNotFound)?;
        if !self
            .store
            .needs_refresh(&current, OffsetDateTime::now_utc())
        {
            return Ok((current, false));
        }

        match self.exchange_refresh_token(&current).await {
            Ok(grant) => {
                let scopes = grant_scopes(&grant);
                let resolved = Role::from_scopes(&scopes);
                if resolved != current.role {
                    tracing::debug!(
                        username = %current.username,
                        session_role = %current.role,
                        token_role = %resolved,
                        "Scopes changed on refresh, keeping session role"
                    );
                }

                let updated = self
                    .store
                    .update_tokens(
                        &current.id,
                        RefreshedTokens {
                            token_expiry: expiry_from_now(grant.expires_in),
                            access_token: grant.access_token,
                            refresh_token: grant.refresh_token,
                            scopes,
                        },
                    )
                    .await
                    .ok_or(AuthError::SessionNotFound)?;

                tracing::debug!(username = %updated.username, "Session tokens refreshed");
                Ok((updated, true))
            }
            Err(e) => {
                tracing::warn!(
                    username = %current.username,
                    error = %e,
                    "Token refresh failed, ending session"
                );
                self.store.delete(&current.id).await;
                Err(AuthError::SessionExpired)
            }
        }
    }

    async fn exchange_refresh_token(&self, session: &Session) -> Result<TokenGrant, AuthError> {
        let refresh_token = session
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::invalid_request("session has no refresh token"))?;
        self.broker()?
            .refresh_grant(refresh_token)
            .await
            .map_err(|e| AuthError::upstream(e.to_string()))
    }

    /// Deletes a session. Returns `true` if it existed.
    pub async fn logout(&self, session_id: &str) -> bool {
        let existed = self.store.delete(session_id).await;
        if existed {
            tracing::info!("User logged out");
        }
        existed
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("store", &self.store)
            .field("broker_configured", &self.broker.is_some())
            .finish()
    }
}

/// Scopes of a grant: the response `scope` field, else the token payload.
fn grant_scopes(grant: &TokenGrant) -> Vec<String> {
    if grant.scopes.is_empty() {
        scopes_from_unverified_token(&grant.access_token)
    } else {
        grant.scopes.clone()
    }
}

fn expiry_from_now(expires_in: u64) -> OffsetDateTime {
    let secs = i64::try_from(expires_in).unwrap_or(i64::MAX / 2);
    OffsetDateTime::now_utc().saturating_add(time::Duration::seconds(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeBroker {
        expires_in: u64,
        scope: &'static str,
        refresh_ok: bool,
        refresh_calls: AtomicUsize,
    }

    impl FakeBroker {
        fn new(expires_in: u64, scope: &'static str, refresh_ok: bool) -> Self {
            Self {
                expires_in,
                scope,
                refresh_ok,
                refresh_calls: AtomicUsize::new(0),
            }
        }

        fn grant(&self, n: usize) -> TokenGrant {
            TokenGrant {
                access_token: format!("at-{n}"),
                refresh_token: Some(format!("rt-{n}")),
                expires_in: self.expires_in,
                user_id: Some("u-1".to_string()),
                scopes: self.scope.split_whitespace().map(str::to_string).collect(),
            }
        }
    }

    #[async_trait]
    impl IdentityBroker for FakeBroker {
        async fn password_grant(
            &self,
            username: &str,
            password: &str,
        ) -> Result<TokenGrant, BrokerError> {
            if username == "alice" && password == "secret" {
                Ok(self.grant(0))
            } else {
                Err(BrokerError::Rejected { status: 401 })
            }
        }

        async fn refresh_grant(&self, _refresh_token: &str) -> Result<TokenGrant, BrokerError> {
            let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::task::yield_now().await;
            if self.refresh_ok {
                Ok(TokenGrant {
                    expires_in: 3600,
                    ..self.grant(n)
                })
            } else {
                Err(BrokerError::Rejected { status: 401 })
            }
        }
    }

    fn manager(broker: Arc<FakeBroker>) -> SessionManager {
        SessionManager::new(
            Arc::new(SessionStore::new(SessionConfig::default())),
            Some(broker as Arc<dyn IdentityBroker>),
        )
    }

    #[tokio::test]
    async fn test_login_resolves_role_once() {
        let broker = Arc::new(FakeBroker::new(3600, "openid diego-analyzer.operator", true));
        let mgr = manager(broker);
        let session = mgr.login("alice", "secret").await.unwrap();
        assert_eq!(session.role, Role::Operator);
        assert_eq!(session.user_id, "u-1");
        assert_eq!(session.access_token, "at-0");

        let found = mgr.authenticate(&session.id).await.unwrap();
        assert_eq!(found.id, session.id);
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let mgr = manager(Arc::new(FakeBroker::new(3600, "", true)));
        let err = mgr.login("alice", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert!(mgr.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_login_without_broker() {
        let mgr = SessionManager::new(Arc::new(SessionStore::new(SessionConfig::default())), None);
        let err = mgr.login("alice", "secret").await.unwrap_err();
        assert!(matches!(err, AuthError::UpstreamUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_proactive_refresh_keeps_role() {
        // Token valid for 2 minutes: inside the 5 minute refresh window.
        let broker = Arc::new(FakeBroker::new(120, "diego-analyzer.operator", true));
        let mgr = manager(Arc::clone(&broker));
        let session = mgr.login("alice", "secret").await.unwrap();

        let (refreshed, did_refresh) = mgr.refresh_if_needed(session.clone()).await.unwrap();
        assert!(did_refresh);
        assert_eq!(refreshed.access_token, "at-1");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(refreshed.role, Role::Operator);
        assert_eq!(refreshed.csrf_token, session.csrf_token);

        // Now valid for an hour: no further refresh.
        let (_, again) = mgr.refresh_if_needed(refreshed).await.unwrap();
        assert!(!again);
        assert_eq!(broker.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_use_refresh_token_once() {
        let broker = Arc::new(FakeBroker::new(60, "", true));
        let mgr = manager(Arc::clone(&broker));
        let session = mgr.login("alice", "secret").await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let mgr = mgr.clone();
                let id = session.id.clone();
                tokio::spawn(async move { mgr.authenticate(&id).await })
            })
            .collect();
        for task in tasks {
            let session = task.await.unwrap().unwrap();
            assert_eq!(session.access_token, "at-1");
        }
        assert_eq!(broker.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_deletes_session() {
        let broker = Arc::new(FakeBroker::new(60, "", false));
        let mgr = manager(broker);
        let session = mgr.login("alice", "secret").await.unwrap();

        let err = mgr.authenticate(&session.id).await.unwrap_err();
        assert!(matches!(err, AuthError::SessionExpired));
        assert!(matches!(
            mgr.authenticate(&session.id).await.unwrap_err(),
            AuthError::SessionNotFound
        ));
    }

    #[tokio::test]
    async fn test_logout() {
        let mgr = manager(Arc::new(FakeBroker::new(3600, "", true)));
        let session = mgr.login("alice", "secret").await.unwrap();
        assert!(mgr.logout(&session.id).await);
        assert!(!mgr.logout(&session.id).await);
        assert!(matches!(
            mgr.authenticate(&session.id).await.unwrap_err(),
            AuthError::SessionNotFound
        ));
    }
}
