//! Server-side sessions.
//!
//! The browser only ever holds an opaque session id; access and refresh
//! tokens stay in the [`SessionStore`]. A session lives for the access token
//! lifetime plus a buffer, and is refreshed proactively by [`SessionManager`]
//! when its access token is about to expire.

mod cookies;
mod manager;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};

pub use cookies::{
    SESSION_COOKIE_NAME, clear_csrf_cookie, clear_session_cookie, csrf_cookie, session_cookie,
};
pub use manager::SessionManager;

use crate::config::SessionConfig;
use crate::role::Role;

/// Bytes of entropy in session ids and CSRF tokens.
const TOKEN_BYTES: usize = 32;

/// Draws a fresh opaque token: 32 bytes from the OS generator, unpadded base64url.
pub(crate) fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// A logged-in browser session.
#[derive(Clone)]
pub struct Session {
    pub id: String,
    pub username: String,
    pub user_id: String,
    /// Resolved once at login and kept for the session lifetime.
    pub role: Role,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub scopes: Vec<String>,
    /// CSRF token bound to this session.
    pub csrf_token: String,
    /// When the current access token expires.
    pub token_expiry: OffsetDateTime,
    pub created_at: OffsetDateTime,
    /// When the session itself is evicted.
    pub expires_at: OffsetDateTime,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .field("token_expiry", &self.token_expiry)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Identity and tokens of a fresh login.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub username: String,
    pub user_id: String,
    pub role: Role,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub scopes: Vec<String>,
    pub token_expiry: OffsetDateTime,
}

/// Replacement tokens from a refresh.
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// `None` keeps the current refresh token.
    pub refresh_token: Option<String>,
    pub scopes: Vec<String>,
    pub token_expiry: OffsetDateTime,
}

struct Entry {
    session: Session,
    /// Serializes token refreshes of this session.
    refresh_lock: Arc<Mutex<()>>,
}

/// In-memory session table.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Entry>>,
    config: SessionConfig,
}

impl SessionStore {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Session deadline for an access token expiring at `token_expiry`.
    fn deadline(&self, token_expiry: OffsetDateTime, now: OffsetDateTime) -> OffsetDateTime {
        let ttl = (token_expiry - now) + self.config.ttl_buffer;
        let min_ttl = time::Duration::try_from(self.config.min_ttl).unwrap_or(time::Duration::MINUTE);
        now + ttl.max(min_ttl)
    }

    /// Creates a session with a fresh id and CSRF token.
    pub async fn create(&self, new: NewSession) -> Session {
        self.create_at(new, OffsetDateTime::now_utc()).await
    }

    pub async fn create_at(&self, new: NewSession, now: OffsetDateTime) -> Session {
        let session = Session {
            id: random_token(),
            csrf_token: random_token(),
            expires_at: self.deadline(new.token_expiry, now),
            username: new.username,
            user_id: new.user_id,
            role: new.role,
            access_token: new.access_token,
            refresh_token: new.refresh_token,
            scopes: new.scopes,
            token_expiry: new.token_expiry,
            created_at: now,
        };

        self.sessions.write().await.insert(
            session.id.clone(),
            Entry {
                session: session.clone(),
                refresh_lock: Arc::new(Mutex::new(())),
            },
        );
        session
    }

    /// Returns the live session with `id`.
    pub async fn get(&self, id: &str) -> Option<Session> {
        self.get_at(id, OffsetDateTime::now_utc()).await
    }

    /// Returns the session with `id` if it is live at `now`. An expired
    /// session is removed on the way out.
    pub async fn get_at(&self, id: &str, now: OffsetDateTime) -> Option<Session> {
        {
            let sessions = self.sessions.read().await;
            match sessions.get(id) {
                None => return None,
                Some(entry) if entry.session.expires_at > now => {
                    return Some(entry.session.clone());
                }
                Some(_) => {}
            }
        }

        let mut sessions = self.sessions.write().await;
        if sessions
            .get(id)
            .is_some_and(|entry| entry.session.expires_at <= now)
        {
            sessions.remove(id);
            tracing::debug!("Evicted expired session");
        }
        None
    }

    /// Replaces the tokens of a session and extends its deadline.
    ///
    /// Identity and role are kept. Returns `None` if the session is gone.
    pub async fn update_tokens(&self, id: &str, tokens: RefreshedTokens) -> Option<Session> {
        self.update_tokens_at(id, tokens, OffsetDateTime::now_utc())
            .await
    }

    pub async fn update_tokens_at(
        &self,
        id: &str,
        tokens: RefreshedTokens,
        now: OffsetDateTime,
    ) -> Option<Session> {
        let deadline = self.deadline(tokens.token_expiry, now);
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(id)?;

        let session = &mut entry.session;
        session.access_token = tokens.access_token;
        if let Some(refresh_token) = tokens.refresh_token {
            session.refresh_token = Some(refresh_token);
        }
        session.scopes = tokens.scopes;
        session.token_expiry = tokens.token_expiry;
        session.expires_at = deadline;
        Some(session.clone())
    }

    /// Removes a session. Returns `true` if it existed.
    pub async fn delete(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    /// The refresh lock of a session, if it exists.
    pub async fn refresh_lock(&self, id: &str) -> Option<Arc<Mutex<()>>> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|entry| Arc::clone(&entry.refresh_lock))
    }

    /// Returns `true` when the access token expires within the refresh window.
    #[must_use]
    pub fn needs_refresh(&self, session: &Session, now: OffsetDateTime) -> bool {
        session.token_expiry - now <= self.config.refresh_window
    }

    /// Removes every session whose deadline has passed. Returns the count.
    pub async fn purge_expired(&self) -> usize {
        self.purge_expired_at(OffsetDateTime::now_utc()).await
    }

    pub async fn purge_expired_at(&self, now: OffsetDateTime) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.session.expires_at > now);
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::debug!(removed, "Purged expired sessions");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
