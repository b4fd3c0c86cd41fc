//! Auth session holder: token plus cached profile, persisted locally and
//! cleared on logout or on any 401 from the backend.

use photo_api::{ApiError, AuthResponse, LoginRequest, PhotoApi, RegisterRequest};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

pub const TOKEN_KEY: &str = "authToken";
pub const USER_KEY: &str = "user";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub token: String,
    pub user: UserProfile,
}

impl From<AuthResponse> for AuthSession {
    fn from(resp: AuthResponse) -> Self {
        AuthSession {
            token: resp.token,
            user: UserProfile {
                id: resp.user_id,
                email: resp.email,
                full_name: resp.full_name,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("could not persist session: {0:#}")]
    Storage(anyhow::Error),
}

impl SessionError {
    pub fn api(&self) -> Option<&ApiError> {
        match self {
            SessionError::Api(e) => Some(e),
            SessionError::Storage(_) => None,
        }
    }
}

#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> anyhow::Result<Option<AuthSession>>;
    async fn save(&self, session: &AuthSession) -> anyhow::Result<()>;
    async fn clear(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    inner: Mutex<Option<AuthSession>>,
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> anyhow::Result<Option<AuthSession>> {
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn save(&self, session: &AuthSession) -> anyhow::Result<()> {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = Some(session.clone());
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

/// Session persisted in the local settings DB under `authToken` / `user`.
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SessionStore for SqliteSessionStore {
    async fn load(&self) -> anyhow::Result<Option<AuthSession>> {
        let token = storage::kv_get(&self.pool, TOKEN_KEY).await?;
        let user = storage::kv_get(&self.pool, USER_KEY).await?;
        match (token, user) {
            (Some(token), Some(user)) => {
                let user: UserProfile = serde_json::from_str(&user)?;
                Ok(Some(AuthSession { token, user }))
            }
            _ => Ok(None),
        }
    }

    async fn save(&self, session: &AuthSession) -> anyhow::Result<()> {
        storage::kv_set(&self.pool, TOKEN_KEY, &session.token).await?;
        storage::kv_set(&self.pool, USER_KEY, &serde_json::to_string(&session.user)?).await?;
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        storage::kv_remove(&self.pool, TOKEN_KEY).await?;
        storage::kv_remove(&self.pool, USER_KEY).await?;
        Ok(())
    }
}

pub struct SessionHolder {
    api: Arc<dyn PhotoApi>,
    store: Arc<dyn SessionStore>,
    state: watch::Sender<Option<AuthSession>>,
}

impl SessionHolder {
    pub fn new(api: Arc<dyn PhotoApi>, store: Arc<dyn SessionStore>) -> Self {
        let (state, _) = watch::channel(None);
        Self { api, store, state }
    }

    /// Loads a previously persisted session, if any.
    pub async fn restore(&self) -> anyhow::Result<Option<AuthSession>> {
        let session = self.store.load().await?;
        if let Some(s) = &session {
            info!("restored session for {}", s.user.email);
        }
        self.state.send_replace(session.clone());
        Ok(session)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession, SessionError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(ApiError::Validation("Email and password are required".into()).into());
        }
        let resp = self
            .api
            .login(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .await?;
        self.establish(resp).await
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<AuthSession, SessionError> {
        let email = email.trim();
        let full_name = full_name.trim();
        if email.is_empty() || password.is_empty() || full_name.is_empty() {
            return Err(
                ApiError::Validation("Email, password and full name are required".into()).into(),
            );
        }
        if !email.contains('@') {
            return Err(ApiError::Validation("Email should be valid".into()).into());
        }
        let resp = self
            .api
            .register(&RegisterRequest {
                email: email.to_string(),
                password: password.to_string(),
                full_name: full_name.to_string(),
            })
            .await?;
        self.establish(resp).await
    }

    async fn establish(&self, resp: AuthResponse) -> Result<AuthSession, SessionError> {
        let session = AuthSession::from(resp);
        self.store
            .save(&session)
            .await
            .map_err(SessionError::Storage)?;
        info!("signed in as {}", session.user.email);
        self.state.send_replace(Some(session.clone()));
        Ok(session)
    }

    /// Clears token and profile. Storage failures are logged, never returned.
    pub async fn logout(&self) {
        if let Err(e) = self.store.clear().await {
            warn!("failed to clear persisted session: {:#}", e);
        }
        if self.state.send_replace(None).is_some() {
            info!("signed out");
        }
    }

    pub fn current(&self) -> Option<AuthSession> {
        self.state.borrow().clone()
    }

    pub fn token(&self) -> Option<String> {
        self.state.borrow().as_ref().map(|s| s.token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// Observes every session change (sign-in, sign-out, auth rejection).
    pub fn subscribe(&self) -> watch::Receiver<Option<AuthSession>> {
        self.state.subscribe()
    }

    /// Passes `result` through, ending the session first if it is a 401.
    pub async fn guard<T>(&self, result: Result<T, ApiError>) -> Result<T, ApiError> {
        if let Err(e) = &result {
            if e.is_auth_rejection() && self.is_authenticated() {
                warn!("backend rejected credentials, clearing session: {}", e);
                self.logout().await;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use photo_api::memory::InMemoryBackend;

    #[tokio::test]
    async fn blank_credentials_never_reach_backend() {
        let backend = Arc::new(InMemoryBackend::new());
        let holder = SessionHolder::new(backend.clone(), Arc::new(MemorySessionStore::default()));
        let err = holder.login("  ", "pw").await.unwrap_err();
        assert!(matches!(err.api(), Some(ApiError::Validation(_))));
        assert_eq!(backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn sqlite_store_round_trips_profile() {
        let pool = storage::connect("sqlite://file:session_store?mode=memory&cache=shared")
            .await
            .unwrap();
        storage::migrate(&pool).await.unwrap();
        let store = SqliteSessionStore::new(pool.clone());
        let session = AuthSession {
            token: "jwt".into(),
            user: UserProfile {
                id: "u1".into(),
                email: "ana@example.com".into(),
                full_name: "Ana".into(),
            },
        };
        store.save(&session).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(session));
        assert_eq!(
            storage::kv_get(&pool, TOKEN_KEY).await.unwrap().as_deref(),
            Some("jwt")
        );
        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
    }
}
