//! Session Identity: who the current actor is.
//!
//! Authenticated identities come from the auth backend's session; guests
//! are purely local and transient. Every identity change is published on a
//! watch channel, which is what drives catalog and membership reloads.

mod persist;
pub mod pkce;
mod supabase;

use crate::types::{GuestProfile, Identity, UserProfile};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

pub use persist::SessionFile;
pub use supabase::SupabaseAuth;

/// Result type for auth operations
pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("auth request to `{path}` failed: {source}")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("auth service rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("failed to decode auth response: {0}")]
    Decode(String),

    #[error("session file error: {0}")]
    SessionFile(String),
}

/// User object as returned by the auth service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

impl AuthUser {
    /// Map into the local identity shape.
    ///
    /// Display name preference: metadata username, metadata name, email
    /// local part, then "User".
    pub fn to_profile(&self) -> UserProfile {
        let metadata_str = |key: &str| {
            self.user_metadata
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let username = metadata_str("username")
            .or_else(|| metadata_str("name"))
            .or_else(|| {
                self.email
                    .as_deref()
                    .and_then(|email| email.split('@').next())
                    .filter(|local| !local.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "User".to_string());

        UserProfile {
            id: self.id.clone(),
            username,
            avatar_url: metadata_str("avatar_url"),
            created_at: self.created_at.clone(),
        }
    }
}

/// Token set for an authenticated session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

/// Everything the identity layer needs from an auth service
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<AuthSession>;

    /// Returns `None` when the account must be confirmed before a session exists
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> AuthResult<Option<AuthSession>>;

    /// URL the user must visit to sign in with a federated provider
    fn authorize_url(
        &self,
        provider: &str,
        redirect_to: &str,
        code_challenge: &str,
    ) -> AuthResult<String>;

    async fn exchange_code(&self, code: &str, verifier: &str) -> AuthResult<AuthSession>;

    async fn refresh(&self, refresh_token: &str) -> AuthResult<AuthSession>;

    async fn sign_out(&self, access_token: &str) -> AuthResult<()>;
}

/// Shared handle to the current bearer token.
///
/// The session writes it, the gateway reads it for every request.
#[derive(Clone, Default)]
pub struct BearerToken(Arc<RwLock<Option<String>>>);

impl BearerToken {
    pub async fn get(&self) -> Option<String> {
        self.0.read().await.clone()
    }

    pub async fn set(&self, token: Option<String>) {
        *self.0.write().await = token;
    }
}

/// A started federated sign-in: send the user to `url`, keep `verifier`
#[derive(Debug, Clone)]
pub struct FederatedSignIn {
    pub url: String,
    pub verifier: String,
}

pub struct SessionIdentity {
    backend: Arc<dyn AuthBackend>,
    session: RwLock<Option<AuthSession>>,
    bearer: BearerToken,
    identity: watch::Sender<Option<Identity>>,
    session_file: Option<SessionFile>,
}

impl SessionIdentity {
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self {
        let (identity, _rx) = watch::channel(None);
        Self {
            backend,
            session: RwLock::new(None),
            bearer: BearerToken::default(),
            identity,
            session_file: None,
        }
    }

    /// Persist authenticated sessions to `file`
    pub fn with_session_file(mut self, file: SessionFile) -> Self {
        self.session_file = Some(file);
        self
    }

    pub fn current(&self) -> Option<Identity> {
        self.identity.borrow().clone()
    }

    pub fn is_guest(&self) -> bool {
        self.identity
            .borrow()
            .as_ref()
            .is_some_and(Identity::is_guest)
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.borrow().is_some()
    }

    /// Receive every identity change
    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.identity.subscribe()
    }

    pub fn bearer(&self) -> BearerToken {
        self.bearer.clone()
    }

    /// Pick up the last persisted session, refreshing its tokens.
    ///
    /// Returns the restored user, or `None` when there is nothing to
    /// restore. A stale session file is discarded.
    pub async fn restore(&self) -> Option<UserProfile> {
        let file = self.session_file.as_ref()?;

        let stored = match file.load().await {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Failed to read session file: {}", e);
                return None;
            }
        };

        match self.backend.refresh(&stored.refresh_token).await {
            Ok(session) => {
                tracing::info!("Restored session for user {}", session.user.id);
                Some(self.establish(session).await)
            }
            Err(e) => {
                tracing::warn!("Stored session could not be refreshed: {}", e);
                if let Err(e) = file.clear().await {
                    tracing::warn!("Failed to clear session file: {}", e);
                }
                None
            }
        }
    }

    pub async fn sign_in_with_email(&self, email: &str, password: &str) -> AuthResult<UserProfile> {
        let session = self.backend.sign_in_with_password(email, password).await?;
        Ok(self.establish(session).await)
    }

    /// Register a new account. Returns `None` when the account still needs
    /// email confirmation (no session yet).
    pub async fn register_with_email(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> AuthResult<Option<UserProfile>> {
        match self.backend.sign_up(email, password, username).await? {
            Some(session) => Ok(Some(self.establish(session).await)),
            None => {
                tracing::info!("Registration for {} awaits email confirmation", email);
                Ok(None)
            }
        }
    }

    pub fn begin_federated_sign_in(
        &self,
        provider: &str,
        redirect_to: &str,
    ) -> AuthResult<FederatedSignIn> {
        let pair = pkce::PkcePair::generate();
        let url = self
            .backend
            .authorize_url(provider, redirect_to, &pair.challenge)?;
        Ok(FederatedSignIn {
            url,
            verifier: pair.verifier,
        })
    }

    pub async fn complete_federated_sign_in(
        &self,
        code: &str,
        verifier: &str,
    ) -> AuthResult<UserProfile> {
        let session = self.backend.exchange_code(code, verifier).await?;
        Ok(self.establish(session).await)
    }

    /// Start a transient guest session. Nothing is persisted.
    pub async fn enter_as_guest(&self) -> GuestProfile {
        *self.session.write().await = None;
        self.bearer.set(None).await;

        let name = petname::petname(2, "-").unwrap_or_else(|| "player".to_string());
        let guest = GuestProfile {
            id: format!("guest_{}", ulid::Ulid::new()),
            username: format!("Guest_{}", name),
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        tracing::info!("Guest session created (transient): {}", guest.username);
        self.identity
            .send_replace(Some(Identity::Guest(guest.clone())));
        guest
    }

    /// Clear the local identity. A failing backend sign-out is only logged.
    pub async fn sign_out(&self) {
        let session = self.session.write().await.take();
        self.bearer.set(None).await;

        if let Some(session) = session {
            if let Err(e) = self.backend.sign_out(&session.access_token).await {
                tracing::warn!("Backend sign-out failed: {}", e);
            }
        }
        if let Some(file) = &self.session_file {
            if let Err(e) = file.clear().await {
                tracing::warn!("Failed to clear session file: {}", e);
            }
        }

        self.identity.send_replace(None);
        tracing::info!("User logged out");
    }

    /// Install an authenticated session and publish the new identity
    async fn establish(&self, session: AuthSession) -> UserProfile {
        let profile = session.user.to_profile();

        // Token first, so reloads triggered by the identity change are authorized
        self.bearer.set(Some(session.access_token.clone())).await;
        if let Some(file) = &self.session_file {
            if let Err(e) = file.save(&session).await {
                tracing::warn!("Failed to persist session: {}", e);
            }
        }
        *self.session.write().await = Some(session);

        tracing::info!("Signed in as {} ({})", profile.username, profile.id);
        self.identity
            .send_replace(Some(Identity::User(profile.clone())));
        profile
    }
}

/// Auth backend stand-in that accepts a fixed set of accounts.
///
/// Used by local runs without a backend and by tests.
pub struct StaticAuth {
    accounts: Vec<(String, String, AuthUser)>,
}

impl StaticAuth {
    pub fn new() -> Self {
        Self {
            accounts: Vec::new(),
        }
    }

    pub fn with_account(mut self, email: &str, password: &str, id: &str, username: &str) -> Self {
        self.accounts.push((
            email.to_string(),
            password.to_string(),
            AuthUser {
                id: id.to_string(),
                email: Some(email.to_string()),
                created_at: None,
                user_metadata: serde_json::json!({ "username": username }),
            },
        ));
        self
    }

    fn session_for(user: &AuthUser) -> AuthSession {
        AuthSession {
            access_token: format!("access-{}", user.id),
            refresh_token: format!("refresh-{}", user.id),
            expires_at: None,
            user: user.clone(),
        }
    }
}

impl Default for StaticAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthBackend for StaticAuth {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        self.accounts
            .iter()
            .find(|(e, p, _)| e == email && p == password)
            .map(|(_, _, user)| Self::session_for(user))
            .ok_or_else(|| AuthError::Rejected {
                status: 400,
                message: "Invalid login credentials".to_string(),
            })
    }

    async fn sign_up(
        &self,
        _email: &str,
        _password: &str,
        _username: &str,
    ) -> AuthResult<Option<AuthSession>> {
        Ok(None)
    }

    fn authorize_url(
        &self,
        provider: &str,
        redirect_to: &str,
        code_challenge: &str,
    ) -> AuthResult<String> {
        Ok(format!(
            "static://authorize?provider={}&redirect_to={}&code_challenge={}",
            provider, redirect_to, code_challenge
        ))
    }

    async fn exchange_code(&self, code: &str, _verifier: &str) -> AuthResult<AuthSession> {
        self.accounts
            .iter()
            .find(|(_, _, user)| user.id == code)
            .map(|(_, _, user)| Self::session_for(user))
            .ok_or_else(|| AuthError::Rejected {
                status: 400,
                message: "invalid auth code".to_string(),
            })
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<AuthSession> {
        self.accounts
            .iter()
            .find(|(_, _, user)| format!("refresh-{}", user.id) == refresh_token)
            .map(|(_, _, user)| Self::session_for(user))
            .ok_or_else(|| AuthError::Rejected {
                status: 400,
                message: "Invalid Refresh Token".to_string(),
            })
    }

    async fn sign_out(&self, _access_token: &str) -> AuthResult<()> {
        Ok(())
    }
}
