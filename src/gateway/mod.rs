//! Remote Sync Gateway: the only code that talks to the remote store.
//!
//! Implementations translate between in-memory entities and the store's row
//! representation. Guard checks and optimistic ordering live in
//! [`crate::state`], never here.

mod memory;
pub mod rows;
mod supabase;

use crate::types::{Game, GameId, GamePatch, UserId};
use async_trait::async_trait;
use std::collections::HashSet;

pub use memory::MemoryGateway;
pub use rows::NewGameRow;
pub use supabase::SupabaseGateway;

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors raised at the remote store boundary
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("missing environment variable `{var}`")]
    MissingEnvVar { var: &'static str },

    #[error("request to `{path}` failed: {source}")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("remote store returned status {status} for `{path}`: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    #[error("failed to decode response for `{path}`: {message}")]
    Decode { path: String, message: String },

    #[error("malformed row: {0}")]
    MalformedRow(String),

    #[error("remote store unavailable: {0}")]
    Unavailable(String),
}

/// Which membership relation a call targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Membership {
    Likes,
    Saves,
}

impl Membership {
    pub fn table(&self) -> &'static str {
        match self {
            Membership::Likes => "likes",
            Membership::Saves => "saves",
        }
    }
}

/// Operations the remote store must support
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Insert a game and return the stored record (with its assigned id)
    async fn create_game(&self, row: NewGameRow) -> GatewayResult<Game>;

    /// All games, newest first, with author names joined in
    async fn fetch_games(&self) -> GatewayResult<Vec<Game>>;

    /// Apply a sparse patch to one game
    async fn update_game(&self, id: &GameId, patch: &GamePatch) -> GatewayResult<()>;

    async fn delete_game(&self, id: &GameId) -> GatewayResult<()>;

    /// Game ids the user is a member of in the given relation
    async fn fetch_memberships(
        &self,
        relation: Membership,
        user_id: &UserId,
    ) -> GatewayResult<HashSet<GameId>>;

    async fn insert_membership(
        &self,
        relation: Membership,
        user_id: &UserId,
        game_id: &GameId,
    ) -> GatewayResult<()>;

    async fn delete_membership(
        &self,
        relation: Membership,
        user_id: &UserId,
        game_id: &GameId,
    ) -> GatewayResult<()>;

    /// Insert-only play telemetry; anonymous plays carry no user
    async fn record_play(&self, game_id: &GameId, user_id: Option<&UserId>) -> GatewayResult<()>;

    async fn fetch_likes(&self, user_id: &UserId) -> GatewayResult<HashSet<GameId>> {
        self.fetch_memberships(Membership::Likes, user_id).await
    }

    async fn insert_like(&self, user_id: &UserId, game_id: &GameId) -> GatewayResult<()> {
        self.insert_membership(Membership::Likes, user_id, game_id)
            .await
    }

    async fn delete_like(&self, user_id: &UserId, game_id: &GameId) -> GatewayResult<()> {
        self.delete_membership(Membership::Likes, user_id, game_id)
            .await
    }
}

/// Connection settings for the Supabase project
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        let url: String = url.into();
        Self {
            url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
        }
    }

    /// Load from SUPABASE_URL and SUPABASE_ANON_KEY
    pub fn from_env() -> GatewayResult<Self> {
        let url = non_empty_env("SUPABASE_URL")
            .ok_or(GatewayError::MissingEnvVar { var: "SUPABASE_URL" })?;
        let anon_key = non_empty_env("SUPABASE_ANON_KEY").ok_or(GatewayError::MissingEnvVar {
            var: "SUPABASE_ANON_KEY",
        })?;
        Ok(Self::new(url, anon_key))
    }

    pub fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.url, table)
    }

    pub fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.url, path)
    }
}

/// Trimmed value of `var`, or `None` when unset or blank
pub(crate) fn non_empty_env(var: &str) -> Option<String> {
    std::env::var(var).ok().and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}
