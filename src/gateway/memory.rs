//! In-process gateway backed by plain collections.
//!
//! Used for local runs without a backend and throughout the test suite. It
//! records every call, can be told to fail, and can hold calls in flight
//! until resumed.

use super::rows::{parse_timestamp, NewGameRow, PlayRow};
use super::{GatewayError, GatewayResult, Membership, RemoteGateway};
use crate::types::{Game, GameId, GamePatch, UserId, UNKNOWN_AUTHOR};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{watch, RwLock};

#[derive(Default)]
struct Tables {
    games: Vec<Game>,
    profiles: HashMap<UserId, String>,
    memberships: HashSet<(Membership, UserId, GameId)>,
    plays: Vec<PlayRow>,
}

pub struct MemoryGateway {
    tables: RwLock<Tables>,
    calls: RwLock<Vec<String>>,
    failure: RwLock<Option<String>>,
    /// One-shot failures keyed by call name
    scripted: RwLock<HashMap<String, Vec<String>>>,
    latency: RwLock<HashMap<String, Duration>>,
    paused: watch::Sender<bool>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        let (paused, _rx) = watch::channel(false);
        Self {
            tables: RwLock::new(Tables::default()),
            calls: RwLock::new(Vec::new()),
            failure: RwLock::new(None),
            scripted: RwLock::new(HashMap::new()),
            latency: RwLock::new(HashMap::new()),
            paused,
        }
    }

    /// Register a profile so joined reads resolve the author's name
    pub async fn add_profile(&self, user_id: &str, username: &str) {
        self.tables
            .write()
            .await
            .profiles
            .insert(user_id.to_string(), username.to_string());
    }

    /// Put a game straight into the table, bypassing call tracking
    pub async fn seed_game(&self, game: Game) {
        self.tables.write().await.games.push(game);
    }

    /// Make every following call fail with `message` (None to recover)
    pub async fn set_failure(&self, message: Option<&str>) {
        *self.failure.write().await = message.map(str::to_string);
    }

    /// Fail only the next call named `call` (e.g. `insert_likes:g1`)
    pub async fn fail_next(&self, call: &str, message: &str) {
        self.scripted
            .write()
            .await
            .entry(call.to_string())
            .or_default()
            .push(message.to_string());
    }

    /// Delay every call named `call` before it is answered
    pub async fn set_latency(&self, call: &str, delay: Duration) {
        self.latency.write().await.insert(call.to_string(), delay);
    }

    /// Hold calls in flight until [`MemoryGateway::resume`]
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Names of all calls made so far, in order
    pub async fn calls(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    pub async fn stored_games(&self) -> Vec<Game> {
        self.tables.read().await.games.clone()
    }

    pub async fn is_member(&self, relation: Membership, user_id: &str, game_id: &str) -> bool {
        self.tables.read().await.memberships.contains(&(
            relation,
            user_id.to_string(),
            game_id.to_string(),
        ))
    }

    pub async fn plays(&self) -> Vec<PlayRow> {
        self.tables.read().await.plays.clone()
    }

    /// Record the call, wait while paused, then apply injected failure
    async fn enter(&self, call: String) -> GatewayResult<()> {
        self.calls.write().await.push(call.clone());

        let mut paused = self.paused.subscribe();
        let _ = paused.wait_for(|held| !*held).await;

        let delay = self.latency.read().await.get(&call).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = {
            let mut scripted = self.scripted.write().await;
            match scripted.get_mut(&call) {
                Some(messages) if !messages.is_empty() => Some(messages.remove(0)),
                _ => None,
            }
        };
        if let Some(message) = scripted {
            return Err(GatewayError::Unavailable(message));
        }

        match self.failure.read().await.clone() {
            Some(message) => Err(GatewayError::Unavailable(message)),
            None => Ok(()),
        }
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn create_game(&self, row: NewGameRow) -> GatewayResult<Game> {
        self.enter(format!("create_game:{}", row.title)).await?;

        let created_at = parse_timestamp(&row.created_at)?;
        let mut tables = self.tables.write().await;
        let author_name = tables
            .profiles
            .get(&row.author_id)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());

        let game = Game {
            id: ulid::Ulid::new().to_string(),
            title: row.title,
            description: row.description,
            author_id: row.author_id,
            author_name,
            thumbnail_url: row.thumbnail_url,
            code: row.code,
            likes: 0,
            created_at,
            status: row.status,
        };
        tables.games.push(game.clone());
        Ok(game)
    }

    async fn fetch_games(&self) -> GatewayResult<Vec<Game>> {
        self.enter("fetch_games".to_string()).await?;

        let tables = self.tables.read().await;
        let mut games: Vec<Game> = tables
            .games
            .iter()
            .cloned()
            .map(|mut game| {
                game.author_name = tables
                    .profiles
                    .get(&game.author_id)
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());
                game
            })
            .collect();
        games.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(games)
    }

    async fn update_game(&self, id: &GameId, patch: &GamePatch) -> GatewayResult<()> {
        self.enter(format!("update_game:{}", id)).await?;

        let mut tables = self.tables.write().await;
        if let Some(game) = tables.games.iter_mut().find(|g| &g.id == id) {
            game.apply(patch);
        }
        Ok(())
    }

    async fn delete_game(&self, id: &GameId) -> GatewayResult<()> {
        self.enter(format!("delete_game:{}", id)).await?;

        let mut tables = self.tables.write().await;
        tables.games.retain(|g| &g.id != id);
        tables.memberships.retain(|(_, _, game_id)| game_id != id);
        Ok(())
    }

    async fn fetch_memberships(
        &self,
        relation: Membership,
        user_id: &UserId,
    ) -> GatewayResult<HashSet<GameId>> {
        self.enter(format!("fetch_{}:{}", relation.table(), user_id))
            .await?;

        Ok(self
            .tables
            .read()
            .await
            .memberships
            .iter()
            .filter(|(r, u, _)| *r == relation && u == user_id)
            .map(|(_, _, game_id)| game_id.clone())
            .collect())
    }

    async fn insert_membership(
        &self,
        relation: Membership,
        user_id: &UserId,
        game_id: &GameId,
    ) -> GatewayResult<()> {
        self.enter(format!("insert_{}:{}", relation.table(), game_id))
            .await?;

        let mut tables = self.tables.write().await;
        let inserted = tables
            .memberships
            .insert((relation, user_id.clone(), game_id.clone()));
        if inserted && relation == Membership::Likes {
            if let Some(game) = tables.games.iter_mut().find(|g| &g.id == game_id) {
                game.likes += 1;
            }
        }
        Ok(())
    }

    async fn delete_membership(
        &self,
        relation: Membership,
        user_id: &UserId,
        game_id: &GameId,
    ) -> GatewayResult<()> {
        self.enter(format!("delete_{}:{}", relation.table(), game_id))
            .await?;

        let mut tables = self.tables.write().await;
        let removed = tables
            .memberships
            .remove(&(relation, user_id.clone(), game_id.clone()));
        if removed && relation == Membership::Likes {
            if let Some(game) = tables.games.iter_mut().find(|g| &g.id == game_id) {
                game.likes = game.likes.saturating_sub(1);
            }
        }
        Ok(())
    }

    async fn record_play(&self, game_id: &GameId, user_id: Option<&UserId>) -> GatewayResult<()> {
        self.enter(format!("record_play:{}", game_id)).await?;

        self.tables.write().await.plays.push(PlayRow {
            game_id: game_id.clone(),
            user_id: user_id.cloned(),
        });
        Ok(())
    }
}
