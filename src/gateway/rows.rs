//! Row shapes of the remote schema and their mapping to in-memory types.
//!
//! Incoming rows are validated here: a row without an id, with an
//! unparsable timestamp or with an unknown status is rejected rather than
//! propagated with holes in it.

use super::{GatewayError, GatewayResult};
use crate::types::{Game, GameId, GamePatch, GameStatus, NewGame, UserId, UNKNOWN_AUTHOR};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// `games` row as returned by a select with the `profiles(username)` join
#[derive(Debug, Clone, Deserialize)]
pub struct GameRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub likes_count: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub profiles: Option<ProfileRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileRef {
    #[serde(default)]
    pub username: Option<String>,
}

impl TryFrom<GameRow> for Game {
    type Error = GatewayError;

    fn try_from(row: GameRow) -> GatewayResult<Self> {
        let id = row
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| GatewayError::MalformedRow("game row without id".to_string()))?;

        let author_id = row.author_id.ok_or_else(|| {
            GatewayError::MalformedRow(format!("game {} has no author_id", id))
        })?;

        let created_at = match row.created_at.as_deref() {
            Some(text) => parse_timestamp(text)?,
            None => {
                return Err(GatewayError::MalformedRow(format!(
                    "game {} has no created_at",
                    id
                )))
            }
        };

        let status = match row.status.as_deref() {
            None => None,
            Some(text) => Some(GameStatus::parse(text).ok_or_else(|| {
                GatewayError::MalformedRow(format!("game {} has unknown status '{}'", id, text))
            })?),
        };

        let author_name = row
            .profiles
            .and_then(|p| p.username)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());

        Ok(Game {
            id,
            title: row.title.unwrap_or_default(),
            description: row.description.unwrap_or_default(),
            author_id,
            author_name,
            thumbnail_url: row.thumbnail_url.filter(|url| !url.is_empty()),
            code: row.code.unwrap_or_default(),
            likes: row.likes_count.unwrap_or(0).max(0) as u64,
            created_at,
            status,
        })
    }
}

/// Insert payload for `games`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewGameRow {
    pub title: String,
    pub description: String,
    pub code: String,
    pub thumbnail_url: Option<String>,
    pub author_id: UserId,
    pub status: Option<GameStatus>,
    pub created_at: String,
    /// Only set when the game is created as published
    pub published_at: Option<String>,
}

impl NewGameRow {
    /// Build the insert payload for `game` authored by `author_id`
    pub fn build(game: &NewGame, author_id: &UserId, now: DateTime<Utc>) -> GatewayResult<Self> {
        let published_at = (game.status == Some(GameStatus::Published))
            .then(|| now.to_rfc3339_opts(SecondsFormat::Millis, true));

        Ok(Self {
            title: game.title.clone(),
            description: game.description.clone(),
            code: game.code.clone(),
            thumbnail_url: game.thumbnail_url.clone().filter(|url| !url.is_empty()),
            author_id: author_id.clone(),
            status: game.status,
            created_at: format_timestamp(game.created_at)?,
            published_at,
        })
    }
}

/// Sparse update payload for `games`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GamePatchRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<GameStatus>,
}

impl From<&GamePatch> for GamePatchRow {
    fn from(patch: &GamePatch) -> Self {
        let patch = patch.clone().sparse();
        Self {
            title: patch.title,
            description: patch.description,
            code: patch.code,
            thumbnail_url: patch.thumbnail_url,
            status: patch.status,
        }
    }
}

/// Row of the `likes` / `saves` relations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MembershipRow {
    pub user_id: UserId,
    pub game_id: GameId,
}

/// Projection used when fetching a user's memberships
#[derive(Debug, Clone, Deserialize)]
pub struct GameIdRow {
    pub game_id: GameId,
}

/// Row of the `plays` relation
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlayRow {
    pub game_id: GameId,
    pub user_id: Option<UserId>,
}

/// Convert epoch milliseconds to the store's timestamp text
pub fn format_timestamp(millis: i64) -> GatewayResult<String> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| GatewayError::MalformedRow(format!("timestamp {} out of range", millis)))
}

/// Parse the store's timestamp text into epoch milliseconds.
///
/// Accepts RFC 3339 and offset-less timestamps (taken as UTC).
pub fn parse_timestamp(text: &str) -> GatewayResult<i64> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc().timestamp_millis())
        .map_err(|_| GatewayError::MalformedRow(format!("unparsable timestamp '{}'", text)))
}
