use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type GameId = String;
pub type UserId = String;

/// Fallback author name when the profile join comes back empty
pub const UNKNOWN_AUTHOR: &str = "Unknown";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Published,
    Draft,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Published => "published",
            GameStatus::Draft => "draft",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "published" => Some(GameStatus::Published),
            "draft" => Some(GameStatus::Draft),
            _ => None,
        }
    }
}

/// A user-authored playable game as held in memory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Game {
    pub id: GameId,
    pub title: String,
    pub description: String,
    pub author_id: UserId,
    /// Denormalized from the profiles relation at read time
    pub author_name: String,
    pub thumbnail_url: Option<String>,
    /// Full sanitized HTML document
    pub code: String,
    /// Server-maintained like counter
    pub likes: u64,
    /// Epoch milliseconds
    pub created_at: i64,
    /// `None` for legacy records, which count as published
    pub status: Option<GameStatus>,
}

impl Game {
    /// Whether this game belongs in the public discovery feed
    pub fn is_published(&self) -> bool {
        matches!(self.status, None | Some(GameStatus::Published))
    }

    pub fn is_draft(&self) -> bool {
        self.status == Some(GameStatus::Draft)
    }

    /// Merge a sparse patch into this record
    pub fn apply(&mut self, patch: &GamePatch) {
        if let Some(title) = patch.title.as_deref().filter(|s| !s.is_empty()) {
            self.title = title.to_string();
        }
        if let Some(description) = patch.description.as_deref().filter(|s| !s.is_empty()) {
            self.description = description.to_string();
        }
        if let Some(code) = patch.code.as_deref().filter(|s| !s.is_empty()) {
            self.code = code.to_string();
        }
        if let Some(url) = patch.thumbnail_url.as_deref().filter(|s| !s.is_empty()) {
            self.thumbnail_url = Some(url.to_string());
        }
        if let Some(status) = patch.status {
            self.status = Some(status);
        }
    }
}

/// Caller-side description of a game to be created.
///
/// `placeholder_id` is whatever id the caller used locally (e.g. while
/// previewing); the store assigns the real one.
#[derive(Debug, Clone, Default)]
pub struct NewGame {
    pub placeholder_id: Option<GameId>,
    pub title: String,
    pub description: String,
    pub thumbnail_url: Option<String>,
    pub code: String,
    /// Epoch milliseconds
    pub created_at: i64,
    pub status: Option<GameStatus>,
}

/// Sparse partial update. Absent or empty fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GamePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub code: Option<String>,
    pub thumbnail_url: Option<String>,
    pub status: Option<GameStatus>,
}

impl GamePatch {
    /// Drop empty strings so they are never sent as blanks
    pub fn sparse(self) -> Self {
        fn keep(value: Option<String>) -> Option<String> {
            value.filter(|s| !s.is_empty())
        }
        Self {
            title: keep(self.title),
            description: keep(self.description),
            code: keep(self.code),
            thumbnail_url: keep(self.thumbnail_url),
            status: self.status,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.code.is_none()
            && self.thumbnail_url.is_none()
            && self.status.is_none()
    }
}

/// Authenticated user as mapped from the backend session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub avatar_url: Option<String>,
    pub created_at: Option<String>,
}

/// Transient local-only guest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuestProfile {
    pub id: UserId,
    pub username: String,
    pub created_at: String,
}

/// The current actor
#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    User(UserProfile),
    Guest(GuestProfile),
}

impl Identity {
    pub fn id(&self) -> &str {
        match self {
            Identity::User(u) => &u.id,
            Identity::Guest(g) => &g.id,
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Identity::User(u) => &u.username,
            Identity::Guest(g) => &g.username,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Identity::Guest(_))
    }

    /// The authenticated user, if this identity may write to the store
    pub fn as_user(&self) -> Option<&UserProfile> {
        match self {
            Identity::User(u) => Some(u),
            Identity::Guest(_) => None,
        }
    }
}

/// Per-creator stats shown on the profile surface
#[derive(Debug, Clone, PartialEq)]
pub struct CreatorProfile {
    pub published: Vec<Game>,
    pub drafts: Vec<Game>,
    pub total_likes: u64,
    pub level: u32,
}
