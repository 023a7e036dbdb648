//! Creator workflow: prompt → generated game → draft or published record.

use crate::llm::{GenerationError, GenerationProvider, GenerationRequest, GenerationResult};
use crate::notice::NoticeKind;
use crate::state::AppState;
use crate::types::*;
use rand::Rng;
use std::sync::Arc;

/// Selectable visual styles; "custom" means free text supplied by the user
pub const VISUAL_STYLES: [&str; 6] = [
    "neon cyberpunk",
    "pixel art",
    "minimalist",
    "retro arcade",
    "hand drawn",
    "custom",
];

/// Ideas offered when idea generation is unavailable
pub const SUGGESTIONS: [&str; 6] = [
    "A pong game where you tilt your phone to move paddles",
    "A space shooter controlled by dragging your finger",
    "A clicker game about mining crypto with haptic feedback",
    "A jump game where you tap to leap over glitches",
    "A puzzle game where you shake the device to reset",
    "A racing game with steering wheel touch controls",
];

const UNTITLED: &str = "Untitled Game";

/// Pick the style sent to the provider
pub fn resolve_style(selected: &str, custom: Option<&str>) -> String {
    if selected == "custom" {
        custom.unwrap_or_default().trim().to_string()
    } else {
        selected.to_string()
    }
}

/// Work in progress in the creator
#[derive(Debug, Clone, Default)]
pub struct CreatorDraft {
    /// Set when editing an existing game
    pub editing_id: Option<GameId>,
    pub prompt: String,
    pub title: Option<String>,
    pub code: String,
    pub thumbnail_url: Option<String>,
}

impl CreatorDraft {
    pub fn new(prompt: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            code: code.into(),
            ..Default::default()
        }
    }

    /// Reopen a stored game for editing
    pub fn editing(game: &Game) -> Self {
        let prompt = if game.description.is_empty() {
            game.title.clone()
        } else {
            game.description.clone()
        };
        Self {
            editing_id: Some(game.id.clone()),
            prompt,
            title: Some(game.title.clone()),
            code: game.code.clone(),
            thumbnail_url: game.thumbnail_url.clone(),
        }
    }

    /// Explicit title, else the first four words of the prompt
    pub fn resolved_title(&self) -> String {
        if let Some(title) = self.title.as_deref().map(str::trim) {
            if !title.is_empty() {
                return title.to_string();
            }
        }

        let words: Vec<&str> = self.prompt.split_whitespace().take(4).collect();
        if words.is_empty() {
            UNTITLED.to_string()
        } else {
            words.join(" ")
        }
    }
}

pub struct Creator {
    provider: Arc<dyn GenerationProvider>,
    state: AppState,
}

impl Creator {
    pub fn new(provider: Arc<dyn GenerationProvider>, state: AppState) -> Self {
        Self { provider, state }
    }

    /// Whether generation can be attempted at all
    pub fn is_configured(&self) -> bool {
        self.provider.is_configured()
    }

    /// Generate sanitized game code. Never touches the catalog.
    pub async fn generate(&self, request: &GenerationRequest) -> GenerationResult<String> {
        if request.prompt.trim().is_empty() {
            return Err(GenerationError::EmptyPrompt);
        }

        match self.provider.generate(request).await {
            Ok(generated) => {
                tracing::info!(
                    "Generated {} chars with {} ({}ms)",
                    generated.code.len(),
                    generated.metadata.model,
                    generated.metadata.latency_ms
                );
                Ok(generated.code)
            }
            Err(e) => {
                tracing::error!("Generation with {} failed: {}", self.provider.name(), e);
                Err(e)
            }
        }
    }

    /// Save the draft as a new game, or update the game being edited.
    ///
    /// Returns whether the save went through; failures have already been
    /// surfaced as notices by the state store.
    pub async fn save(&self, draft: &CreatorDraft, status: GameStatus) -> bool {
        if draft.code.trim().is_empty() {
            tracing::error!("Cannot save: no code generated");
            return false;
        }

        let title = draft.resolved_title();
        let published = status == GameStatus::Published;

        if let Some(id) = &draft.editing_id {
            tracing::info!("Updating existing game {} as {}", id, status.as_str());
            let patch = GamePatch {
                title: Some(title),
                description: Some(draft.prompt.clone()),
                code: Some(draft.code.clone()),
                thumbnail_url: draft.thumbnail_url.clone(),
                status: Some(status),
            };
            if !self.state.update_game(id, patch).await {
                tracing::warn!("Update of {} failed, staying in the creator", id);
                return false;
            }

            let message = if published {
                "Game published successfully!"
            } else {
                "Draft updated!"
            };
            self.state.notices().toast(message, NoticeKind::Success);
            return true;
        }

        let now = chrono::Utc::now().timestamp_millis();
        let game = NewGame {
            placeholder_id: Some(now.to_string()),
            title,
            description: draft.prompt.clone(),
            thumbnail_url: draft.thumbnail_url.clone(),
            code: draft.code.clone(),
            created_at: now,
            status: Some(status),
        };

        if !self.state.add_game(game).await {
            tracing::warn!("Save failed, staying in the creator");
            return false;
        }

        let message = if published {
            "Game published!"
        } else {
            "Draft saved to your profile!"
        };
        self.state.notices().toast(message, NoticeKind::Success);
        true
    }

    /// A one-sentence idea, falling back to a built-in suggestion
    pub async fn random_idea(&self) -> String {
        match self.provider.generate_idea().await {
            Ok(idea) if !idea.is_empty() => idea,
            Ok(_) => {
                tracing::warn!("Idea generation returned nothing, using a suggestion");
                random_suggestion()
            }
            Err(e) => {
                tracing::warn!("Idea generation failed: {}, using a suggestion", e);
                random_suggestion()
            }
        }
    }
}

fn random_suggestion() -> String {
    let index = rand::rng().random_range(0..SUGGESTIONS.len());
    SUGGESTIONS[index].to_string()
}
