mod gemini;
mod openai;

use crate::gateway::non_empty_env;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

/// Result type for generation operations
pub type GenerationResult<T> = Result<T, GenerationError>;

/// Value shipped in `.env` templates; treated as "no key"
pub const PLACEHOLDER_API_KEY: &str = "your_api_key_here";

pub const DEFAULT_STYLE: &str = "neon cyberpunk";
pub const DEFAULT_DIFFICULTY: &str = "medium";

/// Errors that can occur while generating games or ideas
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("{0} API key not configured")]
    NotConfigured(String),

    #[error("generation API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("No game code generated")]
    EmptyResponse,

    #[error("API request failed: {0}")]
    Request(String),

    #[error("response parsing failed: {0}")]
    Parse(String),

    #[error("Please describe your game idea first!")]
    EmptyPrompt,
}

impl GenerationError {
    /// HTTP status of the upstream failure, when there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            GenerationError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Request to generate a game
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    /// Free-text description of the game
    pub prompt: String,
    pub style: Option<String>,
    pub difficulty: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn with_difficulty(mut self, difficulty: impl Into<String>) -> Self {
        self.difficulty = Some(difficulty.into());
        self
    }

    pub fn style(&self) -> &str {
        self.style
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_STYLE)
    }

    pub fn difficulty(&self) -> &str {
        self.difficulty
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_DIFFICULTY)
    }
}

/// Sanitized game document plus where it came from
#[derive(Debug, Clone)]
pub struct GeneratedCode {
    pub code: String,
    pub metadata: ResponseMetadata,
}

/// Metadata about a provider response
#[derive(Debug, Clone)]
pub struct ResponseMetadata {
    /// Name of the provider (e.g., "gemini", "openai")
    pub provider: String,
    pub model: String,
    pub latency_ms: u64,
}

/// Trait that all generation providers must implement
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Generate a single self-contained HTML game
    async fn generate(&self, request: &GenerationRequest) -> GenerationResult<GeneratedCode>;

    /// Generate a one-sentence game idea
    async fn generate_idea(&self) -> GenerationResult<String>;

    /// Get the name of this provider
    fn name(&self) -> &str;

    /// Whether a usable API key is present
    fn is_configured(&self) -> bool;
}

/// Which backend serves generation requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    OpenAi,
}

impl ProviderKind {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "gemini" => Some(ProviderKind::Gemini),
            "openai" => Some(ProviderKind::OpenAi),
            _ => None,
        }
    }
}

/// Configuration for generation providers
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    /// Gemini API key (placeholder values are dropped)
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    /// OpenAI API key (placeholder values are dropped)
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    /// Timeout for a single generation request
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Gemini,
            gemini_api_key: None,
            gemini_model: "gemini-3-flash-preview".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com".to_string(),
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl LlmConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let provider = match non_empty_env("GENERATION_PROVIDER") {
            Some(value) => ProviderKind::parse(&value).unwrap_or_else(|| {
                tracing::warn!("Unknown GENERATION_PROVIDER '{}', using gemini", value);
                ProviderKind::Gemini
            }),
            None => defaults.provider,
        };

        Self {
            provider,
            gemini_api_key: usable_key(non_empty_env("GEMINI_API_KEY")),
            gemini_model: non_empty_env("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            gemini_base_url: non_empty_env("GEMINI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.gemini_base_url),
            openai_api_key: usable_key(non_empty_env("OPENAI_API_KEY")),
            openai_model: non_empty_env("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            timeout: non_empty_env("GENERATION_TIMEOUT")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    /// Whether the selected provider has a usable key
    pub fn is_configured(&self) -> bool {
        match self.provider {
            ProviderKind::Gemini => self.gemini_api_key.is_some(),
            ProviderKind::OpenAi => self.openai_api_key.is_some(),
        }
    }

    /// Build the selected provider. An unconfigured provider is still
    /// returned; its calls fail with [`GenerationError::NotConfigured`].
    pub fn build_provider(&self) -> Arc<dyn GenerationProvider> {
        match self.provider {
            ProviderKind::Gemini => Arc::new(GeminiProvider::new(
                self.gemini_api_key.clone(),
                self.gemini_model.clone(),
                self.gemini_base_url.clone(),
                self.timeout,
            )),
            ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(
                self.openai_api_key.clone(),
                self.openai_model.clone(),
                self.timeout,
            )),
        }
    }
}

/// Drop keys that are still the template placeholder
pub fn usable_key(key: Option<String>) -> Option<String> {
    key.filter(|k| !k.is_empty() && k != PLACEHOLDER_API_KEY)
}

/// Rules every generated game must follow
const GAME_ARCHITECT_PROMPT: &str = r#"You are a professional HTML5 Game Architect.
Your task is to generate a SINGLE, COMPLETE, AND FULLY FUNCTIONAL HTML5 file for a game based on the user's request.

TECHNICAL RULES:
1. Everything (HTML, CSS, JS) MUST be in one file.
2. Use standard <script> and <style> tags.
3. The game must be playable by just opening the file in a browser.
4. Include a robust game loop, collision detection, and score system.
5. Use high-quality visual aesthetics (neon/cyberpunk/minimalist as requested).
6. MOBILE FIRST: The game MUST be fully playable on mobile devices with touch controls.
   - Use 'touchstart', 'touchmove', 'touchend' events.
   - Canvas must fill the screen (width: 100%, height: 100%).
   - Prevent default touch actions (e.g., scrolling) on the canvas.
7. CRITICAL: DO NOT STOP UNTIL THE ENTIRE FILE IS COMPLETE.
8. DO NOT USE MARKDOWN WRAPPERS (```html). Just start with <!DOCTYPE html>."#;

/// Prompt used for the "random idea" button
const IDEA_PROMPT: &str = "Act as a creative indie game designer. Generate a short, unique, and addictive HTML5 game idea (one sentence). Output ONLY the idea itself. No conversational filler, no quotes. Just the raw text.";

/// The per-request part of the prompt
fn game_specification(request: &GenerationRequest) -> String {
    format!(
        "GAME SPECIFICATIONS:\n- Prompt: {}\n- Style: {}\n- Difficulty: {}\n\nGenerate the full code now:",
        request.prompt,
        request.style(),
        request.difficulty()
    )
}

/// Full single-message prompt for providers without a system role
pub fn game_prompt(request: &GenerationRequest) -> String {
    format!("{}\n\n{}", GAME_ARCHITECT_PROMPT, game_specification(request))
}

/// Strip markdown fences the model sometimes wraps the document in
pub fn sanitize_code(text: &str) -> String {
    let trimmed = text.trim();
    let Some(body) = trimmed
        .strip_prefix("```html")
        .or_else(|| trimmed.strip_prefix("```"))
    else {
        return trimmed.to_string();
    };

    let body = body.strip_prefix('\n').unwrap_or(body);
    let body = body.strip_suffix("```").unwrap_or(body);
    body.trim().to_string()
}

/// Trim whitespace and one pair of surrounding quotes
pub fn clean_idea(text: &str) -> String {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix(['"', '\''])
        .unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix(['"', '\'']).unwrap_or(trimmed);
    trimmed.to_string()
}
