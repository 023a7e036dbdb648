use super::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Google Gemini provider (generateContent REST API)
pub struct GeminiProvider {
    api_key: Option<String>,
    model: String,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(api_key: Option<String>, model: String, base_url: String, timeout: Duration) -> Self {
        Self {
            api_key: usable_key(api_key),
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    fn api_key(&self) -> GenerationResult<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| GenerationError::NotConfigured("Gemini".to_string()))
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    /// Send one prompt and return the first candidate's text
    async fn complete(&self, body: GeminiRequest) -> GenerationResult<String> {
        let api_key = self.api_key()?;

        tracing::debug!("Calling Gemini model {}", self.model);
        let response = tokio::time::timeout(
            self.timeout,
            self.client
                .post(self.endpoint())
                .query(&[("key", api_key)])
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| GenerationError::Timeout(self.timeout))?
        .map_err(|e| GenerationError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Gemini API returned status {}: {}", status, body);
            return Err(GenerationError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let data: GeminiResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Parse(e.to_string()))?;

        data.first_text()
            .filter(|text| !text.trim().is_empty())
            .ok_or(GenerationError::EmptyResponse)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    safety_settings: Vec<SafetySetting>,
}

impl GeminiRequest {
    fn new(prompt: String, generation_config: GenerationConfig) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![Part { text: Some(prompt) }],
            }],
            generation_config,
            safety_settings: Vec::new(),
        }
    }

    fn unfiltered(mut self) -> Self {
        self.safety_settings = [
            "HARM_CATEGORY_HARASSMENT",
            "HARM_CATEGORY_HATE_SPEECH",
            "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            "HARM_CATEGORY_DANGEROUS_CONTENT",
        ]
        .into_iter()
        .map(|category| SafetySetting {
            category,
            threshold: "BLOCK_NONE",
        })
        .collect();
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

impl GeminiResponse {
    fn first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()?
            .text
    }
}

#[async_trait]
impl GenerationProvider for GeminiProvider {
    async fn generate(&self, request: &GenerationRequest) -> GenerationResult<GeneratedCode> {
        let start = Instant::now();
        tracing::info!("Generating game with Gemini: {}", request.prompt);

        let body = GeminiRequest::new(
            game_prompt(request),
            GenerationConfig {
                temperature: 0.7,
                top_k: Some(40),
                top_p: Some(0.95),
                max_output_tokens: 8192,
            },
        )
        .unfiltered();

        let text = self.complete(body).await?;
        tracing::debug!("Raw text received. Length: {}", text.len());

        let code = sanitize_code(&text);
        if code.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        tracing::info!("Game generated successfully ({} chars)", code.len());

        Ok(GeneratedCode {
            code,
            metadata: ResponseMetadata {
                provider: "gemini".to_string(),
                model: self.model.clone(),
                latency_ms: start.elapsed().as_millis() as u64,
            },
        })
    }

    async fn generate_idea(&self) -> GenerationResult<String> {
        let body = GeminiRequest::new(
            IDEA_PROMPT.to_string(),
            GenerationConfig {
                temperature: 0.9,
                top_k: None,
                top_p: None,
                max_output_tokens: 100,
            },
        );

        let text = self.complete(body).await?;
        Ok(clean_idea(&text))
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}
