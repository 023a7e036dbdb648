use super::*;
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
    },
    Client,
};
use std::time::Instant;

/// OpenAI provider implementation
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    configured: bool,
    model: String,
    timeout: Duration,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider with the given API key and model
    pub fn new(api_key: Option<String>, model: String, timeout: Duration) -> Self {
        let api_key = usable_key(api_key);
        let configured = api_key.is_some();
        let config = OpenAIConfig::new().with_api_key(api_key.unwrap_or_default());
        let client = Client::with_config(config);

        Self {
            client,
            configured,
            model,
            timeout,
        }
    }

    /// One system + user exchange, returning the first choice's text
    async fn chat(
        &self,
        system_content: &str,
        user_content: String,
        temperature: f32,
        max_tokens: u32,
    ) -> GenerationResult<String> {
        if !self.configured {
            return Err(GenerationError::NotConfigured("OpenAI".to_string()));
        }

        let user_message = ChatCompletionRequestUserMessage {
            content: ChatCompletionRequestUserMessageContent::Text(user_content),
            name: None,
        };

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_content)
                    .build()
                    .map_err(|e| GenerationError::Request(e.to_string()))?
                    .into(),
                user_message.into(),
            ])
            .temperature(temperature)
            .max_tokens(max_tokens)
            .build()
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        tracing::debug!("Calling OpenAI model {}", self.model);
        let response = tokio::time::timeout(self.timeout, self.client.chat().create(chat_request))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout))?
            .map_err(map_openai_error)?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|text| !text.trim().is_empty())
            .ok_or(GenerationError::EmptyResponse)
    }
}

fn map_openai_error(error: OpenAIError) -> GenerationError {
    match error {
        OpenAIError::Reqwest(e) => match e.status() {
            Some(status) => GenerationError::Api {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None => GenerationError::Request(e.to_string()),
        },
        other => GenerationError::Request(other.to_string()),
    }
}

#[async_trait]
impl GenerationProvider for OpenAiProvider {
    async fn generate(&self, request: &GenerationRequest) -> GenerationResult<GeneratedCode> {
        let start = Instant::now();
        tracing::info!("Generating game with OpenAI: {}", request.prompt);

        let text = self
            .chat(
                GAME_ARCHITECT_PROMPT,
                game_specification(request),
                0.7,
                8192,
            )
            .await?;

        let code = sanitize_code(&text);
        if code.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }

        Ok(GeneratedCode {
            code,
            metadata: ResponseMetadata {
                provider: "openai".to_string(),
                model: self.model.clone(),
                latency_ms: start.elapsed().as_millis() as u64,
            },
        })
    }

    async fn generate_idea(&self) -> GenerationResult<String> {
        let text = self
            .chat(
                "You are a creative indie game designer.",
                IDEA_PROMPT.to_string(),
                0.9,
                100,
            )
            .await?;
        Ok(clean_idea(&text))
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn is_configured(&self) -> bool {
        self.configured
    }
}
