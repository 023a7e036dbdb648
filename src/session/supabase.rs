use super::{AuthBackend, AuthError, AuthResult, AuthSession};
use crate::gateway::SupabaseConfig;
use async_trait::async_trait;
use reqwest::{header, Client, Response, Url};
use serde_json::{json, Value};
use std::time::Duration;

/// GoTrue (Supabase Auth) backend
pub struct SupabaseAuth {
    client: Client,
    config: SupabaseConfig,
}

impl SupabaseAuth {
    pub fn new(config: SupabaseConfig) -> AuthResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|source| AuthError::Request {
                path: config.url.clone(),
                source,
            })?;
        Ok(Self { client, config })
    }

    async fn post(&self, path: &str, body: Value, bearer: Option<&str>) -> AuthResult<Response> {
        let mut builder = self
            .client
            .post(self.config.auth_url(path))
            .header("apikey", &self.config.anon_key)
            .json(&body);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = builder.send().await.map_err(|source| AuthError::Request {
            path: path.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        Ok(response)
    }

    async fn token(&self, grant_type: &str, body: Value) -> AuthResult<AuthSession> {
        let response = self
            .post(&format!("token?grant_type={}", grant_type), body, None)
            .await?;
        response
            .json::<AuthSession>()
            .await
            .map_err(|e| AuthError::Decode(e.to_string()))
    }
}

/// Pull the human-readable message out of a GoTrue error body
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl AuthBackend for SupabaseAuth {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        self.token("password", json!({ "email": email, "password": password }))
            .await
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> AuthResult<Option<AuthSession>> {
        let body = json!({
            "email": email,
            "password": password,
            "data": { "username": username, "name": username },
        });
        let value: Value = self
            .post("signup", body, None)
            .await?
            .json()
            .await
            .map_err(|e| AuthError::Decode(e.to_string()))?;

        // Without an access token the project requires email confirmation first
        if value.get("access_token").is_none() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| AuthError::Decode(e.to_string()))
    }

    fn authorize_url(
        &self,
        provider: &str,
        redirect_to: &str,
        code_challenge: &str,
    ) -> AuthResult<String> {
        let url = Url::parse_with_params(
            &self.config.auth_url("authorize"),
            &[
                ("provider", provider),
                ("redirect_to", redirect_to),
                ("code_challenge", code_challenge),
                ("code_challenge_method", "s256"),
            ],
        )
        .map_err(|e| AuthError::Decode(e.to_string()))?;
        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str, verifier: &str) -> AuthResult<AuthSession> {
        self.token(
            "pkce",
            json!({ "auth_code": code, "code_verifier": verifier }),
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<AuthSession> {
        self.token("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
    }

    async fn sign_out(&self, access_token: &str) -> AuthResult<()> {
        self.post("logout", json!({}), Some(access_token)).await?;
        Ok(())
    }
}
