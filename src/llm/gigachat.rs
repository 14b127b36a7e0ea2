/// GigaChat API client
///
/// OAuth token exchange plus chat and embedding endpoints. The client keeps
/// a conversation history so consecutive completions within one flow share
/// context, and transparently retries once after a token refresh when the
/// API answers 401.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::GigaChatConfig;
use crate::llm::{ChatClient, ChatMessage, ChatResponse};

/// Mutable client state behind one lock: token and history move together
#[derive(Debug, Default)]
struct ClientState {
    access_token: Option<String>,
    /// Credential remembered from the last `get_token` call, used for
    /// 401-triggered refreshes.
    auth_token: Option<String>,
    history: Vec<ChatMessage>,
}

/// GigaChat HTTP client
pub struct GigaChatClient {
    http: reqwest::Client,
    config: GigaChatConfig,
    state: Mutex<ClientState>,
}

impl GigaChatClient {
    pub fn new(config: GigaChatConfig) -> Result<Self> {
        // The GigaChat endpoints serve a national CA certificate; peer
        // verification is disabled the same way the stock clients do it.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .danger_accept_invalid_certs(true)
            .build()
            .context("failed to build GigaChat HTTP client")?;

        Ok(Self {
            http,
            config,
            state: Mutex::new(ClientState::default()),
        })
    }

    fn access_token(&self) -> Option<String> {
        self.state.lock().ok().and_then(|s| s.access_token.clone())
    }

    /// Re-run the OAuth exchange with the remembered credential
    async fn refresh_token(&self) -> Result<bool> {
        let auth_token = self
            .state
            .lock()
            .ok()
            .and_then(|s| s.auth_token.clone())
            .ok_or_else(|| anyhow::anyhow!("No auth token available for refresh"))?;
        self.get_token(&auth_token).await
    }

    async fn post_chat(&self, messages: &[Value], access_token: &str) -> Result<reqwest::Response> {
        let payload = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": 1,
            "top_p": 0.1,
            "n": 1,
            "stream": false,
            "max_tokens": 512,
            "repetition_penalty": 1,
        });

        self.http
            .post(format!("{}/chat/completions", self.config.api_url))
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await
            .context("chat completion request failed")
    }

    async fn post_embeddings(&self, text: &str, access_token: &str) -> Result<reqwest::Response> {
        let payload = json!({
            "model": "Embeddings",
            "input": [text],
        });

        self.http
            .post(format!("{}/embeddings", self.config.api_url))
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await
            .context("embedding request failed")
    }
}

#[async_trait]
impl ChatClient for GigaChatClient {
    async fn get_token(&self, auth_token: &str) -> Result<bool> {
        // Tolerate a credential pasted with its scheme prefix.
        let auth_token = auth_token
            .strip_prefix("Basic ")
            .or_else(|| auth_token.strip_prefix("basic "))
            .unwrap_or(auth_token)
            .to_string();

        let rq_uid = Uuid::new_v4().to_string();
        tracing::info!("🔑 Requesting GigaChat access token from {}", self.config.oauth_url);

        let response = self
            .http
            .post(&self.config.oauth_url)
            .header("RqUID", rq_uid)
            .header("Authorization", format!("Basic {}", auth_token))
            .header("Accept", "application/json")
            .form(&[("scope", self.config.scope.as_str())])
            .send()
            .await
            .context("token request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("❌ Failed to obtain GigaChat token: {} {}", status, body);
            return Ok(false);
        }

        let body: Value = response.json().await.context("token response is not JSON")?;
        let access_token = body
            .get("access_token")
            .and_then(|t| t.as_str())
            .ok_or_else(|| anyhow::anyhow!("Token response missing access_token"))?
            .to_string();

        if let Ok(mut state) = self.state.lock() {
            state.access_token = Some(access_token);
            state.auth_token = Some(auth_token);
        }

        tracing::info!("✅ GigaChat access token obtained");
        Ok(true)
    }

    async fn chat_completion(&self, system_message: &str, user_message: &str) -> Result<ChatResponse> {
        let access_token = self
            .access_token()
            .ok_or_else(|| anyhow::anyhow!("Access token not obtained, call get_token first"))?;

        let messages: Vec<Value> = {
            let state = self.state.lock().map_err(|_| anyhow::anyhow!("client state poisoned"))?;
            std::iter::once(ChatMessage::new("system", system_message))
                .chain(state.history.iter().cloned())
                .chain(std::iter::once(ChatMessage::new("user", user_message)))
                .map(|m| json!({"role": m.role, "content": m.content}))
                .collect()
        };

        let mut response = self.post_chat(&messages, &access_token).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!("🔁 GigaChat returned 401, refreshing token and retrying once");
            if self.refresh_token().await? {
                let access_token = self
                    .access_token()
                    .ok_or_else(|| anyhow::anyhow!("Token refresh succeeded but no token stored"))?;
                response = self.post_chat(&messages, &access_token).await?;
            }
        }

        if !response.status().is_success() {
            let status = response.status();
            tracing::error!("❌ GigaChat API error: {}", status);
            return Ok(ChatResponse::failure(format!("API Error: {}", status)));
        }

        let body: Value = response.json().await.context("chat response is not JSON")?;
        let assistant = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Chat response missing message content"))?
            .to_string();

        let conversation_length = {
            let mut state = self.state.lock().map_err(|_| anyhow::anyhow!("client state poisoned"))?;
            state.history.push(ChatMessage::new("user", user_message));
            state.history.push(ChatMessage::new("assistant", assistant.clone()));
            state.history.len()
        };

        tracing::info!("✅ GigaChat completion received ({} chars)", assistant.len());
        Ok(ChatResponse {
            success: true,
            response: Some(assistant),
            error: None,
            conversation_length,
        })
    }

    async fn embedding(&self, text: &str) -> Result<Vec<f32>> {
        let access_token = self
            .access_token()
            .ok_or_else(|| anyhow::anyhow!("Access token not obtained, call get_token first"))?;

        let mut response = self.post_embeddings(text, &access_token).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!("🔁 Embedding request got 401, refreshing token and retrying once");
            if self.refresh_token().await? {
                let access_token = self
                    .access_token()
                    .ok_or_else(|| anyhow::anyhow!("Token refresh succeeded but no token stored"))?;
                response = self.post_embeddings(text, &access_token).await?;
            }
        }

        if !response.status().is_success() {
            anyhow::bail!("Embedding API error: {}", response.status());
        }

        let body: Value = response.json().await.context("embedding response is not JSON")?;
        let vector = body["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Embedding response missing vector"))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        Ok(vector)
    }

    fn clear_history(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.history.clear();
        }
        tracing::info!("🗑️ Conversation history cleared");
    }
}
