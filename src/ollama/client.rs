//! Ollama HTTP API client
//!
//! Only the two endpoints the session needs:
//! - `/api/chat` (non-streaming) for code generation
//! - `/api/generate` with an empty prompt to load a model into memory

use serde::{Deserialize, Serialize};

/// A message in Ollama's chat format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaMessage {
    pub role: String, // "system", "user", "assistant"
    pub content: String,
}

impl OllamaMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Sampling options sent with every chat request
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    /// Maximum number of tokens to generate
    #[serde(rename = "num_predict")]
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

/// Response from /api/chat
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub message: OllamaMessage,
    pub done: bool,
    #[serde(default)]
    pub eval_count: u32,
    #[serde(default)]
    pub eval_duration: u64,
}

/// Error type for Ollama requests
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Ollama returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Empty response body from Ollama")]
    EmptyBody,
}

/// Client for a local Ollama server
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the Ollama server (e.g., "http://localhost:11434")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a chat request
    ///
    /// # Arguments
    /// * `messages` - The messages to send, oldest first
    /// * `model` - The model name (e.g., "llama3.2:1b")
    /// * `options` - Sampling options
    pub async fn chat(
        &self,
        messages: &[OllamaMessage],
        model: &str,
        options: &GenerationOptions,
    ) -> Result<ChatResponse, ChatError> {
        let endpoint = format!("{}/api/chat", self.base_url);

        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": false,
            "options": options,
        });

        let response = self.client.post(&endpoint).json(&body).send().await?;
        let text = Self::checked_text(response).await?;

        if text.is_empty() {
            return Err(ChatError::EmptyBody);
        }

        Ok(serde_json::from_str(&text)?)
    }

    /// Load `model` into memory without generating anything
    ///
    /// Ollama treats a generate request with no prompt as a load request.
    /// Fails if the model is not available locally.
    pub async fn load(&self, model: &str) -> Result<(), ChatError> {
        let endpoint = format!("{}/api/generate", self.base_url);

        let body = serde_json::json!({
            "model": model,
            "stream": false,
        });

        let response = self.client.post(&endpoint).json(&body).send().await?;
        Self::checked_text(response).await?;
        Ok(())
    }

    async fn checked_text(response: reqwest::Response) -> Result<String, ChatError> {
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ChatError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}
