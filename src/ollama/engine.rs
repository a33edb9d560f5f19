//! [`ModelEngine`] backed by a local Ollama server

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info};

use super::client::{GenerationOptions, OllamaClient, OllamaMessage};
use crate::agent::model::{ModelEngine, ModelError, ModelFactory};
use crate::metrics::MODEL_LOAD_DURATION;

/// Text reported when the model returns no content at all
pub const NO_RESPONSE: &str = "No response generated";

/// One Ollama model with fixed sampling options
pub struct OllamaEngine {
    client: OllamaClient,
    model: String,
    options: GenerationOptions,
}

impl OllamaEngine {
    pub fn new(client: OllamaClient, model: impl Into<String>, options: GenerationOptions) -> Self {
        Self {
            client,
            model: model.into(),
            options,
        }
    }
}

#[async_trait]
impl ModelEngine for OllamaEngine {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, instruction: &str) -> Result<String, ModelError> {
        // A single user turn; repairs carry their context inside the instruction.
        let messages = [OllamaMessage::user(instruction)];
        let response = self.client.chat(&messages, &self.model, &self.options).await?;

        debug!(
            model = %self.model,
            eval_count = response.eval_count,
            eval_duration_ns = response.eval_duration,
            "Chat response received"
        );

        Ok(normalize_content(response.message.content))
    }
}

fn normalize_content(content: String) -> String {
    if content.trim().is_empty() {
        NO_RESPONSE.to_string()
    } else {
        content
    }
}

/// Loads the configured model on first use and hands out an [`OllamaEngine`]
pub struct OllamaLauncher {
    client: OllamaClient,
    model: String,
    options: GenerationOptions,
}

impl OllamaLauncher {
    pub fn new(client: OllamaClient, model: impl Into<String>, options: GenerationOptions) -> Self {
        Self {
            client,
            model: model.into(),
            options,
        }
    }
}

#[async_trait]
impl ModelFactory for OllamaLauncher {
    async fn create(&self) -> Result<Arc<dyn ModelEngine>, ModelError> {
        info!(model = %self.model, url = %self.client.base_url(), "Loading model");
        let start = Instant::now();

        self.client
            .load(&self.model)
            .await
            .map_err(|e| ModelError::Initialization(format!("{}: {}", self.model, e)))?;

        let elapsed = start.elapsed().as_secs_f64();
        MODEL_LOAD_DURATION
            .with_label_values(&[&self.model])
            .observe(elapsed);
        info!(model = %self.model, duration_ms = elapsed * 1000.0, "Model loaded");

        Ok(Arc::new(OllamaEngine::new(
            self.client.clone(),
            self.model.clone(),
            self.options,
        )))
    }
}
