//! AI hint client - forwards exercise context to a local LLM endpoint
//!
//! Thin blocking request/response call against an Ollama-compatible
//! `/api/generate` endpoint. The endpoint is an opaque collaborator: the
//! only obligation here is to supply exercise title/description, the
//! current source text, and optional failing-test output as prompt
//! context, and hand back the generated text.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::HintConfig;
use crate::course::Exercise;
use crate::store::{HINT_COUNTER, ProgressStore};

/// Errors that can occur while requesting a hint
#[derive(Debug, Error)]
pub enum HintError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("hint endpoint returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Text-generation backend behind the hint feature
#[async_trait]
pub trait HintBackend: Send + Sync {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, HintError>;
}

/// Client for a local Ollama-compatible generation endpoint
pub struct OllamaClient {
    base_url: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaClient {
    pub fn from_config(config: &HintConfig) -> Result<Self, HintError> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(HintError::Network)?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl HintBackend for OllamaClient {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, HintError> {
        let url = format!("{}/api/generate", self.base_url);
        debug!(%url, %model, prompt_len = prompt.len(), "requesting hint");

        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "model": model,
                "prompt": prompt,
                "stream": false,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(HintError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| HintError::InvalidResponse(e.to_string()))?;

        if body.response.trim().is_empty() {
            return Err(HintError::InvalidResponse("empty generation".to_string()));
        }

        Ok(body.response)
    }
}

/// Build the hint prompt from exercise context
///
/// Keeps the shape stable so the model sees title, description, source,
/// and (when available) the failing test transcript in that order.
pub fn build_prompt(exercise: &Exercise, source: &str, failing_output: Option<&str>) -> String {
    let mut prompt = format!(
        "You are a programming tutor. A student is stuck on the exercise \"{}\".\n\
         Exercise description: {}\n\n\
         Their current code:\n```\n{}\n```\n",
        exercise.title,
        if exercise.description.is_empty() {
            "(none)"
        } else {
            &exercise.description
        },
        source,
    );

    if let Some(output) = failing_output {
        prompt.push_str(&format!("\nFailing test output:\n```\n{output}\n```\n"));
    }

    prompt.push_str(
        "\nGive one concise hint that nudges the student toward the fix. \
         Do not write the solution for them.",
    );
    prompt
}

/// Hint feature entry point: prompt assembly, backend call, usage counter
pub struct HintClient {
    backend: Arc<dyn HintBackend>,
    model: String,
    store: ProgressStore,
}

impl HintClient {
    pub fn new(backend: Arc<dyn HintBackend>, model: String, store: ProgressStore) -> Self {
        Self { backend, model, store }
    }

    pub fn from_config(config: &HintConfig, store: ProgressStore) -> Result<Self, HintError> {
        let backend = Arc::new(OllamaClient::from_config(config)?);
        Ok(Self::new(backend, config.model.clone(), store))
    }

    /// Request a hint for one exercise
    ///
    /// Increments the per-course hint counter on success; a counter write
    /// failure does not discard an already-generated hint.
    pub async fn hint_for(
        &self,
        exercise: &Exercise,
        source: &str,
        failing_output: Option<&str>,
    ) -> Result<String, HintError> {
        let prompt = build_prompt(exercise, source, failing_output);
        let hint = self.backend.generate(&self.model, &prompt).await?;

        if let Err(e) = self.store.increment_counter(HINT_COUNTER).await {
            warn!(error = %e, "failed to record hint usage");
        }

        Ok(hint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct MockBackend {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl MockBackend {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HintBackend for MockBackend {
        async fn generate(&self, _model: &str, prompt: &str) -> Result<String, HintError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    fn exercise() -> Exercise {
        Exercise {
            id: "sum".to_string(),
            title: "Summing".to_string(),
            description: "Add two numbers".to_string(),
            order: 0,
            source_path: PathBuf::from("exercises/sum/sum.py"),
            test_path: PathBuf::from("exercises/sum/test_sum.py"),
            readme_path: PathBuf::from("exercises/sum/README.md"),
        }
    }

    #[test]
    fn test_prompt_includes_exercise_context() {
        let prompt = build_prompt(&exercise(), "def add(a, b): pass", Some("assert 3 == None"));

        assert!(prompt.contains("Summing"));
        assert!(prompt.contains("Add two numbers"));
        assert!(prompt.contains("def add(a, b): pass"));
        assert!(prompt.contains("assert 3 == None"));
    }

    #[test]
    fn test_prompt_omits_missing_test_output() {
        let prompt = build_prompt(&exercise(), "code", None);
        assert!(!prompt.contains("Failing test output"));
    }

    #[tokio::test]
    async fn test_hint_for_counts_usage() {
        let temp = tempdir().unwrap();
        let store = ProgressStore::open(&temp.path().join("p.db")).await.unwrap();
        let backend = MockBackend::new("try returning a + b");
        let client = HintClient::new(backend.clone(), "test-model".to_string(), store.clone());

        let hint = client.hint_for(&exercise(), "def add(a, b): pass", None).await.unwrap();

        assert_eq!(hint, "try returning a + b");
        assert_eq!(store.counter(HINT_COUNTER).await.unwrap(), 1);
        assert_eq!(backend.prompts.lock().unwrap().len(), 1);
    }
}
