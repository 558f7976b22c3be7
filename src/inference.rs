//! The inference capability boundary.
//!
//! The gateway treats text generation as a black box: hand it a prompt and
//! sampling parameters, get back text and token counts. `MockEngine` stands
//! in for a real backend and simulates its latency profile.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::GatewayError;

pub struct GenerationParams {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stop: Option<Vec<String>>,
}

/// One generated choice plus the token counts the backend reports.
/// The gateway never recomputes counts itself.
pub struct Completion {
    pub text: String,
    pub finish_reason: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Completion {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn generate(&self, params: &GenerationParams) -> Result<Completion, GatewayError>;
}

/// Mock backend: estimates prompt tokens from word count, consumes half the
/// token budget, and sleeps as if generating at 30 tokens/second (capped).
pub struct MockEngine {
    simulate_latency: bool,
}

const MOCK_TOKENS_PER_SECOND: f64 = 30.0;
const MOCK_MAX_DELAY: Duration = Duration::from_secs(5);

impl MockEngine {
    pub fn new() -> Self {
        Self {
            simulate_latency: true,
        }
    }

    #[cfg(test)]
    pub fn instant() -> Self {
        Self {
            simulate_latency: false,
        }
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceEngine for MockEngine {
    async fn generate(&self, params: &GenerationParams) -> Result<Completion, GatewayError> {
        let prompt_tokens = (params.prompt.split_whitespace().count() as f64 * 1.3) as u64;
        let completion_tokens = (params.max_tokens / 2) as u64;

        if self.simulate_latency {
            let delay =
                Duration::from_secs_f64(completion_tokens as f64 / MOCK_TOKENS_PER_SECOND);
            tokio::time::sleep(delay.min(MOCK_MAX_DELAY)).await;
        }

        let summary: String = params.prompt.chars().take(50).collect();
        Ok(Completion {
            text: format!(
                "// Here's a function to {summary}\n\nfunction example() {{\n  console.log('This is a mock response');\n  return true;\n}}"
            ),
            finish_reason: "stop".to_string(),
            prompt_tokens,
            completion_tokens,
        })
    }
}
