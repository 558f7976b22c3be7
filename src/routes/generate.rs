//! The `/generate` request path: admission check, inference, response
//! assembly, metrics, and deferred usage accounting.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::AppState;
use crate::error::GatewayError;
use crate::inference::GenerationParams;
use crate::limiter::Decision;
use crate::metrics::Outcome;
use crate::now_secs;

const ENDPOINT: &str = "/generate";

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    1.0
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
    #[serde(default)]
    pub api_key_id: String,
}

#[derive(Debug, Serialize)]
pub struct Choice {
    pub text: String,
    pub index: u32,
    pub finish_reason: String,
}

#[derive(Debug, Serialize)]
pub struct UsageInfo {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: UsageInfo,
}

pub async fn generate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GenerateRequest>,
) -> Response {
    let start = Instant::now();

    // Presence validation happens before any store interaction: a request
    // without a caller identity must leave no trace in the counters.
    let api_key_id = body.api_key_id.trim().to_string();
    if api_key_id.is_empty() {
        state
            .metrics
            .observe_request(ENDPOINT, Outcome::Error, start.elapsed().as_secs_f64());
        return GatewayError::MissingApiKey.into_response();
    }
    if body.prompt.is_empty() {
        state
            .metrics
            .observe_request(ENDPOINT, Outcome::Error, start.elapsed().as_secs_f64());
        return GatewayError::InvalidRequest("prompt is required".to_string()).into_response();
    }

    let now = now_secs();
    if let Decision::Denied { retry_after_secs } =
        state.limiter.check_and_increment(&api_key_id, now).await
    {
        info!("Rate limit exceeded for {api_key_id}");
        state.metrics.observe_request(
            ENDPOINT,
            Outcome::RateLimited,
            start.elapsed().as_secs_f64(),
        );
        return GatewayError::RateLimitExceeded { retry_after_secs }.into_response();
    }

    info!(
        "Generate request from {api_key_id}: {}...",
        body.prompt.chars().take(50).collect::<String>()
    );

    let params = GenerationParams {
        prompt: body.prompt,
        max_tokens: body.max_tokens,
        temperature: body.temperature,
        top_p: body.top_p,
        stop: body.stop,
    };

    let completion = match state.engine.generate(&params).await {
        Ok(completion) => completion,
        Err(e) => {
            error!("Error generating text: {e}");
            state
                .metrics
                .observe_request(ENDPOINT, Outcome::Error, start.elapsed().as_secs_f64());
            return e.into_response();
        }
    };

    let total_tokens = completion.total_tokens();
    let response = GenerateResponse {
        id: format!("gen_{}", Uuid::new_v4().simple()),
        object: "text_completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: state.model_name.clone(),
        usage: UsageInfo {
            prompt_tokens: completion.prompt_tokens,
            completion_tokens: completion.completion_tokens,
            total_tokens,
        },
        choices: vec![Choice {
            text: completion.text,
            index: 0,
            finish_reason: completion.finish_reason,
        }],
    };

    state
        .metrics
        .observe_request(ENDPOINT, Outcome::Success, start.elapsed().as_secs_f64());
    state.metrics.add_tokens_generated(response.usage.completion_tokens);
    state.metrics.add_tokens_processed(total_tokens);
    state.accountant.record(&api_key_id, total_tokens, now);

    Json(response).into_response()
}

#[cfg(test)]
pub mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::AppState;
    use crate::inference::{Completion, InferenceEngine, MockEngine};
    use crate::limiter::RateLimiter;
    use crate::metrics::Metrics;
    use crate::store::{CounterStore, MemoryStore};
    use crate::usage::UsageAccountant;

    struct FailingEngine;

    #[async_trait]
    impl InferenceEngine for FailingEngine {
        async fn generate(&self, _params: &GenerationParams) -> Result<Completion, GatewayError> {
            Err(GatewayError::Inference("CUDA out of memory".to_string()))
        }
    }

    fn build_state(
        engine: Arc<dyn InferenceEngine>,
        store: Arc<MemoryStore>,
    ) -> Arc<AppState> {
        let store: Arc<dyn CounterStore> = store;
        Arc::new(AppState {
            limiter: RateLimiter::new(store.clone(), 100),
            accountant: UsageAccountant::new(store),
            metrics: Arc::new(Metrics::new().unwrap()),
            engine,
            model_name: "test-model".to_string(),
        })
    }

    pub fn test_state_with_store() -> (Arc<AppState>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (build_state(Arc::new(MockEngine::instant()), store.clone()), store)
    }

    fn generate_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/generate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_successful_generation() {
        let (state, store) = test_state_with_store();
        let app = crate::routes::router(state.clone());

        let response = app
            .oneshot(generate_request(json!({
                "prompt": "write a quicksort in rust",
                "max_tokens": 100,
                "api_key_id": "k1"
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert!(body["id"].as_str().unwrap().starts_with("gen_"));
        assert_eq!(body["object"], "text_completion");
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["choices"][0]["index"], 0);
        assert_eq!(body["choices"][0]["finish_reason"], "stop");
        // 5 words * 1.3 = 6 prompt tokens, 100 / 2 = 50 completion tokens.
        assert_eq!(body["usage"]["prompt_tokens"], 6);
        assert_eq!(body["usage"]["completion_tokens"], 50);
        assert_eq!(body["usage"]["total_tokens"], 56);

        assert_eq!(state.metrics.request_count(ENDPOINT, Outcome::Success), 1);

        // The deferred usage record lands shortly after the response.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            store.get("total_usage:k1").await.unwrap(),
            Some("56".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_api_key_touches_no_counters() {
        // Scenario C: rejected before any store interaction.
        let (state, store) = test_state_with_store();
        let app = crate::routes::router(state);

        let response = app
            .oneshot(generate_request(json!({ "prompt": "hello" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(store.live_entry_count(), 0);
    }

    #[tokio::test]
    async fn test_blank_api_key_is_rejected() {
        let (state, store) = test_state_with_store();
        let app = crate::routes::router(state);

        let response = app
            .oneshot(generate_request(
                json!({ "prompt": "hello", "api_key_id": "   " }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(store.live_entry_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_prompt_is_rejected() {
        let (state, _store) = test_state_with_store();
        let app = crate::routes::router(state);

        let response = app
            .oneshot(generate_request(json!({ "api_key_id": "k1" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rate_limited_request_gets_429_with_retry_after() {
        let (state, store) = test_state_with_store();
        // Override of 0 denies the very first request in any window.
        store.set("rate_limit:k1", "0", None).await.unwrap();
        let app = crate::routes::router(state.clone());

        let response = app
            .oneshot(generate_request(
                json!({ "prompt": "hello", "api_key_id": "k1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "60");
        assert_eq!(
            state.metrics.request_count(ENDPOINT, Outcome::RateLimited),
            1
        );
    }

    #[tokio::test]
    async fn test_inference_failure_surfaces_and_records_no_usage() {
        // Scenario D: server error, error counter bumped, no usage written.
        let store = Arc::new(MemoryStore::new());
        let state = build_state(Arc::new(FailingEngine), store.clone());
        let app = crate::routes::router(state.clone());

        let response = app
            .oneshot(generate_request(
                json!({ "prompt": "hello", "api_key_id": "k1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("CUDA out of memory"));

        assert_eq!(state.metrics.request_count(ENDPOINT, Outcome::Error), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("total_usage:k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_defaults_applied_to_optional_params() {
        let (state, _store) = test_state_with_store();
        let app = crate::routes::router(state);

        let response = app
            .oneshot(generate_request(
                json!({ "prompt": "hello", "api_key_id": "k1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        // Default max_tokens of 1024 halved by the mock engine.
        assert_eq!(body["usage"]["completion_tokens"], 512);
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let (state, _store) = test_state_with_store();
        let app = crate::routes::router(state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model"], "test-model");

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
