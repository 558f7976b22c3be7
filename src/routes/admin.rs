use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::AppState;
use crate::error::GatewayError;

#[derive(Debug, Deserialize)]
pub struct SetLimitQuery {
    pub limit: u64,
}

/// Set a per-caller rate limit override. The override has no TTL and stays
/// in effect until replaced.
pub async fn set_rate_limit(
    State(state): State<Arc<AppState>>,
    Path(api_key_id): Path<String>,
    Query(query): Query<SetLimitQuery>,
) -> Response {
    match state.limiter.set_limit(&api_key_id, query.limit).await {
        Ok(()) => {
            info!("Rate limit for {api_key_id} set to {}", query.limit);
            Json(json!({
                "message": format!("Rate limit for {api_key_id} set to {}", query.limit)
            }))
            .into_response()
        }
        Err(e) => {
            error!("Error setting rate limit for {api_key_id}: {e}");
            GatewayError::from(e).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::routes::generate::tests::test_state_with_store;

    #[tokio::test]
    async fn test_set_rate_limit_applies_override() {
        let (state, _store) = test_state_with_store();
        let app = crate::routes::router(state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/set-rate-limit/k2?limit=5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.limiter.effective_limit("k2").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_set_rate_limit_twice_is_idempotent() {
        let (state, _store) = test_state_with_store();
        let app = crate::routes::router(state.clone());

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/admin/set-rate-limit/k9?limit=7")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(state.limiter.effective_limit("k9").await.unwrap(), 7);
    }
}
