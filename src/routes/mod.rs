pub mod admin;
pub mod generate;
pub mod health;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/generate", post(generate::generate))
        .route(
            "/admin/set-rate-limit/{api_key_id}",
            post(admin::set_rate_limit),
        )
        .with_state(state)
}
