use std::sync::Arc;

use axum::{extract::State, response::Json};
use serde_json::{Value, json};

use crate::AppState;

pub async fn root() -> Json<Value> {
    Json(json!({ "message": "LLM Gateway API", "status": "running" }))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "status": "healthy", "model": state.model_name }))
}
