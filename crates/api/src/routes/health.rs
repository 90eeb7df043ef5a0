//! Health check endpoint

use axum::Json;
use serde_json::{json, Value};

/// Liveness probe; intentionally does not touch the database
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "pagesmith-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
