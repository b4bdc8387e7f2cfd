pub mod exports;
pub mod process;
pub mod requests;

use axum::Json;
use serde_json::{Value, json};

/// `GET /healthz`
pub async fn healthz() -> Json<Value> { Json(json!({ "status": "ok" })) }
