use axum::{extract::State, http::StatusCode, response::Json};
use diesel::{sql_query, RunQueryDsl};
use serde_json::json;
use tracing::warn;

use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let database_ok = match state.db() {
        Ok(mut conn) => sql_query("SELECT 1").execute(&mut conn).is_ok(),
        Err(err) => {
            warn!(error = ?err, "health check could not reach the database");
            false
        }
    };

    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": if database_ok { "ok" } else { "degraded" },
        "database": database_ok,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    (status, Json(body))
}
