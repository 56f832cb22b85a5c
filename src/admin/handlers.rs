use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use serde_json::{json, Value};

use crate::cache::CacheStats;
use crate::http::server::AppState;
use crate::resilience::{BreakerSnapshot, CircuitState};
use crate::security::LimiterStats;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub circuit_state: CircuitState,
    pub cache: Option<CacheStats>,
    pub rate_limit: Option<LimiterStats>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let gateway = &state.gateway;
    let circuit_state = gateway.breaker().state();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if circuit_state == CircuitState::Closed { "operational" } else { "degraded" },
        circuit_state,
        cache: gateway.cache().map(|c| c.stats()),
        rate_limit: gateway.limiter().map(|l| l.stats()),
    })
}

pub async fn get_breaker(State(state): State<AppState>) -> Json<BreakerSnapshot> {
    Json(state.gateway.breaker().snapshot())
}

pub async fn get_cache(State(state): State<AppState>) -> Json<Value> {
    match state.gateway.cache() {
        Some(cache) => Json(json!({ "enabled": true, "stats": cache.stats() })),
        None => Json(json!({ "enabled": false })),
    }
}

pub async fn clear_cache(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.gateway.cache() {
        Some(cache) => {
            let cleared = cache.size();
            cache.clear();
            tracing::info!(cleared, "Result cache cleared by admin");
            (StatusCode::OK, Json(json!({ "cleared": cleared })))
        }
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "Cache disabled" }))),
    }
}

pub async fn get_limiter(State(state): State<AppState>) -> Json<Value> {
    match state.gateway.limiter() {
        Some(limiter) => Json(json!({ "enabled": true, "stats": limiter.stats() })),
        None => Json(json!({ "enabled": false })),
    }
}
