//! Route handlers.
//!
//! Handlers only translate between HTTP and the gateway: extract the caller
//! identity and payload, validate query text or resource names, call the
//! gateway, shape the JSON. Every decision about upstream contact is made by
//! the gateway.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, Path, Query, State,
    },
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Instant;

use crate::error::{GatewayError, GatewayResult};
use crate::http::request::caller_identity;
use crate::http::response::with_remaining;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::security::validation::{validate_query_text, validate_resource_name};
use crate::upstream::types::{
    GenerateRequest, GenerateResponse, ListDocumentsRequest, QueryRequest, UpstreamRequest,
};

/// Input rejected by an extractor, in the gateway's error shape.
fn rejection_response(status: StatusCode, message: String) -> Response {
    let body = json!({
        "success": false,
        "error": message,
        "code": if status == StatusCode::PAYLOAD_TOO_LARGE { "payload_too_large" } else { "invalid_request" },
    });
    (status, Json(body)).into_response()
}

fn finish(route: &'static str, start: Instant, response: Response) -> Response {
    metrics::record_request(route, response.status().as_u16(), start);
    response
}

/// `GET /api/config`
pub async fn get_config(State(state): State<AppState>) -> Json<Value> {
    let upstream = &state.config.upstream;
    Json(json!({
        "success": true,
        "store_name": upstream.file_search_store,
        "api_configured": !upstream.api_key.is_empty(),
        "default_model": upstream.default_model,
    }))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "circuit_breaker": state.gateway.breaker().state(),
    }))
}

/// `POST /api/chat/query`
pub async fn chat_query(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Response {
    let start = Instant::now();
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            let response = rejection_response(rejection.status(), rejection.body_text());
            return finish("query", start, response);
        }
    };
    let identity = caller_identity(&peer);

    let response = match run_query(&state, &identity, request).await {
        Ok(value) => Json(with_success(value)).into_response(),
        Err(err) => err.into_response(),
    };
    let response = with_remaining(response, state.gateway.remaining(&identity));
    finish("query", start, response)
}

async fn run_query(state: &AppState, identity: &str, request: QueryRequest) -> GatewayResult<Value> {
    validate_query_text(&request.query, state.config.security.strict_validation)?;
    let request = request.normalized();

    tracing::info!(
        identity = %identity,
        document = request.document_name.as_deref().unwrap_or("*"),
        results_count = request.results_count,
        "Query request"
    );
    state
        .gateway
        .call_non_streaming(identity, UpstreamRequest::Query(request))
        .await
}

/// `POST /api/chat/generate`
pub async fn chat_generate(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Response {
    let start = Instant::now();
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            let response = rejection_response(rejection.status(), rejection.body_text());
            return finish("generate", start, response);
        }
    };
    let identity = caller_identity(&peer);

    let response = match run_generate(&state, &identity, request).await {
        Ok(value) => Json(value).into_response(),
        Err(err) => err.into_response(),
    };
    let response = with_remaining(response, state.gateway.remaining(&identity));
    finish("generate", start, response)
}

async fn run_generate(state: &AppState, identity: &str, request: GenerateRequest) -> GatewayResult<Value> {
    validate_query_text(&request.query, state.config.security.strict_validation)?;

    let model = request
        .model
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| state.config.upstream.default_model.clone());
    let query = request.query.clone();
    let chunks_used = request.relevant_chunks.len();

    let raw = state
        .gateway
        .call_non_streaming(identity, UpstreamRequest::Generate(request))
        .await?;
    let parsed: GenerateResponse = serde_json::from_value(raw)
        .map_err(|e| GatewayError::upstream(format!("unexpected generation response: {e}")))?;

    let text = parsed
        .text()
        .ok_or_else(|| GatewayError::upstream("No response generated by the model"))?;

    Ok(json!({
        "success": true,
        "response": text,
        "query": query,
        "model": model,
        "chunks_used": chunks_used,
        "finish_reason": parsed.finish_reason(),
    }))
}

/// `POST /api/chat/generate-stream`
///
/// Admission failures are answered with a plain error status; once the
/// stream is open, failures arrive as its terminal `error` frame.
pub async fn chat_generate_stream(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Response {
    let start = Instant::now();
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            let response = rejection_response(rejection.status(), rejection.body_text());
            return finish("generate_stream", start, response);
        }
    };
    let identity = caller_identity(&peer);

    if let Err(err) = validate_query_text(&request.query, state.config.security.strict_validation) {
        return finish("generate_stream", start, err.into_response());
    }

    let response = match state.gateway.open_stream(&identity, request) {
        Ok(events) => {
            tracing::info!(identity = %identity, "Streaming generation opened");
            let frames = events.map(|event| Ok::<_, Infallible>(Event::default().data(event.to_json())));
            Sse::new(frames).keep_alive(KeepAlive::default()).into_response()
        }
        Err(err) => err.into_response(),
    };
    let response = with_remaining(response, state.gateway.remaining(&identity));
    finish("generate_stream", start, response)
}

/// Shape a gateway result and stamp the caller's remaining budget on it.
fn reply(
    state: &AppState,
    identity: &str,
    route: &'static str,
    start: Instant,
    result: GatewayResult<Value>,
) -> Response {
    let response = match result {
        Ok(value) => Json(value).into_response(),
        Err(err) => err.into_response(),
    };
    let response = with_remaining(response, state.gateway.remaining(identity));
    finish(route, start, response)
}

/// `GET /api/documents`
pub async fn list_documents(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    params: Result<Query<ListDocumentsRequest>, QueryRejection>,
) -> Response {
    let start = Instant::now();
    let Query(request) = match params {
        Ok(params) => params,
        Err(rejection) => {
            let response = rejection_response(rejection.status(), rejection.body_text());
            return finish("list_documents", start, response);
        }
    };
    let identity = caller_identity(&peer);

    let result = state
        .gateway
        .call_non_streaming(&identity, UpstreamRequest::ListDocuments(request.normalized()))
        .await
        .map(with_success);
    reply(&state, &identity, "list_documents", start, result)
}

/// `DELETE /api/documents/{*name}`
pub async fn delete_document(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(name): Path<String>,
) -> Response {
    let start = Instant::now();
    let identity = caller_identity(&peer);

    let result = run_delete(&state, &identity, name).await;
    reply(&state, &identity, "delete_document", start, result)
}

async fn run_delete(state: &AppState, identity: &str, name: String) -> GatewayResult<Value> {
    validate_resource_name(&name)?;
    tracing::info!(identity = %identity, document = %name, "Delete document request");

    state
        .gateway
        .call_non_streaming(identity, UpstreamRequest::DeleteDocument(name.clone()))
        .await?;
    tracing::info!(document = %name, "Document deleted");
    Ok(json!({ "success": true, "message": "Document deleted" }))
}

/// `GET /api/operations/{*name}`
pub async fn get_operation(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(name): Path<String>,
) -> Response {
    let start = Instant::now();
    let identity = caller_identity(&peer);

    let result = match validate_resource_name(&name) {
        Ok(()) => state
            .gateway
            .call_non_streaming(&identity, UpstreamRequest::GetOperation(name))
            .await
            .map(operation_status),
        Err(err) => Err(err),
    };
    reply(&state, &identity, "get_operation", start, result)
}

/// Summarize a long-running operation: `done`, plus `error` or `document`
/// once it has finished.
fn operation_status(operation: Value) -> Value {
    let done = operation.get("done").and_then(Value::as_bool).unwrap_or(false);
    let mut status = json!({ "success": true, "done": done });

    if done {
        match operation.get("error") {
            Some(error) => {
                tracing::warn!(error = %error, "Operation finished with an error");
                status["error"] = error.clone();
            }
            None => {
                status["document"] = operation.get("response").cloned().unwrap_or_else(|| json!({}));
            }
        }
    }
    status["operation"] = operation;
    status
}

fn with_success(value: Value) -> Value {
    match value {
        Value::Object(mut fields) => {
            fields.insert("success".into(), Value::Bool(true));
            Value::Object(fields)
        }
        other => json!({ "success": true, "result": other }),
    }
}
