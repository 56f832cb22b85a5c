//! Upstream API client.
//!
//! # Responsibilities
//! - Speak the remote service's REST dialect (document listing and
//!   deletion, upload operation status, document query, generate,
//!   stream-generate)
//! - Classify HTTP outcomes into `GatewayError` kinds
//! - Hand back raw byte streams for the relay to frame
//!
//! # Design Decisions
//! - Deadlines, retries and breaker bookkeeping live in the gateway, not here
//! - The client is behind the `Upstream` trait so the gateway can be driven
//!   by scripted upstreams in tests

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::join_all;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::time::Duration;

use crate::config::{GenerationConfig, UpstreamConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::upstream::prompt::generation_payload;
use crate::upstream::types::{
    GenerateRequest, ListDocumentsRequest, QueryRequest, DOCUMENTS_SKIPPED, MAX_DOCUMENT_PAGE_SIZE,
};

/// Raw upstream body chunks of a streaming call.
pub type ByteStream = BoxStream<'static, GatewayResult<Bytes>>;

const ACTIVE_DOCUMENT_STATE: &str = "STATE_ACTIVE";
const MAX_ERROR_BODY: usize = 1024;

/// Operations the gateway needs from the remote service.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Retrieve relevant chunks. Result: `{relevant_chunks, query, ...}`.
    async fn query(&self, request: &QueryRequest) -> GatewayResult<Value>;

    /// One-shot generation. Result: the raw `generateContent` response.
    async fn generate(&self, request: &GenerateRequest) -> GatewayResult<Value>;

    /// Open an incremental generation; frames are marker-prefixed JSON lines.
    async fn generate_stream(&self, request: &GenerateRequest) -> GatewayResult<ByteStream>;

    /// One page of store documents. Result: `{documents, nextPageToken}`.
    async fn list_documents(&self, request: &ListDocumentsRequest) -> GatewayResult<Value>;

    /// Delete a document together with its chunks.
    async fn delete_document(&self, name: &str) -> GatewayResult<Value>;

    /// Raw long-running operation resource.
    async fn get_operation(&self, name: &str) -> GatewayResult<Value>;
}

/// `reqwest`-based client for the generative language API.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    store: String,
    default_model: String,
    generation: GenerationConfig,
    connect_timeout: Duration,
}

impl GeminiClient {
    pub fn new(config: &UpstreamConfig, generation: &GenerationConfig) -> GatewayResult<Self> {
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("retrieval-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::upstream(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            store: config.file_search_store.clone(),
            default_model: config.default_model.clone(),
            generation: generation.clone(),
            connect_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("x-goog-api-key", &self.api_key)
    }

    fn model<'a>(&'a self, request: &'a GenerateRequest) -> &'a str {
        request
            .model
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model)
    }

    async fn send(&self, builder: RequestBuilder) -> GatewayResult<Response> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| transport_error(e, self.connect_timeout))?;
        check_status(response).await
    }

    async fn send_json(&self, builder: RequestBuilder) -> GatewayResult<Value> {
        self.send(builder)
            .await?
            .json::<Value>()
            .await
            .map_err(|e| GatewayError::upstream(format!("invalid upstream JSON: {e}")))
    }

    async fn document_page(&self, page_size: u32, page_token: Option<&str>) -> GatewayResult<Value> {
        if self.store.is_empty() {
            return Err(GatewayError::NotFound(
                "No file search store configured".to_string(),
            ));
        }

        let mut builder = self
            .http
            .get(self.url(&format!("{}/documents", self.store)))
            .query(&[("pageSize", page_size)]);
        if let Some(token) = page_token {
            builder = builder.query(&[("pageToken", token)]);
        }
        self.send_json(builder).await
    }

    /// All documents of the configured store, following pagination.
    async fn all_documents(&self) -> GatewayResult<Vec<Value>> {
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .document_page(MAX_DOCUMENT_PAGE_SIZE, page_token.as_deref())
                .await?;

            if let Some(items) = page.get("documents").and_then(Value::as_array) {
                documents.extend(items.iter().cloned());
            }
            page_token = next_page_token(&page);
            if page_token.is_none() {
                break;
            }
        }

        tracing::debug!(count = documents.len(), "Listed store documents");
        Ok(documents)
    }

    async fn query_document(&self, document: &str, request: &QueryRequest) -> GatewayResult<Vec<Value>> {
        let body = json!({
            "query": request.query,
            "resultsCount": request.results_count,
        });
        let result = self
            .send_json(self.http.post(self.url(&format!("{document}:query"))).json(&body))
            .await?;

        Ok(result
            .get("relevantChunks")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn query_all_active(&self, request: &QueryRequest) -> GatewayResult<Value> {
        let active: Vec<Value> = self
            .all_documents()
            .await?
            .into_iter()
            .filter(|d| d.get("state").and_then(Value::as_str) == Some(ACTIVE_DOCUMENT_STATE))
            .collect();

        if active.is_empty() {
            return Err(GatewayError::NotFound("No active documents found".to_string()));
        }

        let lookups = active.iter().map(|doc| async move {
            let name = doc.get("name").and_then(Value::as_str).unwrap_or_default();
            let label = doc
                .get("displayName")
                .and_then(Value::as_str)
                .unwrap_or(name)
                .to_string();
            (name, label, self.query_document(name, request).await)
        });

        let mut outcomes = join_all(lookups).await;

        // Upstream overload fails the whole query so it is retried and counted
        if let Some(pos) = outcomes
            .iter()
            .position(|(_, _, outcome)| matches!(outcome, Err(e) if e.is_breaker_relevant()))
        {
            let (name, _, outcome) = outcomes.swap_remove(pos);
            if let Err(err) = outcome {
                tracing::warn!(document = %name, error = %err, "Document query hit upstream limits");
                return Err(err);
            }
        }

        let mut chunks = Vec::new();
        let mut first_error = None;
        let mut skipped = 0usize;
        for (name, label, outcome) in outcomes {
            match outcome {
                Ok(found) => {
                    chunks.extend(found.into_iter().map(|mut chunk| {
                        if let Some(obj) = chunk.as_object_mut() {
                            obj.insert("source_document".into(), Value::String(label.clone()));
                        }
                        chunk
                    }));
                }
                Err(e) => {
                    tracing::warn!(document = %name, error = %e, "Document query failed, skipping");
                    skipped += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        if skipped == active.len() {
            if let Some(err) = first_error {
                return Err(err);
            }
        }

        sort_by_relevance(&mut chunks);
        chunks.truncate(request.results_count as usize);

        let mut result = json!({
            "relevant_chunks": chunks,
            "query": request.query,
            "documents_searched": active.len(),
        });
        result[DOCUMENTS_SKIPPED] = json!(skipped);
        Ok(result)
    }
}

#[async_trait]
impl Upstream for GeminiClient {
    async fn query(&self, request: &QueryRequest) -> GatewayResult<Value> {
        match &request.document_name {
            Some(document) => {
                let chunks = self.query_document(document, request).await?;
                Ok(json!({ "relevant_chunks": chunks, "query": request.query }))
            }
            None => self.query_all_active(request).await,
        }
    }

    async fn generate(&self, request: &GenerateRequest) -> GatewayResult<Value> {
        let url = self.url(&format!("models/{}:generateContent", self.model(request)));
        let payload = generation_payload(request, &self.generation);
        self.send_json(self.http.post(url).json(&payload)).await
    }

    async fn generate_stream(&self, request: &GenerateRequest) -> GatewayResult<ByteStream> {
        let url = self.url(&format!("models/{}:streamGenerateContent", self.model(request)));
        let payload = generation_payload(request, &self.generation);
        let response = self
            .send(self.http.post(url).query(&[("alt", "sse")]).json(&payload))
            .await?;

        let connect_timeout = self.connect_timeout;
        Ok(response
            .bytes_stream()
            .map_err(move |e| transport_error(e, connect_timeout))
            .boxed())
    }

    async fn list_documents(&self, request: &ListDocumentsRequest) -> GatewayResult<Value> {
        let page = self
            .document_page(request.page_size, request.page_token.as_deref())
            .await?;
        let documents = page.get("documents").cloned().unwrap_or_else(|| json!([]));
        tracing::debug!(
            count = documents.as_array().map_or(0, Vec::len),
            "Listed document page"
        );

        Ok(json!({
            "documents": documents,
            "nextPageToken": next_page_token(&page).unwrap_or_default(),
        }))
    }

    async fn delete_document(&self, name: &str) -> GatewayResult<Value> {
        // The response body is an empty object at best; only the status matters.
        self.send(self.http.delete(self.url(name)).query(&[("force", "true")]))
            .await?;
        Ok(json!({ "name": name }))
    }

    async fn get_operation(&self, name: &str) -> GatewayResult<Value> {
        self.send_json(self.http.get(self.url(name))).await
    }
}

fn next_page_token(page: &Value) -> Option<String> {
    page.get("nextPageToken")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Classify a response status. 429 is the breaker-relevant signal.
async fn check_status(response: Response) -> GatewayResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY).rev().find(|&i| body.is_char_boundary(i)).unwrap_or(0);
        body.truncate(cut);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(GatewayError::UpstreamRateLimited(body));
    }
    Err(GatewayError::Upstream {
        status: Some(status.as_u16()),
        message: body,
    })
}

fn transport_error(err: reqwest::Error, limit: Duration) -> GatewayError {
    if err.is_timeout() {
        return GatewayError::Timeout(limit);
    }
    GatewayError::Upstream {
        status: err.status().map(|s| s.as_u16()),
        message: err.to_string(),
    }
}

/// Highest `chunkRelevanceScore` first; missing scores count as zero.
fn sort_by_relevance(chunks: &mut [Value]) {
    let score = |c: &Value| c.get("chunkRelevanceScore").and_then(Value::as_f64).unwrap_or(0.0);
    chunks.sort_by(|a, b| score(b).partial_cmp(&score(a)).unwrap_or(Ordering::Equal));
}
