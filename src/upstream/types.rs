//! Request payloads and upstream wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::QueryKey;

/// Finish reason of a normally completed generation.
pub const NORMAL_FINISH_REASON: &str = "STOP";

pub const DEFAULT_RESULTS_COUNT: u32 = 10;
pub const MAX_RESULTS_COUNT: u32 = 100;

/// Largest document page the remote service accepts.
pub const MAX_DOCUMENT_PAGE_SIZE: u32 = 20;

/// Field of a fan-out query result counting documents that failed and were left out.
pub const DOCUMENTS_SKIPPED: &str = "documents_skipped";

fn default_results_count() -> u32 {
    DEFAULT_RESULTS_COUNT
}

/// Retrieval query against the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,

    /// Restrict the search to one document (`fileSearchStores/.../documents/...`).
    #[serde(default)]
    pub document_name: Option<String>,

    #[serde(default = "default_results_count")]
    pub results_count: u32,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            document_name: None,
            results_count: DEFAULT_RESULTS_COUNT,
        }
    }

    /// Clamp `results_count` into `1..=MAX_RESULTS_COUNT`.
    pub fn normalized(mut self) -> Self {
        self.results_count = self.results_count.clamp(1, MAX_RESULTS_COUNT);
        self.document_name = self.document_name.filter(|d| !d.trim().is_empty());
        self
    }

    pub fn cache_key(&self) -> QueryKey {
        QueryKey::new(&self.query, self.document_name.clone(), self.results_count)
    }
}

/// One prior turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "user" or "model".
    pub role: String,
    pub text: String,
}

/// Generation request grounded on previously retrieved chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub query: String,

    /// Chunks as returned by a query (`chunk.data.stringValue`, `source_document`).
    #[serde(default)]
    pub relevant_chunks: Vec<Value>,

    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,

    /// Model name; the configured default when absent.
    #[serde(default)]
    pub model: Option<String>,
}

impl GenerateRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            relevant_chunks: Vec::new(),
            chat_history: Vec::new(),
            model: None,
        }
    }
}

/// Whether a query result left out documents that failed.
pub fn is_partial_result(value: &Value) -> bool {
    value
        .get(DOCUMENTS_SKIPPED)
        .and_then(Value::as_u64)
        .is_some_and(|skipped| skipped > 0)
}

fn default_page_size() -> u32 {
    MAX_DOCUMENT_PAGE_SIZE
}

/// One page of the store's document listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDocumentsRequest {
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default)]
    pub page_token: Option<String>,
}

impl Default for ListDocumentsRequest {
    fn default() -> Self {
        Self {
            page_size: MAX_DOCUMENT_PAGE_SIZE,
            page_token: None,
        }
    }
}

impl ListDocumentsRequest {
    /// Clamp `page_size` into `1..=MAX_DOCUMENT_PAGE_SIZE`, drop a blank token.
    pub fn normalized(mut self) -> Self {
        self.page_size = self.page_size.clamp(1, MAX_DOCUMENT_PAGE_SIZE);
        self.page_token = self.page_token.filter(|t| !t.trim().is_empty());
        self
    }
}

/// A non-streaming gateway call.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamRequest {
    /// Idempotent retrieval; cacheable.
    Query(QueryRequest),
    /// Generation; never cached.
    Generate(GenerateRequest),
    /// One page of documents.
    ListDocuments(ListDocumentsRequest),
    /// Remove a document and its chunks, by full resource name.
    DeleteDocument(String),
    /// Status of a long-running upload operation, by full resource name.
    GetOperation(String),
}

impl UpstreamRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamRequest::Query(_) => "query",
            UpstreamRequest::Generate(_) => "generate",
            UpstreamRequest::ListDocuments(_) => "list_documents",
            UpstreamRequest::DeleteDocument(_) => "delete_document",
            UpstreamRequest::GetOperation(_) => "get_operation",
        }
    }
}

/// A `generateContent` response or one incremental stream chunk.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
}

impl GenerateResponse {
    /// Text of the first candidate, all parts joined. `None` without candidates.
    pub fn text(&self) -> Option<String> {
        let candidate = self.candidates.first()?;
        let text = candidate
            .content
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect::<String>();
        Some(text)
    }

    /// Finish reason of the first candidate, when present.
    pub fn finish_reason(&self) -> Option<&str> {
        self.candidates.first()?.finish_reason.as_deref()
    }

    /// Finish reason when it is anything but a normal stop.
    pub fn abnormal_finish(&self) -> Option<&str> {
        self.finish_reason().filter(|r| *r != NORMAL_FINISH_REASON)
    }
}
