//! Generation payload construction.
//!
//! Chat history is replayed verbatim; the final user turn carries the
//! numbered context fragments followed by the question.

use serde_json::{json, Value};

use crate::config::GenerationConfig;
use crate::upstream::types::GenerateRequest;

const CONTEXT_PREAMBLE: &str =
    "Use ONLY the following context fragments to answer the user's question:\n\n";
const NOT_FOUND_INSTRUCTION: &str =
    "\n\nIf the answer cannot be found in the provided context, say so clearly.";

/// Final user prompt for a request.
pub fn user_prompt(request: &GenerateRequest) -> String {
    let mut prompt = String::new();

    if !request.relevant_chunks.is_empty() {
        prompt.push_str(CONTEXT_PREAMBLE);
        for (i, chunk) in request.relevant_chunks.iter().enumerate() {
            let text = chunk
                .pointer("/chunk/data/stringValue")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let source = chunk
                .get("source_document")
                .and_then(Value::as_str)
                .unwrap_or("document");
            prompt.push_str(&format!("[Fragment {} from {}]:\n{}\n\n", i + 1, source, text));
        }
    }

    prompt.push_str("\n\nQuestion: ");
    prompt.push_str(&request.query);

    if !request.relevant_chunks.is_empty() {
        prompt.push_str(NOT_FOUND_INSTRUCTION);
    }
    prompt
}

/// Full `generateContent` body.
pub fn generation_payload(request: &GenerateRequest, generation: &GenerationConfig) -> Value {
    let mut contents: Vec<Value> = request
        .chat_history
        .iter()
        .map(|m| json!({ "role": m.role, "parts": [{ "text": m.text }] }))
        .collect();
    contents.push(json!({ "role": "user", "parts": [{ "text": user_prompt(request) }] }));

    json!({
        "contents": contents,
        "generationConfig": {
            "temperature": generation.temperature,
            "topK": generation.top_k,
            "topP": generation.top_p,
            "maxOutputTokens": generation.max_output_tokens,
        }
    })
}
