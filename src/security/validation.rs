//! Query text and resource name validation.

use crate::error::GatewayError;

/// Longest accepted query, in characters.
pub const MAX_QUERY_CHARS: usize = 2000;

const FORBIDDEN_FRAGMENTS: &[&str] = &["<script", "javascript:", "onerror=", "onclick="];

/// Reject empty, oversized or markup-injecting query text.
///
/// With `strict` off only emptiness and length are checked.
pub fn validate_query_text(query: &str, strict: bool) -> Result<(), GatewayError> {
    if query.trim().is_empty() {
        return Err(GatewayError::InvalidRequest("Query text is required".into()));
    }

    if query.chars().count() > MAX_QUERY_CHARS {
        return Err(GatewayError::InvalidRequest(format!(
            "Query too long (max {MAX_QUERY_CHARS} characters)"
        )));
    }

    if strict {
        let lowered = query.to_lowercase();
        if let Some(fragment) = FORBIDDEN_FRAGMENTS.iter().find(|f| lowered.contains(*f)) {
            return Err(GatewayError::InvalidRequest(format!(
                "Query contains forbidden content: {fragment}"
            )));
        }
    }

    Ok(())
}

/// Reject resource names that could address anything but a single remote
/// resource (`fileSearchStores/.../documents/...`, `.../operations/...`).
pub fn validate_resource_name(name: &str) -> Result<(), GatewayError> {
    if name.is_empty() {
        return Err(GatewayError::InvalidRequest("Resource name is required".into()));
    }

    let bad_char = name
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '?' | '#' | '%' | '\\'));
    let bad_segment = name.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad_char || bad_segment {
        return Err(GatewayError::InvalidRequest(format!("Invalid resource name: {name}")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_question() {
        assert!(validate_query_text("What does clause 4 say?", true).is_ok());
    }

    #[test]
    fn test_rejects_blank_and_long() {
        assert!(validate_query_text("   ", true).is_err());
        let long = "a".repeat(MAX_QUERY_CHARS + 1);
        assert!(validate_query_text(&long, false).is_err());
        assert!(validate_query_text(&"é".repeat(MAX_QUERY_CHARS), true).is_ok());
    }

    #[test]
    fn test_strict_mode_rejects_injection() {
        let err = validate_query_text("hi <SCRIPT>alert(1)</script>", true).unwrap_err();
        assert!(err.to_string().contains("<script"));
        assert!(validate_query_text("hi <SCRIPT>alert(1)</script>", false).is_ok());
    }

    #[test]
    fn test_resource_names() {
        assert!(validate_resource_name("fileSearchStores/s/documents/d-1").is_ok());
        assert!(validate_resource_name("fileSearchStores/s/upload/operations/op").is_ok());

        for bad in ["", "/abs", "a//b", "a/../b", "a/b?force=false", "a b", "a%2Fb", "a/"] {
            assert!(validate_resource_name(bad).is_err(), "{bad:?} accepted");
        }
    }
}
