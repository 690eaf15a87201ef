pub fn normalize_non_empty_str(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Percent-decodes query text that may arrive encoded a second time by the
/// browser. `+` is treated as a space. Text that is not valid percent-encoding
/// is returned unchanged.
pub fn decode_query_text(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(err) => {
            tracing::debug!(error = %err, "query text is not percent-encoded, using it as-is");
            raw.to_string()
        }
    }
}
