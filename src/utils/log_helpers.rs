use tracing::{error, info, warn};

pub fn log_stream_begin(message_id: &str, query: &str) {
    info!("[STREAM] begin: message_id={}, query={}", message_id, truncate_log(query, 200));
}

pub fn log_stream_end(message_id: &str, tokens: usize) {
    info!("[STREAM] end: message_id={}, tokens={}", message_id, tokens);
}

pub fn log_stream_abandoned(message_id: &str) {
    warn!("[STREAM] client went away: message_id={}", message_id);
}

pub fn log_stream_error(message_id: &str, err: &str) {
    error!("[STREAM] error: message_id={}, error={}", message_id, err);
}

pub fn log_duplicate_rejected(query: &str) {
    warn!("[DUPLICATE] rejected repeated query: {}", truncate_log(query, 200));
}

pub fn truncate_log(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max_chars).collect();
    out.push_str("...[truncated]");
    out
}
