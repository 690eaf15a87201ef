use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::services::chat_stream::{ChatRequestError, ChatStreamService};
use crate::utils::sse::{frame_channel, sse_response, stream_headers};

#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatStreamService>,
    pub channel_capacity: usize,
    pub keep_alive: Duration,
    pub started: Instant,
}

impl AppState {
    pub fn new(chat: Arc<ChatStreamService>, channel_capacity: usize, keep_alive: Duration) -> Self {
        Self {
            chat,
            channel_capacity,
            keep_alive,
            started: Instant::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    message: Option<String>,
}

impl IntoResponse for ChatRequestError {
    fn into_response(self) -> Response {
        let status = match self {
            ChatRequestError::Validation => StatusCode::BAD_REQUEST,
            ChatRequestError::DuplicateRequest => StatusCode::TOO_MANY_REQUESTS,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/chat/stream", get(stream_chat))
        .route("/api/chat/stream", get(stream_chat))
        .with_state(state)
}

async fn stream_chat(State(state): State<AppState>, Query(query): Query<StreamQuery>) -> Response {
    let text = match state.chat.admit(query.message) {
        Ok(text) => text,
        Err(err) => return err.into_response(),
    };

    let (sender, rx) = frame_channel(state.channel_capacity);
    // Detached: the worker owns the sender and ends the body when it returns.
    let _worker = state.chat.spawn_stream(sender, text);

    (stream_headers(), sse_response(rx, state.keep_alive)).into_response()
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::spawn_server;
    use crate::client::parser::FrameDecoder;
    use crate::models::event::StreamEvent;
    use serde_json::Value;
    use std::time::Duration;

    async fn read_events(resp: reqwest::Response) -> Vec<StreamEvent> {
        let body = resp.bytes().await.unwrap();
        FrameDecoder::new()
            .push(&body)
            .into_iter()
            .map(|frame| frame.unwrap().event)
            .collect()
    }

    #[tokio::test]
    async fn streams_one_reply_and_closes() {
        let base = spawn_server(Duration::from_secs(10)).await;
        let resp = reqwest::get(format!("{base}/api/v1/chat/stream?message=hiking"))
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        let content_type = resp.headers()["content-type"].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/event-stream"));
        assert_eq!(resp.headers()["cache-control"], "no-cache");
        assert_eq!(resp.headers()["x-accel-buffering"], "no");

        let events = read_events(resp).await;
        assert!(matches!(events.first(), Some(StreamEvent::StreamStart { .. })));
        assert_eq!(events.last(), Some(&StreamEvent::StreamEnd));
        let body = &events[1..events.len() - 1];
        assert!(!body.is_empty());
        assert!(body
            .iter()
            .all(|e| matches!(e, StreamEvent::TextContent { .. })));
        let completes = body
            .iter()
            .filter(|e| matches!(e, StreamEvent::TextContent { is_complete: true, .. }))
            .count();
        assert_eq!(completes, 1);
    }

    #[tokio::test]
    async fn missing_or_blank_message_is_bad_request() {
        let base = spawn_server(Duration::from_secs(10)).await;
        for url in [
            format!("{base}/api/v1/chat/stream"),
            format!("{base}/api/v1/chat/stream?message="),
            format!("{base}/api/chat/stream?message=%20%20"),
        ] {
            let resp = reqwest::get(url).await.unwrap();
            assert_eq!(resp.status(), 400);
            let body: Value = resp.json().await.unwrap();
            assert_eq!(body["error"], "message parameter is required");
        }
    }

    #[tokio::test]
    async fn duplicate_within_window_gets_429_and_no_stream() {
        let base = spawn_server(Duration::from_secs(10)).await;
        let first = reqwest::get(format!("{base}/api/chat/stream?message=good+food"))
            .await
            .unwrap();
        assert_eq!(first.status(), 200);

        let second = reqwest::get(format!("{base}/api/v1/chat/stream?message=good%20food"))
            .await
            .unwrap();
        assert_eq!(second.status(), 429);
        assert!(!second.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));
        let body: Value = second.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().starts_with("Duplicate message"));

        let other = reqwest::get(format!("{base}/api/v1/chat/stream?message=cycling"))
            .await
            .unwrap();
        assert_eq!(other.status(), 200);
        let events = read_events(other).await;
        assert_eq!(events.last(), Some(&StreamEvent::StreamEnd));
    }
}
