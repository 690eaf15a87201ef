use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::models::event::{EventFrame, StreamEvent};

#[derive(Debug, thiserror::Error)]
#[error("stream receiver is gone")]
pub struct StreamClosed;

/// Producer half of one chat stream.
///
/// The channel is bounded: when the client reads slowly, `send` waits, which
/// only stalls the worker that owns this sender.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<EventFrame>,
}

impl FrameSender {
    pub async fn send(&self, event: StreamEvent) -> Result<(), StreamClosed> {
        self.tx
            .send(EventFrame::new(event))
            .await
            .map_err(|_| StreamClosed)
    }

    pub fn try_send(&self, event: StreamEvent) -> Result<(), StreamClosed> {
        self.tx
            .try_send(EventFrame::new(event))
            .map_err(|_| StreamClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub fn frame_channel(capacity: usize) -> (FrameSender, mpsc::Receiver<EventFrame>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FrameSender { tx }, rx)
}

/// Turns the receiving half into an SSE body. The body ends, and the server
/// closes the connection, once every `FrameSender` clone has been dropped.
pub fn sse_response(
    rx: mpsc::Receiver<EventFrame>,
    keep_alive: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(rx).map(|frame| Ok(to_sse_event(&frame)));
    Sse::new(stream).keep_alive(KeepAlive::new().interval(keep_alive).text("ping"))
}

pub fn to_sse_event(frame: &EventFrame) -> Event {
    match frame.to_json() {
        Ok(payload) => Event::default().data(payload),
        Err(err) => {
            warn!(error = %err, kind = frame.event.kind(), "sse encode failed");
            Event::default().comment("encode-failed")
        }
    }
}

/// Headers that keep proxies from caching or buffering the stream.
pub fn stream_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    headers
}
