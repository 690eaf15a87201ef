use std::time::Duration;

use reqwest::header::{ACCEPT, CACHE_CONTROL};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::error::ChatError;
use crate::client::parser::{consume_event_stream, StreamEnd};
use crate::client::state::{reduce, ChatState, SessionInput};

pub const DEFAULT_STREAM_PATH: &str = "/api/v1/chat/stream";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub stream_path: String,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

struct Transport {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Client side of the chat stream.
///
/// Owns the [`ChatState`] and folds inputs from the transport task one at a
/// time in [`ChatSession::next_update`]. At most one stream is active; the
/// session never reconnects by itself.
pub struct ChatSession {
    client: reqwest::Client,
    endpoint: Url,
    state: ChatState,
    generation: u64,
    inputs_tx: mpsc::UnboundedSender<(u64, SessionInput)>,
    inputs_rx: mpsc::UnboundedReceiver<(u64, SessionInput)>,
    transport: Option<Transport>,
    connection_attempts: u64,
}

impl ChatSession {
    pub fn new(config: ClientConfig) -> Result<Self, ChatError> {
        let base = Url::parse(&config.server_url)
            .map_err(|e| ChatError::Transport(format!("invalid server url: {e}")))?;
        let endpoint = base
            .join(&config.stream_path)
            .map_err(|e| ChatError::Transport(format!("invalid stream path: {e}")))?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();

        Ok(Self {
            client,
            endpoint,
            state: ChatState::default(),
            generation: 0,
            inputs_tx,
            inputs_rx,
            transport: None,
            connection_attempts: 0,
        })
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.connection.is_active()
    }

    /// Number of connections this session has opened. Only `send_query`
    /// increments it.
    pub fn connection_attempts(&self) -> u64 {
        self.connection_attempts
    }

    /// Starts a stream for `text` and returns immediately. Returns `false`
    /// when the text is empty or a stream is already active; such calls are
    /// dropped, not queued.
    pub fn send_query(&mut self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        if self.is_active() {
            warn!("[CLIENT] stream already active, ignoring query");
            return false;
        }

        self.teardown();
        self.generation += 1;
        self.state = reduce(
            std::mem::take(&mut self.state),
            SessionInput::QuerySubmitted(text.to_string()),
        );

        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("message", text);

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_transport(
            self.client.clone(),
            url,
            self.generation,
            token.clone(),
            self.inputs_tx.clone(),
        ));
        self.transport = Some(Transport { token, handle });
        self.connection_attempts += 1;
        info!(
            "[CLIENT] stream opened: generation={}, attempts={}",
            self.generation, self.connection_attempts
        );
        true
    }

    /// Waits for the next input of the active stream and folds it.
    /// Returns `None` once no stream is active.
    pub async fn next_update(&mut self) -> Option<&ChatState> {
        loop {
            if !self.is_active() {
                return None;
            }
            let (generation, input) = self.inputs_rx.recv().await?;
            if generation != self.generation {
                continue;
            }
            if let SessionInput::FrameSkipped(err) = &input {
                warn!("[CLIENT] skipping frame: {}", err);
            }

            self.state = reduce(std::mem::take(&mut self.state), input);
            if !self.is_active() {
                self.teardown();
            }
            return Some(&self.state);
        }
    }

    /// Drives the active stream to its end.
    pub async fn wait_idle(&mut self) -> &ChatState {
        while self.next_update().await.is_some() {}
        &self.state
    }

    /// Drops any connection and clears error and connection state. The last
    /// query is not sent again; call `send_query` for that.
    pub fn reconnect(&mut self) {
        self.teardown();
        self.state = reduce(std::mem::take(&mut self.state), SessionInput::Reset);
    }

    fn teardown(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.token.cancel();
            transport.handle.abort();
            debug!("[CLIENT] transport released: generation={}", self.generation);
        }
        while self.inputs_rx.try_recv().is_ok() {}
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.token.cancel();
            transport.handle.abort();
        }
    }
}

async fn run_transport(
    client: reqwest::Client,
    url: Url,
    generation: u64,
    token: CancellationToken,
    tx: mpsc::UnboundedSender<(u64, SessionInput)>,
) {
    let emit = |input: SessionInput| {
        if tx.send((generation, input)).is_err() {
            debug!("[CLIENT] session gone, dropping transport input");
        }
    };

    let request = client
        .get(url)
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .send();
    let resp = tokio::select! {
        _ = token.cancelled() => return,
        res = request => res,
    };
    let resp = match resp {
        Ok(resp) => resp,
        Err(err) => {
            emit(SessionInput::TransportFailed(err.to_string()));
            return;
        }
    };

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        emit(SessionInput::Rejected {
            status: status.as_u16(),
            message: rejection_message(&body, status),
        });
        return;
    }

    emit(SessionInput::TransportOpened);
    let end = consume_event_stream(resp.bytes_stream(), Some(token), |frame| match frame {
        Ok(frame) => emit(SessionInput::Event(frame.event)),
        Err(err) => emit(SessionInput::FrameSkipped(err)),
    })
    .await;

    match end {
        StreamEnd::Eof => emit(SessionInput::TransportClosed),
        StreamEnd::Failed(reason) => emit(SessionInput::TransportFailed(reason)),
        StreamEnd::Cancelled => {}
    }
}

fn rejection_message(body: &str, status: reqwest::StatusCode) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        })
}
