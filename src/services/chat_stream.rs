use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{error, Instrument};

use crate::core::validation::{decode_query_text, normalize_non_empty_str};
use crate::models::event::{new_message_id, StreamEvent};
use crate::services::activities::{ActivityFinder, ActivitySearch, NoActivityFinder};
use crate::services::dedup::DedupWindow;
use crate::services::generator::ResponseGenerator;
use crate::utils::events::SEARCH_ACTIVITIES_TOOL;
use crate::utils::log_helpers::{
    log_duplicate_rejected, log_stream_abandoned, log_stream_begin, log_stream_end,
    log_stream_error,
};
use crate::utils::sse::{FrameSender, StreamClosed};

/// Request-level failures; none of them opens a stream.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChatRequestError {
    #[error("message parameter is required")]
    Validation,
    #[error("Duplicate message sent too quickly. Please wait before sending the same message again.")]
    DuplicateRequest,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StreamPacing {
    pub start_delay: Duration,
    pub token_delay: Duration,
}

/// How a stream worker finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed { tokens: usize },
    Failed { message: String },
    Abandoned,
}

/// The stream producer: admits queries and writes one event stream per query.
pub struct ChatStreamService {
    dedup: Arc<DedupWindow>,
    generator: Arc<dyn ResponseGenerator>,
    finder: Arc<dyn ActivityFinder>,
    pacing: StreamPacing,
}

impl ChatStreamService {
    pub fn new(dedup: Arc<DedupWindow>, generator: Arc<dyn ResponseGenerator>) -> Self {
        Self {
            dedup,
            generator,
            finder: Arc::new(NoActivityFinder),
            pacing: StreamPacing::default(),
        }
    }

    pub fn with_finder(mut self, finder: Arc<dyn ActivityFinder>) -> Self {
        self.finder = finder;
        self
    }

    pub fn with_pacing(mut self, pacing: StreamPacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn dedup(&self) -> &Arc<DedupWindow> {
        &self.dedup
    }

    /// Validates, decodes and dedups a raw query. On success the query is
    /// recorded in the dedup window and the decoded text is returned.
    ///
    /// Blank text is rejected, but the dedup key is the exact decoded text:
    /// `"hiking"` and `"hiking "` are different queries.
    pub fn admit(&self, raw: Option<String>) -> Result<String, ChatRequestError> {
        let raw = raw.ok_or(ChatRequestError::Validation)?;
        let query = decode_query_text(&raw);
        if normalize_non_empty_str(&query).is_none() {
            return Err(ChatRequestError::Validation);
        }
        if !self.dedup.try_admit(&query) {
            log_duplicate_rejected(&query);
            return Err(ChatRequestError::DuplicateRequest);
        }
        Ok(query)
    }

    /// Runs one stream on its own task. The sender is dropped when the task
    /// ends, which ends the response body and closes the connection.
    pub fn spawn_stream(
        self: &Arc<Self>,
        sender: FrameSender,
        query: String,
    ) -> tokio::task::JoinHandle<StreamOutcome> {
        let service = Arc::clone(self);
        let message_id = new_message_id();
        let span = tracing::info_span!("chat.stream", message_id = %message_id);
        tokio::spawn(
            async move {
                let worker_sender = sender.clone();
                let worker_service = Arc::clone(&service);
                let worker_id = message_id.clone();
                let worker = tokio::spawn(
                    async move {
                        worker_service
                            .produce(&worker_sender, &worker_id, &query)
                            .await
                    }
                    .in_current_span(),
                );

                match worker.await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        let message = if err.is_panic() {
                            "stream worker panicked".to_string()
                        } else {
                            format!("stream worker stopped: {err}")
                        };
                        log_stream_error(&message_id, &message);
                        if sender.try_send(StreamEvent::error("internal server error")).is_err() {
                            error!("[STREAM] could not report worker failure to client");
                        }
                        StreamOutcome::Failed { message }
                    }
                }
            }
            .instrument(span),
        )
    }

    /// Writes `STREAMING_START`, the reply, then exactly one terminal event.
    pub async fn produce(
        &self,
        sender: &FrameSender,
        message_id: &str,
        query: &str,
    ) -> StreamOutcome {
        log_stream_begin(message_id, query);
        match self.write_stream(sender, message_id, query).await {
            Ok(Ok(tokens)) => {
                log_stream_end(message_id, tokens);
                StreamOutcome::Completed { tokens }
            }
            Ok(Err(message)) => {
                log_stream_error(message_id, &message);
                if sender.send(StreamEvent::error(message.clone())).await.is_err() {
                    log_stream_abandoned(message_id);
                }
                StreamOutcome::Failed { message }
            }
            Err(StreamClosed) => {
                log_stream_abandoned(message_id);
                StreamOutcome::Abandoned
            }
        }
    }

    // Outer error: the client is gone. Inner error: an in-band failure that
    // still has to be reported as an ERROR event.
    async fn write_stream(
        &self,
        sender: &FrameSender,
        message_id: &str,
        query: &str,
    ) -> Result<Result<usize, String>, StreamClosed> {
        sender
            .send(StreamEvent::StreamStart {
                message_id: message_id.to_string(),
            })
            .await?;
        pause(self.pacing.start_delay).await;

        match self.finder.find(query).await {
            Ok(Some(search)) => self.write_search(sender, search).await?,
            Ok(None) => {}
            Err(err) => return Ok(Err(format!("activity search failed: {err}"))),
        }

        let mut chunks = self.generator.stream(query);
        let mut pending: Option<String> = None;
        let mut tokens = 0usize;
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(text) => {
                    if text.is_empty() {
                        continue;
                    }
                    if let Some(prev) = pending.replace(text) {
                        sender.send(StreamEvent::text(prev, false)).await?;
                        tokens += 1;
                        pause(self.pacing.token_delay).await;
                    }
                }
                Err(err) => {
                    if let Some(prev) = pending.take() {
                        sender.send(StreamEvent::text(prev, false)).await?;
                    }
                    return Ok(Err(err));
                }
            }
        }
        if let Some(last) = pending.take() {
            sender.send(StreamEvent::text(last, true)).await?;
            tokens += 1;
        }

        sender.send(StreamEvent::StreamEnd).await?;
        Ok(Ok(tokens))
    }

    async fn write_search(
        &self,
        sender: &FrameSender,
        search: ActivitySearch,
    ) -> Result<(), StreamClosed> {
        sender
            .send(StreamEvent::ToolExecutionStart {
                tool_name: SEARCH_ACTIVITIES_TOOL.to_string(),
            })
            .await?;
        sender
            .send(StreamEvent::ActivitiesFound {
                activities: search.activities,
                total_count: search.total_count,
                search_query: Some(search.query),
            })
            .await?;
        for (activity_id, images) in search.images {
            sender
                .send(StreamEvent::ImagesLoaded {
                    activity_id,
                    images,
                })
                .await?;
        }
        sender
            .send(StreamEvent::ToolExecutionEnd {
                tool_name: SEARCH_ACTIVITIES_TOOL.to_string(),
            })
            .await
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::{Activity, EventFrame};
    use crate::services::activities::CatalogActivityFinder;
    use crate::services::generator::{GeneratorBoxFuture, RuleBasedGenerator};
    use crate::utils::sse::frame_channel;
    use futures::stream::{self, BoxStream};
    use tokio::sync::mpsc;

    struct FailingAfterTwo;

    impl ResponseGenerator for FailingAfterTwo {
        fn generate<'a>(&'a self, _q: &'a str) -> GeneratorBoxFuture<'a, Result<String, String>> {
            Box::pin(async { Err::<String, String>("unused".to_string()) })
        }

        fn stream<'a>(&'a self, _q: &'a str) -> BoxStream<'a, Result<String, String>> {
            stream::iter(vec![
                Ok("first ".to_string()),
                Ok("second ".to_string()),
                Err("model backend unavailable".to_string()),
            ])
            .boxed()
        }
    }

    struct Panicking;

    impl ResponseGenerator for Panicking {
        fn generate<'a>(&'a self, q: &'a str) -> GeneratorBoxFuture<'a, Result<String, String>> {
            Box::pin(async move {
                if !q.is_empty() {
                    panic!("generator exploded");
                }
                Ok::<String, String>(String::new())
            })
        }
    }

    fn service(generator: Arc<dyn ResponseGenerator>) -> Arc<ChatStreamService> {
        let dedup = Arc::new(DedupWindow::new(Duration::from_secs(10), 100));
        Arc::new(ChatStreamService::new(dedup, generator))
    }

    async fn collect(mut rx: mpsc::Receiver<EventFrame>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(frame) = rx.recv().await {
            events.push(frame.event);
        }
        events
    }

    #[test]
    fn admit_rejects_empty_and_duplicate_queries() {
        let svc = service(Arc::new(RuleBasedGenerator));
        assert_eq!(svc.admit(None), Err(ChatRequestError::Validation));
        assert_eq!(svc.admit(Some("  ".to_string())), Err(ChatRequestError::Validation));
        assert_eq!(svc.admit(Some("%20".to_string())), Err(ChatRequestError::Validation));

        assert_eq!(svc.admit(Some("hiking%20trails".to_string())).unwrap(), "hiking trails");
        assert_eq!(
            svc.admit(Some("hiking trails".to_string())),
            Err(ChatRequestError::DuplicateRequest)
        );
    }

    #[test]
    fn dedup_key_is_the_exact_decoded_text() {
        let svc = service(Arc::new(RuleBasedGenerator));
        assert_eq!(svc.admit(Some("hiking".to_string())).unwrap(), "hiking");
        assert_eq!(svc.admit(Some("hiking ".to_string())).unwrap(), "hiking ");
        assert_eq!(svc.admit(Some("hiking+".to_string())), Err(ChatRequestError::DuplicateRequest));
        assert_eq!(svc.dedup().len(), 2);
    }

    #[tokio::test]
    async fn hiking_query_streams_start_tokens_end() {
        let svc = service(Arc::new(RuleBasedGenerator));
        let (tx, rx) = frame_channel(8);
        let handle = svc.spawn_stream(tx, "hiking".to_string());
        let events = collect(rx).await;

        assert!(matches!(events.first(), Some(StreamEvent::StreamStart { .. })));
        assert_eq!(events.last(), Some(&StreamEvent::StreamEnd));

        let texts: Vec<(String, bool)> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::TextContent { text, is_complete } => Some((text.clone(), *is_complete)),
                _ => None,
            })
            .collect();
        let full: String = texts.iter().map(|(t, _)| t.as_str()).collect();
        assert!(full.contains("trail"));
        assert_eq!(texts.iter().filter(|(_, done)| *done).count(), 1);
        assert!(texts.last().unwrap().1);
        assert_eq!(events.len(), texts.len() + 2);

        assert_eq!(
            handle.await.unwrap(),
            StreamOutcome::Completed { tokens: texts.len() }
        );
    }

    #[tokio::test]
    async fn mid_stream_failure_ends_with_error_event() {
        let svc = service(Arc::new(FailingAfterTwo));
        let (tx, rx) = frame_channel(8);
        let handle = svc.spawn_stream(tx, "anything".to_string());
        let events = collect(rx).await;

        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], StreamEvent::StreamStart { .. }));
        assert_eq!(events[1], StreamEvent::text("first ", false));
        assert_eq!(events[2], StreamEvent::text("second ", false));
        assert_eq!(events[3], StreamEvent::error("model backend unavailable"));
        assert!(matches!(handle.await.unwrap(), StreamOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn panicking_worker_is_contained_and_reported() {
        let svc = service(Arc::new(Panicking));
        let (tx, rx) = frame_channel(8);
        let handle = svc.spawn_stream(tx, "boom".to_string());
        let events = collect(rx).await;

        assert!(matches!(events[0], StreamEvent::StreamStart { .. }));
        assert!(matches!(events.last(), Some(StreamEvent::Error { .. })));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(matches!(handle.await.unwrap(), StreamOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn gone_client_abandons_the_stream() {
        let svc = service(Arc::new(RuleBasedGenerator));
        let (tx, rx) = frame_channel(1);
        drop(rx);
        let outcome = svc.spawn_stream(tx, "hiking".to_string()).await.unwrap();
        assert_eq!(outcome, StreamOutcome::Abandoned);
    }

    #[tokio::test]
    async fn catalog_results_are_bracketed_by_tool_events() {
        let finder = CatalogActivityFinder::new(
            vec![Activity {
                id: 1,
                name: "Bear Mountain Trail".to_string(),
                description: String::new(),
                category: "hiking".to_string(),
                latitude: 41.3,
                longitude: -74.0,
                difficulty: "moderate".to_string(),
                duration: 120,
                best_season: "fall".to_string(),
            }],
            vec![crate::models::event::Image {
                id: 5,
                activity_id: 1,
                url: "https://img.example/bear.jpg".to_string(),
                caption: String::new(),
            }],
        );
        let dedup = Arc::new(DedupWindow::new(Duration::from_secs(10), 100));
        let svc = Arc::new(
            ChatStreamService::new(dedup, Arc::new(RuleBasedGenerator))
                .with_finder(Arc::new(finder)),
        );
        let (tx, rx) = frame_channel(8);
        let _handle = svc.spawn_stream(tx, "hiking".to_string());
        let kinds: Vec<&'static str> = collect(rx).await.iter().map(|e| e.kind()).collect();

        assert_eq!(
            &kinds[..5],
            &[
                "STREAMING_START",
                "TOOL_CALL_START",
                "ACTIVITIES_FOUND",
                "IMAGES_LOADED",
                "TOOL_CALL_COMPLETE"
            ]
        );
        assert_eq!(kinds[5], "TEXT_MESSAGE_CONTENT");
        assert_eq!(kinds.last(), Some(&"STREAMING_END"));
    }
}
