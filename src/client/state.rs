use std::collections::BTreeSet;

use crate::client::error::ChatError;
use crate::models::event::{FrameError, StreamEvent};
use crate::models::message::Message;

/// Connection lifecycle of one consumer.
///
/// `Closed` is left only through [`SessionInput::QuerySubmitted`], which is
/// produced by an explicit `send_query`. Nothing the transport reports can
/// reopen a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Streaming,
    Closed,
}

impl ConnectionState {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Streaming
        )
    }

    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Streaming)
    }
}

/// Everything that can move the consumer state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    QuerySubmitted(String),
    TransportOpened,
    Event(StreamEvent),
    FrameSkipped(FrameError),
    /// Non-success HTTP status; no stream was opened.
    Rejected { status: u16, message: String },
    TransportClosed,
    TransportFailed(String),
    /// Manual reset: drop the connection and clear error state.
    Reset,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    pub messages: Vec<Message>,
    pub connection: ConnectionState,
    pub is_streaming: bool,
    pub error: Option<ChatError>,
    pub active_tools: BTreeSet<String>,
    /// Id of the assistant message stream content is folded into.
    pub current_message_id: Option<String>,
    pub skipped_frames: usize,
}

impl ChatState {
    pub fn connection_open(&self) -> bool {
        self.connection.is_open()
    }

    pub fn current_message(&self) -> Option<&Message> {
        let id = self.current_message_id.as_deref()?;
        self.messages.iter().rev().find(|m| m.id == id)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    fn current_message_mut(&mut self) -> Option<&mut Message> {
        let id = self.current_message_id.clone()?;
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }

    fn finish_current(&mut self) {
        if let Some(message) = self.current_message_mut() {
            message.is_streaming = false;
        }
        self.current_message_id = None;
    }

    fn close(&mut self) {
        self.finish_current();
        self.is_streaming = false;
        self.active_tools.clear();
        self.connection = ConnectionState::Closed;
    }
}

/// Folds one input into the state. Pure: no I/O, no clocks beyond message
/// timestamps, and inputs that make no sense in the current state are
/// dropped unchanged.
pub fn reduce(mut state: ChatState, input: SessionInput) -> ChatState {
    match input {
        SessionInput::QuerySubmitted(text) => {
            if state.connection.is_active() {
                return state;
            }
            state.messages.push(Message::user(&text));
            state.error = None;
            state.active_tools.clear();
            state.current_message_id = None;
            state.connection = ConnectionState::Connecting;
        }
        SessionInput::TransportOpened => {
            if state.connection == ConnectionState::Connecting {
                state.connection = ConnectionState::Open;
            }
        }
        SessionInput::Event(event) => {
            if state.connection.is_open() {
                state = apply_event(state, event);
            }
        }
        SessionInput::FrameSkipped(_) => {
            if state.connection.is_open() {
                state.skipped_frames += 1;
            }
        }
        SessionInput::Rejected { status, message } => {
            if state.connection.is_active() {
                state.error = Some(ChatError::from_status(status, message));
                state.close();
            }
        }
        SessionInput::TransportClosed => {
            if state.connection.is_active() {
                state.error = Some(ChatError::ConnectionLost);
                state.close();
            }
        }
        SessionInput::TransportFailed(reason) => {
            if state.connection.is_active() {
                state.error = Some(if state.connection == ConnectionState::Connecting {
                    ChatError::Transport(reason)
                } else {
                    ChatError::ConnectionLost
                });
                state.close();
            }
        }
        SessionInput::Reset => {
            state.finish_current();
            state.is_streaming = false;
            state.active_tools.clear();
            state.error = None;
            state.connection = ConnectionState::Idle;
        }
    }
    state
}

fn apply_event(mut state: ChatState, event: StreamEvent) -> ChatState {
    match event {
        StreamEvent::StreamStart { message_id } => {
            if state.current_message_id.is_some() {
                tracing::warn!("stream start while a message is in progress, finishing it");
                state.finish_current();
            }
            state.is_streaming = true;
            state.connection = ConnectionState::Streaming;
            state.messages.push(Message::assistant(&message_id));
            state.current_message_id = Some(message_id);
        }
        StreamEvent::TextContent { text, is_complete } => match state.current_message_mut() {
            Some(message) => {
                message.content.push_str(&text);
                if is_complete {
                    message.is_streaming = false;
                }
            }
            None => tracing::warn!("text content without a stream start, ignoring"),
        },
        StreamEvent::ActivitiesFound { activities, .. } => match state.current_message_mut() {
            Some(message) => {
                for activity in activities {
                    if !message.activities.iter().any(|a| a.id == activity.id) {
                        message.activities.push(activity);
                    }
                }
            }
            None => tracing::warn!("activities without a stream start, ignoring"),
        },
        StreamEvent::ImagesLoaded { images, .. } => match state.current_message_mut() {
            Some(message) => {
                for image in images {
                    if !message.images.iter().any(|i| i.id == image.id) {
                        message.images.push(image);
                    }
                }
            }
            None => tracing::warn!("images without a stream start, ignoring"),
        },
        StreamEvent::ToolExecutionStart { tool_name } => {
            state.active_tools.insert(tool_name);
        }
        StreamEvent::ToolExecutionEnd { tool_name } => {
            state.active_tools.remove(&tool_name);
        }
        StreamEvent::StreamEnd => {
            state.close();
        }
        StreamEvent::Error { message, code } => {
            state.messages.push(Message::error(&message));
            state.error = Some(ChatError::Streaming { message, code });
            state.close();
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::{Activity, Image};
    use crate::models::message::MessageRole;

    fn fold(inputs: Vec<SessionInput>) -> ChatState {
        inputs.into_iter().fold(ChatState::default(), reduce)
    }

    fn opened(query: &str) -> Vec<SessionInput> {
        vec![
            SessionInput::QuerySubmitted(query.to_string()),
            SessionInput::TransportOpened,
        ]
    }

    fn start(id: &str) -> SessionInput {
        SessionInput::Event(StreamEvent::StreamStart {
            message_id: id.to_string(),
        })
    }

    fn text(t: &str, done: bool) -> SessionInput {
        SessionInput::Event(StreamEvent::text(t, done))
    }

    fn activity(id: u64) -> Activity {
        Activity {
            id,
            name: format!("activity {id}"),
            description: String::new(),
            category: "hiking".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            difficulty: String::new(),
            duration: 0,
            best_season: String::new(),
        }
    }

    #[test]
    fn reassembly_does_not_depend_on_chunking() {
        let sentence = "Bear Mountain Trail is a moderate 3.2 mile hike.";
        for size in [1usize, 2, 3, 7, 13, sentence.len()] {
            let chars: Vec<char> = sentence.chars().collect();
            let chunks: Vec<String> = chars.chunks(size).map(|c| c.iter().collect()).collect();
            let last = chunks.len() - 1;

            let mut inputs = opened("hiking");
            inputs.push(start("msg-1"));
            for (i, chunk) in chunks.iter().enumerate() {
                inputs.push(text(chunk, i == last));
            }
            inputs.push(SessionInput::Event(StreamEvent::StreamEnd));

            let state = fold(inputs);
            assert_eq!(state.current_message().map(|m| m.id.clone()), None);
            assert_eq!(state.messages[1].content, sentence, "chunk size {size}");
        }
    }

    #[test]
    fn stream_end_closes_everything() {
        let mut inputs = opened("hiking");
        inputs.extend([start("msg-1"), text("hi", true)]);
        let mid = fold(inputs.clone());
        assert!(mid.is_streaming);
        assert_eq!(mid.connection, ConnectionState::Streaming);
        assert!(!mid.messages[1].is_streaming);

        inputs.push(SessionInput::Event(StreamEvent::StreamEnd));
        let state = fold(inputs);
        assert!(!state.is_streaming);
        assert!(!state.connection_open());
        assert_eq!(state.connection, ConnectionState::Closed);
        assert_eq!(state.error, None);
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].role, MessageRole::User);
        assert_eq!(state.messages[1].role, MessageRole::Assistant);
    }

    #[test]
    fn error_event_closes_and_logs_error_message() {
        let mut inputs = opened("hiking");
        inputs.extend([
            start("msg-1"),
            text("first ", false),
            text("second ", false),
            SessionInput::Event(StreamEvent::error("model backend unavailable")),
        ]);
        let state = fold(inputs);

        assert!(!state.is_streaming);
        assert!(!state.connection_open());
        assert_eq!(
            state.error,
            Some(ChatError::Streaming {
                message: "model backend unavailable".to_string(),
                code: None
            })
        );
        assert_eq!(state.messages.len(), 3);
        assert_eq!(state.messages[1].content, "first second ");
        assert!(!state.messages[1].is_streaming);
        assert_eq!(state.messages[2].role, MessageRole::Error);
        assert!(!state.messages[2].content.is_empty());
    }

    #[test]
    fn malformed_frame_is_skipped_without_closing() {
        let mut inputs = opened("hi");
        inputs.extend([
            start("msg-1"),
            SessionInput::FrameSkipped(FrameError::Malformed("garbage".to_string())),
            text("hi", true),
            SessionInput::Event(StreamEvent::StreamEnd),
        ]);
        let state = fold(inputs);
        assert_eq!(state.messages[1].content, "hi");
        assert_eq!(state.skipped_frames, 1);
        assert_eq!(state.error, None);
    }

    #[test]
    fn replaying_a_cloned_input_log_gives_the_same_state() {
        let mut inputs = opened("hi");
        inputs.extend([
            start("msg-1"),
            SessionInput::FrameSkipped(FrameError::UnknownType("MAP_DATA_READY".to_string())),
            text("hi", true),
        ]);
        let replay = inputs.clone();
        assert_eq!(replay[3], inputs[3]);

        let first = fold(inputs);
        let second = fold(replay);
        assert_eq!(first.skipped_frames, 1);
        assert_eq!(second.skipped_frames, 1);
        assert_eq!(first.connection, second.connection);
        assert_eq!(first.messages[1].content, second.messages[1].content);
    }

    #[test]
    fn payloads_attach_to_current_message_and_tools_are_tracked() {
        let mut inputs = opened("hiking");
        inputs.extend([
            start("msg-1"),
            SessionInput::Event(StreamEvent::ToolExecutionStart {
                tool_name: "search_activities".to_string(),
            }),
            SessionInput::Event(StreamEvent::ActivitiesFound {
                activities: vec![activity(1), activity(2)],
                total_count: 2,
                search_query: None,
            }),
            SessionInput::Event(StreamEvent::ActivitiesFound {
                activities: vec![activity(2), activity(3)],
                total_count: 2,
                search_query: None,
            }),
            SessionInput::Event(StreamEvent::ImagesLoaded {
                activity_id: 1,
                images: vec![Image {
                    id: 9,
                    activity_id: 1,
                    url: "https://img.example/a.jpg".to_string(),
                    caption: String::new(),
                }],
            }),
        ]);
        let mid = fold(inputs.clone());
        assert!(mid.active_tools.contains("search_activities"));

        inputs.push(SessionInput::Event(StreamEvent::ToolExecutionEnd {
            tool_name: "search_activities".to_string(),
        }));
        let state = fold(inputs);
        assert!(state.active_tools.is_empty());
        let message = state.current_message().unwrap();
        assert_eq!(message.activities.len(), 3);
        assert_eq!(message.images.len(), 1);
    }

    #[test]
    fn unexpected_close_is_connection_lost() {
        let mut inputs = opened("hiking");
        inputs.extend([start("msg-1"), text("partial ", false), SessionInput::TransportClosed]);
        let state = fold(inputs);
        assert_eq!(state.error, Some(ChatError::ConnectionLost));
        assert!(!state.is_streaming);
        assert_eq!(state.connection, ConnectionState::Closed);
        assert!(!state.messages[1].is_streaming);
    }

    #[test]
    fn transport_noise_after_terminal_event_changes_nothing() {
        let mut inputs = opened("hiking");
        inputs.extend([start("msg-1"), text("done", true), SessionInput::Event(StreamEvent::StreamEnd)]);
        let closed = fold(inputs);

        let after = [
            SessionInput::TransportClosed,
            SessionInput::TransportFailed("reset by peer".to_string()),
            SessionInput::TransportOpened,
            start("msg-2"),
            text("ghost", true),
        ]
        .into_iter()
        .fold(closed.clone(), reduce);

        assert_eq!(after, closed);
        assert_eq!(after.connection, ConnectionState::Closed);
    }

    #[test]
    fn submit_is_ignored_while_a_stream_is_active() {
        let mut inputs = opened("hiking");
        inputs.push(SessionInput::QuerySubmitted("cycling".to_string()));
        let state = fold(inputs);
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].content, "hiking");
    }

    #[test]
    fn rejection_before_stream_sets_error_without_messages() {
        let mut inputs = vec![SessionInput::QuerySubmitted("hiking".to_string())];
        inputs.push(SessionInput::Rejected {
            status: 429,
            message: "wait".to_string(),
        });
        let state = fold(inputs);
        assert!(matches!(state.error, Some(ChatError::DuplicateRequest { .. })));
        assert_eq!(state.connection, ConnectionState::Closed);
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn reset_clears_error_and_returns_to_idle() {
        let mut inputs = opened("hiking");
        inputs.extend([start("msg-1"), SessionInput::TransportClosed, SessionInput::Reset]);
        let state = fold(inputs);
        assert_eq!(state.error, None);
        assert_eq!(state.connection, ConnectionState::Idle);
        assert!(!state.is_streaming);
        assert_eq!(state.messages.len(), 2);
    }
}
