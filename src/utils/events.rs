// Wire names of the stream event `type` tag.
pub struct Events;

impl Events {
    pub const STREAMING_START: &'static str = "STREAMING_START";
    pub const TEXT_MESSAGE_CONTENT: &'static str = "TEXT_MESSAGE_CONTENT";
    pub const TOOL_CALL_START: &'static str = "TOOL_CALL_START";
    pub const TOOL_CALL_COMPLETE: &'static str = "TOOL_CALL_COMPLETE";
    pub const ACTIVITIES_FOUND: &'static str = "ACTIVITIES_FOUND";
    pub const IMAGES_LOADED: &'static str = "IMAGES_LOADED";
    pub const STREAMING_END: &'static str = "STREAMING_END";
    pub const ERROR: &'static str = "ERROR";

    pub const ALL: [&'static str; 8] = [
        Self::STREAMING_START,
        Self::TEXT_MESSAGE_CONTENT,
        Self::TOOL_CALL_START,
        Self::TOOL_CALL_COMPLETE,
        Self::ACTIVITIES_FOUND,
        Self::IMAGES_LOADED,
        Self::STREAMING_END,
        Self::ERROR,
    ];

    pub fn is_known(kind: &str) -> bool {
        Self::ALL.contains(&kind)
    }
}

/// Tool name announced while the activity catalog is searched.
pub const SEARCH_ACTIVITIES_TOOL: &str = "search_activities";
