/// Errors the consumer exposes as state. None of them triggers a retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("connection lost before the response finished")]
    ConnectionLost,
    #[error("{message}")]
    Streaming { message: String, code: Option<String> },
    #[error("please wait: {message}")]
    DuplicateRequest { message: String },
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
}

impl ChatError {
    /// Whether a UI should offer the manual reconnect affordance. A duplicate
    /// rejection clears itself once the dedup window passes.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ChatError::DuplicateRequest { .. })
    }

    pub fn from_status(status: u16, message: String) -> Self {
        if status == 429 {
            ChatError::DuplicateRequest { message }
        } else {
            ChatError::Rejected { status, message }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_rejections_are_not_retryable() {
        let err = ChatError::from_status(429, "slow down".to_string());
        assert!(matches!(err, ChatError::DuplicateRequest { .. }));
        assert!(!err.is_retryable());

        let err = ChatError::from_status(400, "missing".to_string());
        assert_eq!(err.to_string(), "request rejected (400): missing");
        assert!(err.is_retryable());
        assert!(ChatError::ConnectionLost.is_retryable());
    }
}
