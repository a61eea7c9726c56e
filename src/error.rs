use thiserror::Error;

/// Externally observable failure category.
///
/// Boundaries (HTTP handlers, the payload rewriter's callers) branch on this,
/// never on the rendered message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    TooLarge,
    InvalidArgument,
    Unavailable,
    Internal,
}

#[derive(Debug, Error)]
pub enum FilesError {
    /// Missing id, malformed id, wrong owner and expired records all collapse here.
    #[error("file not found")]
    NotFound,
    #[error("file too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    #[error("storage quota exceeded: current {current_mb} MB, limit {limit_mb} MB")]
    QuotaExceeded { current_mb: u64, limit_mb: u64 },
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },
    #[error("unavailable: {message}")]
    Unavailable { message: String },
    #[error("{message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl FilesError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::TooLarge { .. } | Self::QuotaExceeded { .. } => ErrorKind::TooLarge,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::Internal { .. } | Self::Io(_) | Self::Json(_) | Self::Join(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub fn internal(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

pub type Result<T> = std::result::Result<T, FilesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_and_json_failures_classify_as_internal() {
        let io = FilesError::from(std::io::Error::other("disk gone"));
        assert_eq!(io.kind(), ErrorKind::Internal);

        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(FilesError::from(json).kind(), ErrorKind::Internal);
    }

    #[test]
    fn quota_and_read_limits_share_the_too_large_kind() {
        let quota = FilesError::QuotaExceeded {
            current_mb: 1,
            limit_mb: 1,
        };
        let read = FilesError::TooLarge { size: 10, limit: 5 };
        assert_eq!(quota.kind(), ErrorKind::TooLarge);
        assert_eq!(read.kind(), ErrorKind::TooLarge);
    }

    #[test]
    fn internal_keeps_its_cause() {
        let err = FilesError::internal("failed to save metadata", std::io::Error::other("eio"));
        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "eio");
        assert_eq!(err.to_string(), "failed to save metadata");
    }
}
