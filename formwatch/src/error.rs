//! Crate-wide error types.

/// Errors surfaced to callers of monitoring and sound management
/// operations.
///
/// Polling failures never appear here; they are folded into the
/// [`Error`](crate::status::PollOutcome::Error) outcome by the classifier.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("already monitoring slot {active}; stop it before monitoring {requested}")]
    AlreadyMonitoringDifferentSlot { active: String, requested: String },

    #[error("monitoring of slot {0} is still shutting down")]
    CancellationPending(String),

    #[error("unknown slot: {0}")]
    UnknownSlot(String),

    #[error("poll interval must be greater than zero")]
    InvalidInterval,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for rejected operations caused by the current monitoring
    /// state rather than by bad input or I/O.
    pub fn is_state_violation(&self) -> bool {
        matches!(
            self,
            Error::AlreadyMonitoringDifferentSlot { .. } | Error::CancellationPending(_)
        )
    }
}

/// Failures reading or writing durable state.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StorageError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        StorageError::Json {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
