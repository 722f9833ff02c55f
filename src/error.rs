use snafu::Snafu;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Message id must not be empty"))]
    IdEmpty,

    #[snafu(display("Message not found: {id}"))]
    IdNotFound { id: String },

    #[snafu(display("Message already exists: {id}"))]
    IdDuplicated { id: String },

    #[snafu(display("No deliverable message in the queue"))]
    QueueEmpty,

    #[snafu(display("Message is not in the DLQ: {id}"))]
    NotInDlq { id: String },

    #[snafu(display("{operation} does not apply to message {id} in its current state"))]
    InvalidStateTransition { id: String, operation: &'static str },

    #[snafu(display("Conditional write lost against a concurrent writer"))]
    ConditionFailed,

    #[snafu(display("Could not marshal message: {message}"))]
    Marshal { message: String },

    #[snafu(display("Could not unmarshal item: {message}"))]
    Unmarshal { message: String },

    #[snafu(display("Backend request failed: {source}"))]
    Backend {
        #[snafu(source(false))]
        source: BoxError,
    },

    #[snafu(display("Backend request timed out: {source}"))]
    Timeout {
        #[snafu(source(false))]
        source: BoxError,
    },

    #[snafu(display("Invalid configuration: {message}"))]
    MisConfigured { message: String },
}

impl Error {
    pub fn marshal(e: impl std::fmt::Display) -> Self {
        Self::Marshal {
            message: e.to_string(),
        }
    }

    pub fn unmarshal(e: impl std::fmt::Display) -> Self {
        Self::Unmarshal {
            message: e.to_string(),
        }
    }

    pub fn backend(e: impl Into<BoxError>) -> Self {
        Self::Backend { source: e.into() }
    }

    pub fn mis_configured(message: impl Into<String>) -> Self {
        Self::MisConfigured {
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed without intervention.
    ///
    /// `ConditionFailed` is already retried inside `receive_message`; it is
    /// transient for every other operation too.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConditionFailed | Self::Backend { .. } | Self::Timeout { .. }
        )
    }
}
