use thiserror::Error;

/// Cause of a request that never produced an HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    /// The host did not answer within the per-call timeout.
    NoResponse,
    /// TCP/DNS level failure reaching the host.
    Connection,
    /// Malformed request or anything else that could not be classified further.
    HostIssue,
}

impl TransportFailure {
    /// Timeouts and connection failures are worth another attempt.
    /// Everything else fails the call immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoResponse | Self::Connection)
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::NoResponse => {
                "did not receive a successful response from the remote host, check your settings and try again"
            }
            Self::Connection => {
                "network error while contacting the remote host, check your connection and try again"
            }
            Self::HostIssue => "please provide a valid remote server address",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("{}", .0.message())]
    Transport(TransportFailure),

    #[error("remote error (HTTP {status}): {message}")]
    Remote { status: u16, message: String },

    #[error("data verification failed for {path}: remote echo does not match submitted data")]
    DataIntegrity { path: String },

    #[error("invalid page from {path}: {reason}")]
    InvalidPage { path: String, reason: String },

    #[error("{} candidate id(s) could not be confirmed remotely: {}", .ids.len(), preview_ids(.ids))]
    Unconfirmed { ids: Vec<u64> },

    #[error("aborted after {succeeded} successful item(s): {cause}")]
    BatchAborted {
        succeeded: usize,
        cause: Box<SyncError>,
    },

    #[error("interrupted by operator")]
    Interrupted,

    #[error("cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Returns true for transient errors that may succeed on retry. An aborted
    /// batch is retryable when its cause is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(kind) => kind.is_retryable(),
            Self::Remote { status, .. } => matches!(status, 429 | 500 | 502),
            Self::BatchAborted { cause, .. } => cause.is_retryable(),
            _ => false,
        }
    }

    /// Short, stable reason tag for logs and summaries.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Transport(TransportFailure::NoResponse) => "timeout",
            Self::Transport(_) => "transport",
            Self::Remote { status: 429, .. } => "rate_limited",
            Self::Remote { .. } => "remote",
            Self::DataIntegrity { .. } => "data_integrity",
            Self::InvalidPage { .. } => "invalid_page",
            Self::Unconfirmed { .. } => "unconfirmed",
            Self::BatchAborted { .. } => "aborted",
            Self::Interrupted => "interrupted",
            Self::Cancelled => "cancelled",
            Self::Config(_) => "config",
            Self::Other(_) => "error",
        }
    }

    /// Message for a terminal user. Does not include raw bodies of non-JSON
    /// error pages.
    pub fn user_message(&self) -> String {
        match self {
            Self::Remote { status, message } if message.len() > 200 => {
                format!("remote error (HTTP {status})")
            }
            Self::BatchAborted { succeeded, cause } => {
                format!(
                    "aborted after {succeeded} successful item(s): {}",
                    cause.user_message()
                )
            }
            other => other.to_string(),
        }
    }

    /// True when this error (or the abort cause it wraps) is an operator interrupt.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Interrupted => true,
            Self::BatchAborted { cause, .. } => cause.is_interrupted(),
            _ => false,
        }
    }
}

/// Render at most 20 ids, matching what a terminal user can reasonably scan.
fn preview_ids(ids: &[u64]) -> String {
    let shown: Vec<String> = ids.iter().take(20).map(|id| id.to_string()).collect();
    let suffix = if ids.len() > 20 { ", ..." } else { "" };
    format!("[{}{suffix}]", shown.join(", "))
}
