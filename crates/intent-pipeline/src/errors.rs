use crate::model::StreamId;

/// Errors raised by a stream transport while opening or reading a connection.
///
/// Every variant is recoverable from the consumer's point of view: the
/// reconnect policy decides whether another attempt is made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connect failed ({stream_id}): {message}")]
    Connect { stream_id: StreamId, message: String },
    /// The endpoint answered with a non-success HTTP status.
    #[error("stream endpoint returned status {status} ({stream_id}): {body}")]
    Status {
        stream_id: StreamId,
        status: u16,
        body: String,
    },
    /// Reading from an established connection failed.
    #[error("stream read failed ({stream_id}): {message}")]
    Read { stream_id: StreamId, message: String },
    /// The server closed the connection before a terminal event.
    #[error("stream closed before completion ({stream_id})")]
    Closed { stream_id: StreamId },
    /// The stream URL could not be built from the configured base URL.
    #[error("invalid stream url: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    /// Creates a connect error.
    pub fn connect(stream_id: impl Into<StreamId>, message: impl Into<String>) -> Self {
        Self::Connect {
            stream_id: stream_id.into(),
            message: message.into(),
        }
    }

    /// Creates a read error.
    pub fn read(stream_id: impl Into<StreamId>, message: impl Into<String>) -> Self {
        Self::Read {
            stream_id: stream_id.into(),
            message: message.into(),
        }
    }
}

/// Failure reported by the wallet signing capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    /// The user declined the signing request.
    #[error("rejected by wallet: {0}")]
    Rejected(String),
    /// The wallet's RPC backend refused or failed the submission.
    #[error("rpc error: {0}")]
    Rpc(String),
    /// The wallet integration itself failed unexpectedly.
    #[error("wallet internal error: {0}")]
    Internal(String),
}

/// Stable category for a [`DispatchError`], for callers that branch on the
/// kind of failure instead of its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchErrorKind {
    NoExecutableTransactions,
    UnsupportedChain,
    WalletRejection,
    Cancelled,
    Unexpected,
}

/// Terminal failure of a dispatch run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// None of a batch's transactions could be converted into wallet calls.
    #[error("no executable transactions")]
    NoExecutableTransactions,
    /// No chain configuration exists for the batch's target chain.
    #[error("unsupported chain: {chain_id}")]
    UnsupportedChain { chain_id: u64 },
    /// The wallet or its RPC rejected a batch. `batch` is 1-indexed.
    #[error("batch {batch} failed: {message}")]
    BatchFailed { batch: usize, message: String },
    /// The run was cancelled before batch `batch` (1-indexed) was submitted.
    #[error("dispatch cancelled before batch {batch}")]
    Cancelled { batch: usize },
    /// Anything else that went wrong while the batch loop was running.
    #[error("transaction processing failed: {0}")]
    Unexpected(String),
}

impl DispatchError {
    pub fn kind(&self) -> DispatchErrorKind {
        match self {
            Self::NoExecutableTransactions => DispatchErrorKind::NoExecutableTransactions,
            Self::UnsupportedChain { .. } => DispatchErrorKind::UnsupportedChain,
            Self::BatchFailed { .. } => DispatchErrorKind::WalletRejection,
            Self::Cancelled { .. } => DispatchErrorKind::Cancelled,
            Self::Unexpected(_) => DispatchErrorKind::Unexpected,
        }
    }

    /// Notification title used when this error is surfaced to the user.
    pub fn title(&self) -> &'static str {
        match self.kind() {
            DispatchErrorKind::NoExecutableTransactions => "No Executable Transactions",
            DispatchErrorKind::UnsupportedChain => "Unsupported Chain",
            DispatchErrorKind::WalletRejection => "Batch Failed",
            DispatchErrorKind::Cancelled => "Dispatch Cancelled",
            DispatchErrorKind::Unexpected => "Transaction Processing Failed",
        }
    }
}

/// Top-level error type for the pipeline API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Transport failure surfaced outside the consumer.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Dispatch run failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// The stream ended in a non-recoverable error.
    #[error("stream terminated: {0}")]
    StreamTerminated(String),
    /// The stream was stopped before it completed.
    #[error("stream stopped before completion")]
    Stopped,
    /// The session was used after `dispose()`.
    #[error("session disposed")]
    SessionDisposed,
    /// The stream consumer task is no longer running.
    #[error("stream consumer task has exited")]
    ConsumerGone,
}
