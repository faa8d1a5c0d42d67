//! Resumable intent progress streams and batched wallet dispatch.
//!
//! A backend reports long-running intent work over a server-sent event
//! stream. This crate consumes that stream (reconnecting with bounded backoff
//! and resuming from the last event id), and once the stream completes with a
//! set of prepared transactions, submits them to a wallet in ordered,
//! fail-fast batches.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use intent_pipeline::prelude::*;
//!
//! # struct Signer;
//! # #[async_trait::async_trait]
//! # impl WalletSigner for Signer {
//! #     async fn send_calls(&self, _: &ChainConfig, _: Vec<WalletCall>)
//! #         -> Result<WalletReceipt, WalletError> { Ok(WalletReceipt::default()) }
//! # }
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), PipelineError> {
//! let chains = Arc::new(
//!     StaticChains::new()
//!         .with_chain(ChainConfig::new(1, "ethereum").with_explorer("https://etherscan.io")),
//! );
//! let wallet = WalletContext {
//!     kind: WalletKind::new("eoa"),
//!     signer: Arc::new(Signer),
//!     batch_sizes: Arc::new(StaticBatchSizePolicy::default()),
//!     chains: chains.clone(),
//!     explorer: chains,
//! };
//! let pipeline = IntentPipeline::connect(
//!     PipelineConfig::from_env()?,
//!     wallet,
//!     Arc::new(TracingNotifier),
//! )?;
//!
//! let mut status = pipeline.open("intent-123")?;
//! let settled = status
//!     .wait_for(PipelineStatus::is_settled)
//!     .await
//!     .map_err(|_| PipelineError::SessionDisposed)?
//!     .clone();
//! settled.outcome()?;
//! # Ok(())
//! # }
//! ```

/// Runtime configuration.
pub mod config;
/// Stream consumer state machine.
pub mod consumer;
/// Sequential batched wallet submission.
pub mod dispatcher;
/// Async task running a consumer against a transport.
pub mod driver;
/// Public error types.
pub mod errors;
/// Decoded stream events.
pub mod event;
/// Keyed in-flight request registry.
pub mod guard;
/// Identifiers and transaction payload types.
pub mod model;
/// Notification sink contract.
pub mod notify;
/// Tracing subscriber setup.
pub mod observability;
/// Batch partitioning.
pub mod planner;
/// Reconnect backoff policy.
pub mod policy;
/// Common imports for typical usage.
pub mod prelude;
/// Per-intent session lifecycle and the multi-intent pipeline.
pub mod session;
/// Stream transport contract and the HTTP implementation.
pub mod transport;
/// Wallet-side collaborator contracts.
pub mod wallet;

pub use config::{DispatchConfig, LogConfig, PipelineConfig};
pub use consumer::{ConnectionStatus, ConsumerState, Directive, StreamConsumer, TransportEvent};
pub use dispatcher::{
    DispatchOutcome, DispatchState, Dispatcher, OverallStatus, WalletContext,
    transaction_set_signature,
};
pub use driver::StreamHandle;
pub use errors::{DispatchError, DispatchErrorKind, PipelineError, TransportError, WalletError};
pub use event::{ReceivedEvent, StreamEvent};
pub use guard::{AbortHandle, AbortSignal, Admission, RequestGuard, RequestTicket};
pub use model::{IntentId, PreparedTransaction, Quantity, StreamId, WalletCall, WalletKind};
pub use notify::{Notification, NotificationKind, Notifier, RecordingNotifier, TracingNotifier};
pub use observability::init_observability;
pub use planner::{Batch, BatchStatus, plan};
pub use policy::ReconnectPolicy;
pub use session::{IntentPipeline, IntentSession, PipelineStatus, SessionPhase};
pub use transport::{HttpSseTransport, SseFrame, StreamRequest, StreamTransport};
pub use transport::sse::FrameTooLarge;
pub use wallet::{
    BatchSizePolicy, ChainConfig, ChainRegistry, ExplorerUrls, StaticBatchSizePolicy,
    StaticChains, WalletReceipt, WalletSigner,
};
