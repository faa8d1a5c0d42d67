//! Common imports for wiring a pipeline.
pub use crate::{
    ChainConfig, DispatchConfig, DispatchError, IntentId, IntentPipeline, IntentSession, LogConfig,
    Notification, Notifier, PipelineConfig, PipelineError, PipelineStatus, PreparedTransaction,
    ReconnectPolicy, StaticBatchSizePolicy, StaticChains, TracingNotifier, WalletCall,
    WalletContext, WalletError, WalletKind, WalletReceipt, WalletSigner,
};
