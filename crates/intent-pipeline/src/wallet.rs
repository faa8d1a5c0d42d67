//! Wallet-side collaborators used by the dispatcher.
//!
//! Signing, batch sizing, chain lookup and explorer links all live outside
//! this crate; these traits are the seams the dispatcher is wired through.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use async_trait::async_trait;

use crate::errors::WalletError;
use crate::model::{WalletCall, WalletKind};

/// Chain the wallet should submit a batch to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub explorer_url: Option<String>,
}

impl ChainConfig {
    pub fn new(chain_id: u64, name: impl Into<String>) -> Self {
        Self {
            chain_id,
            name: name.into(),
            explorer_url: None,
        }
    }

    pub fn with_explorer(mut self, explorer_url: impl Into<String>) -> Self {
        self.explorer_url = Some(explorer_url.into());
        self
    }
}

/// Result of a successful signing request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WalletReceipt {
    pub transaction_hash: Option<String>,
}

impl WalletReceipt {
    pub fn with_hash(hash: impl Into<String>) -> Self {
        Self {
            transaction_hash: Some(hash.into()),
        }
    }
}

/// Opaque signing capability. One call submits one batch; it may suspend
/// until the user acts.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    async fn send_calls(
        &self,
        chain: &ChainConfig,
        calls: Vec<WalletCall>,
    ) -> Result<WalletReceipt, WalletError>;
}

pub trait BatchSizePolicy: Send + Sync {
    fn batch_size(&self, wallet: &WalletKind) -> NonZeroUsize;
}

pub trait ChainRegistry: Send + Sync {
    fn chain(&self, chain_id: u64) -> Option<ChainConfig>;
}

pub trait ExplorerUrls: Send + Sync {
    /// Link to `hash` on the chain's block explorer, if one is known.
    fn transaction_url(&self, chain_id: u64, hash: &str) -> Option<String>;
}

/// Fixed wallet-kind to batch-size table with a fallback size.
#[derive(Clone, Debug)]
pub struct StaticBatchSizePolicy {
    default_size: NonZeroUsize,
    sizes: HashMap<WalletKind, NonZeroUsize>,
}

impl Default for StaticBatchSizePolicy {
    fn default() -> Self {
        Self::new(NonZeroUsize::MIN)
    }
}

impl StaticBatchSizePolicy {
    pub fn new(default_size: NonZeroUsize) -> Self {
        Self {
            default_size,
            sizes: HashMap::new(),
        }
    }

    pub fn with_size(mut self, wallet: impl Into<String>, size: NonZeroUsize) -> Self {
        self.sizes.insert(WalletKind::new(wallet), size);
        self
    }
}

impl BatchSizePolicy for StaticBatchSizePolicy {
    fn batch_size(&self, wallet: &WalletKind) -> NonZeroUsize {
        self.sizes.get(wallet).copied().unwrap_or(self.default_size)
    }
}

/// In-memory chain table; also answers explorer lookups from each chain's
/// configured explorer base URL.
#[derive(Clone, Debug, Default)]
pub struct StaticChains {
    chains: HashMap<u64, ChainConfig>,
}

impl StaticChains {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain(mut self, chain: ChainConfig) -> Self {
        self.chains.insert(chain.chain_id, chain);
        self
    }
}

impl ChainRegistry for StaticChains {
    fn chain(&self, chain_id: u64) -> Option<ChainConfig> {
        self.chains.get(&chain_id).cloned()
    }
}

impl ExplorerUrls for StaticChains {
    fn transaction_url(&self, chain_id: u64, hash: &str) -> Option<String> {
        let base = self.chains.get(&chain_id)?.explorer_url.as_deref()?;
        Some(format!("{}/tx/{hash}", base.trim_end_matches('/')))
    }
}
