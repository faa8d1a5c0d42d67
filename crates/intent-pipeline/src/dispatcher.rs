//! Sequential batched submission of prepared transactions to a wallet.
//!
//! A run goes `Idle -> Sending -> {Success | Error}`. Batches are submitted
//! strictly one after another; the first failure ends the run and leaves the
//! remaining batches `Pending`. A finished run is never resubmitted until
//! [`Dispatcher::reset`] is called. A run can also be cancelled between
//! batches through [`Dispatcher::cancel_on`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt as _;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::errors::{DispatchError, WalletError};
use crate::guard::AbortSignal;
use crate::model::{PreparedTransaction, WalletCall, WalletKind};
use crate::notify::{Notification, Notifier};
use crate::planner::{Batch, BatchStatus, plan};
use crate::wallet::{BatchSizePolicy, ChainRegistry, ExplorerUrls, WalletReceipt, WalletSigner};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OverallStatus {
    #[default]
    Idle,
    Sending,
    Success,
    Error,
}

/// Observable snapshot of a dispatch run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchState {
    pub batches: Vec<Batch>,
    pub current_batch_index: usize,
    pub overall_status: OverallStatus,
    /// Error that ended the last run; cleared by `clear_error` or `reset`.
    pub error: Option<DispatchError>,
}

impl DispatchState {
    pub fn completed_batches(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| b.status == BatchStatus::Completed)
            .count()
    }
}

/// What a call to [`Dispatcher::send_to_wallet`] did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No transactions are set.
    NothingToSend,
    /// The previous run already finished (or is running); nothing was submitted.
    AlreadyFinished(OverallStatus),
    /// Every batch was accepted by the wallet.
    Completed {
        batches: usize,
        transaction_hashes: Vec<Option<String>>,
    },
}

/// Wallet-side collaborators a dispatcher submits through.
#[derive(Clone)]
pub struct WalletContext {
    pub kind: WalletKind,
    pub signer: Arc<dyn WalletSigner>,
    pub batch_sizes: Arc<dyn BatchSizePolicy>,
    pub chains: Arc<dyn ChainRegistry>,
    pub explorer: Arc<dyn ExplorerUrls>,
}

/// Hex SHA-256 of the canonical JSON encoding of `transactions`.
pub fn transaction_set_signature(transactions: &[PreparedTransaction]) -> String {
    let canonical = serde_json::to_vec(transactions)
        .unwrap_or_else(|_| format!("{transactions:?}").into_bytes());
    hex::encode(Sha256::digest(&canonical))
}

pub struct Dispatcher {
    wallet: WalletContext,
    notifier: Arc<dyn Notifier>,
    config: DispatchConfig,
    transactions: Vec<PreparedTransaction>,
    signature: Option<String>,
    state: DispatchState,
    publisher: watch::Sender<DispatchState>,
    cancel: Option<AbortSignal>,
}

impl Dispatcher {
    pub fn new(wallet: WalletContext, notifier: Arc<dyn Notifier>, config: DispatchConfig) -> Self {
        let (publisher, _) = watch::channel(DispatchState::default());
        Self {
            wallet,
            notifier,
            config,
            transactions: Vec::new(),
            signature: None,
            state: DispatchState::default(),
            publisher,
            cancel: None,
        }
    }

    /// Stops future runs from starting new batches once `signal` fires.
    ///
    /// A batch already handed to the wallet is always allowed to finish.
    pub fn cancel_on(&mut self, signal: AbortSignal) {
        self.cancel = Some(signal);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(AbortSignal::is_aborted)
    }

    pub fn state(&self) -> &DispatchState {
        &self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<DispatchState> {
        self.publisher.subscribe()
    }

    pub fn transactions(&self) -> &[PreparedTransaction] {
        &self.transactions
    }

    /// Replaces the pending transaction set.
    ///
    /// A set identical to the current one is ignored and `false` is returned,
    /// so a repeated upstream completion cannot trigger a second run. Any
    /// other set replaces the current one and returns the dispatcher to idle.
    pub fn set_transactions(&mut self, transactions: Vec<PreparedTransaction>) -> bool {
        let signature = transaction_set_signature(&transactions);
        if self.signature.as_deref() == Some(signature.as_str()) {
            debug!(signature = %signature, "transaction set unchanged");
            return false;
        }
        debug!(count = transactions.len(), signature = %signature, "transaction set replaced");
        self.transactions = transactions;
        self.signature = Some(signature);
        self.state = DispatchState::default();
        self.publish();
        true
    }

    /// Returns to idle, keeping the current transaction set.
    pub fn reset(&mut self) {
        self.state = DispatchState::default();
        self.publish();
    }

    /// Drops the stored error. The run stays in `Error` until `reset`.
    pub fn clear_error(&mut self) {
        if self.state.error.take().is_some() {
            self.publish();
        }
    }

    pub fn is_sending(&self) -> bool {
        self.state.overall_status == OverallStatus::Sending
    }

    pub fn is_success(&self) -> bool {
        self.state.overall_status == OverallStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.state.overall_status == OverallStatus::Error
    }

    pub fn has_transactions(&self) -> bool {
        !self.transactions.is_empty()
    }

    /// Sends only when upstream is complete, transactions are pending and no
    /// run has happened since the last reset. Returns `None` when it did not
    /// send.
    pub async fn auto_send_when_ready(
        &mut self,
        is_complete: bool,
    ) -> Option<Result<DispatchOutcome, DispatchError>> {
        if !is_complete
            || !self.has_transactions()
            || self.state.overall_status != OverallStatus::Idle
        {
            return None;
        }
        Some(self.send_to_wallet().await)
    }

    /// Submits every batch in order, stopping at the first failure.
    pub async fn send_to_wallet(&mut self) -> Result<DispatchOutcome, DispatchError> {
        if self.transactions.is_empty() {
            return Ok(DispatchOutcome::NothingToSend);
        }
        if self.state.overall_status != OverallStatus::Idle {
            debug!(status = ?self.state.overall_status, "dispatch already ran; reset required");
            return Ok(DispatchOutcome::AlreadyFinished(self.state.overall_status));
        }

        let batch_size = self.wallet.batch_sizes.batch_size(&self.wallet.kind);
        self.state = DispatchState {
            batches: plan(&self.transactions, batch_size),
            current_batch_index: 0,
            overall_status: OverallStatus::Sending,
            error: None,
        };
        let total = self.state.batches.len();
        info!(
            wallet = %self.wallet.kind,
            transactions = self.transactions.len(),
            batches = total,
            batch_size = batch_size.get(),
            "dispatch started"
        );
        self.publish();

        let mut hashes = Vec::with_capacity(total);
        for index in 0..total {
            if index > 0 {
                self.pause_between_batches().await;
            }
            if self.is_cancelled() {
                let err = DispatchError::Cancelled { batch: index + 1 };
                self.abandon(&err);
                return Err(err);
            }
            self.state.current_batch_index = index;
            self.state.batches[index].status = BatchStatus::Processing;
            self.publish();

            let transactions = self.state.batches[index].transactions.clone();
            let submission = submit_batch(
                &self.wallet,
                self.config.default_chain_id,
                index,
                &transactions,
            );
            let result = AssertUnwindSafe(submission)
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(DispatchError::Unexpected(panic_message(panic))));

            match result {
                Ok((chain_id, receipt)) => {
                    self.complete_batch(index, total, chain_id, &receipt);
                    hashes.push(receipt.transaction_hash);
                }
                Err(err) => {
                    self.fail_batch(index, &err);
                    return Err(err);
                }
            }
        }

        self.state.overall_status = OverallStatus::Success;
        info!(batches = total, "dispatch succeeded");
        if total > 1 {
            self.notifier.notify(
                Notification::info(
                    "All Batches Sent",
                    format!(
                        "{} transactions submitted in {total} batches",
                        self.transactions.len()
                    ),
                )
                .with_duration(self.config.notification_duration),
            );
        }
        self.publish();
        Ok(DispatchOutcome::Completed {
            batches: total,
            transaction_hashes: hashes,
        })
    }

    async fn pause_between_batches(&self) {
        let pause = tokio::time::sleep(self.config.inter_batch_delay);
        match self.cancel.clone() {
            Some(mut signal) => tokio::select! {
                () = pause => {}
                () = signal.aborted() => {}
            },
            None => pause.await,
        }
    }

    fn complete_batch(&mut self, index: usize, total: usize, chain_id: u64, receipt: &WalletReceipt) {
        let hash = receipt.transaction_hash.clone();
        info!(batch = index + 1, total, tx_hash = hash.as_deref().unwrap_or(""), "batch submitted");
        let batch = &mut self.state.batches[index];
        batch.status = BatchStatus::Completed;
        batch.transaction_hash = hash.clone();

        let message = match &hash {
            Some(hash) => format!("transaction {hash}"),
            None => "submitted to wallet".to_string(),
        };
        let link = hash
            .as_deref()
            .and_then(|hash| self.wallet.explorer.transaction_url(chain_id, hash));
        self.notifier.notify(
            Notification::success(format!("Batch {} of {total} Sent", index + 1), message)
                .with_duration(self.config.notification_duration)
                .with_link(link),
        );
        self.publish();
    }

    fn fail_batch(&mut self, index: usize, err: &DispatchError) {
        warn!(batch = index + 1, error = %err, "batch failed; abandoning remaining batches");
        let batch = &mut self.state.batches[index];
        batch.status = BatchStatus::Failed;
        batch.error = Some(err.to_string());
        self.state.overall_status = OverallStatus::Error;
        self.state.error = Some(err.clone());
        self.notifier.notify(
            Notification::error(err.title(), err.to_string())
                .with_duration(self.config.notification_duration),
        );
        self.publish();
    }

    // Unstarted batches stay `Pending`.
    fn abandon(&mut self, err: &DispatchError) {
        info!(
            completed = self.state.completed_batches(),
            total = self.state.batches.len(),
            "dispatch cancelled; remaining batches not submitted"
        );
        self.state.overall_status = OverallStatus::Error;
        self.state.error = Some(err.clone());
        self.notifier.notify(
            Notification::error(err.title(), err.to_string())
                .with_duration(self.config.notification_duration),
        );
        self.publish();
    }

    fn publish(&self) {
        self.publisher.send_replace(self.state.clone());
    }
}

async fn submit_batch(
    wallet: &WalletContext,
    default_chain_id: u64,
    index: usize,
    transactions: &[PreparedTransaction],
) -> Result<(u64, WalletReceipt), DispatchError> {
    let calls: Vec<WalletCall> = transactions
        .iter()
        .enumerate()
        .filter_map(|(position, tx)| match tx.to_wallet_call() {
            Ok(call) => Some(call),
            Err(reason) => {
                warn!(batch = index + 1, position, %reason, "skipping unconvertible transaction");
                None
            }
        })
        .collect();
    if calls.is_empty() {
        return Err(DispatchError::NoExecutableTransactions);
    }

    let chain_id = transactions
        .first()
        .and_then(PreparedTransaction::chain_id)
        .unwrap_or(default_chain_id);
    let chain = wallet
        .chains
        .chain(chain_id)
        .ok_or(DispatchError::UnsupportedChain { chain_id })?;

    let receipt = wallet
        .signer
        .send_calls(&chain, calls)
        .await
        .map_err(|err| match err {
            WalletError::Rejected(_) | WalletError::Rpc(_) => DispatchError::BatchFailed {
                batch: index + 1,
                message: err.to_string(),
            },
            WalletError::Internal(_) => DispatchError::Unexpected(err.to_string()),
        })?;
    Ok((chain_id, receipt))
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "wallet call panicked".to_string()
    }
}
