use std::sync::Arc;

use async_trait::async_trait;
use intent_pipeline::init_observability;
use intent_pipeline::prelude::*;

/// Prints each batch instead of signing it.
struct DryRunSigner;

#[async_trait]
impl WalletSigner for DryRunSigner {
    async fn send_calls(
        &self,
        chain: &ChainConfig,
        calls: Vec<WalletCall>,
    ) -> Result<WalletReceipt, WalletError> {
        println!("would submit {} call(s) on {}", calls.len(), chain.name);
        for call in &calls {
            println!("  -> {} ({} bytes)", call.to, call.data.len());
        }
        Ok(WalletReceipt::default())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), PipelineError> {
    let config = PipelineConfig::from_env()?;
    init_observability(&config.log)?;

    let intent_id = std::env::args()
        .nth(1)
        .ok_or_else(|| PipelineError::Config("usage: stream_intent_progress <intent-id>".into()))?;

    let chains = Arc::new(
        StaticChains::new()
            .with_chain(ChainConfig::new(1, "ethereum").with_explorer("https://etherscan.io"))
            .with_chain(ChainConfig::new(8453, "base").with_explorer("https://basescan.org")),
    );
    let wallet = WalletContext {
        kind: WalletKind::new("eoa"),
        signer: Arc::new(DryRunSigner),
        batch_sizes: Arc::new(StaticBatchSizePolicy::default()),
        chains: chains.clone(),
        explorer: chains,
    };
    let pipeline =
        IntentPipeline::connect(config, wallet, Arc::new(TracingNotifier))?;

    let mut status = pipeline.open(intent_id.as_str())?;
    loop {
        if status.changed().await.is_err() {
            break;
        }
        let snapshot = status.borrow_and_update().clone();
        println!(
            "{:>5.1}% ({}/{}) reconnects={} dispatch={:?}",
            snapshot.progress_percentage(),
            snapshot.consumer.processed_count,
            snapshot.consumer.total_count,
            snapshot.consumer.reconnect_attempts,
            snapshot.dispatch.overall_status,
        );
        if snapshot.is_settled() {
            pipeline.close(&snapshot.intent_id).await;
            return snapshot.outcome();
        }
    }
    Ok(())
}
