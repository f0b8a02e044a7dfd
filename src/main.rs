//! latepay command line
//!
//! Provisions token accounts, mints to the sender, signs a nonce-anchored
//! transfer and submits it after the configured delay.

use anyhow::Context;
use latepay::{RpcLedger, Settings, TransferFlow};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        error!("❌ {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let settings = Settings::from_env().context("loading settings")?;
    info!("🚀 latepay starting against {}", settings.rpc_url);

    let ledger = Arc::new(RpcLedger::new(&settings.rpc_url, settings.commitment));
    let mut flow = TransferFlow::new(settings, ledger).context("resolving signer keys")?;

    let report = flow.run().await.context("deferred transfer")?;
    info!(
        "📋 Report:\n{}",
        serde_json::to_string_pretty(&report).context("encoding report")?
    );
    Ok(())
}
