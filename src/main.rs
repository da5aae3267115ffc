//! Faucet Drip - claim a faucet drip from the command line
//!
//! `faucet-drip` runs one claim attempt and prints each status snapshot.
//! `faucet-drip recheck <tx-hash>` checks an earlier claim transaction again.

use anyhow::{anyhow, bail, Result};
use ethers::types::H256;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use faucet_drip::abi::ContractAbi;
use faucet_drip::chain::ChainProvider;
use faucet_drip::config::Settings;
use faucet_drip::events::StatusUpdate;
use faucet_drip::metrics;
use faucet_drip::orchestrator::{
    OrchestratorConfig, OrchestratorRegistry, Outcome, TransactionOrchestrator, TriggerError,
};
use faucet_drip::tx::ConfirmationStatus;
use faucet_drip::wallet::LocalSigner;

enum Command {
    Claim,
    Recheck(H256),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting faucet-drip v{}", env!("CARGO_PKG_VERSION"));

    let command = parse_args(std::env::args().skip(1).collect())?;

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} (chain {})",
        settings.chain.name, settings.chain.chain_id
    );

    // Chain and wallet
    let provider = Arc::new(ChainProvider::new(settings.chain.clone()).await?);
    let signer = Arc::new(LocalSigner::from_env(provider.clone(), &settings.wallet)?);
    let abi = Arc::new(ContractAbi::from_config(&settings.faucet)?);
    info!("Signing as {:?}", signer.address());

    let registry = OrchestratorRegistry::new(
        provider.clone(),
        abi,
        OrchestratorConfig::from_settings(&settings),
    );
    let orchestrator = registry.get_or_create(signer.address(), signer.clone());

    let succeeded = match command {
        Command::Claim => claim(&orchestrator).await?,
        Command::Recheck(hash) => recheck(&orchestrator, hash).await,
    };

    debug!("Metrics:\n{}", metrics::render());

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<Command> {
    match args.as_slice() {
        [] => Ok(Command::Claim),
        [cmd] if cmd == "claim" => Ok(Command::Claim),
        [cmd, hash] if cmd == "recheck" => {
            let hash = hash
                .trim_start_matches("0x")
                .parse::<H256>()
                .map_err(|e| anyhow!("invalid transaction hash {}: {:?}", hash, e))?;
            Ok(Command::Recheck(hash))
        }
        _ => bail!("usage: faucet-drip [claim | recheck <tx-hash>]"),
    }
}

/// Run one claim attempt, printing snapshots until it ends. Ctrl+C cancels.
async fn claim(orchestrator: &TransactionOrchestrator) -> Result<bool> {
    let mut updates = orchestrator.subscribe();
    let running = orchestrator.claim();
    tokio::pin!(running);

    let mut interrupted = false;
    let mut closed = false;
    let result = loop {
        tokio::select! {
            biased;

            update = updates.recv(), if !closed => match update {
                Ok(update) => print_update(&update),
                Err(RecvError::Lagged(missed)) => warn!("Missed {} status updates", missed),
                Err(RecvError::Closed) => closed = true,
            },

            result = &mut running => break result,

            _ = signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                warn!("Interrupted, cancelling attempt");
                orchestrator.cancel().await;
            }
        }
    };

    while let Ok(update) = updates.try_recv() {
        print_update(&update);
    }

    let succeeded = match result {
        Ok(Outcome::Succeeded { .. }) => true,
        Ok(Outcome::Failed { error, handle }) => {
            if let (true, Some(handle)) = (error.kind.is_ambiguous(), handle) {
                println!("Check again later with: faucet-drip recheck {:?}", handle.hash);
            }
            false
        }
        Err(TriggerError::Cancelled) => false,
        Err(e) => return Err(e.into()),
    };

    orchestrator.acknowledge().await;
    Ok(succeeded)
}

async fn recheck(orchestrator: &TransactionOrchestrator, hash: H256) -> bool {
    println!("Checking {:?}...", hash);

    match orchestrator.recheck_hash(hash).await {
        ConfirmationStatus::Confirmed { block_number } => {
            println!("Confirmed in block {}", block_number);
            true
        }
        ConfirmationStatus::Failed { reason } => {
            println!("Failed: {}", reason);
            false
        }
        _ => {
            println!("Not confirmed yet. It may still land.");
            false
        }
    }
}

fn print_update(update: &StatusUpdate) {
    println!("[{:?}] {}", update.phase, update.message);
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,faucet_drip=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}
