//! Single-flight orchestration of one faucet drip attempt at a time

use super::state::{AttemptState, Outcome};
use crate::abi::ContractAbi;
use crate::chain::ChainRpc;
use crate::config::{DeadlineConfig, Settings};
use crate::error::DripError;
use crate::events::{RecentStatus, RecentTransaction, RecentTransactions, StatusUpdate};
use crate::metrics;
use crate::tx::{
    CallDescription, ConfirmationStatus, ConfirmationTracker, ErrorTranslator, Failure,
    RequestSimulator, Stage, TransactionHandle, TransactionSubmitter,
};
use crate::wallet::Wallet;

use chrono::Utc;
use ethers::types::{Address, H256};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Why a trigger did not produce an outcome
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("an attempt is already in progress")]
    AlreadyInProgress,

    #[error("call is for account {got:?}, orchestrator serves {expected:?}")]
    AccountMismatch { expected: Address, got: Address },

    #[error("attempt cancelled before submission")]
    Cancelled,

    #[error(transparent)]
    State(#[from] DripError),
}

/// What a cancel request did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelRequest {
    /// No transaction existed yet, so the attempt was asked to return to
    /// Idle. A stage that had already finished still takes effect; the
    /// result of `trigger` reports what was applied.
    Requested,
    /// A transaction is in the pending pool; tracking stops, it may still land
    StopTracking,
    /// Nothing in flight
    NotCancellable,
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub deadlines: DeadlineConfig,
    pub confirmation_blocks: u64,
    pub poll_interval: Duration,
    /// Label recorded with each submitted transaction
    pub description: String,
    pub max_recent_transactions: usize,
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            deadlines: settings.deadlines.clone(),
            confirmation_blocks: settings.chain.confirmation_blocks,
            poll_interval: settings.chain.poll_interval(),
            description: settings.faucet.description.clone(),
            max_recent_transactions: settings.faucet.max_recent_transactions,
        }
    }
}

struct Attempt {
    id: Uuid,
    state: AttemptState,
    cancel: Option<watch::Sender<bool>>,
}

/// Drives Simulate -> Submit -> Confirm for one caller account.
///
/// At most one attempt is in flight. A finished attempt stays in its
/// terminal state until [`acknowledge`](Self::acknowledge) is called. If the
/// `trigger` future is dropped mid-attempt, the attempt is released: back to
/// Idle before a transaction exists, otherwise to a confirmation timeout
/// with the handle kept.
pub struct TransactionOrchestrator {
    account: Address,
    abi: Arc<ContractAbi>,
    simulator: RequestSimulator,
    submitter: TransactionSubmitter,
    tracker: ConfirmationTracker,
    translator: ErrorTranslator,
    config: OrchestratorConfig,
    attempt: Mutex<Attempt>,
    status_tx: broadcast::Sender<StatusUpdate>,
    recent: RecentTransactions,
}

impl TransactionOrchestrator {
    pub fn new(
        account: Address,
        rpc: Arc<dyn ChainRpc>,
        wallet: Arc<dyn Wallet>,
        abi: Arc<ContractAbi>,
        config: OrchestratorConfig,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);

        Self {
            account,
            simulator: RequestSimulator::new(rpc.clone()),
            submitter: TransactionSubmitter::new(wallet),
            tracker: ConfirmationTracker::new(rpc, config.confirmation_blocks, config.poll_interval),
            translator: ErrorTranslator::new(abi.clone()),
            abi,
            recent: RecentTransactions::new(config.max_recent_transactions),
            config,
            attempt: Mutex::new(Attempt {
                id: Uuid::nil(),
                state: AttemptState::Idle,
                cancel: None,
            }),
            status_tx,
        }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    /// Claim the faucet drip for this orchestrator's account
    pub async fn claim(&self) -> Result<Outcome, TriggerError> {
        self.trigger(self.abi.faucet_call(self.account)).await
    }

    /// Run one attempt for `call` through to a terminal outcome.
    ///
    /// Rejected with [`TriggerError::AlreadyInProgress`] unless the
    /// orchestrator is Idle. Stage failures are not errors here: they come
    /// back as [`Outcome::Failed`].
    pub async fn trigger(&self, call: CallDescription) -> Result<Outcome, TriggerError> {
        if call.caller != self.account {
            return Err(TriggerError::AccountMismatch {
                expected: self.account,
                got: call.caller,
            });
        }

        let (attempt_id, mut cancel_rx) = {
            let mut attempt = self.lock_attempt();
            if !attempt.state.is_idle() {
                debug!(
                    "Trigger for {:?} rejected, attempt {} is {}",
                    self.account, attempt.id, attempt.state
                );
                metrics::record_trigger_rejected();
                return Err(TriggerError::AlreadyInProgress);
            }

            let (cancel_tx, cancel_rx) = watch::channel(false);
            attempt.id = Uuid::new_v4();
            attempt.cancel = Some(cancel_tx);
            self.enter(&mut attempt, AttemptState::Simulating)?;
            (attempt.id, cancel_rx)
        };

        info!(
            "Attempt {} started: {} for {:?}",
            attempt_id, call.function.signature, call.caller
        );
        metrics::record_attempt_started();
        let _release = ReleaseOnDrop {
            orchestrator: self,
            attempt_id,
        };

        // Simulate
        let started = Instant::now();
        let simulation = match cancellable(
            self.simulator.simulate(&call, self.config.deadlines.simulation()),
            &mut cancel_rx,
        )
        .await
        {
            Some(result) => result,
            None => return self.abandon(),
        };
        metrics::record_stage_latency(Stage::Simulation, started.elapsed().as_secs_f64());

        let estimated_gas = match simulation.into_result() {
            Ok(gas) => gas,
            Err(failure) => return self.fail(Stage::Simulation, &failure, None).await,
        };

        // Submit
        self.transition(AttemptState::AwaitingSignature)?;
        let started = Instant::now();
        let submitted = match cancellable(
            self.submitter
                .submit(&call, estimated_gas, self.config.deadlines.signature()),
            &mut cancel_rx,
        )
        .await
        {
            Some(result) => result,
            None => return self.abandon(),
        };
        metrics::record_stage_latency(Stage::Signature, started.elapsed().as_secs_f64());

        let handle = match submitted {
            Ok(handle) => handle,
            Err(e) => return self.fail(Stage::Signature, &Failure::from(e), None).await,
        };

        self.transition(AttemptState::Submitted(handle.clone()))?;
        self.recent.record(handle.hash, &self.config.description).await;

        // Confirm
        self.transition(AttemptState::Confirming(handle.clone()))?;
        let started = Instant::now();
        let status_tx = self.status_tx.clone();
        let required = self.tracker.confirmation_blocks();
        let tx_hash = handle.hash;
        let tracking = self.tracker.track_with_progress(
            &handle,
            self.config.deadlines.confirmation(),
            move |status| {
                if let ConfirmationStatus::Pending { confirmations } = status {
                    let _ = status_tx.send(StatusUpdate::progress(
                        attempt_id,
                        tx_hash,
                        *confirmations,
                        required,
                    ));
                }
            },
        );
        let status = cancellable(tracking, &mut cancel_rx)
            .await
            .unwrap_or_else(|| {
                info!("Stopped tracking {:?} on request", tx_hash);
                ConfirmationStatus::TimedOut
            });
        metrics::record_stage_latency(Stage::Confirmation, started.elapsed().as_secs_f64());

        match status {
            ConfirmationStatus::Confirmed { block_number } => {
                self.finish(Outcome::Succeeded {
                    handle,
                    block_number,
                })
                .await
            }
            other => {
                let failure = Failure::from_confirmation(other).unwrap_or(Failure::Timeout);
                self.fail(Stage::Confirmation, &failure, Some(handle)).await
            }
        }
    }

    /// Return a terminal attempt to Idle. No-op (returns false) otherwise.
    pub async fn acknowledge(&self) -> bool {
        let mut attempt = self.lock_attempt();
        if !attempt.state.is_terminal() {
            return false;
        }

        if let Err(e) = self.enter(&mut attempt, AttemptState::Idle) {
            warn!("Acknowledge failed: {}", e);
            return false;
        }
        debug!("Attempt {} acknowledged", attempt.id);
        true
    }

    /// Ask the in-flight attempt to stop. This only signals the attempt;
    /// the value `trigger` resolves to is the outcome actually applied.
    pub async fn cancel(&self) -> CancelRequest {
        let attempt = self.lock_attempt();
        let request = match &attempt.state {
            state if state.is_cancellable() => CancelRequest::Requested,
            AttemptState::Submitted(_) | AttemptState::Confirming(_) => CancelRequest::StopTracking,
            _ => return CancelRequest::NotCancellable,
        };

        if let Some(cancel) = &attempt.cancel {
            let _ = cancel.send(true);
        }
        info!("Cancel requested for attempt {} ({})", attempt.id, attempt.state);
        request
    }

    /// Track an earlier transaction again, e.g. after a confirmation
    /// timeout. Leaves the attempt state untouched.
    pub async fn recheck(&self, handle: &TransactionHandle) -> ConfirmationStatus {
        let status = self
            .tracker
            .track(handle, self.config.deadlines.confirmation())
            .await;

        let recent = match &status {
            ConfirmationStatus::Confirmed { .. } => Some(RecentStatus::Confirmed),
            ConfirmationStatus::Failed { .. } => Some(RecentStatus::Failed),
            _ => None,
        };
        if let Some(recent) = recent {
            self.recent.update(handle.hash, recent).await;
        }

        info!("Re-check of {:?}: {:?}", handle.hash, status);
        status
    }

    /// [`recheck`](Self::recheck) by hash alone
    pub async fn recheck_hash(&self, hash: H256) -> ConfirmationStatus {
        let handle = TransactionHandle {
            hash,
            call: self.abi.faucet_call(self.account),
            submitted_at: Utc::now(),
            sequence: 0,
        };
        self.recheck(&handle).await
    }

    pub async fn state(&self) -> AttemptState {
        self.lock_attempt().state.clone()
    }

    /// Whether no attempt is in flight or awaiting acknowledgment
    pub fn is_idle(&self) -> bool {
        self.lock_attempt().state.is_idle()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.status_tx.subscribe()
    }

    pub async fn recent_transactions(&self) -> Vec<RecentTransaction> {
        self.recent.list().await
    }

    /// Sections holding this lock never await and never panic
    fn lock_attempt(&self) -> MutexGuard<'_, Attempt> {
        self.attempt.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, next: AttemptState) -> Result<(), DripError> {
        let mut attempt = self.lock_attempt();
        self.enter(&mut attempt, next)
    }

    /// Validate, apply and publish one transition. Caller holds the lock.
    fn enter(&self, attempt: &mut Attempt, next: AttemptState) -> Result<(), DripError> {
        if !attempt.state.can_transition_to(&next) {
            return Err(DripError::InvalidStateTransition {
                from: attempt.state.to_string(),
                to: next.to_string(),
            });
        }

        debug!("Attempt {}: {} -> {}", attempt.id, attempt.state, next);
        if next.is_terminal() || next.is_idle() {
            attempt.cancel = None;
        }

        let _ = self
            .status_tx
            .send(StatusUpdate::for_state(attempt.id, &next));
        attempt.state = next;
        Ok(())
    }

    fn abandon(&self) -> Result<Outcome, TriggerError> {
        let mut attempt = self.lock_attempt();
        if !attempt.state.is_cancellable() {
            return Err(DripError::InvalidStateTransition {
                from: attempt.state.to_string(),
                to: AttemptState::Idle.to_string(),
            }
            .into());
        }

        info!("Attempt {} cancelled in {}", attempt.id, attempt.state);
        attempt.state = AttemptState::Idle;
        attempt.cancel = None;
        let _ = self.status_tx.send(StatusUpdate::cancelled(attempt.id));
        metrics::record_outcome("cancelled");

        Err(TriggerError::Cancelled)
    }

    async fn fail(
        &self,
        stage: Stage,
        failure: &Failure,
        handle: Option<TransactionHandle>,
    ) -> Result<Outcome, TriggerError> {
        let error = self.translator.translate(stage, failure);
        warn!("Attempt failed during {}: {}", stage, error.kind);
        self.finish(Outcome::Failed { error, handle }).await
    }

    async fn finish(&self, outcome: Outcome) -> Result<Outcome, TriggerError> {
        self.transition(AttemptState::Terminal(outcome.clone()))?;

        if let Some(handle) = outcome.handle() {
            let status = match &outcome {
                Outcome::Succeeded { .. } => RecentStatus::Confirmed,
                Outcome::Failed { error, .. } if error.kind.is_ambiguous() => RecentStatus::Unknown,
                Outcome::Failed { .. } => RecentStatus::Failed,
            };
            self.recent.update(handle.hash, status).await;
        }

        match &outcome {
            Outcome::Succeeded {
                handle,
                block_number,
            } => info!("Faucet drip {:?} confirmed in block {}", handle.hash, block_number),
            Outcome::Failed { error, .. } => info!("Attempt ended: {}", error),
        }
        metrics::record_outcome(outcome.label());

        Ok(outcome)
    }
}

impl TransactionOrchestrator {
    /// Settle an attempt whose `trigger` future went away before finishing
    fn release(&self, attempt_id: Uuid) {
        let mut attempt = self.lock_attempt();
        if attempt.id != attempt_id {
            return;
        }

        let handle = match &attempt.state {
            state if state.is_cancellable() => None,
            AttemptState::Submitted(handle) | AttemptState::Confirming(handle) => {
                Some(handle.clone())
            }
            _ => return,
        };

        warn!(
            "Attempt {} dropped by its caller while {}",
            attempt.id, attempt.state
        );

        let Some(handle) = handle else {
            attempt.state = AttemptState::Idle;
            attempt.cancel = None;
            let _ = self.status_tx.send(StatusUpdate::cancelled(attempt.id));
            metrics::record_outcome("cancelled");
            return;
        };

        if matches!(attempt.state, AttemptState::Submitted(_)) {
            let confirming = AttemptState::Confirming(handle.clone());
            if let Err(e) = self.enter(&mut attempt, confirming) {
                warn!("Release of attempt {} failed: {}", attempt_id, e);
                return;
            }
        }

        let outcome = Outcome::Failed {
            error: self.translator.translate(Stage::Confirmation, &Failure::Timeout),
            handle: Some(handle.clone()),
        };
        let label = outcome.label();
        if let Err(e) = self.enter(&mut attempt, AttemptState::Terminal(outcome)) {
            warn!("Release of attempt {} failed: {}", attempt_id, e);
            return;
        }
        drop(attempt);

        self.recent.try_update(handle.hash, RecentStatus::Unknown);
        metrics::record_outcome(label);
    }
}

/// Releases the attempt if the `trigger` future is dropped early. A no-op
/// once the attempt reached a terminal state or Idle.
struct ReleaseOnDrop<'a> {
    orchestrator: &'a TransactionOrchestrator,
    attempt_id: Uuid,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.orchestrator.release(self.attempt_id);
    }
}

/// Run `stage` unless cancellation is signalled first
async fn cancellable<F: Future>(stage: F, cancel_rx: &mut watch::Receiver<bool>) -> Option<F::Output> {
    if *cancel_rx.borrow_and_update() {
        return None;
    }

    tokio::select! {
        biased;
        output = stage => Some(output),
        _ = cancelled(cancel_rx) => None,
    }
}

async fn cancelled(cancel_rx: &mut watch::Receiver<bool>) {
    loop {
        if cancel_rx.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
        if *cancel_rx.borrow_and_update() {
            return;
        }
    }
}
