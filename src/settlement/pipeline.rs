use crate::custody::{derive_keypair, shamir, ShareSource};
use crate::error::{AppResult, PayoutError, OUTCOME_UNKNOWN_PREFIX};
use crate::execution::{credits_to_lamports, TransferSubmitter};
use crate::ledger::models::SettlementJob;
use crate::ledger::LedgerRepository;
use crate::settlement::queue::SettlementQueue;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Pipeline stages for one settlement job. Every failure short-circuits to
/// `Failed`; once a broadcast has gone out only `Finalized` is reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementState {
    Locked,
    SharesRequested,
    KeyReconstructed,
    Submitted,
    Finalized,
    Failed,
}

impl SettlementState {
    pub fn can_transition(from: SettlementState, to: SettlementState) -> bool {
        use SettlementState::*;
        match (from, to) {
            (Locked, SharesRequested) => true,
            (SharesRequested, KeyReconstructed) => true,
            (KeyReconstructed, Submitted) => true,
            (Submitted, Finalized) => true,
            // Failure is reachable from every step before the broadcast has
            // gone out; past Submitted the job must finalize.
            (Locked | SharesRequested | KeyReconstructed, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SettlementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SettlementState::Locked => "locked",
            SettlementState::SharesRequested => "shares_requested",
            SettlementState::KeyReconstructed => "key_reconstructed",
            SettlementState::Submitted => "submitted",
            SettlementState::Finalized => "finalized",
            SettlementState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Durable-store seam for the pipeline: payout records, the expected
/// signature journal and finalization. Tests substitute an in-memory fake.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    async fn worker_wallet(&self, worker_id: Uuid) -> AppResult<String>;
    async fn create_pending_record(
        &self,
        record_id: Uuid,
        worker_id: Uuid,
        amount: i64,
    ) -> AppResult<()>;
    /// Journal the signature, first writer wins. `false` means another
    /// attempt holds the journal entry and this one must not broadcast.
    async fn record_expected_signature(&self, job_id: Uuid, signature: &str) -> AppResult<bool>;
    async fn finalize_success(
        &self,
        record_id: Uuid,
        worker_id: Uuid,
        amount: i64,
        signature: &str,
    ) -> AppResult<bool>;
    async fn finalize_failure(
        &self,
        record_id: Uuid,
        worker_id: Uuid,
        reason: &str,
    ) -> AppResult<bool>;
}

/// Production store: balance ledger plus the job queue's signature journal.
pub struct PgSettlementStore {
    pub ledger: Arc<LedgerRepository>,
    pub queue: Arc<SettlementQueue>,
}

#[async_trait]
impl SettlementStore for PgSettlementStore {
    async fn worker_wallet(&self, worker_id: Uuid) -> AppResult<String> {
        Ok(self.ledger.get_account(worker_id).await?.wallet_address)
    }

    async fn create_pending_record(
        &self,
        record_id: Uuid,
        worker_id: Uuid,
        amount: i64,
    ) -> AppResult<()> {
        self.ledger
            .create_pending_record(record_id, worker_id, amount)
            .await
    }

    async fn record_expected_signature(&self, job_id: Uuid, signature: &str) -> AppResult<bool> {
        self.queue.record_expected_signature(job_id, signature).await
    }

    async fn finalize_success(
        &self,
        record_id: Uuid,
        worker_id: Uuid,
        amount: i64,
        signature: &str,
    ) -> AppResult<bool> {
        self.ledger
            .finalize_success(record_id, worker_id, amount, signature)
            .await
    }

    async fn finalize_failure(
        &self,
        record_id: Uuid,
        worker_id: Uuid,
        reason: &str,
    ) -> AppResult<bool> {
        self.ledger.finalize_failure(record_id, worker_id, reason).await
    }
}

/// Terminal result of one pipeline run, telling the worker what to do with
/// the queue entry.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Settled and recorded; ack the job.
    Finalized { signature: String },
    /// Recorded as failed, funds stay locked; fail the job.
    Failed { stage: SettlementState, reason: String },
    /// Shutdown before anything irreversible happened; requeue the job.
    Released,
    /// The durable store would not accept the outcome. The job stays
    /// running so the visibility timeout redelivers it; finalization is
    /// idempotent.
    Stalled,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub share_threshold: usize,
    pub lamports_per_credit: u64,
    pub finalize_retries: u32,
    pub finalize_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            share_threshold: 3,
            lamports_per_credit: 1_000,
            finalize_retries: 3,
            finalize_backoff: Duration::from_millis(100),
        }
    }
}

/// Drives one settlement job through the state machine.
///
/// All component handles are passed in at construction; the pipeline owns
/// no connections and no key material of its own.
pub struct SettlementPipeline {
    store: Arc<dyn SettlementStore>,
    shares: Arc<dyn ShareSource>,
    submitter: Arc<dyn TransferSubmitter>,
    config: PipelineConfig,
}

impl SettlementPipeline {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        shares: Arc<dyn ShareSource>,
        submitter: Arc<dyn TransferSubmitter>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            shares,
            submitter,
            config,
        }
    }

    pub async fn run(
        &self,
        job: &SettlementJob,
        shutdown: &watch::Receiver<bool>,
    ) -> PipelineOutcome {
        let mut state = SettlementState::Locked;

        if let Err(e) = self
            .store
            .create_pending_record(job.id, job.worker_id, job.amount)
            .await
        {
            error!(job_id = %job.id, error = %e, "could not create pending payout record");
            return PipelineOutcome::Stalled;
        }

        // Redelivered job: the previous attempt may have broadcast before
        // dying. Check the chain for the journaled signature first.
        if let Some(signature) = job.expected_signature.as_deref() {
            match self.submitter.signature_landed(signature).await {
                Ok(true) => {
                    info!(job_id = %job.id, signature, "prior submission found on chain");
                    return self.finalize(job, signature).await;
                }
                Ok(false) => {
                    info!(job_id = %job.id, signature, "prior submission not on chain, re-submitting");
                }
                Err(e) => {
                    // Cannot rule out a landed transfer; do not risk paying twice.
                    warn!(job_id = %job.id, signature, error = %e,
                        "could not verify prior submission, leaving job for redelivery");
                    return PipelineOutcome::Stalled;
                }
            }
        }

        let wallet = match self.store.worker_wallet(job.worker_id).await {
            Ok(wallet) => wallet,
            Err(e) => return self.fail(job, state, &e.to_string()).await,
        };

        if *shutdown.borrow() {
            return PipelineOutcome::Released;
        }

        if let Err(e) = advance(&mut state, SettlementState::SharesRequested) {
            return self.fail(job, state, &e.to_string()).await;
        }
        let shares = self.shares.collect().await;

        let secret = match shamir::combine(&shares, self.config.share_threshold) {
            Ok(secret) => secret,
            Err(e) => return self.fail(job, state, &e.to_string()).await,
        };
        drop(shares);
        let keypair = match derive_keypair(&secret) {
            Ok(keypair) => keypair,
            Err(e) => return self.fail(job, state, &e.to_string()).await,
        };
        drop(secret);
        if let Err(e) = advance(&mut state, SettlementState::KeyReconstructed) {
            return self.fail(job, state, &e.to_string()).await;
        }

        // Last clean abort point: past here a signature may reach the network.
        if *shutdown.borrow() {
            return PipelineOutcome::Released;
        }

        let lamports = match credits_to_lamports(job.amount, self.config.lamports_per_credit) {
            Ok(lamports) => lamports,
            Err(e) => return self.fail(job, state, &e.to_string()).await,
        };
        let signed = match self.submitter.sign_transfer(&keypair, &wallet, lamports).await {
            Ok(signed) => signed,
            Err(e) => return self.fail(job, state, &e.to_string()).await,
        };
        drop(keypair);

        // Journal the signature before broadcast so a crash between the two
        // can be resolved against the chain instead of guessed at.
        match self
            .store
            .record_expected_signature(job.id, &signed.signature)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                // A concurrent attempt journaled its own signature first and
                // owns the broadcast; this one must not issue a second one.
                warn!(job_id = %job.id, signature = %signed.signature,
                    "journal already holds another signature, yielding to the owning attempt");
                return PipelineOutcome::Stalled;
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "could not journal expected signature");
                return PipelineOutcome::Stalled;
            }
        }

        if let Err(e) = advance(&mut state, SettlementState::Submitted) {
            return self.fail(job, state, &e.to_string()).await;
        }

        match self.submitter.broadcast(&signed).await {
            Ok(()) => self.finalize(job, &signed.signature).await,
            Err(e) if e.outcome_unknown() => {
                // One status check before giving up: slow confirmation is common.
                match self.submitter.signature_landed(&signed.signature).await {
                    Ok(true) => {
                        info!(job_id = %job.id, signature = %signed.signature,
                            "transfer landed despite ambiguous broadcast");
                        self.finalize(job, &signed.signature).await
                    }
                    _ => {
                        let reason = format!("{}: {}", OUTCOME_UNKNOWN_PREFIX, e);
                        self.record_failure(job, SettlementState::Submitted, &reason)
                            .await
                    }
                }
            }
            Err(e) => {
                self.record_failure(job, SettlementState::Submitted, &e.to_string())
                    .await
            }
        }
    }

    /// Write the success outcome, retrying finalize contention only; the
    /// transfer itself is never reissued.
    async fn finalize(&self, job: &SettlementJob, signature: &str) -> PipelineOutcome {
        let mut attempt = 0;
        loop {
            match self
                .store
                .finalize_success(job.id, job.worker_id, job.amount, signature)
                .await
            {
                Ok(applied) => {
                    if !applied {
                        info!(job_id = %job.id, signature, "finalize replayed, ledger unchanged");
                    }
                    return PipelineOutcome::Finalized {
                        signature: signature.to_string(),
                    };
                }
                Err(e) if e.is_write_conflict() && attempt < self.config.finalize_retries => {
                    attempt += 1;
                    warn!(job_id = %job.id, attempt, "finalize write conflict, retrying");
                    tokio::time::sleep(self.config.finalize_backoff * attempt).await;
                }
                Err(e) => {
                    error!(job_id = %job.id, signature, error = %e,
                        "finalize failed after broadcast, leaving job for redelivery");
                    return PipelineOutcome::Stalled;
                }
            }
        }
    }

    async fn fail(
        &self,
        job: &SettlementJob,
        stage: SettlementState,
        reason: &str,
    ) -> PipelineOutcome {
        self.record_failure(job, stage, reason).await
    }

    async fn record_failure(
        &self,
        job: &SettlementJob,
        stage: SettlementState,
        reason: &str,
    ) -> PipelineOutcome {
        error!(job_id = %job.id, worker_id = %job.worker_id, %stage, reason,
            "settlement failed, funds remain locked");

        if let Err(e) = self
            .store
            .finalize_failure(job.id, job.worker_id, reason)
            .await
        {
            error!(job_id = %job.id, error = %e, "could not record failure outcome");
            return PipelineOutcome::Stalled;
        }

        PipelineOutcome::Failed {
            stage,
            reason: reason.to_string(),
        }
    }
}

fn advance(state: &mut SettlementState, to: SettlementState) -> Result<(), PayoutError> {
    if !SettlementState::can_transition(*state, to) {
        return Err(PayoutError::InvalidTransition {
            from: state.to_string(),
            to: to.to_string(),
        });
    }
    *state = to;
    Ok(())
}
