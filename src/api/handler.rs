use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::models::*;
use crate::{
    error::{AppError, AppResult},
    execution::solana::SolanaSubmitter,
    ledger::LedgerRepository,
    settlement::SettlementQueue,
};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerRepository>,
    pub queue: Arc<SettlementQueue>,
    pub submitter: Arc<SolanaSubmitter>,
    /// Minimum pending balance required to lock a withdrawal, in credits.
    pub min_withdrawal_credits: i64,
    /// Custodial public key, for the admin balance read. The signing key
    /// itself only ever exists as distributed shares.
    pub custodial_address: Option<String>,
}

/// GET /health
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /api/v1/workers
pub async fn register_worker(
    State(state): State<AppState>,
    Json(request): Json<RegisterWorkerRequest>,
) -> AppResult<Json<WorkerResponse>> {
    request.validate()?;

    let account = state.ledger.create_worker(&request.wallet_address).await?;
    info!(worker_id = %account.id, "worker registered");
    Ok(Json(WorkerResponse::from(account)))
}

/// POST /api/v1/workers/:id/credit
///
/// Task-submission collaborator interface: accrues review earnings into the
/// worker's pending balance.
pub async fn credit_earnings(
    State(state): State<AppState>,
    Path(worker_id): Path<Uuid>,
    Json(request): Json<CreditRequest>,
) -> AppResult<Json<BalanceResponse>> {
    request.validate()?;

    let account = state.ledger.credit_pending(worker_id, request.amount).await?;
    Ok(Json(BalanceResponse::from(account)))
}

/// GET /api/v1/workers/:id/balance
pub async fn get_balance(
    State(state): State<AppState>,
    Path(worker_id): Path<Uuid>,
) -> AppResult<Json<BalanceResponse>> {
    let account = state.ledger.get_account(worker_id).await?;
    Ok(Json(BalanceResponse::from(account)))
}

/// GET /api/v1/workers/:id/payouts
pub async fn get_payout_history(
    State(state): State<AppState>,
    Path(worker_id): Path<Uuid>,
) -> AppResult<Json<Vec<PayoutRecordResponse>>> {
    // 404 for unknown workers rather than an empty history
    state.ledger.get_account(worker_id).await?;

    let records = state.ledger.payout_history(worker_id).await?;
    Ok(Json(records.into_iter().map(Into::into).collect()))
}

/// POST /api/v1/payouts/withdraw
///
/// Locks the full pending balance and enqueues a settlement job, both in
/// one transaction. The response only acknowledges the lock; settlement
/// runs asynchronously and its outcome surfaces through payout history.
pub async fn request_withdrawal(
    State(state): State<AppState>,
    Json(request): Json<WithdrawRequest>,
) -> AppResult<Json<WithdrawResponse>> {
    let mut tx = state.ledger.begin_tx().await?;

    let (amount_locked, locked_total) = state
        .ledger
        .lock(&mut tx, request.worker_id, state.min_withdrawal_credits)
        .await?;

    let job_id = state
        .queue
        .enqueue(&mut tx, request.worker_id, amount_locked)
        .await?;

    tx.commit().await?;

    info!(worker_id = %request.worker_id, %job_id, amount_locked, "withdrawal accepted");

    Ok(Json(WithdrawResponse {
        job_id,
        worker_id: request.worker_id,
        amount_locked,
        locked_total,
    }))
}

/// POST /api/v1/admin/payouts/:record_id/unlock
///
/// Compensating transition for failed settlements: returns the locked
/// amount to pending. Ambiguous failures require `force` after an operator
/// has verified on chain that no transfer landed.
pub async fn unlock_failed_payout(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
    Json(request): Json<UnlockRequest>,
) -> AppResult<Json<UnlockResponse>> {
    let record = state
        .ledger
        .unlock_failed_payout(record_id, request.force)
        .await?;

    Ok(Json(UnlockResponse {
        record_id: record.id,
        worker_id: record.worker_id,
        amount_returned: record.amount,
    }))
}

/// GET /api/v1/admin/custodial/balance
pub async fn get_custodial_balance(
    State(state): State<AppState>,
) -> AppResult<Json<CustodialBalanceResponse>> {
    let address = state
        .custodial_address
        .clone()
        .ok_or_else(|| AppError::Config("CUSTODIAL_ADDRESS not configured".to_string()))?;

    let balance_sol = state.submitter.account_balance_sol(&address).await?;

    Ok(Json(CustodialBalanceResponse {
        address,
        balance_sol,
    }))
}
