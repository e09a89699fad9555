use crate::ledger::models::{PayoutRecord, PayoutStatus, WorkerAccount};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterWorkerRequest {
    /// Base58 ed25519 public key on the ledger network.
    #[validate(length(min = 32, max = 44))]
    pub wallet_address: String,
}

#[derive(Debug, Serialize)]
pub struct WorkerResponse {
    pub worker_id: Uuid,
    pub wallet_address: String,
    pub created_at: DateTime<Utc>,
}

impl From<WorkerAccount> for WorkerResponse {
    fn from(account: WorkerAccount) -> Self {
        Self {
            worker_id: account.id,
            wallet_address: account.wallet_address,
            created_at: account.created_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreditRequest {
    #[validate(range(min = 1))]
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub worker_id: Uuid,
    pub pending_amount: i64,
    pub locked_amount: i64,
}

impl From<WorkerAccount> for BalanceResponse {
    fn from(account: WorkerAccount) -> Self {
        Self {
            worker_id: account.id,
            pending_amount: account.pending_amount,
            locked_amount: account.locked_amount,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub worker_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct WithdrawResponse {
    pub job_id: Uuid,
    pub worker_id: Uuid,
    /// Credits moved from pending into locked by this request.
    pub amount_locked: i64,
    pub locked_total: i64,
}

#[derive(Debug, Serialize)]
pub struct PayoutRecordResponse {
    pub id: Uuid,
    pub amount: i64,
    pub status: PayoutStatus,
    pub tx_signature: Option<String>,
    pub failure_reason: Option<String>,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<PayoutRecord> for PayoutRecordResponse {
    fn from(record: PayoutRecord) -> Self {
        Self {
            id: record.id,
            amount: record.amount,
            status: record.status,
            tx_signature: record.tx_signature,
            failure_reason: record.failure_reason,
            unlocked_at: record.unlocked_at,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct UnlockRequest {
    /// Required for records whose submission outcome is unknown.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct UnlockResponse {
    pub record_id: Uuid,
    pub worker_id: Uuid,
    pub amount_returned: i64,
}

#[derive(Debug, Serialize)]
pub struct CustodialBalanceResponse {
    pub address: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance_sol: rust_decimal::Decimal,
}
