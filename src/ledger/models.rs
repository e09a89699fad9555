use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use uuid::Uuid;

/// Payout record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "payout_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Success,
    Failed,
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Success => "success",
            PayoutStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Settlement job status (queue-internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

/// Crowdsourced worker account.
///
/// Amounts are integer credits, the smallest internal unit. Both fields are
/// kept non-negative by CHECK constraints and conditional updates; the sum
/// of credits minus successful payouts always equals pending + locked.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkerAccount {
    pub id: Uuid,
    /// Registered ledger address (base58 public key).
    pub wallet_address: String,
    pub pending_amount: i64,
    pub locked_amount: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of one settlement attempt.
///
/// `id` is the settlement job id, which makes it the idempotency key for
/// finalization: redelivered jobs find the record already filled in.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PayoutRecord {
    pub id: Uuid,
    pub worker_id: Uuid,
    pub amount: i64,
    pub status: PayoutStatus,
    pub tx_signature: Option<String>,
    pub failure_reason: Option<String>,
    /// Set once if the locked amount was returned to pending after a failure.
    pub unlocked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A claimed settlement job, as handed to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SettlementJob {
    pub id: Uuid,
    pub worker_id: Uuid,
    pub amount: i64,
    pub status: JobStatus,
    pub attempts: i32,
    /// Transaction signature recorded after signing, before broadcast.
    pub expected_signature: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SettlementJob {
    /// A redelivered job is one that has been claimed before.
    pub fn is_redelivery(&self) -> bool {
        self.attempts > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redelivery_is_second_claim() {
        let mut job = SettlementJob {
            id: Uuid::new_v4(),
            worker_id: Uuid::new_v4(),
            amount: 5_000,
            status: JobStatus::Running,
            attempts: 1,
            expected_signature: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(!job.is_redelivery());
        job.attempts = 2;
        assert!(job.is_redelivery());
    }
}
