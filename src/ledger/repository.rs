use super::models::*;
use crate::error::{AppError, AppResult, PayoutError, OUTCOME_UNKNOWN_PREFIX};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

/// Balance ledger - THE source of truth for worker funds and payout history
pub struct LedgerRepository {
    pub pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin_tx(&self) -> AppResult<Transaction<'_, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    // ========== WORKER OPERATIONS ==========

    pub async fn create_worker(&self, wallet_address: &str) -> AppResult<WorkerAccount> {
        let account = sqlx::query_as::<_, WorkerAccount>(
            r#"
            INSERT INTO worker_accounts (wallet_address)
            VALUES ($1)
            RETURNING id, wallet_address, pending_amount, locked_amount, created_at, updated_at
            "#,
        )
        .bind(wallet_address)
        .fetch_one(&self.pool)
        .await?;

        Ok(account)
    }

    pub async fn get_account(&self, worker_id: Uuid) -> AppResult<WorkerAccount> {
        let account = sqlx::query_as::<_, WorkerAccount>(
            r#"
            SELECT id, wallet_address, pending_amount, locked_amount, created_at, updated_at
            FROM worker_accounts
            WHERE id = $1
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        account.ok_or_else(|| PayoutError::WorkerNotFound(worker_id).into())
    }

    /// Task-submission collaborator interface: accrue earnings as pending.
    pub async fn credit_pending(&self, worker_id: Uuid, amount: i64) -> AppResult<WorkerAccount> {
        let account = sqlx::query_as::<_, WorkerAccount>(
            r#"
            UPDATE worker_accounts
            SET pending_amount = pending_amount + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, wallet_address, pending_amount, locked_amount, created_at, updated_at
            "#,
        )
        .bind(worker_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;

        account.ok_or_else(|| PayoutError::WorkerNotFound(worker_id).into())
    }

    // ========== LOCK / FINALIZE ==========

    /// Atomically move the full pending balance into `locked_amount`.
    ///
    /// Runs in the caller's transaction so the settlement job enqueue
    /// commits together with the lock. The row lock taken by `FOR UPDATE`
    /// serializes concurrent lock attempts for one worker: the loser
    /// re-reads a zeroed pending balance and fails the threshold check, so
    /// the same funds can never be locked twice.
    pub async fn lock(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        worker_id: Uuid,
        minimum: i64,
    ) -> AppResult<(i64, i64)> {
        let pending: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT pending_amount FROM worker_accounts
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&mut **tx)
        .await?;

        let pending = match pending {
            Some((p,)) => p,
            None => return Err(PayoutError::WorkerNotFound(worker_id).into()),
        };

        if pending < minimum {
            return Err(PayoutError::InsufficientBalance {
                available: pending,
                minimum,
            }
            .into());
        }

        let (locked_total,): (i64,) = sqlx::query_as(
            r#"
            UPDATE worker_accounts
            SET locked_amount = locked_amount + pending_amount,
                pending_amount = 0,
                updated_at = NOW()
            WHERE id = $1
            RETURNING locked_amount
            "#,
        )
        .bind(worker_id)
        .fetch_one(&mut **tx)
        .await?;

        info!(%worker_id, amount = pending, "locked pending balance for settlement");
        Ok((pending, locked_total))
    }

    /// Insert the pending record for a settlement attempt.
    ///
    /// Keyed by the job id; a redelivered job hits the conflict and reuses
    /// the existing record.
    pub async fn create_pending_record(
        &self,
        record_id: Uuid,
        worker_id: Uuid,
        amount: i64,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payout_records (id, worker_id, amount, status)
            VALUES ($1, $2, $3, 'pending')
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record_id)
        .bind(worker_id)
        .bind(amount)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fill in a successful settlement and release the locked amount.
    ///
    /// Idempotent per record and per signature: the status fill-in is guarded
    /// by `status = 'pending'`, and only when it takes effect is the locked
    /// amount decremented. Returns whether this call applied the finalize.
    pub async fn finalize_success(
        &self,
        record_id: Uuid,
        worker_id: Uuid,
        amount: i64,
        signature: &str,
    ) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;

        let filled = sqlx::query(
            r#"
            UPDATE payout_records
            SET status = 'success', tx_signature = $2
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(record_id)
        .bind(signature)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from_db)?;

        if filled.rows_affected() == 0 {
            // Already finalized by an earlier delivery; leave the ledger alone.
            tx.rollback().await?;
            return Ok(false);
        }

        let released = sqlx::query(
            r#"
            UPDATE worker_accounts
            SET locked_amount = locked_amount - $2, updated_at = NOW()
            WHERE id = $1 AND locked_amount >= $2
            "#,
        )
        .bind(worker_id)
        .bind(amount)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from_db)?;

        if released.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(AppError::Internal(format!(
                "locked balance of worker {} below settled amount {}",
                worker_id, amount
            )));
        }

        tx.commit().await.map_err(AppError::from_db)?;
        info!(%worker_id, %record_id, signature, "payout finalized");
        Ok(true)
    }

    /// Record a failed settlement attempt for audit.
    ///
    /// Funds stay locked; recovery goes through `unlock_failed_payout`.
    pub async fn finalize_failure(
        &self,
        record_id: Uuid,
        worker_id: Uuid,
        reason: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payout_records
            SET status = 'failed', failure_reason = $2
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(record_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() > 0;
        if applied {
            info!(%worker_id, %record_id, reason, "payout recorded as failed, funds remain locked");
        }
        Ok(applied)
    }

    /// Compensating transition: return a failed payout's amount to pending.
    ///
    /// Applied at most once per record. Records whose failure reason marks
    /// the submission outcome as unknown are refused unless `force` is set,
    /// so a successful-but-unrecorded transfer is never silently refunded.
    pub async fn unlock_failed_payout(
        &self,
        record_id: Uuid,
        force: bool,
    ) -> AppResult<PayoutRecord> {
        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, PayoutRecord>(
            r#"
            SELECT id, worker_id, amount, status, tx_signature, failure_reason,
                   unlocked_at, created_at
            FROM payout_records
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(record_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(PayoutError::RecordNotFound(record_id))?;

        if record.status != PayoutStatus::Failed {
            return Err(PayoutError::UnlockNotPermitted(format!(
                "record is {}, only failed payouts can be unlocked",
                record.status
            ))
            .into());
        }
        if record.unlocked_at.is_some() {
            return Err(
                PayoutError::UnlockNotPermitted("record already unlocked".to_string()).into(),
            );
        }
        let ambiguous = record
            .failure_reason
            .as_deref()
            .map(|r| r.starts_with(OUTCOME_UNKNOWN_PREFIX))
            .unwrap_or(false);
        if ambiguous && !force {
            return Err(PayoutError::UnlockNotPermitted(
                "submission outcome unknown; verify on chain and retry with force".to_string(),
            )
            .into());
        }

        sqlx::query(
            r#"
            UPDATE payout_records
            SET unlocked_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(record_id)
        .execute(&mut *tx)
        .await?;

        let returned = sqlx::query(
            r#"
            UPDATE worker_accounts
            SET locked_amount = locked_amount - $2,
                pending_amount = pending_amount + $2,
                updated_at = NOW()
            WHERE id = $1 AND locked_amount >= $2
            "#,
        )
        .bind(record.worker_id)
        .bind(record.amount)
        .execute(&mut *tx)
        .await?;

        if returned.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(AppError::Internal(format!(
                "locked balance of worker {} below unlock amount {}",
                record.worker_id, record.amount
            )));
        }

        tx.commit().await?;
        info!(worker_id = %record.worker_id, %record_id, amount = record.amount,
            "failed payout unlocked back to pending");
        Ok(record)
    }

    // ========== READ INTERFACES ==========

    pub async fn payout_history(&self, worker_id: Uuid) -> AppResult<Vec<PayoutRecord>> {
        let records = sqlx::query_as::<_, PayoutRecord>(
            r#"
            SELECT id, worker_id, amount, status, tx_signature, failure_reason,
                   unlocked_at, created_at
            FROM payout_records
            WHERE worker_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn get_payout_record(&self, record_id: Uuid) -> AppResult<PayoutRecord> {
        let record = sqlx::query_as::<_, PayoutRecord>(
            r#"
            SELECT id, worker_id, amount, status, tx_signature, failure_reason,
                   unlocked_at, created_at
            FROM payout_records
            WHERE id = $1
            "#,
        )
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;

        record.ok_or_else(|| PayoutError::RecordNotFound(record_id).into())
    }
}
