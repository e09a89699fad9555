use crate::error::AppResult;
use crate::ledger::models::SettlementJob;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Durable settlement queue, backed by the same Postgres instance as the
/// balance ledger so enqueue commits atomically with the balance lock.
///
/// Delivery is at least once: a claimed job whose consumer dies is
/// redelivered after the visibility timeout, and the pipeline is expected
/// to tolerate replays. At most one job per worker account is ever running,
/// enforced by the claim query itself.
pub struct SettlementQueue {
    pub pool: PgPool,
}

impl SettlementQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue inside the caller's transaction, so the job becomes visible
    /// exactly when the lock that funds it commits.
    pub async fn enqueue(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        worker_id: Uuid,
        amount: i64,
    ) -> AppResult<Uuid> {
        let (job_id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO settlement_jobs (worker_id, amount)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(worker_id)
        .bind(amount)
        .fetch_one(&mut **tx)
        .await?;

        info!(%worker_id, %job_id, amount, "settlement job enqueued");
        Ok(job_id)
    }

    /// Claim the oldest deliverable job.
    ///
    /// `FOR UPDATE SKIP LOCKED` lets concurrent consumers claim without
    /// contending. Per-worker exclusivity cannot rest on the candidate
    /// filter alone: two single-statement claims for distinct queued jobs
    /// of one worker each snapshot the other job as still queued. The claim
    /// therefore takes a per-worker advisory lock, held to commit, and
    /// re-checks for a live running job under it. Running jobs past the
    /// visibility timeout count as abandoned and are claimed again.
    pub async fn claim(
        &self,
        consumer: &str,
        visibility: Duration,
    ) -> AppResult<Option<SettlementJob>> {
        let visibility_secs = visibility.as_secs_f64();
        let mut tx = self.pool.begin().await?;

        // Candidate filter only; the exclusivity guarantee is below.
        let candidate: Option<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            SELECT j.id, j.worker_id FROM settlement_jobs j
            WHERE (j.status = 'queued'
                   OR (j.status = 'running'
                       AND j.locked_at < NOW() - make_interval(secs => $1)))
              AND NOT EXISTS (
                  SELECT 1 FROM settlement_jobs r
                  WHERE r.worker_id = j.worker_id
                    AND r.id <> j.id
                    AND r.status = 'running'
                    AND r.locked_at >= NOW() - make_interval(secs => $1)
              )
            ORDER BY j.created_at
            FOR UPDATE OF j SKIP LOCKED
            LIMIT 1
            "#,
        )
        .bind(visibility_secs)
        .fetch_optional(&mut *tx)
        .await?;

        let (job_id, worker_id) = match candidate {
            Some(pair) => pair,
            None => return Ok(None),
        };

        // Serializes concurrent claims for one worker account; a racing
        // claim blocks here until this transaction commits, then re-checks
        // against the committed running job.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(worker_id.to_string())
            .execute(&mut *tx)
            .await?;

        let (has_live_job,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM settlement_jobs
                WHERE worker_id = $1
                  AND id <> $2
                  AND status = 'running'
                  AND locked_at >= NOW() - make_interval(secs => $3)
            )
            "#,
        )
        .bind(worker_id)
        .bind(job_id)
        .bind(visibility_secs)
        .fetch_one(&mut *tx)
        .await?;

        if has_live_job {
            tx.rollback().await?;
            return Ok(None);
        }

        let job = sqlx::query_as::<_, SettlementJob>(
            r#"
            UPDATE settlement_jobs
            SET status = 'running', locked_by = $2, locked_at = NOW(),
                attempts = attempts + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING id, worker_id, amount, status, attempts, expected_signature,
                      created_at, updated_at
            "#,
        )
        .bind(job_id)
        .bind(consumer)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(job))
    }

    /// Journal the locally signed transaction signature before broadcast.
    /// A redelivered job checks the chain for it instead of double paying.
    ///
    /// First writer wins: once a signature is journaled for a job it is
    /// never overwritten, so two racing attempts can never both broadcast
    /// their own transaction. Returns whether this attempt owns the journal
    /// entry; a `false` means another attempt got there first and this one
    /// must not broadcast.
    pub async fn record_expected_signature(
        &self,
        job_id: Uuid,
        signature: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE settlement_jobs
            SET expected_signature = $2, updated_at = NOW()
            WHERE id = $1
              AND (expected_signature IS NULL OR expected_signature = $2)
            "#,
        )
        .bind(job_id)
        .bind(signature)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn complete(&self, job_id: Uuid) -> AppResult<()> {
        self.set_status(job_id, "done").await
    }

    pub async fn fail(&self, job_id: Uuid) -> AppResult<()> {
        self.set_status(job_id, "failed").await
    }

    /// Return an unprocessed job to the queue (shutdown before submission).
    pub async fn release(&self, job_id: Uuid) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE settlement_jobs
            SET status = 'queued', locked_by = NULL, locked_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_status(&self, job_id: Uuid, status: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE settlement_jobs
            SET status = $2::job_status, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    async fn test_pool() -> Option<PgPool> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await
            .ok()?;
        sqlx::migrate!("./migrations").run(&pool).await.ok()?;
        Some(pool)
    }

    #[tokio::test]
    #[ignore] // needs a live Postgres via DATABASE_URL
    async fn concurrent_claims_for_one_worker_run_a_single_job() {
        let pool = match test_pool().await {
            Some(pool) => pool,
            None => return,
        };
        let queue = SettlementQueue::new(pool.clone());

        let (worker_id,): (Uuid,) = sqlx::query_as(
            "INSERT INTO worker_accounts (wallet_address) VALUES ($1) RETURNING id",
        )
        .bind(format!("claim-race-{}", Uuid::new_v4()))
        .fetch_one(&pool)
        .await
        .unwrap();

        let mut tx = pool.begin().await.unwrap();
        queue.enqueue(&mut tx, worker_id, 1_000).await.unwrap();
        queue.enqueue(&mut tx, worker_id, 2_000).await.unwrap();
        tx.commit().await.unwrap();

        let visibility = Duration::from_secs(300);
        let (a, b) = tokio::join!(
            queue.claim("consumer-a", visibility),
            queue.claim("consumer-b", visibility),
        );

        let claimed = [a.unwrap(), b.unwrap()]
            .into_iter()
            .flatten()
            .filter(|job| job.worker_id == worker_id)
            .count();
        assert!(claimed <= 1, "both queued jobs claimed for one worker");

        let (running,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM settlement_jobs WHERE worker_id = $1 AND status = 'running'",
        )
        .bind(worker_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(running <= 1);
    }

    #[tokio::test]
    #[ignore] // needs a live Postgres via DATABASE_URL
    async fn journaled_signature_is_never_overwritten() {
        let pool = match test_pool().await {
            Some(pool) => pool,
            None => return,
        };
        let queue = SettlementQueue::new(pool.clone());

        let (worker_id,): (Uuid,) = sqlx::query_as(
            "INSERT INTO worker_accounts (wallet_address) VALUES ($1) RETURNING id",
        )
        .bind(format!("journal-{}", Uuid::new_v4()))
        .fetch_one(&pool)
        .await
        .unwrap();

        let mut tx = pool.begin().await.unwrap();
        let job_id = queue.enqueue(&mut tx, worker_id, 1_000).await.unwrap();
        tx.commit().await.unwrap();

        assert!(queue.record_expected_signature(job_id, "SIG-A").await.unwrap());
        // replay with the same signature is fine, a different one is not
        assert!(queue.record_expected_signature(job_id, "SIG-A").await.unwrap());
        assert!(!queue.record_expected_signature(job_id, "SIG-B").await.unwrap());

        let (journaled,): (Option<String>,) = sqlx::query_as(
            "SELECT expected_signature FROM settlement_jobs WHERE id = $1",
        )
        .bind(job_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(journaled.as_deref(), Some("SIG-A"));
    }
}
