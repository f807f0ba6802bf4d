//! Job repository

use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use taskmart_types::{Job, JobStatus, JobTransition, MarketError};

use crate::error::map_unique;
use crate::{DbError, DbJob, DbResult, RequestRepo};

pub struct JobRepo {
    pool: PgPool,
}

impl JobRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, job: &Job) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        insert(&mut tx, job).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Insert a job and mark its source request processed in one transaction
    pub async fn create_for_request(&self, job: &Job) -> DbResult<()> {
        let request_id = job.request_id.ok_or_else(|| MarketError::Validation {
            reason: format!("job {} has no source request", job.id),
        })?;

        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE user_requests
            SET status = 'processed', job_id = $2, processed_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(request_id.0)
        .bind(job.id.0)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            let conflict = RequestRepo::new(self.pool.clone())
                .conflict_for(request_id.0)
                .await?;
            return Err(conflict.into());
        }

        insert(&mut tx, job).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> DbResult<Option<DbJob>> {
        let job = sqlx::query_as::<_, DbJob>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn list_awaiting_payment(&self, limit: i64) -> DbResult<Vec<DbJob>> {
        let jobs = sqlx::query_as::<_, DbJob>(
            r#"
            SELECT j.* FROM jobs j
            WHERE j.status = 'unpaid'
              AND j.invoice_id IS NOT NULL
              AND NOT EXISTS (
                  SELECT 1 FROM job_escalations e
                  WHERE e.job_id = j.id AND e.resolved_at IS NULL
              )
            ORDER BY j.created_at, j.id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    pub async fn list_by_status(&self, status: JobStatus, limit: i64) -> DbResult<Vec<DbJob>> {
        let jobs = sqlx::query_as::<_, DbJob>(
            "SELECT * FROM jobs WHERE status = $1 ORDER BY created_at, id LIMIT $2",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    pub async fn attach_invoice(&self, id: Uuid, invoice_id: &str) -> DbResult<DbJob> {
        let updated = sqlx::query_as::<_, DbJob>(
            r#"
            UPDATE jobs SET invoice_id = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'unpaid' AND invoice_id IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_unique(e, format!("invoice {}", invoice_id)))?;

        if let Some(job) = updated {
            return Ok(job);
        }

        let current = self
            .find_by_id(id)
            .await?
            .ok_or(MarketError::JobNotFound { job_id: id.into() })?;

        if current.invoice_id.as_deref() == Some(invoice_id) {
            return Ok(current);
        }
        if current.status != JobStatus::Unpaid.as_str() {
            return Err(MarketError::StateConflict {
                job_id: id.into(),
                expected: JobStatus::Unpaid,
                actual: parse_status(&current)?,
            }
            .into());
        }
        Err(DbError::Duplicate(format!("job {} already has an invoice", id)))
    }

    /// Compare-and-set on `status`, writing the transition's references and
    /// timestamp in the same statement.
    pub async fn transition(
        &self,
        id: Uuid,
        expected: JobStatus,
        transition: &JobTransition,
    ) -> DbResult<DbJob> {
        let target = transition.check(expected)?;

        let (escrow_object_id, create_tx, release_tx) = match transition {
            JobTransition::Escrow {
                escrow_object_id,
                create_tx,
            } => (Some(escrow_object_id.as_str()), Some(create_tx.as_str()), None),
            JobTransition::PayOut { release_tx } => (None, None, Some(release_tx.as_str())),
            _ => (None, None, None),
        };

        let updated = sqlx::query_as::<_, DbJob>(
            r#"
            UPDATE jobs SET
                status = $3,
                updated_at = $4,
                escrow_object_id = COALESCE($5, escrow_object_id),
                escrow_create_tx = COALESCE($6, escrow_create_tx),
                escrow_release_tx = COALESCE($7, escrow_release_tx),
                paid_at = CASE WHEN $3 = 'escrowed' THEN $4 ELSE paid_at END,
                started_at = CASE WHEN $3 = 'working' THEN $4 ELSE started_at END,
                delivered_at = CASE WHEN $3 = 'delivered' THEN $4 ELSE delivered_at END,
                completed_at = CASE WHEN $3 = 'completed' THEN $4 ELSE completed_at END,
                paid_out_at = CASE WHEN $3 = 'paid_out' THEN $4 ELSE paid_out_at END
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(target.as_str())
        .bind(Utc::now())
        .bind(escrow_object_id)
        .bind(create_tx)
        .bind(release_tx)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(job) => Ok(job),
            None => {
                let current = self
                    .find_by_id(id)
                    .await?
                    .ok_or(MarketError::JobNotFound { job_id: id.into() })?;
                Err(MarketError::StateConflict {
                    job_id: id.into(),
                    expected,
                    actual: parse_status(&current)?,
                }
                .into())
            }
        }
    }
}

async fn insert(tx: &mut Transaction<'_, Postgres>, job: &Job) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO jobs (id, title, requirements, buyer_id, worker_id, amount, task_type, status,
            invoice_id, reference_key, request_id, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(job.id.0)
    .bind(&job.title)
    .bind(&job.requirements)
    .bind(job.buyer_id.0)
    .bind(job.worker_id.map(|w| w.0))
    .bind(job.amount)
    .bind(&job.task_type)
    .bind(job.status.as_str())
    .bind(&job.invoice_id)
    .bind(&job.reference_key)
    .bind(job.request_id.map(|r| r.0))
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_unique(e, format!("job {}", job.id)))?;
    Ok(())
}

fn parse_status(job: &DbJob) -> DbResult<JobStatus> {
    job.status
        .parse()
        .map_err(|_| DbError::InvalidData(format!("job {} status '{}'", job.id, job.status)))
}
