//! Escrow record repository
//!
//! One row per job reference key. The primary key makes a second create for
//! the same key impossible even across processes.

use sqlx::PgPool;

use taskmart_types::EscrowRecord;

use crate::{DbError, DbEscrowRecord, DbResult};

pub struct EscrowRepo {
    pool: PgPool,
}

impl EscrowRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, reference_key: &str) -> DbResult<Option<DbEscrowRecord>> {
        let record = sqlx::query_as::<_, DbEscrowRecord>(
            "SELECT * FROM escrow_records WHERE reference_key = $1",
        )
        .bind(reference_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn list_unrefunded_cancelled(&self, limit: i64) -> DbResult<Vec<DbEscrowRecord>> {
        let records = sqlx::query_as::<_, DbEscrowRecord>(
            r#"
            SELECT r.* FROM escrow_records r
            JOIN jobs j ON j.id = r.job_id
            WHERE j.status = 'cancelled'
              AND r.release_tx IS NULL
              AND r.refund_tx IS NULL
              AND NOT EXISTS (
                  SELECT 1 FROM job_escalations e
                  WHERE e.job_id = j.id AND e.resolved_at IS NULL
              )
            ORDER BY r.created_at, r.reference_key
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn insert(&self, record: &EscrowRecord) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO escrow_records
                (reference_key, job_id, escrow_object_id, create_tx, amount, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (reference_key) DO NOTHING
            "#,
        )
        .bind(&record.reference_key)
        .bind(record.job_id.0)
        .bind(&record.escrow_object_id)
        .bind(&record.create_tx)
        .bind(record.amount)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::Duplicate(format!(
                "escrow for reference {}",
                record.reference_key
            )));
        }
        Ok(())
    }

    pub async fn record_release(&self, reference_key: &str, release_tx: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE escrow_records SET release_tx = $2, settled_at = NOW()
            WHERE reference_key = $1 AND release_tx IS NULL AND refund_tx IS NULL
            "#,
        )
        .bind(reference_key)
        .bind(release_tx)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        self.already_settled(reference_key, |r| r.release_tx.as_deref() == Some(release_tx))
            .await
    }

    pub async fn record_refund(&self, reference_key: &str, refund_tx: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE escrow_records SET refund_tx = $2, settled_at = NOW()
            WHERE reference_key = $1 AND release_tx IS NULL AND refund_tx IS NULL
            "#,
        )
        .bind(reference_key)
        .bind(refund_tx)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        self.already_settled(reference_key, |r| r.refund_tx.as_deref() == Some(refund_tx))
            .await
    }

    /// A settle write matched nothing: Ok if it was the same settlement
    async fn already_settled(
        &self,
        reference_key: &str,
        same: impl FnOnce(&DbEscrowRecord) -> bool,
    ) -> DbResult<()> {
        match self.find(reference_key).await? {
            None => Err(DbError::NotFound(format!(
                "escrow for reference {}",
                reference_key
            ))),
            Some(existing) if same(&existing) => Ok(()),
            Some(_) => Err(DbError::Duplicate(format!(
                "escrow for reference {} already settled",
                reference_key
            ))),
        }
    }
}
