//! Escalation repository

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::map_unique;
use crate::{DbError, DbEscalation, DbResult};

pub struct EscalationRepo {
    pool: PgPool,
}

impl EscalationRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn open(&self, job_id: Uuid, attempts: i32, reason: &str) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO job_escalations (job_id, attempts, reason) VALUES ($1, $2, $3)",
        )
        .bind(job_id)
        .bind(attempts)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, format!("open escalation for job {}", job_id)))?;
        Ok(())
    }

    pub async fn list_open(&self) -> DbResult<Vec<DbEscalation>> {
        let rows = sqlx::query_as::<_, DbEscalation>(
            "SELECT * FROM job_escalations WHERE resolved_at IS NULL ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn resolve(&self, job_id: Uuid) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE job_escalations SET resolved_at = NOW() WHERE job_id = $1 AND resolved_at IS NULL",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("open escalation for job {}", job_id)));
        }
        Ok(())
    }
}
