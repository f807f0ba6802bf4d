//! Delivery repository

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::map_unique;
use crate::{DbDelivery, DbResult};

pub struct DeliveryRepo {
    pool: PgPool,
}

impl DeliveryRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert with the next version for the job. Concurrent writers for the
    /// same job collide on `(job_id, version)` and surface as `Duplicate`.
    pub async fn create(&self, job_id: Uuid, content: &str) -> DbResult<DbDelivery> {
        let delivery = sqlx::query_as::<_, DbDelivery>(
            r#"
            INSERT INTO deliveries (id, job_id, content, version, created_at)
            SELECT $1, $2, $3, COALESCE(MAX(version), 0) + 1, $4
            FROM deliveries WHERE job_id = $2
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(content)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique(e, format!("delivery for job {}", job_id)))?;
        Ok(delivery)
    }

    pub async fn latest_for_job(&self, job_id: Uuid) -> DbResult<Option<DbDelivery>> {
        let delivery = sqlx::query_as::<_, DbDelivery>(
            "SELECT * FROM deliveries WHERE job_id = $1 ORDER BY version DESC LIMIT 1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(delivery)
    }
}
