//! User request repository

use sqlx::PgPool;
use uuid::Uuid;

use taskmart_types::{MarketError, RequestStatus, UserRequest};

use crate::{DbResult, DbUserRequest};

pub struct RequestRepo {
    pool: PgPool,
}

impl RequestRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, request: &UserRequest) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_requests (id, submitter_id, description, status, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(request.id.0)
        .bind(request.submitter_id.0)
        .bind(&request.description)
        .bind(request.status.as_str())
        .bind(request.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| crate::error::map_unique(e, format!("request {}", request.id)))?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> DbResult<Option<DbUserRequest>> {
        let request = sqlx::query_as::<_, DbUserRequest>("SELECT * FROM user_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(request)
    }

    pub async fn list_pending(&self, limit: i64) -> DbResult<Vec<DbUserRequest>> {
        let requests = sqlx::query_as::<_, DbUserRequest>(
            "SELECT * FROM user_requests WHERE status = 'pending' ORDER BY created_at, id LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(requests)
    }

    pub async fn mark_failed(&self, id: Uuid, note: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE user_requests
            SET status = 'failed', error_note = $2, processed_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(note)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.conflict_for(id).await?.into());
        }
        Ok(())
    }

    /// Explain why a `WHERE status = 'pending'` write matched nothing
    pub(crate) async fn conflict_for(&self, id: Uuid) -> DbResult<MarketError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM user_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            None => MarketError::RequestNotFound { request_id: id.into() },
            Some((status,)) => MarketError::RequestConflict {
                request_id: id.into(),
                actual: status.parse().unwrap_or(RequestStatus::Failed),
            },
        })
    }
}
