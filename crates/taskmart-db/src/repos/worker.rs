//! Worker repository

use sqlx::PgPool;
use uuid::Uuid;

use taskmart_types::{normalize_skill, Worker};

use crate::{DbResult, DbWorker};

pub struct WorkerRepo {
    pool: PgPool,
}

impl WorkerRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, worker: &Worker) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workers (id, name, skills, available, rating, completed_jobs, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                skills = EXCLUDED.skills,
                available = EXCLUDED.available,
                rating = EXCLUDED.rating,
                completed_jobs = EXCLUDED.completed_jobs
            "#,
        )
        .bind(worker.id.0)
        .bind(&worker.name)
        .bind(&worker.skills)
        .bind(worker.available)
        .bind(worker.rating)
        .bind(worker.completed_jobs)
        .bind(worker.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> DbResult<Option<DbWorker>> {
        let worker = sqlx::query_as::<_, DbWorker>("SELECT * FROM workers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(worker)
    }

    pub async fn find_available_by_skill(&self, skill: &str) -> DbResult<Option<DbWorker>> {
        let worker = sqlx::query_as::<_, DbWorker>(
            r#"
            SELECT * FROM workers
            WHERE available AND $1 = ANY(skills)
            ORDER BY rating DESC, completed_jobs DESC, created_at
            LIMIT 1
            "#,
        )
        .bind(normalize_skill(skill))
        .fetch_optional(&self.pool)
        .await?;
        Ok(worker)
    }

    pub async fn find_top_rated_available(&self) -> DbResult<Option<DbWorker>> {
        let worker = sqlx::query_as::<_, DbWorker>(
            r#"
            SELECT * FROM workers
            WHERE available
            ORDER BY rating DESC, completed_jobs DESC, created_at
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(worker)
    }
}
