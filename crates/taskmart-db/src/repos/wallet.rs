//! Wallet address repository

use sqlx::PgPool;
use uuid::Uuid;

use crate::DbResult;

pub struct WalletRepo {
    pool: PgPool,
}

impl WalletRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn address_of(&self, owner: Uuid) -> DbResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT address FROM wallets WHERE owner_id = $1")
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(address,)| address))
    }

    pub async fn set_address(&self, owner: Uuid, address: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO wallets (owner_id, address) VALUES ($1, $2)
            ON CONFLICT (owner_id) DO UPDATE SET address = EXCLUDED.address, updated_at = NOW()
            "#,
        )
        .bind(owner)
        .bind(address)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
