use chrono::NaiveDateTime;
use sqlx::{Any, Row};
use thiserror::Error;

use crate::dialect::Dialect;

const APPLIED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no rows in migrations table")]
    NoRows,

    #[error("failed to parse applied_at: {0}")]
    AppliedAt(#[from] chrono::ParseError),

    #[error("sqlx `{0}`")]
    Sqlx(#[from] sqlx::Error),
}

/// A row of the migrations ledger table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRow {
    pub id: i64,
    pub name: String,
    pub applied_at: NaiveDateTime,
}

/// Ledger CRUD over a caller-supplied connection. Dialect differences stay
/// inside [`Dialect`]; the store itself is backend-agnostic.
#[derive(Debug, Clone)]
pub struct Store {
    dialect: Dialect,
    table: String,
}

impl Store {
    pub fn new(dialect: Dialect, table: impl Into<String>) -> Self {
        Self {
            dialect,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn table_exists<'c, E>(&self, db: E) -> Result<bool, StoreError>
    where
        E: sqlx::Executor<'c, Database = Any>,
    {
        let row = sqlx::query(&self.dialect.table_exists(&self.table))
            .fetch_one(db)
            .await?;
        let count: i64 = row.try_get(0)?;

        Ok(count > 0)
    }

    pub async fn create_table<'c, E>(&self, db: E) -> Result<(), StoreError>
    where
        E: sqlx::Executor<'c, Database = Any>,
    {
        sqlx::query(&self.dialect.create_table(&self.table))
            .execute(db)
            .await?;

        Ok(())
    }

    pub async fn insert<'c, E>(&self, db: E, id: i64, name: &str) -> Result<(), StoreError>
    where
        E: sqlx::Executor<'c, Database = Any>,
    {
        sqlx::query(&self.dialect.insert(&self.table))
            .bind(id)
            .bind(name)
            .execute(db)
            .await?;

        Ok(())
    }

    pub async fn delete<'c, E>(&self, db: E, id: i64) -> Result<(), StoreError>
    where
        E: sqlx::Executor<'c, Database = Any>,
    {
        sqlx::query(&self.dialect.delete(&self.table))
            .bind(id)
            .execute(db)
            .await?;

        Ok(())
    }

    /// All ledger rows, ascending by id.
    pub async fn list<'c, E>(&self, db: E) -> Result<Vec<LedgerRow>, StoreError>
    where
        E: sqlx::Executor<'c, Database = Any>,
    {
        let rows = sqlx::query(&self.dialect.list(&self.table))
            .fetch_all(db)
            .await?;

        let mut migrations = Vec::with_capacity(rows.len());
        for row in rows {
            let applied_at: String = row.try_get("applied_at")?;

            migrations.push(LedgerRow {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                applied_at: NaiveDateTime::parse_from_str(&applied_at, APPLIED_AT_FORMAT)?,
            });
        }

        Ok(migrations)
    }

    /// The id of the last applied migration, or [`StoreError::NoRows`] when
    /// the ledger is empty.
    pub async fn last_id<'c, E>(&self, db: E) -> Result<i64, StoreError>
    where
        E: sqlx::Executor<'c, Database = Any>,
    {
        let row = sqlx::query(&self.dialect.last_id(&self.table))
            .fetch_optional(db)
            .await?
            .ok_or(StoreError::NoRows)?;

        Ok(row.try_get(0)?)
    }
}
