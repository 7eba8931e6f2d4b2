use std::collections::HashSet;

use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::AnyPool;
use thiserror::Error;

use crate::{
    dialect::Dialect,
    migration::{Executor, Migration, NotPrepared, PrepareError},
    store::{LedgerRow, Store, StoreError},
};

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("dirty migration(s) found (unapplied migration with id lower than database version)")]
    Dirty,

    #[error("no rows in migrations table, nothing to rollback")]
    NothingToRollback,

    #[error("no rows in migrations table, database version is unknown")]
    UnknownVersion,

    #[error("database version is {0}, but migration with this id was not supplied")]
    MissingVersion(i64),

    #[error("failed to prepare migration {id}: {source}")]
    Prepare {
        id: i64,
        #[source]
        source: PrepareError,
    },

    #[error("failed to apply migration {id}: {source}")]
    Apply {
        id: i64,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to revert migration {id}: {source}")]
    Revert {
        id: i64,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    NotPrepared(#[from] NotPrepared),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("sqlx `{0}`")]
    Sqlx(#[from] sqlx::Error),
}

/// Failure while applying pending migrations, carrying how many were
/// applied before it.
#[derive(Debug, Error)]
#[error("applied {applied} migration(s) before failure: {source}")]
pub struct UpError {
    pub applied: usize,
    #[source]
    pub source: MigrateError,
}

/// One line of the status report: a migration known from the ledger or the
/// supplied set, with its application time when applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub id: i64,
    pub name: String,
    pub applied_at: Option<NaiveDateTime>,
}

impl MigrationStatus {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// Applies and reverts migrations against the ledger table, one at a time
/// in id order. Holds no state between operations besides the ledger
/// itself; the connection pool stays owned by the caller.
pub struct Migrator {
    store: Store,
}

impl Migrator {
    /// Creates the ledger table when it does not exist yet.
    pub async fn new(
        pool: &AnyPool,
        dialect: Dialect,
        table: impl Into<String>,
    ) -> Result<Self, MigrateError> {
        let store = Store::new(dialect, table);

        if !store.table_exists(pool).await? {
            tracing::debug!(table = store.table(), "creating migrations table");
            store.create_table(pool).await?;
        }

        Ok(Self { store })
    }

    /// Applies every supplied migration missing from the ledger, ascending
    /// by id. Fails with [`MigrateError::Dirty`] before touching anything
    /// when an unapplied id is lower than the database version, unless
    /// `force` is set. Stops at the first failure; the error carries the
    /// count applied before it.
    pub async fn up(
        &self,
        pool: &AnyPool,
        migrations: &mut [Migration],
        force: bool,
    ) -> Result<usize, UpError> {
        let applied = self.store.list(pool).await.map_err(|e| UpError {
            applied: 0,
            source: e.into(),
        })?;

        let (missing, dirty) = find_missing(migrations, &applied);
        if dirty && !force {
            return Err(UpError {
                applied: 0,
                source: MigrateError::Dirty,
            });
        }

        let mut count = 0;
        for migration in missing {
            if let Err(source) = self.up_one(pool, migration).await {
                return Err(UpError {
                    applied: count,
                    source,
                });
            }
            count += 1;
        }

        Ok(count)
    }

    /// Rolls back the migration the ledger lists last. With `redo`, applies
    /// it again right away, without re-diffing the full set.
    pub async fn down(
        &self,
        pool: &AnyPool,
        migrations: &mut [Migration],
        redo: bool,
    ) -> Result<(), MigrateError> {
        let last_id = match self.store.last_id(pool).await {
            Err(StoreError::NoRows) => return Err(MigrateError::NothingToRollback),
            res => res?,
        };

        let migration = migrations
            .iter_mut()
            .find(|m| m.id() == last_id)
            .ok_or(MigrateError::MissingVersion(last_id))?;

        self.down_one(pool, migration).await?;

        if redo {
            self.up_one(pool, migration).await?;
        }

        Ok(())
    }

    /// The union of applied ledger rows and not-yet-applied migrations,
    /// ascending by id. Mutates nothing and prepares nothing.
    pub async fn status(
        &self,
        pool: &AnyPool,
        migrations: &[Migration],
    ) -> Result<Vec<MigrationStatus>, MigrateError> {
        let applied = self.store.list(pool).await?;
        let applied_ids: HashSet<i64> = applied.iter().map(|row| row.id).collect();

        let mut results: Vec<MigrationStatus> = applied
            .into_iter()
            .map(|row| MigrationStatus {
                id: row.id,
                name: row.name,
                applied_at: Some(row.applied_at),
            })
            .collect();

        for migration in migrations {
            if !applied_ids.contains(&migration.id()) {
                results.push(MigrationStatus {
                    id: migration.id(),
                    name: migration.name().to_owned(),
                    applied_at: None,
                });
            }
        }

        results.sort_by_key(|result| result.id);

        Ok(results)
    }

    /// The id of the last applied migration.
    pub async fn db_version(&self, pool: &AnyPool) -> Result<i64, MigrateError> {
        match self.store.last_id(pool).await {
            Err(StoreError::NoRows) => Err(MigrateError::UnknownVersion),
            res => Ok(res?),
        }
    }

    async fn up_one(&self, pool: &AnyPool, migration: &mut Migration) -> Result<(), MigrateError> {
        let id = migration.id();
        migration
            .ensure_prepared()
            .map_err(|source| MigrateError::Prepare { id, source })?;

        tracing::info!(id, name = migration.name(), "applying migration");

        match migration.executor()? {
            Executor::Tx(operation) => {
                let mut tx = pool.begin().await?;
                operation
                    .up(&mut *tx)
                    .await
                    .map_err(|source| MigrateError::Apply { id, source })?;
                self.store.insert(&mut *tx, id, migration.name()).await?;
                tx.commit().await?;
            }
            Executor::NoTx(operation) => {
                operation
                    .up(pool)
                    .await
                    .map_err(|source| MigrateError::Apply { id, source })?;
                self.store.insert(pool, id, migration.name()).await?;
            }
        }

        Ok(())
    }

    async fn down_one(
        &self,
        pool: &AnyPool,
        migration: &mut Migration,
    ) -> Result<(), MigrateError> {
        let id = migration.id();
        migration
            .ensure_prepared()
            .map_err(|source| MigrateError::Prepare { id, source })?;

        tracing::info!(id, name = migration.name(), "reverting migration");

        match migration.executor()? {
            Executor::Tx(operation) => {
                let mut tx = pool.begin().await?;
                operation
                    .down(&mut *tx)
                    .await
                    .map_err(|source| MigrateError::Revert { id, source })?;
                self.store.delete(&mut *tx, id).await?;
                tx.commit().await?;
            }
            Executor::NoTx(operation) => {
                operation
                    .down(pool)
                    .await
                    .map_err(|source| MigrateError::Revert { id, source })?;
                self.store.delete(pool, id).await?;
            }
        }

        Ok(())
    }
}

/// Migrations absent from the ledger, sorted ascending by id, and whether
/// any of them has an id below the highest applied one.
fn find_missing<'a>(
    migrations: &'a mut [Migration],
    applied: &[LedgerRow],
) -> (Vec<&'a mut Migration>, bool) {
    let applied_ids: HashSet<i64> = applied.iter().map(|row| row.id).collect();
    let max_applied = applied.iter().map(|row| row.id).max().unwrap_or(0);

    let mut missing: Vec<&mut Migration> = migrations
        .iter_mut()
        .filter(|m| !applied_ids.contains(&m.id()))
        .collect();

    let dirty = missing.iter().any(|m| m.id() < max_applied);
    missing.sort_by_key(|m| m.id());

    (missing, dirty)
}
