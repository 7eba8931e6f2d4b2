use std::collections::HashSet;

use thiserror::Error;

use crate::migration::{Migration, Operation, OperationNoTx};

#[derive(Debug, Error)]
#[error("migration id {0} is duplicated")]
pub struct DuplicatedId(pub i64);

/// Explicit collection of code-defined migrations. The caller builds it and
/// hands the result to the orchestrator; registration order carries no
/// meaning, migrations run in id order.
#[derive(Default)]
pub struct Registry {
    migrations: Vec<Migration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a migration running inside a transaction.
    pub fn add(
        mut self,
        id: i64,
        name: impl Into<String>,
        operation: impl Operation + 'static,
    ) -> Self {
        self.migrations.push(Migration::new(id, name, operation));

        self
    }

    /// Registers a migration running on the raw connection pool.
    pub fn add_no_tx(
        mut self,
        id: i64,
        name: impl Into<String>,
        operation: impl OperationNoTx + 'static,
    ) -> Self {
        self.migrations
            .push(Migration::new_no_tx(id, name, operation));

        self
    }

    /// Checks id uniqueness and returns the migrations sorted ascending.
    pub fn build(self) -> Result<Vec<Migration>, DuplicatedId> {
        let mut seen = HashSet::with_capacity(self.migrations.len());
        for migration in &self.migrations {
            if !seen.insert(migration.id()) {
                return Err(DuplicatedId(migration.id()));
            }
        }

        let mut migrations = self.migrations;
        migrations.sort_by_key(|m| m.id());

        Ok(migrations)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use sqlx::AnyConnection;

    use super::*;

    struct Noop;

    #[async_trait]
    impl Operation for Noop {
        async fn up(&self, _conn: &mut AnyConnection) -> anyhow::Result<()> {
            Ok(())
        }

        async fn down(&self, _conn: &mut AnyConnection) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn builds_sorted() {
        let migrations = Registry::new()
            .add(2, "second", Noop)
            .add(1, "first", Noop)
            .build()
            .unwrap();

        let ids: Vec<i64> = migrations.iter().map(|m| m.id()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(migrations[0].is_prepared());
    }

    #[test]
    fn rejects_duplicated_ids() {
        let err = Registry::new()
            .add(1, "first", Noop)
            .add(1, "again", Noop)
            .build()
            .unwrap_err();

        assert_eq!(err.0, 1);
    }
}
