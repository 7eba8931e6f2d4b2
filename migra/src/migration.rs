use std::path::PathBuf;

use async_trait::async_trait;
use sqlx::{AnyConnection, AnyPool};
use thiserror::Error;

use crate::parser::{self, ParseError, ParsedMigration};

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("failed to read migration file `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse migration file `{}`: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
}

#[derive(Debug, Error)]
#[error("migration is not prepared")]
pub struct NotPrepared;

/// A schema change executed inside a backend transaction. `up` and `down`
/// receive the open transaction's connection; the orchestrator commits or
/// rolls back around them.
#[async_trait]
pub trait Operation: Send + Sync {
    async fn up(&self, conn: &mut AnyConnection) -> anyhow::Result<()>;
    async fn down(&self, conn: &mut AnyConnection) -> anyhow::Result<()>;
}

/// A schema change that must run outside a transaction, e.g. concurrent
/// index creation. A failure here can leave the schema changed without a
/// ledger row; the orchestrator reports it and never repairs it.
#[async_trait]
pub trait OperationNoTx: Send + Sync {
    async fn up(&self, pool: &AnyPool) -> anyhow::Result<()>;
    async fn down(&self, pool: &AnyPool) -> anyhow::Result<()>;
}

pub(crate) enum Executor {
    Tx(Box<dyn Operation>),
    NoTx(Box<dyn OperationNoTx>),
}

enum Body {
    Unprepared { source: PathBuf },
    Prepared { executor: Executor },
}

/// One schema-change unit: a unique id, a display name, and an execution
/// strategy that is either ready (code-defined) or derived from a SQL file
/// the first time it is needed.
pub struct Migration {
    id: i64,
    name: String,
    body: Body,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.body {
            Body::Unprepared { .. } => "unprepared",
            Body::Prepared { .. } => "prepared",
        };
        f.debug_struct("Migration")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &state)
            .finish()
    }
}

impl Migration {
    /// A code-defined migration running inside a transaction.
    pub fn new(id: i64, name: impl Into<String>, operation: impl Operation + 'static) -> Self {
        Self {
            id,
            name: name.into(),
            body: Body::Prepared {
                executor: Executor::Tx(Box::new(operation)),
            },
        }
    }

    /// A code-defined migration running on the raw connection pool.
    pub fn new_no_tx(
        id: i64,
        name: impl Into<String>,
        operation: impl OperationNoTx + 'static,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            body: Body::Prepared {
                executor: Executor::NoTx(Box::new(operation)),
            },
        }
    }

    /// A file-backed migration, parsed lazily on first use.
    pub fn from_file(id: i64, name: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            id,
            name: name.into(),
            body: Body::Unprepared {
                source: source.into(),
            },
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_prepared(&self) -> bool {
        matches!(self.body, Body::Prepared { .. })
    }

    /// Reads and parses the source file on first call; a no-op afterwards.
    /// The unprepared state never comes back once this succeeds.
    pub fn ensure_prepared(&mut self) -> Result<(), PrepareError> {
        let Body::Unprepared { source } = &self.body else {
            return Ok(());
        };

        let text = std::fs::read_to_string(source).map_err(|e| PrepareError::Io {
            path: source.clone(),
            source: e,
        })?;
        let parsed = parser::parse(&text).map_err(|e| PrepareError::Parse {
            path: source.clone(),
            source: e,
        })?;

        let no_transaction = parsed.no_transaction_up || parsed.no_transaction_down;
        let statements = SqlStatements::from(parsed);
        let executor = if no_transaction {
            Executor::NoTx(Box::new(statements))
        } else {
            Executor::Tx(Box::new(statements))
        };

        self.body = Body::Prepared { executor };

        Ok(())
    }

    /// Prepares if needed, then reports whether this migration runs outside
    /// a transaction.
    pub fn no_transaction(&mut self) -> Result<bool, PrepareError> {
        self.ensure_prepared()?;

        Ok(matches!(
            self.body,
            Body::Prepared {
                executor: Executor::NoTx(_)
            }
        ))
    }

    pub(crate) fn executor(&self) -> Result<&Executor, NotPrepared> {
        match &self.body {
            Body::Prepared { executor } => Ok(executor),
            Body::Unprepared { .. } => Err(NotPrepared),
        }
    }
}

/// Parsed statement sets behind either execution mode.
struct SqlStatements {
    up: Vec<String>,
    down: Vec<String>,
}

impl From<ParsedMigration> for SqlStatements {
    fn from(parsed: ParsedMigration) -> Self {
        Self {
            up: parsed.up_statements,
            down: parsed.down_statements,
        }
    }
}

#[async_trait]
impl Operation for SqlStatements {
    async fn up(&self, conn: &mut AnyConnection) -> anyhow::Result<()> {
        execute(conn, &self.up).await
    }

    async fn down(&self, conn: &mut AnyConnection) -> anyhow::Result<()> {
        execute(conn, &self.down).await
    }
}

#[async_trait]
impl OperationNoTx for SqlStatements {
    async fn up(&self, pool: &AnyPool) -> anyhow::Result<()> {
        for statement in &self.up {
            sqlx::query(statement).execute(pool).await?;
        }

        Ok(())
    }

    async fn down(&self, pool: &AnyPool) -> anyhow::Result<()> {
        for statement in &self.down {
            sqlx::query(statement).execute(pool).await?;
        }

        Ok(())
    }
}

async fn execute(conn: &mut AnyConnection, statements: &[String]) -> anyhow::Result<()> {
    for statement in statements {
        sqlx::query(statement).execute(&mut *conn).await?;
    }

    Ok(())
}
