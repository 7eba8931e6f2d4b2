use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
#[error("unsupported dialect `{0}`")]
pub struct UnsupportedDialect(pub String);

/// Determines how the migrations ledger table is managed for a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    /// Resolves the dialect from a connection string scheme,
    /// e.g. `postgres://user@host/db`.
    pub fn from_database_url(url: &str) -> Result<Self, UnsupportedDialect> {
        let scheme = url.split(':').next().unwrap_or_default();

        scheme.parse()
    }

    pub(crate) fn table_exists(&self, table: &str) -> String {
        match self {
            Self::Postgres => format!(
                "SELECT COUNT(*) FROM pg_tables WHERE schemaname = 'public' AND tablename = '{table}'"
            ),
            Self::MySql => format!(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = DATABASE() AND table_name = '{table}'"
            ),
            Self::Sqlite => format!(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '{table}'"
            ),
        }
    }

    pub(crate) fn create_table(&self, table: &str) -> String {
        match self {
            Self::Postgres => format!(
                "CREATE TABLE {table} (id bigint PRIMARY KEY, name varchar(255) NOT NULL, applied_at timestamp NOT NULL)"
            ),
            Self::MySql => format!(
                "CREATE TABLE {table} (id BIGINT PRIMARY KEY, name VARCHAR(255) NOT NULL, applied_at TIMESTAMP NOT NULL)"
            ),
            Self::Sqlite => format!(
                "CREATE TABLE {table} (id INTEGER PRIMARY KEY, name VARCHAR(255) NOT NULL, applied_at TIMESTAMP NOT NULL)"
            ),
        }
    }

    pub(crate) fn insert(&self, table: &str) -> String {
        match self {
            Self::Postgres => {
                format!("INSERT INTO {table} (id, name, applied_at) VALUES ($1, $2, now())")
            }
            Self::MySql | Self::Sqlite => {
                format!("INSERT INTO {table} (id, name, applied_at) VALUES (?, ?, CURRENT_TIMESTAMP)")
            }
        }
    }

    pub(crate) fn delete(&self, table: &str) -> String {
        match self {
            Self::Postgres => format!("DELETE FROM {table} WHERE id = $1"),
            Self::MySql | Self::Sqlite => format!("DELETE FROM {table} WHERE id = ?"),
        }
    }

    // The Any driver decodes primitives only, so applied_at is rendered
    // to `YYYY-MM-DD HH:MM:SS` text here and parsed by the store.
    pub(crate) fn list(&self, table: &str) -> String {
        match self {
            Self::Postgres => format!(
                "SELECT id, name, to_char(applied_at, 'YYYY-MM-DD HH24:MI:SS') AS applied_at FROM {table} ORDER BY id ASC"
            ),
            Self::MySql => format!(
                "SELECT id, name, DATE_FORMAT(applied_at, '%Y-%m-%d %H:%i:%s') AS applied_at FROM {table} ORDER BY id ASC"
            ),
            Self::Sqlite => format!(
                "SELECT id, name, strftime('%Y-%m-%d %H:%M:%S', applied_at) AS applied_at FROM {table} ORDER BY id ASC"
            ),
        }
    }

    pub(crate) fn last_id(&self, table: &str) -> String {
        format!("SELECT id FROM {table} ORDER BY id DESC LIMIT 1")
    }
}

impl FromStr for Dialect {
    type Err = UnsupportedDialect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" => Ok(Self::MySql),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(UnsupportedDialect(other.to_owned())),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Postgres => f.write_str("postgres"),
            Self::MySql => f.write_str("mysql"),
            Self::Sqlite => f.write_str("sqlite"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_database_url() {
        assert_eq!(
            Dialect::from_database_url("postgres://role@localhost:5432/app").unwrap(),
            Dialect::Postgres
        );
        assert_eq!(
            Dialect::from_database_url("postgresql://role@localhost/app").unwrap(),
            Dialect::Postgres
        );
        assert_eq!(
            Dialect::from_database_url("mysql://root@localhost/app").unwrap(),
            Dialect::MySql
        );
        assert_eq!(
            Dialect::from_database_url("sqlite:app.db").unwrap(),
            Dialect::Sqlite
        );

        let err = Dialect::from_database_url("clickhouse://localhost/app").unwrap_err();
        assert_eq!(err.0, "clickhouse");
    }

    #[test]
    fn placeholders_match_dialect() {
        assert!(Dialect::Postgres.insert("migrations").contains("$1"));
        assert!(Dialect::MySql.insert("migrations").contains("?"));
        assert!(Dialect::Sqlite.delete("migrations").ends_with("id = ?"));
    }

    #[test]
    fn existence_checks_differ_per_backend() {
        assert!(Dialect::Postgres.table_exists("migrations").contains("pg_tables"));
        assert!(Dialect::MySql
            .table_exists("migrations")
            .contains("information_schema"));
        assert!(Dialect::Sqlite
            .table_exists("migrations")
            .contains("sqlite_master"));
    }
}
