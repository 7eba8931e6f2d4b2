use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::migration::Migration;

#[derive(Debug, Error)]
pub enum DiscoverError {
    #[error("failed to read migrations directory `{}`: {source}", .path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("migration files *.sql not found")]
    NoMigrationFiles,

    #[error("file `{}` doesn't match the <id>_<name>.sql pattern: no separator found", .0.display())]
    NoSeparator(PathBuf),

    #[error("file `{}` doesn't match the <id>_<name>.sql pattern: unable to parse id", .0.display())]
    ParseId(PathBuf),

    #[error("migration id {0} is duplicated")]
    DuplicatedId(i64),
}

/// Splits a migration file base name into its id and name,
/// e.g. `3_create_users.sql` into `(3, "create_users")`.
pub fn parse_file_name(path: &Path) -> Result<(i64, String), DiscoverError> {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();

    let (id, name) = stem
        .split_once('_')
        .ok_or_else(|| DiscoverError::NoSeparator(path.to_owned()))?;
    let id = id
        .parse::<i64>()
        .map_err(|_| DiscoverError::ParseId(path.to_owned()))?;

    Ok((id, name.to_owned()))
}

/// Enumerates `*.sql` files in `dir` and turns them into lazily-prepared
/// migrations, sorted ascending by id. Files not matching the naming
/// pattern and duplicate ids are rejected.
pub fn discover(dir: impl AsRef<Path>) -> Result<Vec<Migration>, DiscoverError> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir).map_err(|source| DiscoverError::ReadDir {
        path: dir.to_owned(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| DiscoverError::ReadDir {
            path: dir.to_owned(),
            source,
        })?;
        let path = entry.path();

        if path.extension().and_then(|e| e.to_str()) == Some("sql") {
            files.push(path);
        }
    }

    if files.is_empty() {
        return Err(DiscoverError::NoMigrationFiles);
    }
    files.sort();

    let mut seen = HashSet::with_capacity(files.len());
    let mut migrations = Vec::with_capacity(files.len());
    for path in files {
        let (id, name) = parse_file_name(&path)?;

        if !seen.insert(id) {
            return Err(DiscoverError::DuplicatedId(id));
        }

        migrations.push(Migration::from_file(id, name, path));
    }

    migrations.sort_by_key(|m| m.id());

    Ok(migrations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str) {
        std::fs::write(
            dir.join(name),
            "-- +migrate up\nSELECT 1;\n-- +migrate down\nSELECT 2;\n",
        )
        .unwrap();
    }

    #[test]
    fn discovers_sorted_by_id() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1_one.sql");
        write(dir.path(), "10_ten.sql");
        write(dir.path(), "2_two.sql");

        let migrations = discover(dir.path()).unwrap();

        let ids: Vec<i64> = migrations.iter().map(|m| m.id()).collect();
        assert_eq!(ids, vec![1, 2, 10]);
        assert_eq!(migrations[2].name(), "ten");
        assert!(!migrations[0].is_prepared());
    }

    #[test]
    fn ignores_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1_one.sql");
        std::fs::write(dir.path().join("notes.txt"), "nothing").unwrap();

        let migrations = discover(dir.path()).unwrap();
        assert_eq!(migrations.len(), 1);
    }

    #[test]
    fn rejects_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            discover(dir.path()),
            Err(DiscoverError::NoMigrationFiles)
        ));
    }

    #[test]
    fn rejects_bad_file_names() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "create-users.sql");
        assert!(matches!(
            discover(dir.path()),
            Err(DiscoverError::NoSeparator(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "abc_create_users.sql");
        assert!(matches!(
            discover(dir.path()),
            Err(DiscoverError::ParseId(_))
        ));
    }

    #[test]
    fn rejects_duplicated_ids() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1_one.sql");
        write(dir.path(), "1_also_one.sql");

        assert!(matches!(
            discover(dir.path()),
            Err(DiscoverError::DuplicatedId(1))
        ));
    }

    #[test]
    fn parses_multi_underscore_names() {
        let (id, name) = parse_file_name(Path::new("7_add_user_settings.sql")).unwrap();
        assert_eq!(id, 7);
        assert_eq!(name, "add_user_settings");
    }
}
