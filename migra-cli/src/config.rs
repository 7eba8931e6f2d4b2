use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

const DEFAULT_DIRECTORY: &str = ".";
const DEFAULT_TABLE: &str = "migrations";

/// On-disk YAML shape; every key is optional so flags can fill the gaps.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    pub directory: Option<PathBuf>,
    pub dsn: Option<String>,
    pub table: Option<String>,
}

/// Effective configuration after merging flags over the config file.
#[derive(Debug)]
pub struct Config {
    pub directory: PathBuf,
    pub dsn: String,
    pub table: String,
}

impl Config {
    pub fn load(
        path: Option<&Path>,
        dsn: Option<String>,
        directory: Option<PathBuf>,
        table: Option<String>,
    ) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => read_config_file(path)?,
            None => ConfigFile::default(),
        };

        let dsn = dsn.or(file.dsn).context(
            "no database connection string: pass --dsn or set `dsn` in the config file",
        )?;

        Ok(Self {
            directory: directory
                .or(file.directory)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DIRECTORY)),
            dsn,
            table: table
                .or(file.table)
                .unwrap_or_else(|| DEFAULT_TABLE.to_owned()),
        })
    }
}

fn read_config_file(path: &Path) -> anyhow::Result<ConfigFile> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file `{}`", path.display()))?;

    serde_yaml::from_str(&data)
        .with_context(|| format!("failed to unmarshal config `{}`", path.display()))
}
