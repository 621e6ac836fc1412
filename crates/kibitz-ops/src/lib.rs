//! Operational helpers: logging setup and flat-table persistence.

pub mod tables;

use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::Mutex,
};

use kibitz_types::{config::OpsConfig, KibitzError, Result};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub use tables::{read_table, read_table_if_present, write_table, TableRow};

pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_level.clone())
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| ops_error(format!("failed to create log filter: {err}")))?;

    let builder = fmt().with_env_filter(filter);
    let installed = match &config.log_file {
        Some(path) => {
            ensure_parent_dir(Path::new(path))?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| ops_error(format!("failed to open log file {path}: {err}")))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|err| ops_error(format!("tracing init error: {err}")))?;
    Ok(())
}

/// Creates the directory that will hold `path`, if it has one.
pub fn ensure_parent_dir(path: &Path) -> Result<Option<PathBuf>> {
    let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) else {
        return Ok(None);
    };
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|err| {
            persistence_error(format!("failed to create directory {}: {err}", dir.display()))
        })?;
        info!("Created output directory {}", dir.display());
    }
    Ok(Some(dir.to_path_buf()))
}

pub fn ops_error(message: impl Into<String>) -> KibitzError {
    KibitzError::Ops(message.into())
}

pub fn persistence_error(message: impl Into<String>) -> KibitzError {
    KibitzError::Persistence(message.into())
}
