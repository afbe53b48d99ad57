pub mod init;
pub mod register;
pub mod search;
pub mod status;
pub mod sync;

use crate::output::CodedError;
use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};
use strata_core::ErrorCode;
use strata_core::config::{ProjectConfig, STRATA_DIR, load_project_config};
use strata_search::SqliteStore;

/// Default database location under the project root.
#[must_use]
pub fn default_db_path(project_root: &Path) -> PathBuf {
    project_root.join(STRATA_DIR).join("strata.db")
}

/// Resolved locations and configuration for one invocation.
pub struct Project {
    pub root: PathBuf,
    pub db_path: PathBuf,
}

impl Project {
    pub fn new(root: PathBuf, db_override: Option<PathBuf>) -> Self {
        let db_path = db_override.unwrap_or_else(|| default_db_path(&root));
        Self { root, db_path }
    }

    /// Load `.strata/config.toml`, falling back to defaults when absent.
    pub fn config(&self) -> Result<ProjectConfig> {
        load_project_config(&self.root).map_err(|err| {
            anyhow::Error::new(CodedError::new(ErrorCode::ConfigParseError, format!("{err:#}")))
        })
    }

    /// Open the store, refusing to create a database outside `strata init`.
    pub fn open_store(&self) -> Result<SqliteStore> {
        if !self.db_path.exists() {
            return Err(CodedError::new(
                ErrorCode::NotInitialized,
                format!("no strata database at {}", self.db_path.display()),
            )
            .into());
        }
        SqliteStore::open(&self.db_path)
            .with_context(|| format!("open store {}", self.db_path.display()))
    }
}
