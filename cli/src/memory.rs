//! Engine setup for the CLI
//!
//! Resolves where memory lives on disk and which project a checkout maps
//! to, then opens the engine with any `config.json` overrides.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use lore_memory::{EngineConfig, MemoryEngine, ProjectKey, CONFIG_FILE_NAME};

use crate::error::{CliError, CliResult};

/// Environment variable overriding the data root
pub const DATA_DIR_ENV: &str = "LORE_DATA_DIR";

/// Directory under the home directory used when nothing else is set
const DEFAULT_DIR_NAME: &str = ".lore";

/// Memory manager for a single CLI invocation
///
/// Holds the resolved data root and project key; every command opens its
/// own engine through [`MemoryManager::open`].
#[derive(Debug, Clone)]
pub struct MemoryManager {
    data_root: PathBuf,
    project_root: PathBuf,
    project_key: ProjectKey,
}

impl MemoryManager {
    /// Create a new MemoryManager
    ///
    /// # Arguments
    /// * `data_dir` - Explicit data root (`--data-dir`), wins over the environment
    /// * `project_root` - Checkout root; defaults to the current directory
    /// * `remote` - Remote URL; discovered from `.git/config` when absent
    pub fn new(
        data_dir: Option<PathBuf>,
        project_root: Option<PathBuf>,
        remote: Option<&str>,
    ) -> CliResult<Self> {
        let data_root = resolve_data_root(
            data_dir,
            std::env::var_os(DATA_DIR_ENV),
            dirs::home_dir(),
        )
        .ok_or(CliError::NoDataDir)?;

        let project_root = match project_root {
            Some(root) => root,
            None => std::env::current_dir()?,
        };
        let project_key = ProjectKey::for_checkout(&project_root, remote);

        tracing::debug!(
            "[MemoryManager::new] data root {:?}, project {:?} -> {}",
            data_root,
            project_root,
            project_key
        );

        Ok(Self {
            data_root,
            project_root,
            project_key,
        })
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn project_key(&self) -> &ProjectKey {
        &self.project_key
    }

    /// Open the engine for this project
    ///
    /// # Errors
    /// Returns error if the project directories cannot be created.
    pub fn open(&self) -> CliResult<MemoryEngine> {
        let config = EngineConfig::load(&self.data_root.join(CONFIG_FILE_NAME));
        let engine = MemoryEngine::open(&self.data_root, &self.project_key, config).map_err(|e| {
            tracing::error!("[MemoryManager::open] Failed to open engine: {}", e);
            e
        })?;
        Ok(engine)
    }
}

/// Pick the data root: explicit flag, then environment, then `~/.lore`
pub fn resolve_data_root(
    flag: Option<PathBuf>,
    env: Option<OsString>,
    home: Option<PathBuf>,
) -> Option<PathBuf> {
    if let Some(dir) = flag {
        return Some(dir);
    }
    if let Some(dir) = env.filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    home.map(|h| h.join(DEFAULT_DIR_NAME))
}
