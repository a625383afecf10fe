// Path: crates/node/src/config.rs
//! Configuration structures for the daemon (`canopyd.toml`).

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use canopy_journal::Journal;

fn default_true() -> bool {
    true
}

fn default_journal_capacity() -> usize {
    Journal::DEFAULT_CAPACITY
}

/// Top-level daemon configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonConfig {
    /// Where the local store database lives.
    pub store_path: PathBuf,

    /// The mounts to serve.
    #[serde(default)]
    pub mounts: Vec<MountPointConfig>,

    /// Journal ring capacity per mount.
    #[serde(default = "default_journal_capacity")]
    pub journal_capacity: usize,
}

/// One configured mount point.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MountPointConfig {
    /// The path the mount is served at.
    pub path: String,

    /// Hex hash of the root tree in the local store.
    pub root_hash: String,

    /// Whether name lookups are byte-exact. Defaults to TRUE, the
    /// convention of the host filesystems this daemon sits on.
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
}

impl DaemonConfig {
    /// Loads and parses the configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }
}
