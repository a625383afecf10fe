// Path: crates/api/src/management.rs

//! Contract types exposed to the management collaborator.
//!
//! The management transport itself (a thrift-style endpoint) is an external
//! collaborator; the core only supplies the observable state below and
//! accepts graceful-shutdown and per-option set requests.

use serde::{Deserialize, Serialize};

use canopy_types::error::FsError;
use canopy_types::hash::Hash;
use canopy_types::inode::InodeNumber;

/// The lifecycle status of the daemon, settable through the `status` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountStatus {
    /// The daemon is initializing; mounts are not yet serving.
    Starting,
    /// All configured mounts are serving.
    Alive,
    /// A graceful shutdown is in progress.
    Stopping,
}

impl std::str::FromStr for MountStatus {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(MountStatus::Starting),
            "alive" => Ok(MountStatus::Alive),
            "stopping" => Ok(MountStatus::Stopping),
            other => Err(FsError::InvalidArgument(format!(
                "unknown status {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for MountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MountStatus::Starting => "starting",
            MountStatus::Alive => "alive",
            MountStatus::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// One serving mount point as reported to the management collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountPointInfo {
    /// The mount root's inode number.
    pub inode: InodeNumber,
    /// The path the mount is served at.
    pub path: String,
    /// The root tree hash the mount was created from.
    pub source_hash: Hash,
}

/// The observable daemon state supplied to the management collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonInfo {
    /// The daemon's process id.
    pub pid: u32,
    /// Current lifecycle status.
    pub status: MountStatus,
    /// All serving mount points.
    pub mount_points: Vec<MountPointInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_its_own_rendering() {
        for status in [
            MountStatus::Starting,
            MountStatus::Alive,
            MountStatus::Stopping,
        ] {
            let parsed: MountStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("dead".parse::<MountStatus>().is_err());
    }
}
