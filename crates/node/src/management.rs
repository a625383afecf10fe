// Path: crates/node/src/management.rs

//! The observable state the core supplies to the management collaborator.
//!
//! The management transport itself is external; it reads [`DaemonInfo`]
//! from here, sets recognized options, and requests graceful shutdown,
//! which is obeyed only while `honor_stop` is set.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::info;

use canopy_api::management::{DaemonInfo, MountPointInfo, MountStatus};
use canopy_types::error::FsError;

/// Mutable daemon state shared with the management endpoint.
pub struct ManagementState {
    pid: u32,
    status: Mutex<MountStatus>,
    honor_stop: AtomicBool,
    mount_points: Mutex<Vec<MountPointInfo>>,
    shutdown: Notify,
}

impl ManagementState {
    /// Fresh state in `starting` status with `honor_stop` enabled.
    pub fn new() -> Self {
        ManagementState {
            pid: std::process::id(),
            status: Mutex::new(MountStatus::Starting),
            honor_stop: AtomicBool::new(true),
            mount_points: Mutex::new(Vec::new()),
            shutdown: Notify::new(),
        }
    }

    /// The current observable state.
    pub fn info(&self) -> DaemonInfo {
        DaemonInfo {
            pid: self.pid,
            status: *self.status.lock(),
            mount_points: self.mount_points.lock().clone(),
        }
    }

    /// Moves the daemon through its lifecycle.
    pub fn set_status(&self, status: MountStatus) {
        *self.status.lock() = status;
        info!(%status, "daemon status changed");
    }

    /// Adds one serving mount point.
    pub fn register_mount(&self, info: MountPointInfo) {
        self.mount_points.lock().push(info);
    }

    /// Applies one recognized option; unknown names are invalid.
    pub fn set_option(&self, name: &str, value: &str) -> Result<(), FsError> {
        match name {
            "honor_stop" => {
                let honor = bool::from_str(value).map_err(|_| {
                    FsError::InvalidArgument(format!("honor_stop must be a bool, got {value:?}"))
                })?;
                self.honor_stop.store(honor, Ordering::SeqCst);
                Ok(())
            }
            "status" => {
                let status: MountStatus = value.parse()?;
                self.set_status(status);
                Ok(())
            }
            other => Err(FsError::InvalidArgument(format!(
                "unknown option {other:?}"
            ))),
        }
    }

    /// Requests a graceful shutdown. Returns whether the request was
    /// obeyed.
    pub fn request_shutdown(&self) -> bool {
        if !self.honor_stop.load(Ordering::SeqCst) {
            info!("shutdown request ignored: honor_stop is off");
            return false;
        }
        self.shutdown.notify_waiters();
        true
    }

    /// Resolves when a shutdown request has been accepted.
    pub async fn wait_for_shutdown(&self) {
        self.shutdown.notified().await;
    }
}

impl Default for ManagementState {
    fn default() -> Self {
        ManagementState::new()
    }
}
