// Path: crates/node/src/daemon.rs

//! Building and serving the configured mount set.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use canopy_api::management::{MountPointInfo, MountStatus};
use canopy_api::object_store::{EmptyBackingStore, ObjectStore};
use canopy_api::overlay::Overlay;
use canopy_dispatch::Dispatcher;
use canopy_inodes::{MemoryOverlay, Mount, MountConfig};
use canopy_store::{LocalObjectStore, LocalStore};
use canopy_types::hash::Hash;
use canopy_types::inode::InodeNumber;

use crate::config::DaemonConfig;
use crate::management::ManagementState;

/// One mount wired up and ready for a kernel-protocol transport.
pub struct ServingMount {
    /// What the management endpoint reports for this mount.
    pub info: MountPointInfo,
    /// The dispatcher the transport drives.
    pub dispatcher: Arc<Dispatcher>,
    overlay: Arc<dyn Overlay>,
}

/// The daemon: management state plus the serving mount set.
pub struct Daemon {
    management: Arc<ManagementState>,
    local_store: Arc<LocalStore>,
    mounts: Vec<ServingMount>,
}

impl Daemon {
    /// Opens the local store and builds every configured mount. Any failure
    /// here is an initialization failure (exit code 1).
    pub async fn start(config: DaemonConfig) -> anyhow::Result<Daemon> {
        let local_store = Arc::new(
            LocalStore::open(&config.store_path).with_context(|| {
                format!("opening local store {}", config.store_path.display())
            })?,
        );
        let management = Arc::new(ManagementState::new());

        let mut mounts = Vec::with_capacity(config.mounts.len());
        for mount_config in &config.mounts {
            let root_hash = Hash::from_hex(&mount_config.root_hash)
                .with_context(|| format!("mount {}: bad root hash", mount_config.path))?;

            let object_store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(
                Arc::clone(&local_store),
                Arc::new(EmptyBackingStore),
            ));
            let overlay: Arc<dyn Overlay> = Arc::new(MemoryOverlay::new());

            let mut engine_config = MountConfig::new(root_hash);
            engine_config.case_sensitive = mount_config.case_sensitive;
            engine_config.journal_capacity = config.journal_capacity;
            let mount = Mount::new(engine_config, object_store, Arc::clone(&overlay))
                .await
                .with_context(|| format!("mounting {}", mount_config.path))?;

            let info = MountPointInfo {
                inode: InodeNumber::ROOT,
                path: mount_config.path.clone(),
                source_hash: root_hash,
            };
            management.register_mount(info.clone());
            info!(path = %info.path, root = %root_hash, "mount ready");
            mounts.push(ServingMount {
                info,
                dispatcher: Arc::new(Dispatcher::new(mount)),
                overlay,
            });
        }

        Ok(Daemon {
            management,
            local_store,
            mounts,
        })
    }

    /// The management state shared with the management transport.
    pub fn management(&self) -> &Arc<ManagementState> {
        &self.management
    }

    /// The serving mounts, for the kernel-protocol transport.
    pub fn mounts(&self) -> &[ServingMount] {
        &self.mounts
    }

    /// The shared local store, for maintenance requests.
    pub fn local_store(&self) -> &Arc<LocalStore> {
        &self.local_store
    }

    /// Serves until interrupted or asked to stop, then flushes overlays.
    /// Any failure here is a runtime failure (exit code 2).
    pub async fn serve(&self) -> anyhow::Result<()> {
        self.management.set_status(MountStatus::Alive);

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for interrupt")?;
                info!("interrupt received");
            }
            _ = self.management.wait_for_shutdown() => {
                info!("graceful shutdown requested");
            }
        }

        self.management.set_status(MountStatus::Stopping);
        for mount in &self.mounts {
            if let Err(err) = mount.overlay.flush().await {
                error!(path = %mount.info.path, %err, "overlay flush failed");
                return Err(err.into());
            }
        }
        Ok(())
    }
}
