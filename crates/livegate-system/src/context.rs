//! Admin context backed by the keyinfos file, a credential marker and the
//! mount table.

use crate::mounts::{is_mounted_in, mount_table_path};
use livegate_core::config::LivegateConfig;
use livegate_core::error::{LivegateError, LivegateResult};
use livegate_provider::AdminContext;
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Key in the keyinfos document that only genuine builds carry.
const BUILD_TYPE_KEY: &str = "build-type";

#[derive(Debug, Clone)]
pub struct MountAdminContext {
    keyinfos: PathBuf,
    credential_marker: PathBuf,
    mountpoint: PathBuf,
    mount_table: PathBuf,
    umount: PathBuf,
}

impl MountAdminContext {
    pub fn from_config(config: &LivegateConfig) -> Self {
        Self {
            keyinfos: PathBuf::from(&config.admin.keyinfos_path),
            credential_marker: PathBuf::from(&config.admin.credential_marker),
            mountpoint: PathBuf::from(&config.admin.internal_mountpoint),
            mount_table: mount_table_path(),
            umount: PathBuf::from("umount"),
        }
    }

    pub fn with_mount_table(mut self, table: impl Into<PathBuf>) -> Self {
        self.mount_table = table.into();
        self
    }

    pub fn with_umount(mut self, binary: impl Into<PathBuf>) -> Self {
        self.umount = binary.into();
        self
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }
}

impl AdminContext for MountAdminContext {
    type Error = LivegateError;

    fn is_valid(&self) -> bool {
        let raw = match fs::read_to_string(&self.keyinfos) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("cannot read {}: {err}", self.keyinfos.display());
                return false;
            }
        };
        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(doc) => doc.get(BUILD_TYPE_KEY).is_some(),
            Err(err) => {
                warn!("{} is not valid JSON: {err}", self.keyinfos.display());
                false
            }
        }
    }

    fn is_initialized(&self) -> bool {
        self.credential_marker.exists()
    }

    fn is_unlocked(&self) -> bool {
        match is_mounted_in(&self.mount_table, &self.mountpoint) {
            Ok(mounted) => mounted,
            Err(err) => {
                warn!(
                    "cannot read mount table {}: {err}",
                    self.mount_table.display()
                );
                false
            }
        }
    }

    fn logout(&self) -> LivegateResult<()> {
        if !self.is_unlocked() {
            debug!("{} already unmounted", self.mountpoint.display());
            return Ok(());
        }
        let output = Command::new(&self.umount).arg(&self.mountpoint).output()?;
        if output.status.success() {
            info!("unmounted {}", self.mountpoint.display());
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(LivegateError::Admin(format!(
            "could not unmount {}: {}",
            self.mountpoint.display(),
            stderr.trim()
        )))
    }
}
