#![forbid(unsafe_code)]

//! Linux integrations behind the livegate provider contracts.
//!
//! Talks to the host via:
//! - the manager service on D-Bus (zbus)
//! - udev for whole-disk enumeration and inotify on the device directory
//! - `who`, `gsettings` and `zenity` for the graphical session
//! - the mount table and the admin tool for the internal partition

mod context;
mod desktop;
mod devices;
mod hotplug;
mod manager;
mod mounts;
mod tool;

pub use context::MountAdminContext;
pub use desktop::DesktopSession;
pub use devices::UdevEnumerator;
pub use hotplug::spawn_hotplug_watcher;
pub use manager::{BusManager, BusManagerConnector};
pub use mounts::{is_mounted, mount_table_path, MOUNTS_OVERRIDE_ENV};
pub use tool::ToolBackend;
