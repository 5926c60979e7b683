#![forbid(unsafe_code)]

//! Collaborator contracts shared across livegate.
//!
//! The privileged manager, the device-node source, the desktop session and the
//! administrative partition context all live outside this workspace's control.
//! Their interfaces are declared here so workflows can be exercised against
//! mocks while the system crate supplies the real integrations.

pub mod admin;
pub mod devices;
pub mod manager;
pub mod session;

pub use admin::{AdminBackend, AdminOperation};
pub use devices::{DeviceEnumerator, DeviceInventory, DeviceRecord, HotplugEvent, HotplugKind};
pub use manager::{
    EnvironmentStatus, FailureReason, ManagerConnector, ManagerService, ManagerSignal,
    SignalSink, UpdatesStatus,
};
pub use session::{AdminContext, SessionEnvironment};
