//! Core building blocks shared by the livegate applications.
//!
//! Jobs, device monitoring, the unlock protocol and page navigation live
//! here; system integrations and front-ends plug in through the provider
//! contracts.

pub mod bootstrap;
pub mod config;
pub mod devices;
pub mod error;
pub mod event;
pub mod flow;
pub mod format;
pub mod job;
pub mod logging;
pub mod pages;
pub mod unlock;

pub use bootstrap::{BootstrapDecision, EnvironmentFlags, SessionBootstrap};
pub use config::{LivegateConfig, ManagedPaths, UserSetting};
pub use devices::{DeviceListener, DeviceMonitor, HotplugSource};
pub use error::{JobError, LivegateError, LivegateResult};
pub use event::{EventLoop, EventPump, EventSender};
pub use format::{FormatConfig, FormatRequest};
pub use job::{JobHandle, JobOutcome, JobRunner, JobState};
pub use pages::{ActionSet, Page, PageController, PageObserver, PageState};
pub use unlock::{RetryPolicy, SessionState, SignalReaction, UnlockClient, UnlockSession};
