//! Configuration model and helpers used by livegate applications.

use crate::error::{LivegateError, LivegateResult};
use crate::format::FormatConfig;
use directories_next::ProjectDirs;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/livegate.toml";
/// Environment variable naming an alternative configuration file.
pub const CONFIG_PATH_ENV: &str = "LIVEGATE_CONFIG";
/// Environment variable carrying the managed-partition base path.
pub const BASE_PATH_ENV: &str = "LIVEGATE_BASE";
const USER_CONFIG_FILE_NAME: &str = "livegate.toml";
const APP_QUALIFIER: &str = "org";
const APP_ORGANIZATION: &str = "Livegate";
const APP_NAME: &str = "livegate";

/// Which message bus the manager service lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    System,
    Session,
}

/// Where to find the privileged manager service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerCfg {
    #[serde(default)]
    pub bus: BusKind,

    #[serde(default = "default_service")]
    pub service: String,

    #[serde(default = "default_object_path")]
    pub object_path: String,

    #[serde(default = "default_interface")]
    pub interface: String,
}

fn default_service() -> String {
    "org.inseca.Manager".to_string()
}

fn default_object_path() -> String {
    "/org/inseca/Manager".to_string()
}

fn default_interface() -> String {
    "org.inseca.Manager".to_string()
}

impl Default for ManagerCfg {
    fn default() -> Self {
        Self {
            bus: BusKind::default(),
            service: default_service(),
            object_path: default_object_path(),
            interface: default_interface(),
        }
    }
}

/// Connection retry policy for the manager service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryCfg {
    #[serde(default = "default_retry_interval")]
    pub interval_ms: u64,

    /// Zero means retry indefinitely.
    #[serde(default)]
    pub max_attempts: u32,
}

fn default_retry_interval() -> u64 {
    1_000
}

impl Default for RetryCfg {
    fn default() -> Self {
        Self {
            interval_ms: default_retry_interval(),
            max_attempts: 0,
        }
    }
}

/// Job execution knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsCfg {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_poll_interval() -> u64 {
    50
}

impl Default for JobsCfg {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            timeout_secs: None,
        }
    }
}

/// Hotplug watch and enumeration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesCfg {
    #[serde(default = "default_watch_dir")]
    pub watch_dir: String,

    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Buses a whole device must sit on to be listed; empty lists all.
    #[serde(default = "default_buses")]
    pub buses: Vec<String>,
}

fn default_watch_dir() -> String {
    "/dev".to_string()
}

fn default_settle_ms() -> u64 {
    500
}

fn default_buses() -> Vec<String> {
    vec!["usb".to_string()]
}

impl Default for DevicesCfg {
    fn default() -> Self {
        Self {
            watch_dir: default_watch_dir(),
            settle_ms: default_settle_ms(),
            buses: default_buses(),
        }
    }
}

/// A desktop setting applied once the UI environment is defined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSetting {
    pub schema: String,
    pub key: String,
    pub value: String,
}

/// Desktop session behaviour for the unlock application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCfg {
    #[serde(default = "default_ui_poll")]
    pub ui_poll_ms: u64,

    #[serde(default)]
    pub settings: Vec<UserSetting>,
}

fn default_ui_poll() -> u64 {
    1_000
}

impl Default for SessionCfg {
    fn default() -> Self {
        Self {
            ui_poll_ms: default_ui_poll(),
            settings: Vec::new(),
        }
    }
}

/// Admin application integration points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminCfg {
    #[serde(default = "default_tool_path")]
    pub tool_path: String,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    #[serde(default = "default_internal_mountpoint")]
    pub internal_mountpoint: String,

    #[serde(default = "default_keyinfos_path")]
    pub keyinfos_path: String,

    /// Present once the internal partition has been given its credentials.
    #[serde(default = "default_credential_marker")]
    pub credential_marker: String,

    #[serde(default)]
    pub formats: Vec<FormatConfig>,
}

fn default_tool_path() -> String {
    "/usr/bin/inseca".to_string()
}

fn default_tool_timeout() -> u64 {
    3_600
}

fn default_internal_mountpoint() -> String {
    "/internal".to_string()
}

fn default_keyinfos_path() -> String {
    "/opt/share/keyinfos.json".to_string()
}

fn default_credential_marker() -> String {
    "/opt/share/internal-credentials".to_string()
}

impl Default for AdminCfg {
    fn default() -> Self {
        Self {
            tool_path: default_tool_path(),
            tool_timeout_secs: default_tool_timeout(),
            internal_mountpoint: default_internal_mountpoint(),
            keyinfos_path: default_keyinfos_path(),
            credential_marker: default_credential_marker(),
            formats: Vec::new(),
        }
    }
}

/// Managed-partition base path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsCfg {
    #[serde(default)]
    pub base: Option<String>,
}

/// Top-level configuration snapshot loaded from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LivegateConfig {
    #[serde(default)]
    pub manager: ManagerCfg,

    #[serde(default)]
    pub retry: RetryCfg,

    #[serde(default)]
    pub jobs: JobsCfg,

    #[serde(default)]
    pub devices: DevicesCfg,

    #[serde(default)]
    pub session: SessionCfg,

    #[serde(default)]
    pub admin: AdminCfg,

    #[serde(default)]
    pub paths: PathsCfg,

    #[serde(skip)]
    pub path: PathBuf,
}

impl LivegateConfig {
    /// Return the canonical system-wide configuration path.
    pub fn default_path() -> &'static Path {
        Path::new(DEFAULT_CONFIG_PATH)
    }

    /// Resolve the configuration path from `LIVEGATE_CONFIG`, falling back to
    /// the system default.
    pub fn path_from_env() -> PathBuf {
        env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Resolve the per-user configuration path.
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().join(USER_CONFIG_FILE_NAME))
    }

    /// Load configuration from `path`, or from the per-user file, or fall back
    /// to built-in defaults when neither exists.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> LivegateResult<Self> {
        let target = path.as_ref();
        if target.exists() {
            return Self::load(target);
        }

        if target == Self::default_path() {
            if let Some(user_path) = Self::user_config_path().filter(|p| p.exists()) {
                info!(
                    "configuration missing at {}; using per-user file {}",
                    target.display(),
                    user_path.display()
                );
                return Self::load(&user_path);
            }
        }

        warn!(
            "configuration missing at {}; using built-in defaults",
            target.display()
        );
        Ok(Self {
            path: target.to_path_buf(),
            ..Self::default()
        })
    }

    /// Read a TOML config file from disk and validate basics.
    pub fn load<P: AsRef<Path>>(path: P) -> LivegateResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut cfg: Self = toml::from_str(&contents)?;
        cfg.path = path.to_path_buf();

        let issues = cfg.validate();
        if !issues.is_empty() {
            return Err(LivegateError::InvalidConfig(issues.join("; ")));
        }
        Ok(cfg)
    }

    /// Perform a validation pass and return human-readable issues.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.manager.service.trim().is_empty() {
            issues.push("manager.service must not be empty".to_string());
        }
        if !self.manager.object_path.starts_with('/') {
            issues.push("manager.object_path must be an absolute object path".to_string());
        }
        if self.manager.interface.trim().is_empty() {
            issues.push("manager.interface must not be empty".to_string());
        }
        if self.retry.interval_ms == 0 {
            issues.push("retry.interval_ms must be greater than 0".to_string());
        }
        if self.jobs.poll_interval_ms == 0 {
            issues.push("jobs.poll_interval_ms must be greater than 0".to_string());
        }
        if self.jobs.timeout_secs == Some(0) {
            issues.push("jobs.timeout_secs must be greater than 0 when set".to_string());
        }
        if self.devices.watch_dir.trim().is_empty() {
            issues.push("devices.watch_dir must not be empty".to_string());
        }
        for setting in &self.session.settings {
            if setting.schema.trim().is_empty() || setting.key.trim().is_empty() {
                issues.push(format!(
                    "session.settings entry `{}`/`{}` needs both schema and key",
                    setting.schema, setting.key
                ));
            }
        }
        if self.admin.tool_timeout_secs == 0 {
            issues.push("admin.tool_timeout_secs must be greater than 0".to_string());
        }
        for format in &self.admin.formats {
            if format.id.trim().is_empty() {
                issues.push("admin.formats entries need a non-empty id".to_string());
            }
        }

        issues
    }

    /// Persist the configuration back to the path it was loaded from.
    pub fn save(&self) -> LivegateResult<()> {
        let payload = toml::to_string_pretty(self)?;
        fs::write(&self.path, payload)?;
        Ok(())
    }

    pub fn connect_interval(&self) -> Duration {
        Duration::from_millis(self.retry.interval_ms)
    }

    /// `None` means unlimited connection attempts.
    pub fn max_connect_attempts(&self) -> Option<u32> {
        match self.retry.max_attempts {
            0 => None,
            n => Some(n),
        }
    }

    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_millis(self.jobs.poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.jobs.timeout_secs.map(Duration::from_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.devices.settle_ms)
    }

    pub fn ui_poll_interval(&self) -> Duration {
        Duration::from_millis(self.session.ui_poll_ms)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.admin.tool_timeout_secs)
    }

    pub fn format(&self, id: &str) -> Option<&FormatConfig> {
        self.admin.formats.iter().find(|format| format.id == id)
    }

    /// Managed paths, with `LIVEGATE_BASE` taking precedence over the file.
    pub fn managed_paths(&self) -> Option<ManagedPaths> {
        ManagedPaths::from_env().or_else(|| {
            self.paths
                .base
                .as_deref()
                .map(str::trim)
                .filter(|base| !base.is_empty())
                .map(ManagedPaths::from_base)
        })
    }
}

/// Directories derived from the internal managed partition's base path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedPaths {
    pub config_dir: PathBuf,
    pub repos_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub proxy_pac: PathBuf,
}

impl ManagedPaths {
    pub fn from_base(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            config_dir: base.join("config"),
            repos_dir: base.join("repos"),
            cache_dir: base.join("cache"),
            proxy_pac: base.join("proxy.pac"),
        }
    }

    pub fn from_env() -> Option<Self> {
        env::var(BASE_PATH_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(Self::from_base)
    }

    /// Variables handed to child processes working on the managed partition.
    pub fn exports(&self) -> Vec<(&'static str, String)> {
        vec![
            ("INSECA_ROOT", self.config_dir.display().to_string()),
            (
                "INSECA_DEFAULT_REPOS_DIR",
                self.repos_dir.display().to_string(),
            ),
            ("INSECA_CACHE_DIR", self.cache_dir.display().to_string()),
            ("PROXY_PAC_FILE", self.proxy_pac.display().to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct EnvGuard {
        key: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: impl Into<String>) -> Self {
            let prev = env::var(key).ok();
            env::set_var(key, value.into());
            Self { key, prev }
        }

        fn unset(key: &'static str) -> Self {
            let prev = env::var(key).ok();
            env::remove_var(key);
            Self { key, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(prev) = &self.prev {
                env::set_var(self.key, prev);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    #[test]
    fn empty_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("livegate.toml");
        fs::write(&path, "").unwrap();

        let config = LivegateConfig::load(&path).unwrap();
        assert_eq!(config.manager.service, "org.inseca.Manager");
        assert_eq!(config.connect_interval(), Duration::from_millis(1_000));
        assert_eq!(config.max_connect_attempts(), None);
        assert_eq!(config.job_timeout(), None);
        assert_eq!(config.devices.buses, vec!["usb".to_string()]);
        assert_eq!(config.path, path);
    }

    #[test]
    fn sections_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("livegate.toml");
        fs::write(
            &path,
            r#"
[manager]
bus = "session"

[retry]
interval_ms = 250
max_attempts = 4

[jobs]
timeout_secs = 30

[[session.settings]]
schema = "org.gnome.desktop.screensaver"
key = "lock-enabled"
value = "false"
"#,
        )
        .unwrap();

        let config = LivegateConfig::load(&path).unwrap();
        assert_eq!(config.manager.bus, BusKind::Session);
        assert_eq!(config.connect_interval(), Duration::from_millis(250));
        assert_eq!(config.max_connect_attempts(), Some(4));
        assert_eq!(config.job_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.session.settings.len(), 1);
        assert_eq!(config.session.settings[0].key, "lock-enabled");
    }

    #[test]
    fn format_configurations_are_listed_by_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("livegate.toml");
        fs::write(
            &path,
            r#"
[[admin.formats]]
id = "office-usb"
parameters = ["label"]
overrides = { "enctype-data" = "luks" }
"#,
        )
        .unwrap();

        let config = LivegateConfig::load(&path).unwrap();
        let format = config.format("office-usb").unwrap();
        assert_eq!(format.parameters, vec!["label".to_string()]);
        assert_eq!(format.overrides["enctype-data"], "luks");
        assert!(config.format("missing").is_none());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("livegate.toml");
        fs::write(&path, "[retry]\ninterval_ms = 0\n[jobs]\ntimeout_secs = 0\n").unwrap();

        match LivegateConfig::load(&path) {
            Err(LivegateError::InvalidConfig(message)) => {
                assert!(message.contains("retry.interval_ms"));
                assert!(message.contains("jobs.timeout_secs"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = LivegateConfig::load_or_default(&path).unwrap();
        assert_eq!(config.path, path);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn save_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("livegate.toml");
        let mut config = LivegateConfig {
            path: path.clone(),
            ..LivegateConfig::default()
        };
        config.admin.tool_path = "/opt/bin/tool".into();
        config.save().unwrap();

        let reloaded = LivegateConfig::load(&path).unwrap();
        assert_eq!(reloaded.admin.tool_path, "/opt/bin/tool");
    }

    #[test]
    fn managed_paths_derive_from_one_base() {
        let paths = ManagedPaths::from_base("/internal/inseca");
        assert_eq!(paths.config_dir, PathBuf::from("/internal/inseca/config"));
        assert_eq!(paths.repos_dir, PathBuf::from("/internal/inseca/repos"));
        assert_eq!(paths.cache_dir, PathBuf::from("/internal/inseca/cache"));
        assert_eq!(paths.proxy_pac, PathBuf::from("/internal/inseca/proxy.pac"));

        let exports = paths.exports();
        assert_eq!(exports.len(), 4);
        assert!(exports.contains(&("PROXY_PAC_FILE", "/internal/inseca/proxy.pac".into())));
    }

    #[test]
    fn base_env_overrides_config_file() {
        let mut config = LivegateConfig::default();
        config.paths.base = Some("/from/file".into());

        {
            let _guard = EnvGuard::unset(BASE_PATH_ENV);
            let paths = config.managed_paths().unwrap();
            assert_eq!(paths.cache_dir, PathBuf::from("/from/file/cache"));
        }

        let _guard = EnvGuard::set(BASE_PATH_ENV, "/from/env");
        let paths = config.managed_paths().unwrap();
        assert_eq!(paths.cache_dir, PathBuf::from("/from/env/cache"));
    }
}
