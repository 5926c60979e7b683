//! Building device format requests from a format configuration and the
//! values the administrator entered.

use crate::error::{LivegateError, LivegateResult};
use chrono::{DateTime, Utc};
use log::debug;
use livegate_provider::AdminOperation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Parameters every format configuration asks the administrator for.
pub const USER_CORE_PARAMS: [&str; 3] = ["password-user", "fs-data", "enctype-data"];

pub const DEFAULT_FS: &str = "exfat";

/// One selectable format configuration (`[[admin.formats]]`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatConfig {
    pub id: String,

    #[serde(default)]
    pub description: String,

    /// Configuration-specific parameters asked in addition to the core ones.
    #[serde(default)]
    pub parameters: Vec<String>,

    /// Values forced by the configuration, replacing whatever was entered.
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,

    #[serde(default)]
    pub password_rescue: Option<String>,

    #[serde(default)]
    pub signing_key_file: Option<PathBuf>,
}

impl FormatConfig {
    /// Parameters the administrator fills in; overridden ones are never asked.
    pub fn user_parameters(&self) -> Vec<&str> {
        self.declared_parameters()
            .filter(|name| !self.overrides.contains_key(*name))
            .collect()
    }

    fn declared_parameters(&self) -> impl Iterator<Item = &str> {
        USER_CORE_PARAMS
            .iter()
            .copied()
            .chain(self.parameters.iter().map(String::as_str))
    }

    /// Parameters generated without user input.
    pub fn core_parameters(&self, now: DateTime<Utc>) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("fs-data".to_string(), DEFAULT_FS.to_string());
        params.insert("confid".to_string(), self.id.clone());
        params.insert(
            "creation-date".to_string(),
            now.format("%Y-%m-%d %H:%M:%S").to_string(),
        );
        params.insert("creation-date-ts".to_string(), now.timestamp().to_string());
        if let Some(rescue) = &self.password_rescue {
            params.insert("password-rescue".to_string(), rescue.clone());
        }
        if let Some(name) = self
            .signing_key_file
            .as_deref()
            .and_then(Path::file_name)
        {
            params.insert(
                "device-signing-private-key-file".to_string(),
                name.to_string_lossy().into_owned(),
            );
        }
        params
    }
}

/// A validated request to format one device.
#[derive(Clone, PartialEq, Eq)]
pub struct FormatRequest {
    pub config_id: String,
    pub params: BTreeMap<String, String>,
    pub device: PathBuf,
}

impl std::fmt::Debug for FormatRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatRequest")
            .field("config_id", &self.config_id)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl FormatRequest {
    /// Merge generated, entered and overridden values into a request.
    pub fn build(
        config: &FormatConfig,
        values: &BTreeMap<String, String>,
        device: Option<&Path>,
        now: DateTime<Utc>,
    ) -> LivegateResult<Self> {
        let device = device
            .ok_or_else(|| LivegateError::InvalidParameter("No device selected".to_string()))?;

        let mut params = config.core_parameters(now);
        for name in config.user_parameters() {
            match values.get(name) {
                Some(value) if !value.is_empty() => {
                    params.insert(name.to_string(), value.clone());
                }
                None if params.contains_key(name) => {}
                _ => {
                    return Err(LivegateError::InvalidParameter(format!(
                        "{name}: invalid empty value"
                    )))
                }
            }
        }

        for (name, value) in &config.overrides {
            let declared = params.contains_key(name)
                || config.declared_parameters().any(|declared| declared == name.as_str());
            if declared {
                params.insert(name.clone(), value.clone());
            } else {
                debug!("override for undeclared parameter {name} ignored");
            }
        }

        Ok(Self {
            config_id: config.id.clone(),
            params,
            device: device.to_path_buf(),
        })
    }

    pub fn into_operation(self) -> AdminOperation {
        AdminOperation::Format {
            config_id: self.config_id,
            params: self.params,
            device: self.device,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> FormatConfig {
        FormatConfig {
            id: "office-usb".into(),
            parameters: vec!["label".into()],
            overrides: [
                ("enctype-data".to_string(), "luks".to_string()),
                ("not-a-param".to_string(), "ignored".to_string()),
            ]
            .into_iter()
            .collect(),
            signing_key_file: Some(PathBuf::from("/keys/devicemeta.priv")),
            ..FormatConfig::default()
        }
    }

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn builds_full_parameter_set() {
        let request = FormatRequest::build(
            &config(),
            &values(&[
                ("password-user", "hunter2"),
                ("enctype-data", "veracrypt"),
                ("label", "TEAM"),
            ]),
            Some(Path::new("/dev/sdb")),
            now(),
        )
        .unwrap();

        let p = &request.params;
        assert_eq!(p["confid"], "office-usb");
        assert_eq!(p["creation-date"], "2026-03-14 09:26:53");
        assert_eq!(p["creation-date-ts"], now().timestamp().to_string());
        assert_eq!(p["fs-data"], "exfat");
        assert_eq!(p["enctype-data"], "luks");
        assert_eq!(p["label"], "TEAM");
        assert_eq!(p["device-signing-private-key-file"], "devicemeta.priv");
        assert!(!p.contains_key("not-a-param"));
        assert_eq!(request.device, PathBuf::from("/dev/sdb"));
    }

    #[test]
    fn empty_values_are_rejected_by_name() {
        let err = FormatRequest::build(
            &config(),
            &values(&[
                ("password-user", "pw"),
                ("enctype-data", "luks"),
                ("label", ""),
            ]),
            Some(Path::new("/dev/sdb")),
            now(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "label: invalid empty value");
    }

    #[test]
    fn overridden_parameters_are_not_asked_and_take_the_forced_value() {
        let config = config();
        assert_eq!(
            config.user_parameters(),
            vec!["password-user", "fs-data", "label"]
        );

        let request = FormatRequest::build(
            &config,
            &values(&[("password-user", "pw"), ("label", "TEAM")]),
            Some(Path::new("/dev/sdb")),
            now(),
        )
        .unwrap();
        assert_eq!(request.params["enctype-data"], "luks");
        assert!(!request.params.contains_key("not-a-param"));
    }

    #[test]
    fn missing_device_is_rejected() {
        let err = FormatRequest::build(&config(), &values(&[]), None, now()).unwrap_err();
        assert_eq!(err.to_string(), "No device selected");
    }

    #[test]
    fn debug_output_hides_parameters() {
        let request = FormatRequest::build(
            &config(),
            &values(&[
                ("password-user", "hunter2"),
                ("enctype-data", "luks"),
                ("label", "L"),
            ]),
            Some(Path::new("/dev/sdc")),
            now(),
        )
        .unwrap();
        assert!(!format!("{request:?}").contains("hunter2"));
        assert!(matches!(
            request.into_operation(),
            AdminOperation::Format { .. }
        ));
    }
}
