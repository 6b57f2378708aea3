use crate::backup::options::Options;
use crate::backup::redacted::RedactedString;
use crate::backup::validate::validate_name;
use bon::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use validator::Validate;

/// A storage destination locations write to.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct Backend {
    /// Attached from the configuration key, never read from the file.
    #[serde(skip)]
    #[validate(custom(function = validate_name))]
    #[builder(into, default)]
    name: String,
    #[serde(rename = "type", default)]
    #[builder(default)]
    kind: BackendType,
    #[validate(length(min = 1))]
    #[builder(into)]
    path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    key: Option<RedactedString>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[builder(default)]
    env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Options::is_empty")]
    #[builder(default)]
    options: Options,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    #[default]
    Local,
    B2,
    S3,
    Sftp,
    Rest,
    Azure,
    Gs,
    Rclone,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Local => "local",
            BackendType::B2 => "b2",
            BackendType::S3 => "s3",
            BackendType::Sftp => "sftp",
            BackendType::Rest => "rest",
            BackendType::Azure => "azure",
            BackendType::Gs => "gs",
            BackendType::Rclone => "rclone",
        }
    }
}

impl Backend {
    pub(crate) fn attach_name<S: Into<String>>(&mut self, name: S) {
        self.name = name.into();
    }

    /// Repository string handed to the engine. Local paths are resolved
    /// against `base_dir`.
    pub fn repository(&self, base_dir: &Path) -> String {
        match self.kind {
            BackendType::Local => crate::backup::config::resolve_path(base_dir, &self.path)
                .to_string_lossy()
                .into_owned(),
            kind => format!("{}:{}", kind.as_str(), self.path),
        }
    }

    /// Environment for an engine invocation against this backend.
    pub fn engine_env(&self, base_dir: &Path) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = self
            .env
            .iter()
            .map(|(k, v)| (k.to_uppercase(), v.clone()))
            .collect();
        env.insert("RESTIC_REPOSITORY".to_string(), self.repository(base_dir));
        if let Some(key) = &self.key {
            env.insert("RESTIC_PASSWORD".to_string(), key.inner().clone());
        }
        env
    }
}
