use crate::backup::options::Options;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::schedule;
use crate::backup::validate::{validate_cron_str, validate_name};
use bon::Builder;
use chrono::{DateTime, Utc};
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, OneOrMany};
use std::collections::BTreeMap;
use validator::Validate;

/// A backup job: source paths written to one or more backends.
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct Location {
    /// Attached from the configuration key, never read from the file.
    #[serde(skip)]
    #[validate(custom(function = validate_name))]
    #[builder(into, default)]
    name: String,
    #[serde(rename = "type", default)]
    #[builder(default)]
    kind: LocationType,
    #[serde_as(as = "OneOrMany<_>")]
    #[validate(length(min = 1))]
    #[builder(default)]
    from: Vec<String>,
    #[serde_as(as = "OneOrMany<_>")]
    #[validate(length(min = 1))]
    #[builder(default)]
    to: Vec<String>,
    #[serde(default, alias = "dependsOn", skip_serializing_if = "Vec::is_empty")]
    #[builder(default)]
    depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[validate(custom(function = validate_cron_str))]
    #[builder(into, default)]
    cron: String,
    #[serde(default, skip_serializing_if = "Options::is_empty")]
    #[builder(default)]
    options: Options,
    #[serde(default)]
    #[builder(default)]
    hooks: Hooks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    forget: Option<ForgetPolicy>,
    /// Source backend to the backends its fresh snapshots are copied to.
    #[serde_as(as = "BTreeMap<_, OneOrMany<_>>")]
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[builder(default)]
    copy: BTreeMap<String, Vec<String>>,
}

/// Where a location's data lives. A volume location has exactly one `from`
/// entry naming a docker volume.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationType {
    #[default]
    #[serde(alias = "")]
    Local,
    Volume,
}

/// Shell commands run around a location's backup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct Hooks {
    /// Runs before the sources are checked.
    #[serde(default)]
    #[builder(default)]
    prevalidate: Vec<String>,
    #[serde(default)]
    #[builder(default)]
    before: Vec<String>,
    #[serde(default)]
    #[builder(default)]
    after: Vec<String>,
    #[serde(default)]
    #[builder(default)]
    success: Vec<String>,
    #[serde(default)]
    #[builder(default)]
    failure: Vec<String>,
}

/// Whether a successful backup is followed by a forget run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForgetPolicy {
    Yes,
    Prune,
}

impl Location {
    pub(crate) fn attach_name<S: Into<String>>(&mut self, name: S) {
        self.name = name.into();
    }

    /// Tag put on every snapshot of this location.
    pub fn tag(&self) -> String {
        build_tag("location", &self.name)
    }

    pub fn has_backend(&self, backend: &str) -> bool {
        self.to.iter().any(|b| b == backend)
    }

    pub fn is_volume(&self) -> bool {
        self.kind == LocationType::Volume
    }

    /// Backends that receive copies of snapshots written to `backend`.
    pub fn copy_targets(&self, backend: &str) -> &[String] {
        self.copy.get(backend).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_scheduled(&self) -> bool {
        !self.cron.trim().is_empty()
    }

    /// Due-ness of this location's cron schedule given its last firing.
    pub fn is_due(&self, last_fired: Option<i64>, now: DateTime<Utc>) -> Result<bool> {
        schedule::is_due(&self.cron, last_fired, now).map_err(|e| Error::InvalidCronExpression {
            location: self.name.clone(),
            cron: self.cron.clone(),
            reason: e.to_string(),
        })
    }
}

pub fn build_tag(kind: &str, value: &str) -> String {
    format!("ar:{kind}:{value}")
}
