//! Layered command line options.
//!
//! Options are declared in three places (the `global` section, a backend and
//! a location), each keyed by scope: an operation kind such as `backup` or
//! `forget`, or the special scope `all`. Composition never deduplicates: a
//! higher priority layer simply appends its flags after the lower ones and the
//! engine's last-occurrence-wins parsing does the overriding.

use derive_more::{Deref, DerefMut, From};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, OneOrMany};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Scope that applies to every operation kind.
pub static SCOPE_ALL: &str = "all";

/// A single option value as written in the configuration file.
#[derive(Clone, Debug, PartialEq, From, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl Display for OptionValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{b}"),
            OptionValue::Int(i) => write!(f, "{i}"),
            OptionValue::Float(n) => write!(f, "{n}"),
            OptionValue::Text(s) => f.write_str(s),
        }
    }
}

/// Flag name to values. A scalar in YAML is read as a one element list.
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, From, Deref, DerefMut, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionMap(#[serde_as(as = "BTreeMap<_, OneOrMany<_>>")] BTreeMap<String, Vec<OptionValue>>);

impl<K: Into<String>> FromIterator<(K, Vec<OptionValue>)> for OptionMap {
    fn from_iter<T: IntoIterator<Item = (K, Vec<OptionValue>)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Scope key to option map.
pub type Options = BTreeMap<String, OptionMap>;

pub fn option_to_flag(option: &str) -> String {
    if option.starts_with('-') {
        option.to_string()
    } else {
        format!("--{option}")
    }
}

/// Flattens an option map onto `args`.
///
/// `true` becomes a bare flag, everything else a flag/value pair. Repeated
/// values repeat the flag in declaration order.
pub fn append_options(args: &mut Vec<String>, options: &OptionMap) {
    for (key, values) in options.iter() {
        for value in values {
            match value {
                OptionValue::Bool(true) => args.push(option_to_flag(key)),
                value => {
                    args.push(option_to_flag(key));
                    args.push(value.to_string());
                }
            }
        }
    }
}

/// Flags of the requested scopes of a single layer, in scope order.
pub fn options_for<K: AsRef<str>>(options: &Options, scope_keys: &[K]) -> Vec<String> {
    let mut args = Vec::new();
    for key in scope_keys {
        if let Some(option_map) = options.get(key.as_ref()) {
            append_options(&mut args, option_map);
        }
    }
    args
}

/// Flags of several layers given lowest priority first.
pub fn compose<K: AsRef<str>>(scope_keys: &[K], layers: &[&Options]) -> Vec<String> {
    layers
        .iter()
        .flat_map(|layer| options_for(layer, scope_keys))
        .collect()
}
