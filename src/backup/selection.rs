//! Resolution of "all or selected" requests into an ordered list of names.

use crate::backup::config::Config;
use crate::backup::graph::{sort_locations_from_map, sort_locations_from_names};
use crate::backup::location::Location;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::validate::SELECTOR_SEPARATOR;
use derive_more::Display;
use getset::Getters;
use itertools::Itertools;
use std::convert::Infallible;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum SelectionKind {
    #[display("location")]
    Location,
    #[display("backend")]
    Backend,
}

/// A `name` or `name@tag` entry from the command line. For locations the tag
/// names the backend to write to.
#[derive(Clone, Debug, PartialEq, Eq, Display, Getters)]
#[display("{raw}")]
#[getset(get = "pub")]
pub struct Selector {
    raw: String,
    name: String,
    tag: Option<String>,
}

impl Selector {
    pub fn parse(raw: &str) -> Self {
        let (name, tag) = match raw.split_once(SELECTOR_SEPARATOR) {
            Some((name, tag)) => (name, Some(tag.to_string())),
            None => (raw, None),
        };
        Self {
            raw: raw.to_string(),
            name: name.to_string(),
            tag,
        }
    }
}

impl FromStr for Selector {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

/// Names to operate on. Locations always come back in dependency order,
/// backends in configuration order. Only the part before `@` is matched.
pub fn resolve(all: bool, selectors: &[Selector], kind: SelectionKind, config: &Config) -> Result<Vec<String>> {
    if all {
        return match kind {
            SelectionKind::Backend => Ok(config.backends.keys().cloned().collect()),
            SelectionKind::Location => sort_locations_from_map(&config.locations),
        };
    }

    for selector in selectors {
        let known = match kind {
            SelectionKind::Backend => config.backends.contains_key(selector.name()),
            SelectionKind::Location => config.locations.contains_key(selector.name()),
        };
        if !known {
            return Err(Error::InvalidSelection {
                kind,
                selector: selector.raw().clone(),
            });
        }
    }

    if selectors.is_empty() {
        return Err(Error::EmptySelection);
    }

    let names = selectors.iter().map(|s| s.name().as_str()).unique().collect_vec();
    match kind {
        SelectionKind::Backend => Ok(names.into_iter().map(str::to_string).collect()),
        SelectionKind::Location => sort_locations_from_names(names.as_slice(), config),
    }
}

/// A location selector's tag must name one of that location's backends.
pub fn check_backend_tags(selectors: &[Selector], config: &Config) -> Result<()> {
    for selector in selectors {
        let (Some(location), Some(backend)) = (config.location(selector.name()), selector.tag()) else {
            continue;
        };
        if !location.has_backend(backend) {
            return Err(Error::InvalidSelection {
                kind: SelectionKind::Location,
                selector: selector.raw().clone(),
            });
        }
    }
    Ok(())
}

/// Backends a location writes to in this run. A location selected without a
/// tag, or not selected explicitly at all, writes to every backend in `to`.
pub fn targets(location: &Location, selectors: &[Selector]) -> Vec<String> {
    let matching = selectors
        .iter()
        .filter(|s| s.name() == location.name())
        .collect_vec();
    if matching.is_empty() || matching.iter().any(|s| s.tag().is_none()) {
        return location.to().clone();
    }
    location
        .to()
        .iter()
        .filter(|backend| matching.iter().any(|s| s.tag().as_deref() == Some(backend.as_str())))
        .cloned()
        .collect()
}
