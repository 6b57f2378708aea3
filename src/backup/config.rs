use crate::backup::backend::Backend;
use crate::backup::graph::{sort_locations_from_map, LocationLookup};
use crate::backup::location::Location;
use crate::backup::options::{compose, options_for, Options, SCOPE_ALL};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::WithMsg;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use validator::Validate;

/// Parsed configuration file. Built once at start-up and passed by reference.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[validate(range(min = 2, max = 2))]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<serde_yml::Value>,
    #[serde(default)]
    pub locations: BTreeMap<String, Location>,
    #[serde(default)]
    pub backends: BTreeMap<String, Backend>,
    #[serde(default, skip_serializing_if = "Options::is_empty")]
    pub global: Options,
    /// Directory relative paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let mut config: Config = File::open(path)
            .map_err(Error::from)
            .and_then(|f| serde_yml::from_reader(f).map_err(Error::from))
            .with_msg(format!("Parse YAML config failed: {:?}", path))?;

        let absolute = std::path::absolute(path)?;
        config.base_dir = absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.attach_names();
        tracing::debug!("Using config: {:?}", absolute);
        Ok(config)
    }

    /// Copies every container key into the record it names.
    pub fn attach_names(&mut self) {
        for (name, location) in self.locations.iter_mut() {
            location.attach_name(name.as_str());
        }
        for (name, backend) in self.backends.iter_mut() {
            backend.attach_name(name.as_str());
        }
    }

    /// Full pre-flight validation: record shape, cross references and an
    /// acyclic dependency graph.
    pub fn check(&self) -> Result<()> {
        let mut errors = Vec::new();
        if let Err(e) = self.validate() {
            errors.push(Error::from(e).with_msg("Invalid config"));
        }
        for (name, backend) in &self.backends {
            if let Err(e) = backend.validate() {
                errors.push(Error::from(e).with_msg(format!("Invalid backend \"{name}\"")));
            }
        }
        for (name, location) in &self.locations {
            if let Err(e) = location.validate() {
                errors.push(Error::from(e).with_msg(format!("Invalid location \"{name}\"")));
            }
            for backend in location.to() {
                if !self.backends.contains_key(backend) {
                    errors.push(Error::UnknownBackend {
                        location: name.clone(),
                        backend: backend.clone(),
                    });
                }
            }
            for dependency in location.depends_on() {
                if !self.locations.contains_key(dependency) {
                    errors.push(Error::UnknownDependency {
                        location: name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
            for (source, destinations) in location.copy() {
                if !location.has_backend(source) {
                    errors.push(Error::InvalidCopySource {
                        location: name.clone(),
                        backend: source.clone(),
                    });
                }
                for destination in destinations {
                    if !self.backends.contains_key(destination) {
                        errors.push(Error::UnknownBackend {
                            location: name.clone(),
                            backend: destination.clone(),
                        });
                    }
                }
            }
            if location.is_volume() && location.from().len() != 1 {
                errors.push(Error::InvalidVolumeSource {
                    location: name.clone(),
                    count: location.from().len(),
                });
            }
        }
        if let Err(e) = sort_locations_from_map(&self.locations) {
            errors.push(e.with_msg("Locations cannot be ordered"));
        }
        convert_error_vec(errors)
    }

    pub fn location(&self, name: &str) -> Option<&Location> {
        self.locations.get(name)
    }

    pub fn backend(&self, name: &str) -> Option<&Backend> {
        self.backends.get(name)
    }

    pub fn resolve_path<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        resolve_path(&self.base_dir, path)
    }

    /// Flags prepended to every engine invocation.
    pub fn global_flags(&self) -> Vec<String> {
        options_for(&self.global, &[SCOPE_ALL])
    }

    /// Priority: backend > global.
    pub fn backend_options(&self, kind: &str, backend: &Backend) -> Vec<String> {
        let mut args = compose(&[kind], &[&self.global]);
        args.extend(compose(&[SCOPE_ALL, kind], &[backend.options()]));
        args
    }

    /// Priority: location > backend > global.
    pub fn location_options(&self, kind: &str, location: &Location, backend: &Backend) -> Vec<String> {
        let mut args = compose(&[kind], &[&self.global]);
        args.extend(compose(&[SCOPE_ALL, kind], &[backend.options(), location.options()]));
        args
    }
}

impl LocationLookup for Config {
    fn lookup_location(&self, name: &str) -> Option<&Location> {
        self.location(name)
    }
}

/// Absolute paths are kept, `~` expands to the home directory and anything
/// else is taken relative to `base_dir`.
pub fn resolve_path<P: AsRef<Path>>(base_dir: &Path, path: P) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        return path.to_path_buf();
    }
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    base_dir.join(path)
}
