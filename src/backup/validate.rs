//! Validation functions for configuration values.
//!
//! Provides custom validation functions for record names, cron expressions
//! and source paths.

use chrono::Utc;
use validator::ValidationError;

use std::path::Path;

/// Separator between a selector's name and its tag, so names may not use it.
pub static SELECTOR_SEPARATOR: char = '@';

pub fn validate_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() {
        return Err(ValidationError::new("InvalidName").with_message("name must not be empty".into()));
    }
    if name.contains(SELECTOR_SEPARATOR) {
        return Err(ValidationError::new("InvalidName").with_message(
            format!("{name:?} must not contain {SELECTOR_SEPARATOR:?}").into(),
        ));
    }

    Ok(())
}

/// Empty means "not scheduled" and is accepted.
pub fn validate_cron_str<S: AsRef<str>>(cron: S) -> Result<(), ValidationError> {
    let cron = cron.as_ref().trim();
    if cron.is_empty() {
        return Ok(());
    }
    if cron_parser::parse(cron, &Utc::now()).is_err() {
        return Err(ValidationError::new("InvalidCron")
            .with_message(format!("Invalid cron string: {cron:?}").into()));
    }

    Ok(())
}

pub fn validate_path_exist<P: AsRef<Path>>(path: P) -> Result<(), ValidationError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ValidationError::new("InvalidPath")
            .with_message(format!("{:?} not found", path).into()));
    }

    Ok(())
}
