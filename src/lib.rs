//! # autobackup
//!
//! Orchestrates an external snapshot engine (restic) over a set of named
//! backup locations and storage backends described in one YAML file.
//!
//! ## Features
//!
//! - **Dependency Ordering**: Locations run after the locations they depend on
//! - **Selection**: Run everything or pick `location[@backend]` entries
//! - **Scheduled Backups**: Cron-based due checks with persisted last firing
//! - **Layered Options**: Global, backend and location engine flags composed by priority
//! - **Hooks and Forget**: Shell hooks around every location and optional retention runs
//! - **Copy and Restore**: Mirror fresh snapshots to other backends and restore a location
//! - **Docker Volumes**: Back up named volumes through the engine's container image
//!
//! ## Quick Start
//!
//! ```no_run
//! use autobackup::backup::config::Config;
//! use autobackup::backup::exec::ProcessExecutor;
//! use autobackup::backup::runner::Orchestrator;
//! use autobackup::backup::selection::{resolve, SelectionKind};
//!
//! // Load and validate configuration
//! let config = Config::load(".autorestic.yml")?;
//! config.check()?;
//!
//! // Back up every location in dependency order
//! let order = resolve(true, &[], SelectionKind::Location, &config)?;
//! Orchestrator::new(&config, ProcessExecutor, "restic").backup(&order, &[])?;
//! # Ok::<(), autobackup::backup::result_error::error::Error>(())
//! ```

pub mod backup;
