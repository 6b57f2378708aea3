use crate::backup::backend::{Backend, BackendType};
use crate::backup::config::Config;
use crate::backup::exec::{CommandOutput, CommandSpec, Executor};
use crate::backup::function_path;
use crate::backup::graph::sort_locations_from_map;
use crate::backup::location::{ForgetPolicy, Location};
use crate::backup::lock::RunLock;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use crate::backup::schedule::{next_firing, ScheduleStore};
use crate::backup::selection::{check_backend_tags, targets, SelectionKind, Selector};
use crate::backup::validate::validate_path_exist;
use chrono::{DateTime, Utc};
use function_name::named;
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, error, info, warn};
use validator::ValidationErrors;

/// Image running the engine for volume locations.
pub static VOLUME_IMAGE: &str = "restic/restic";
/// Where a volume location's volume is mounted inside the container.
pub static VOLUME_MOUNT: &str = "/data";

/// Runs location and backend jobs one at a time through an [`Executor`].
pub struct Orchestrator<'a, E: Executor> {
    config: &'a Config,
    executor: E,
    engine: String,
}

impl<'a, E: Executor> Orchestrator<'a, E> {
    pub fn new<S: Into<String>>(config: &'a Config, executor: E, engine: S) -> Self {
        Self {
            config,
            executor,
            engine: engine.into(),
        }
    }

    /// Engine invocation against `backend`: global flags first, then `args`.
    pub fn engine_command(&self, backend: &Backend, args: Vec<String>) -> CommandSpec {
        let mut full = self.config.global_flags();
        full.extend(args);
        let command = CommandSpec::new(self.engine.clone(), full)
            .with_env(backend.engine_env(&self.config.base_dir));
        if self.config.base_dir.as_os_str().is_empty() {
            command
        } else {
            command.with_dir(self.config.base_dir.clone())
        }
    }

    pub fn backup_args(&self, location: &Location, backend: &Backend) -> Vec<String> {
        let mut args = vec!["backup".to_string()];
        args.extend(self.config.location_options("backup", location, backend));
        args.extend(["--tag".to_string(), location.tag()]);
        if location.is_volume() {
            args.push(VOLUME_MOUNT.to_string());
        } else {
            args.extend(
                location
                    .from()
                    .iter()
                    .map(|p| self.config.resolve_path(p).to_string_lossy().into_owned()),
            );
        }
        args
    }

    pub fn copy_args(&self, location: &Location, destination: &Backend) -> Vec<String> {
        let mut args = vec!["copy".to_string()];
        args.extend(self.config.location_options("copy", location, destination));
        args.extend(["--tag".to_string(), location.tag()]);
        args
    }

    /// `restore --target <target> --tag <location tag> <snapshot>` followed by
    /// the composed `restore` options.
    pub fn restore_args(&self, location: &Location, backend: &Backend, target: &str, snapshot: &str) -> Vec<String> {
        let mut args = vec![
            "restore".to_string(),
            "--target".to_string(),
            target.to_string(),
            "--tag".to_string(),
            location.tag(),
            snapshot.to_string(),
        ];
        args.extend(self.config.location_options("restore", location, backend));
        args
    }

    pub fn forget_args(&self, location: &Location, backend: &Backend, prune: bool, dry_run: bool) -> Vec<String> {
        let mut args = vec!["forget".to_string()];
        if prune {
            args.push("--prune".to_string());
        }
        if dry_run {
            args.push("--dry-run".to_string());
        }
        args.extend(["--tag".to_string(), location.tag()]);
        args.extend(self.config.location_options("forget", location, backend));
        args
    }

    /// Engine invocation for work on a location's data. Volume locations run
    /// the engine in a container with the volume mounted at [`VOLUME_MOUNT`];
    /// a local repository is mounted at its own path.
    pub fn location_command(&self, location: &Location, backend: &Backend, args: Vec<String>) -> CommandSpec {
        let inner = self.engine_command(backend, args);
        if !location.is_volume() {
            return inner;
        }

        let volume = location.from().first().cloned().unwrap_or_default();
        let mut docker = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{volume}:{VOLUME_MOUNT}"),
        ];
        if *backend.kind() == BackendType::Local {
            if let Some(repository) = inner.env.get("RESTIC_REPOSITORY") {
                docker.extend(["-v".to_string(), format!("{repository}:{repository}")]);
            }
        }
        for key in inner.env.keys() {
            docker.extend(["-e".to_string(), key.clone()]);
        }
        docker.push(VOLUME_IMAGE.to_string());
        docker.extend(inner.args);

        CommandSpec {
            program: "docker".to_string(),
            args: docker,
            env: inner.env,
            dir: inner.dir,
        }
    }

    pub fn exec_args(&self, backend: &Backend, extra: &[String]) -> Vec<String> {
        let mut args = self.config.backend_options("exec", backend);
        args.extend(extra.iter().cloned());
        args
    }

    fn backend_for(&self, location: &Location, name: &str) -> Result<&'a Backend> {
        self.config.backend(name).ok_or_else(|| Error::UnknownBackend {
            location: location.name().clone(),
            backend: name.to_string(),
        })
    }

    fn run_hooks(&self, location: &Location, phase: &str, hooks: &[String]) -> Result<()> {
        for hook in hooks {
            info!("Running {phase} hook for \"{}\": {hook}", location.name());
            let mut command = CommandSpec::shell(hook.as_str()).with_env(BTreeMap::from([(
                "AUTORESTIC_LOCATION".to_string(),
                location.name().clone(),
            )]));
            if !self.config.base_dir.as_os_str().is_empty() {
                command = command.with_dir(self.config.base_dir.clone());
            }
            self.executor
                .run(&command)
                .with_msg(format!("{phase} hook failed: {hook}"))?;
        }
        Ok(())
    }

    fn check_sources(&self, location: &Location) -> Result<()> {
        if location.is_volume() {
            let volume = location.from().first().cloned().unwrap_or_default();
            let inspect = CommandSpec::new("docker", vec!["volume".to_string(), "inspect".to_string(), volume.clone()]);
            return self
                .executor
                .run(&inspect)
                .map(|_| ())
                .with_msg(format!("Volume {volume:?} not found"));
        }

        let mut errors = ValidationErrors::new();
        for path in location.from() {
            if let Err(e) = validate_path_exist(self.config.resolve_path(path)) {
                errors.add("from", e);
            }
        }
        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }

    #[named]
    fn backup_to_backend(&self, location: &Location, backend_name: &str) -> Result<()> {
        let backend = self.backend_for(location, backend_name)?;
        let command = self.location_command(location, backend, self.backup_args(location, backend));
        debug!("Backup command for \"{}\": {:?}", location.name(), command.args);
        self.executor
            .run(&command)
            .map(|out| {
                info!("Backed up \"{}\" to \"{backend_name}\"", location.name());
                tracing::trace!("{}", out.stdout);
            })
            .and_then(|_| {
                location
                    .copy_targets(backend_name)
                    .iter()
                    .try_for_each(|destination| self.copy_snapshots(location, backend, destination))
            })
            .with_debug_object_and_fn_name(
                (location.name().clone(), backend_name.to_string()),
                function_path!(),
            )
    }

    /// Copies this location's snapshots from `source` into another backend.
    /// The source repository is handed over as `RESTIC_FROM_*`.
    fn copy_snapshots(&self, location: &Location, source: &Backend, destination_name: &str) -> Result<()> {
        let destination = self.backend_for(location, destination_name)?;
        info!(
            "Copying \"{}\" from \"{}\" to \"{destination_name}\"",
            location.name(),
            source.name()
        );
        let mut command = self.engine_command(destination, self.copy_args(location, destination));
        let mut source_env = source.engine_env(&self.config.base_dir);
        for (from, to) in [
            ("RESTIC_REPOSITORY", "RESTIC_FROM_REPOSITORY"),
            ("RESTIC_PASSWORD", "RESTIC_FROM_PASSWORD"),
        ] {
            if let Some(value) = source_env.remove(from) {
                command.env.insert(to.to_string(), value);
            }
        }
        for (key, value) in source_env {
            command.env.entry(key).or_insert(value);
        }
        self.executor.run(&command).map(|_| ())
    }

    /// Hooks, one backup per target backend, then the forget policy.
    ///
    /// `prevalidate` runs before the sources are checked. A failure there or
    /// in `before` skips the backends. `failure` or `success` runs
    /// depending on the outcome and `after` runs in every case.
    pub fn backup_location(&self, location: &Location, targets: &[String]) -> Result<()> {
        let name = location.name();
        info!("Backing up location \"{name}\" to {targets:?}");

        let backed_up = self
            .run_hooks(location, "prevalidate", location.hooks().prevalidate())
            .and_then(|_| self.check_sources(location))
            .and_then(|_| self.run_hooks(location, "before", location.hooks().before()))
            .and_then(|_| {
                let errors = targets
                    .iter()
                    .filter_map(|backend| self.backup_to_backend(location, backend).err())
                    .collect_vec();
                convert_error_vec(errors)
            });

        let outcome = match backed_up {
            Ok(()) => self.run_hooks(location, "success", location.hooks().success()),
            Err(e) => match self.run_hooks(location, "failure", location.hooks().failure()) {
                Ok(()) => Err(e),
                Err(hook_error) => Err(e.chain(hook_error)),
            },
        };
        match (outcome, self.run_hooks(location, "after", location.hooks().after())) {
            (Ok(()), Ok(())) => {}
            (Err(e), Ok(())) | (Ok(()), Err(e)) => return Err(e),
            (Err(e1), Err(e2)) => return Err(e1.chain(e2)),
        }

        if let Some(policy) = location.forget() {
            self.forget_location(location, targets, *policy == ForgetPolicy::Prune, false)?;
        }
        info!("Location \"{name}\" done");
        Ok(())
    }

    #[named]
    pub fn forget_location(&self, location: &Location, targets: &[String], prune: bool, dry_run: bool) -> Result<()> {
        let prune = prune || *location.forget() == Some(ForgetPolicy::Prune);
        let errors = targets
            .iter()
            .filter_map(|backend_name| {
                info!("Forgetting snapshots of \"{}\" on \"{backend_name}\"", location.name());
                self.backend_for(location, backend_name)
                    .and_then(|backend| {
                        let command = self.engine_command(backend, self.forget_args(location, backend, prune, dry_run));
                        debug!("Forget command for \"{}\": {:?}", location.name(), command.args);
                        self.executor.run(&command)
                    })
                    .with_debug_object_and_fn_name(
                        (location.name().clone(), backend_name.clone()),
                        function_path!(),
                    )
                    .err()
            })
            .collect_vec();
        convert_error_vec(errors)
    }

    /// Restores `snapshot` of a location from `from` (its first backend by
    /// default) into `target`. Volume locations restore into their volume.
    #[named]
    pub fn restore(&self, location_name: &str, from: Option<&str>, target: Option<&Path>, snapshot: &str) -> Result<()> {
        let location = self
            .config
            .location(location_name)
            .ok_or_else(|| Error::InvalidSelection {
                kind: SelectionKind::Location,
                selector: location_name.to_string(),
            })?;
        let backend_name = from
            .or_else(|| location.to().first().map(String::as_str))
            .filter(|name| location.has_backend(name))
            .ok_or_else(|| Error::InvalidSelection {
                kind: SelectionKind::Backend,
                selector: from.unwrap_or_default().to_string(),
            })?;
        let backend = self.backend_for(location, backend_name)?;

        let target = if location.is_volume() {
            "/".to_string()
        } else {
            let target = target.ok_or_else(|| Error::MissingRestoreTarget {
                location: location_name.to_string(),
            })?;
            self.config.resolve_path(target).to_string_lossy().into_owned()
        };

        info!("Restoring \"{location_name}\" from \"{backend_name}\" into {target:?}");
        let command = self.location_command(location, backend, self.restore_args(location, backend, &target, snapshot));
        debug!("Restore command for \"{location_name}\": {:?}", command.args);
        self.executor
            .run(&command)
            .map(|_| ())
            .with_debug_object_and_fn_name(
                (location_name.to_string(), backend_name.to_string()),
                function_path!(),
            )
    }

    /// Runs `job` for each location in `order`.
    ///
    /// A failed location does not stop the run, but any later location that
    /// depends on it (directly or through a skipped location) is skipped.
    fn run_in_order<F: FnMut(&Location) -> Result<()>>(&self, order: &[String], mut job: F) -> Result<()> {
        let mut failed: BTreeSet<&str> = BTreeSet::new();
        let mut errors = Vec::new();
        for name in order {
            let Some(location) = self.config.location(name) else {
                errors.push(Error::InvalidSelection {
                    kind: SelectionKind::Location,
                    selector: name.clone(),
                });
                failed.insert(name);
                continue;
            };
            if let Some(dependency) = location
                .depends_on()
                .iter()
                .find(|dep| failed.contains(dep.as_str()))
            {
                warn!("Skipping \"{name}\", dependency \"{dependency}\" did not complete");
                errors.push(Error::DependencyFailed {
                    location: name.clone(),
                    dependency: dependency.clone(),
                });
                failed.insert(name);
                continue;
            }
            if let Err(e) = job(location) {
                warn!("Location \"{name}\" failed: {e}");
                errors.push(e.with_msg(format!("Location \"{name}\" failed")));
                failed.insert(name);
            }
        }
        convert_error_vec(errors)
    }

    /// Backs up `locations`, which must already be in dependency order.
    pub fn backup(&self, locations: &[String], selectors: &[Selector]) -> Result<()> {
        check_backend_tags(selectors, self.config)?;
        self.run_in_order(locations, |location| {
            self.backup_location(location, &targets(location, selectors))
        })
    }

    pub fn forget(&self, locations: &[String], selectors: &[Selector], prune: bool, dry_run: bool) -> Result<()> {
        check_backend_tags(selectors, self.config)?;
        self.run_in_order(locations, |location| {
            self.forget_location(location, &targets(location, selectors), prune, dry_run)
        })
    }

    /// Runs raw engine arguments against each backend. Priority of the
    /// composed options: backend > global.
    pub fn exec<F: FnMut(&str, &CommandOutput)>(&self, backends: &[String], args: &[String], mut on_output: F) -> Result<()> {
        let mut errors = Vec::new();
        for name in backends {
            let Some(backend) = self.config.backend(name) else {
                errors.push(Error::InvalidSelection {
                    kind: SelectionKind::Backend,
                    selector: name.clone(),
                });
                continue;
            };
            info!("Executing on \"{name}\"");
            let command = self.engine_command(backend, self.exec_args(backend, args));
            match self.executor.run(&command) {
                Ok(out) => on_output(name, &out),
                Err(e) => errors.push(e.with_msg(format!("Backend \"{name}\" failed"))),
            }
        }
        convert_error_vec(errors)
    }

    /// Reads and, when due, advances a location's last firing. The schedule
    /// lock is held for this location only.
    fn claim_if_due(&self, store: &ScheduleStore, location: &Location, now: DateTime<Utc>) -> Result<bool> {
        let mut guard = store.lock()?;
        let due = location.is_due(guard.get(location.name()), now)?;
        if due {
            guard.set(location.name(), now.timestamp())?;
        }
        Ok(due)
    }

    /// Backs up every scheduled location that is due at `now`.
    ///
    /// Invalid schedules are reported per location and do not stop the pass.
    pub fn run_cron(&self, store: &ScheduleStore, now: DateTime<Utc>) -> Result<()> {
        let order = sort_locations_from_map(&self.config.locations)?;
        let mut errors = Vec::new();
        let mut due = Vec::new();
        for name in order {
            let Some(location) = self.config.location(&name) else {
                continue;
            };
            if !location.is_scheduled() {
                continue;
            }
            match self.claim_if_due(store, location, now) {
                Ok(true) => {
                    info!("Location \"{name}\" is due");
                    due.push(name);
                }
                Ok(false) => debug!("Location \"{name}\" is not due"),
                Err(e) => {
                    warn!("{e}");
                    errors.push(e);
                }
            }
        }

        if let Err(e) = self.backup(&due, &[]) {
            errors.push(e);
        }
        convert_error_vec(errors).with_msg("Encountered errors during cron process")
    }

    /// Earliest upcoming firing across all scheduled locations.
    pub fn next_wakeup(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.config
            .locations
            .values()
            .filter(|l| l.is_scheduled())
            .filter_map(|l| next_firing(l.cron(), after).ok())
            .min()
    }

    /// Runs cron passes forever, sleeping until the next firing in between.
    /// Returns when no location has a schedule.
    pub fn start_loop(&self, store: &ScheduleStore, run_lock: &Path) -> Result<()> {
        loop {
            match RunLock::acquire(run_lock) {
                Ok(_lock) => {
                    if let Err(e) = self.run_cron(store, Utc::now()) {
                        error!("{e}");
                    }
                }
                Err(Error::AlreadyRunning(path)) => {
                    warn!("Skipping cron pass, lock {:?} is held", path)
                }
                Err(e) => return Err(e),
            }

            let now = Utc::now();
            let Some(next) = self.next_wakeup(now) else {
                warn!("No location has a cron schedule, stopping");
                return Ok(());
            };
            info!("Sleeping until {next}");
            std::thread::sleep((next - now).to_std().unwrap_or_default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::config::tests::sample;
    use crate::backup::exec::tests::{succeeding, FakeExecutor};
    use crate::backup::location::{Hooks, LocationType};
    use crate::backup::selection::resolve;
    use chrono::TimeZone;

    /// Config with real source directories so source checks pass.
    fn local_config(dir: &Path) -> Config {
        let mut config = sample();
        config.base_dir = dir.to_path_buf();
        for location in config.locations.values_mut() {
            let from = location
                .from()
                .iter()
                .map(|p| {
                    let rel = p.trim_start_matches('/').replace('/', "_");
                    std::fs::create_dir_all(dir.join(&rel)).unwrap();
                    rel
                })
                .collect_vec();
            *location = Location::builder()
                .name(location.name().clone())
                .from(from)
                .to(location.to().clone())
                .depends_on(location.depends_on().clone())
                .cron(location.cron().clone())
                .options(location.options().clone())
                .hooks(location.hooks().clone())
                .maybe_forget(*location.forget())
                .build();
        }
        config
    }

    fn args_of(calls: &[CommandSpec]) -> Vec<Vec<String>> {
        calls.iter().map(|c| c.args.clone()).collect()
    }

    fn subcommand_location(command: &CommandSpec) -> Option<(String, String)> {
        let sub = command.args.iter().find(|a| *a == "backup" || *a == "forget")?;
        let location = command.args.iter().find_map(|a| a.strip_prefix("ar:location:"))?;
        Some((sub.clone(), location.to_string()))
    }

    #[test]
    fn test_backup_args_compose_all_layers() {
        let config = sample();
        let orchestrator = Orchestrator::new(&config, succeeding(), "restic");
        let home = config.location("home").unwrap();
        let hdd = config.backend("hdd").unwrap();

        assert_eq!(
            orchestrator.backup_args(home, hdd),
            vec![
                "backup",
                "--limit-upload",
                "100",
                "--tag",
                "home",
                "--exclude",
                "*.tmp",
                "--exclude",
                "*.log",
                "--limit-upload",
                "50",
                "--tag",
                "ar:location:home",
                "/home/me",
                "/etc",
            ]
        );
    }

    #[test]
    fn test_engine_command_prepends_global_flags_and_env() {
        let config = sample();
        let orchestrator = Orchestrator::new(&config, succeeding(), "/usr/bin/restic");
        let cloud = config.backend("cloud").unwrap();

        let command = orchestrator.engine_command(cloud, vec!["snapshots".to_string()]);
        assert_eq!(command.program, "/usr/bin/restic");
        assert_eq!(command.args, vec!["--cache-dir", "/var/cache/restic", "snapshots"]);
        assert_eq!(command.env["RESTIC_REPOSITORY"], "b2:bucket:/repo");
        assert_eq!(command.env["RESTIC_PASSWORD"], "another");
        assert_eq!(command.env["B2_ACCOUNT_ID"], "id");
        assert_eq!(command.dir.as_deref(), Some(Path::new("/etc/autorestic")));
    }

    #[test]
    fn test_forget_args() {
        let config = sample();
        let orchestrator = Orchestrator::new(&config, succeeding(), "restic");
        let db = config.location("db").unwrap();
        let hdd = config.backend("hdd").unwrap();

        assert_eq!(
            orchestrator.forget_args(db, hdd, true, true),
            vec!["forget", "--prune", "--dry-run", "--tag", "ar:location:db", "--keep-daily", "7"]
        );
    }

    #[test]
    fn test_exec_uses_backend_scope() {
        let config = sample();
        let fake = succeeding();
        let orchestrator = Orchestrator::new(&config, &fake, "restic");
        let mut seen = Vec::new();

        orchestrator
            .exec(&["hdd".to_string()], &["snapshots".to_string()], |name, _| seen.push(name.to_string()))
            .unwrap();

        assert_eq!(seen, vec!["hdd"]);
        assert_eq!(args_of(&fake.calls()), vec![vec!["--cache-dir", "/var/cache/restic", "snapshots"]]);
    }

    #[test]
    fn test_backup_runs_in_dependency_order_with_hooks_and_forget() {
        let dir = tempfile::tempdir().unwrap();
        let config = local_config(dir.path());
        let fake = succeeding();
        let orchestrator = Orchestrator::new(&config, &fake, "restic");

        let order = resolve(true, &[], SelectionKind::Location, &config).unwrap();
        // `media` has no dependency so it is ready alongside `db`
        assert_eq!(order, vec!["db", "media", "home"]);
        orchestrator.backup(&order, &[]).unwrap();

        let runs = fake.calls().iter().filter_map(subcommand_location).collect_vec();
        let expected: Vec<(String, String)> = [
            ("backup", "db"),
            ("backup", "media"),
            ("backup", "home"),
            ("backup", "home"),
            ("forget", "home"),
            ("forget", "home"),
        ]
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();
        assert_eq!(runs, expected);

        let home_forget = fake
            .calls()
            .into_iter()
            .find(|c| c.args.contains(&"forget".to_string()))
            .unwrap();
        assert!(home_forget.args.contains(&"--prune".to_string()));
    }

    #[test]
    fn test_selector_tag_limits_backends() {
        let dir = tempfile::tempdir().unwrap();
        let config = local_config(dir.path());
        let fake = succeeding();
        let orchestrator = Orchestrator::new(&config, &fake, "restic");

        let selectors = vec![Selector::parse("home@cloud")];
        let order = resolve(false, &selectors, SelectionKind::Location, &config).unwrap();
        orchestrator.backup(&order, &selectors).unwrap();

        let repositories = fake
            .calls()
            .iter()
            .map(|c| c.env["RESTIC_REPOSITORY"].clone())
            .unique()
            .collect_vec();
        assert_eq!(repositories, vec!["b2:bucket:/repo"]);
    }

    #[test]
    fn test_selector_tag_outside_targets_rejected_before_running() {
        let config = sample();
        let fake = succeeding();
        let orchestrator = Orchestrator::new(&config, &fake, "restic");

        let selectors = vec![Selector::parse("db@cloud")];
        let err = orchestrator.backup(&["db".to_string()], &selectors).unwrap_err();
        assert!(matches!(err, Error::InvalidSelection { selector, .. } if selector == "db@cloud"));
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn test_failure_skips_dependents_but_not_independent_locations() {
        let dir = tempfile::tempdir().unwrap();
        let config = local_config(dir.path());
        let fake = FakeExecutor::new(|c: &CommandSpec| c.args.contains(&"ar:location:db".to_string()));
        let orchestrator = Orchestrator::new(&config, &fake, "restic");

        let order = resolve(true, &[], SelectionKind::Location, &config).unwrap();
        let err = orchestrator.backup(&order, &[]).unwrap_err();

        let errors = err.into_iter().collect_vec();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| matches!(
            e,
            Error::DependencyFailed { location, dependency } if location == "home" && dependency == "db"
        )));

        let attempted = fake.calls().iter().filter_map(subcommand_location).map(|(_, l)| l).collect_vec();
        assert_eq!(attempted, vec!["db", "media"]);
    }

    #[test]
    fn test_missing_source_fails_location_and_runs_failure_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = local_config(dir.path());
        config.locations.insert(
            "ghost".to_string(),
            Location::builder()
                .name("ghost")
                .from(vec!["does-not-exist".to_string()])
                .to(vec!["hdd".to_string()])
                .hooks(
                    Hooks::builder()
                        .failure(vec!["echo failed".to_string()])
                        .after(vec!["echo after".to_string()])
                        .build(),
                )
                .build(),
        );
        let fake = succeeding();
        let orchestrator = Orchestrator::new(&config, &fake, "restic");

        let err = orchestrator.backup(&["ghost".to_string()], &[]).unwrap_err();
        assert!(err.into_iter().any(|e| matches!(e.root(), Error::ValidationError(_))));
        assert_eq!(
            args_of(&fake.calls()),
            vec![vec!["-c", "echo failed"], vec!["-c", "echo after"]]
        );
    }

    #[test]
    fn test_before_hook_failure_skips_backends() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = local_config(dir.path());
        let db = config.locations.get_mut("db").unwrap();
        *db = Location::builder()
            .name("db")
            .from(db.from().clone())
            .to(db.to().clone())
            .hooks(
                Hooks::builder()
                    .before(vec!["pg_dump".to_string()])
                    .success(vec!["echo ok".to_string()])
                    .failure(vec!["echo failed".to_string()])
                    .build(),
            )
            .build();
        let fake = FakeExecutor::new(|c: &CommandSpec| c.args.contains(&"pg_dump".to_string()));
        let orchestrator = Orchestrator::new(&config, &fake, "restic");

        assert!(orchestrator.backup(&["db".to_string()], &[]).is_err());
        let programs = fake.calls().iter().map(|c| c.program.clone()).collect_vec();
        assert_eq!(programs, vec!["sh", "sh"]);
        assert_eq!(fake.calls()[1].args, vec!["-c", "echo failed"]);
        assert_eq!(fake.calls()[1].env["AUTORESTIC_LOCATION"], "db");
    }

    #[test]
    fn test_run_cron_fires_due_locations_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = local_config(dir.path());
        let store = ScheduleStore::new(dir.path().join(".autorestic.lock.yml"));
        let fake = succeeding();
        let orchestrator = Orchestrator::new(&config, &fake, "restic");

        let now = Utc.with_ymd_and_hms(2024, 5, 1, 4, 0, 0).unwrap();
        orchestrator.run_cron(&store, now).unwrap();

        let fired = fake
            .calls()
            .iter()
            .filter_map(subcommand_location)
            .filter(|(sub, _)| sub == "backup")
            .map(|(_, l)| l)
            .unique()
            .collect_vec();
        assert_eq!(fired, vec!["db", "home"]);
        {
            let guard = store.lock().unwrap();
            assert_eq!(guard.get("db"), Some(now.timestamp()));
            assert_eq!(guard.get("home"), Some(now.timestamp()));
            assert_eq!(guard.get("media"), None);
        }

        let calls_before = fake.calls().len();
        orchestrator.run_cron(&store, now).unwrap();
        assert_eq!(fake.calls().len(), calls_before);
    }

    #[test]
    fn test_run_cron_reports_invalid_schedule_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = local_config(dir.path());
        let media = config.locations.get_mut("media").unwrap();
        *media = Location::builder()
            .name("media")
            .from(media.from().clone())
            .to(media.to().clone())
            .cron("not a cron")
            .build();
        let store = ScheduleStore::new(dir.path().join("state.yml"));
        let fake = succeeding();
        let orchestrator = Orchestrator::new(&config, &fake, "restic");

        let err = orchestrator
            .run_cron(&store, Utc.with_ymd_and_hms(2024, 5, 1, 4, 0, 0).unwrap())
            .unwrap_err();

        let errors = match err.root() {
            Error::LotsOfError(errors) => errors,
            other => panic!("Expected LotsOfError, got {other:?}"),
        };
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            Error::InvalidCronExpression { location, .. } if location == "media"
        ));
        assert!(fake.calls().iter().filter_map(subcommand_location).any(|(_, l)| l == "db"));
    }

    #[test]
    fn test_restore_args() {
        let config = sample();
        let orchestrator = Orchestrator::new(&config, succeeding(), "restic");
        let foo = Location::builder().name("foo").build();
        let hdd = config.backend("hdd").unwrap();

        assert_eq!(
            orchestrator.restore_args(&foo, hdd, "to", "snapshot"),
            vec!["restore", "--target", "to", "--tag", "ar:location:foo", "snapshot"]
        );
        let home = config.location("home").unwrap();
        assert_eq!(
            orchestrator.restore_args(home, hdd, "to", "snapshot"),
            vec!["restore", "--target", "to", "--tag", "ar:location:home", "snapshot", "--tag", "home"]
        );
    }

    #[test]
    fn test_restore_defaults_to_first_backend() {
        let config = sample();
        let fake = succeeding();
        let orchestrator = Orchestrator::new(&config, &fake, "restic");

        orchestrator
            .restore("home", None, Some(Path::new("restored")), "latest")
            .unwrap();

        let calls = fake.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].env["RESTIC_REPOSITORY"], "/mnt/hdd");
        assert_eq!(
            calls[0].args,
            vec![
                "--cache-dir",
                "/var/cache/restic",
                "restore",
                "--target",
                "/etc/autorestic/restored",
                "--tag",
                "ar:location:home",
                "latest",
                "--tag",
                "home",
            ]
        );
    }

    #[test]
    fn test_restore_rejects_bad_requests() {
        let config = sample();
        let fake = succeeding();
        let orchestrator = Orchestrator::new(&config, &fake, "restic");
        let target = Some(Path::new("/tmp/restore"));

        assert!(matches!(
            orchestrator.restore("home", None, None, "latest"),
            Err(Error::MissingRestoreTarget { location }) if location == "home"
        ));
        assert!(matches!(
            orchestrator.restore("db", Some("cloud"), target, "latest"),
            Err(Error::InvalidSelection { kind: SelectionKind::Backend, selector }) if selector == "cloud"
        ));
        assert!(matches!(
            orchestrator.restore("ghost", None, target, "latest"),
            Err(Error::InvalidSelection { kind: SelectionKind::Location, .. })
        ));
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn test_copy_after_backup_reads_from_source_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = local_config(dir.path());
        let db = config.locations.get_mut("db").unwrap();
        *db = Location::builder()
            .name("db")
            .from(db.from().clone())
            .to(db.to().clone())
            .copy(BTreeMap::from([("hdd".to_string(), vec!["cloud".to_string()])]))
            .build();
        assert!(config.check().is_ok());
        let fake = succeeding();
        let orchestrator = Orchestrator::new(&config, &fake, "restic");

        orchestrator.backup(&["db".to_string()], &[]).unwrap();

        let calls = fake.calls();
        assert_eq!(calls.len(), 2);
        let copy = &calls[1];
        assert_eq!(copy.args, vec!["--cache-dir", "/var/cache/restic", "copy", "--tag", "ar:location:db"]);
        assert_eq!(copy.env["RESTIC_REPOSITORY"], "b2:bucket:/repo");
        assert_eq!(copy.env["RESTIC_PASSWORD"], "another");
        assert_eq!(copy.env["RESTIC_FROM_REPOSITORY"], "/mnt/hdd");
        assert_eq!(copy.env["RESTIC_FROM_PASSWORD"], "hunter22");
        assert_eq!(copy.env["B2_ACCOUNT_ID"], "id");
    }

    #[test]
    fn test_failed_copy_fails_location() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = local_config(dir.path());
        let db = config.locations.get_mut("db").unwrap();
        *db = Location::builder()
            .name("db")
            .from(db.from().clone())
            .to(db.to().clone())
            .copy(BTreeMap::from([("hdd".to_string(), vec!["cloud".to_string()])]))
            .build();
        let fake = FakeExecutor::new(|c: &CommandSpec| c.args.contains(&"copy".to_string()));
        let orchestrator = Orchestrator::new(&config, &fake, "restic");

        assert!(orchestrator.backup(&["db".to_string()], &[]).is_err());
    }

    #[test]
    fn test_volume_location_runs_engine_in_container() {
        let mut config = sample();
        config.locations.insert(
            "app".to_string(),
            Location::builder()
                .name("app")
                .kind(LocationType::Volume)
                .from(vec!["app-data".to_string()])
                .to(vec!["hdd".to_string()])
                .build(),
        );
        let fake = succeeding();
        let orchestrator = Orchestrator::new(&config, &fake, "restic");

        orchestrator.backup(&["app".to_string()], &[]).unwrap();

        let calls = fake.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].program, "docker");
        assert_eq!(calls[0].args, vec!["volume", "inspect", "app-data"]);
        assert_eq!(calls[1].program, "docker");
        assert_eq!(
            calls[1].args,
            vec![
                "run",
                "--rm",
                "-v",
                "app-data:/data",
                "-v",
                "/mnt/hdd:/mnt/hdd",
                "-e",
                "RESTIC_PASSWORD",
                "-e",
                "RESTIC_REPOSITORY",
                "restic/restic",
                "--cache-dir",
                "/var/cache/restic",
                "backup",
                "--limit-upload",
                "100",
                "--tag",
                "ar:location:app",
                "/data",
            ]
        );
    }

    #[test]
    fn test_prevalidate_runs_before_source_check() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = local_config(dir.path());
        config.locations.insert(
            "late".to_string(),
            Location::builder()
                .name("late")
                .from(vec!["mounted-later".to_string()])
                .to(vec!["hdd".to_string()])
                .hooks(
                    Hooks::builder()
                        .prevalidate(vec!["mount it".to_string()])
                        .before(vec!["echo before".to_string()])
                        .build(),
                )
                .build(),
        );
        let mount_dir = dir.path().join("mounted-later");
        let fake = FakeExecutor::new(|c: &CommandSpec| {
            if c.args.contains(&"mount it".to_string()) {
                std::fs::create_dir_all(&mount_dir).unwrap();
            }
            false
        });
        let orchestrator = Orchestrator::new(&config, &fake, "restic");

        orchestrator.backup(&["late".to_string()], &[]).unwrap();

        let calls = fake.calls();
        assert_eq!(calls[0].args, vec!["-c", "mount it"]);
        assert_eq!(calls[1].args, vec!["-c", "echo before"]);
        assert!(calls[2].args.contains(&"backup".to_string()));
    }

    #[test]
    fn test_prevalidate_failure_skips_before_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = local_config(dir.path());
        config.locations.insert(
            "late".to_string(),
            Location::builder()
                .name("late")
                .from(vec!["var_lib_db".to_string()])
                .to(vec!["hdd".to_string()])
                .hooks(
                    Hooks::builder()
                        .prevalidate(vec!["false".to_string()])
                        .before(vec!["echo before".to_string()])
                        .failure(vec!["echo failed".to_string()])
                        .build(),
                )
                .build(),
        );
        let fake = FakeExecutor::new(|c: &CommandSpec| c.args.contains(&"false".to_string()));
        let orchestrator = Orchestrator::new(&config, &fake, "restic");

        assert!(orchestrator.backup(&["late".to_string()], &[]).is_err());
        assert_eq!(
            args_of(&fake.calls()),
            vec![vec!["-c", "false"], vec!["-c", "echo failed"]]
        );
    }

    #[test]
    fn test_next_wakeup() {
        let config = sample();
        let orchestrator = Orchestrator::new(&config, succeeding(), "restic");
        let after = Utc.with_ymd_and_hms(2024, 5, 1, 2, 30, 0).unwrap();

        assert_eq!(
            orchestrator.next_wakeup(after),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 3, 0, 0).unwrap())
        );
    }
}
