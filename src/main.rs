use autobackup::backup::config::Config;
use autobackup::backup::exec::ProcessExecutor;
use autobackup::backup::lock::RunLock;
use autobackup::backup::result_error::result::Result;
use autobackup::backup::result_error::WithMsg;
use autobackup::backup::runner::Orchestrator;
use autobackup::backup::schedule::ScheduleStore;
use autobackup::backup::selection::{resolve, SelectionKind, Selector};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::exit;
use tracing::{error, info, Level};

/// Runs restic backups for the locations and backends of a config file
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long, global = true, default_value = ".autorestic.yml")]
    config: PathBuf,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Backup engine binary
    #[arg(long, global = true, default_value = "restic")]
    restic_bin: String,

    /// Schedule state file, `.autorestic.lock.yml` next to the config by default
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the config file
    Check,
    /// Print the parsed config with keys redacted
    Info,
    /// Back up locations
    Backup {
        #[arg(short, long)]
        all: bool,
        /// `name` or `name@backend`, comma separated or repeated
        #[arg(short = 'l', long = "location", value_delimiter = ',')]
        locations: Vec<Selector>,
    },
    /// Forget old snapshots of locations
    Forget {
        #[arg(short, long)]
        all: bool,
        #[arg(short = 'l', long = "location", value_delimiter = ',')]
        locations: Vec<Selector>,
        #[arg(long)]
        prune: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Run raw engine arguments against backends
    Exec {
        #[arg(short, long)]
        all: bool,
        #[arg(short = 'b', long = "backend", value_delimiter = ',')]
        backends: Vec<Selector>,
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Restore a snapshot of one location
    Restore {
        #[arg(short = 'l', long = "location")]
        location: String,
        /// Backend to restore from, the location's first backend by default
        #[arg(long)]
        from: Option<String>,
        /// Target directory, ignored for volume locations
        #[arg(long)]
        to: Option<PathBuf>,
        #[arg(default_value = "latest")]
        snapshot: String,
    },
    /// Back up the locations whose schedule is due
    Cron,
    /// Keep running cron passes until interrupted
    Daemon,
}

fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    if let Err(e) = run(args) {
        error!("{e}");
        exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = Config::load(&args.config)?;
    config
        .check()
        .with_msg(format!("Config validation failed: {:?}", &args.config))?;

    let state = args
        .state
        .unwrap_or_else(|| config.base_dir.join(".autorestic.lock.yml"));
    let run_lock = state.with_file_name(".autorestic.run.lock");
    let store = ScheduleStore::new(&state);
    let orchestrator = Orchestrator::new(&config, ProcessExecutor, args.restic_bin);

    match args.command {
        Command::Check => {
            info!("Everything is fine");
            Ok(())
        }
        Command::Info => {
            print!("{}", serde_yml::to_string(&config)?);
            Ok(())
        }
        Command::Backup { all, locations } => {
            let order = resolve(all, &locations, SelectionKind::Location, &config)?;
            let _lock = RunLock::acquire(&run_lock)?;
            orchestrator.backup(&order, &locations)
        }
        Command::Forget {
            all,
            locations,
            prune,
            dry_run,
        } => {
            let order = resolve(all, &locations, SelectionKind::Location, &config)?;
            let _lock = RunLock::acquire(&run_lock)?;
            orchestrator.forget(&order, &locations, prune, dry_run)
        }
        Command::Exec {
            all,
            backends,
            args: extra,
        } => {
            let names = resolve(all, &backends, SelectionKind::Backend, &config)?;
            let _lock = RunLock::acquire(&run_lock)?;
            orchestrator.exec(&names, &extra, |name, out| {
                println!("{name}:");
                print!("{}", out.stdout);
            })
        }
        Command::Restore {
            location,
            from,
            to,
            snapshot,
        } => {
            let _lock = RunLock::acquire(&run_lock)?;
            orchestrator.restore(&location, from.as_deref(), to.as_deref(), &snapshot)
        }
        Command::Cron => {
            let _lock = RunLock::acquire(&run_lock)?;
            orchestrator.run_cron(&store, Utc::now())
        }
        Command::Daemon => orchestrator.start_loop(&store, &run_lock),
    }
}
