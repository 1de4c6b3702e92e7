use chrono::Utc;
use clap::Parser;
use mongo_backup::backup::backup_config::{BackupConfig, ConfigOverrides};
use mongo_backup::backup::discovery::MongoDatabaseLister;
use mongo_backup::backup::dump::MongoDump;
use mongo_backup::backup::job::BackupJob;
use std::path::PathBuf;
use std::process::exit;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Dump every MongoDB database to a tar archive and delete old archives
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file (YAML or JSON)
    #[arg(short, long, env = "MONGO_BACKUP_CONFIG")]
    config: Option<PathBuf>,

    /// Backup root directory
    #[arg(long, env = "MONGO_BACKUP_OUT_DIR")]
    out_dir: Option<PathBuf>,

    /// MongoDB connection string, its path is replaced by each database name
    #[arg(long, env = "MONGO_BACKUP_URI")]
    uri: Option<String>,

    /// Path to the mongodump binary
    #[arg(long, env = "MONGO_BACKUP_DUMP_BINARY")]
    dump_binary: Option<PathBuf>,

    /// Delete backups older than this, e.g. "3days"
    #[arg(long, env = "MONGO_BACKUP_MAX_AGE")]
    max_age: Option<String>,

    /// Run a single backup even when a cron schedule is configured
    #[arg(long)]
    once: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            out_dir: self.out_dir.clone(),
            uri: self.uri.clone(),
            dump_binary: self.dump_binary.clone(),
            max_age: self.max_age.clone(),
        }
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let args = Args::parse();

    let config = match BackupConfig::load_validated(args.config.as_deref(), &args.overrides()) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    };

    let lister = MongoDatabaseLister::new(config.mongo().uri().clone());
    let dumper = MongoDump::new(config.dump().clone());
    let job = BackupJob::new(&config, &lister, &dumper);

    match config.cron().as_deref() {
        Some(cron) if !args.once => {
            if let Err(e) = job.start_loop(cron) {
                error!("{e}");
            }
            exit(1);
        }
        _ => match job.run_and_notify(Utc::now()) {
            Ok(report) if report.is_success() => {
                info!("{report}");
            }
            Ok(report) => {
                warn!("{report}");
                exit(1);
            }
            Err(e) => {
                error!("{e}");
                exit(1);
            }
        },
    }
}
