//! # mongo_backup
//!
//! Dumps every database of a MongoDB deployment with `mongodump`, packs each
//! dump into a `.tar` archive and prunes archives past their retention window.
//!
//! ## Features
//!
//! - **Discovery**: lists databases through the MongoDB driver, skipping an exclusion set
//! - **Isolation**: one failing database never stops the others from being backed up
//! - **Retention**: deletes backup files older than a configurable age
//! - **Scheduling**: optional cron expression for running as a long lived process
//! - **Notifications**: optional SMTP report of each run
//!
//! ## Quick Start
//!
//! ```no_run
//! use mongo_backup::backup::backup_config::BackupConfig;
//! use mongo_backup::backup::discovery::MongoDatabaseLister;
//! use mongo_backup::backup::dump::MongoDump;
//! use mongo_backup::backup::job::BackupJob;
//!
//! let config: BackupConfig = serde_yml::from_reader(std::fs::File::open("config.yml")?)?;
//! let lister = MongoDatabaseLister::new(config.mongo().uri().clone());
//! let dumper = MongoDump::new(config.dump().clone());
//!
//! let report = BackupJob::new(&config, &lister, &dumper).run(chrono::Utc::now())?;
//! println!("{report}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
