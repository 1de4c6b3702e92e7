//! One backup run: discovery, per database dump and archive, retention.

use crate::backup::backup_config::BackupConfig;
use crate::backup::discovery::{discover, DatabaseLister};
use crate::backup::dump::Dumper;
use crate::backup::function_path;
use crate::backup::notifications::Notification;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::retention::PruneReport;
use crate::backup::tar::{archive_folder, TAR_FILE_EXT};
use crate::backup::validate::{create_dir_all, validate_database_name};
use chrono::{DateTime, Utc};
use function_name::named;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct ArchivedDatabase {
    pub database: String,
    pub archive: PathBuf,
    pub files: usize,
}

#[derive(Debug)]
pub struct FailedDatabase {
    pub database: String,
    pub error: Error,
}

/// Outcome of a run that got past discovery
#[derive(Debug)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub archived: Vec<ArchivedDatabase>,
    pub failed: Vec<FailedDatabase>,
    pub pruned: Option<PruneReport>,
}

impl RunReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            archived: Vec::new(),
            failed: Vec::new(),
            pruned: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
            && self
                .pruned
                .as_ref()
                .map_or(true, |pruned| pruned.errors.is_empty())
    }

    pub fn subject(&self) -> String {
        if self.is_success() {
            format!("MongoDB backup succeeded, {} databases", self.archived.len())
        } else {
            format!(
                "MongoDB backup had failures, {} of {} databases failed",
                self.failed.len(),
                self.failed.len() + self.archived.len()
            )
        }
    }
}

impl Display for RunReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Backup run started at {}: {} archived, {} failed",
            self.started_at,
            self.archived.len(),
            self.failed.len()
        )?;
        for archived in &self.archived {
            writeln!(
                f,
                "archived {:?} to {:?} ({} files)",
                archived.database, archived.archive, archived.files
            )?;
        }
        for failed in &self.failed {
            writeln!(
                f,
                "failed {:?}:\n{}",
                failed.database,
                indent::indent_all_with("  ", failed.error.to_string())
            )?;
        }
        if let Some(pruned) = &self.pruned {
            for removed in &pruned.removed {
                writeln!(f, "pruned {:?}", removed)?;
            }
            for error in &pruned.errors {
                writeln!(
                    f,
                    "prune error:\n{}",
                    indent::indent_all_with("  ", error.to_string())
                )?;
            }
        }
        Ok(())
    }
}

pub struct BackupJob<'a, L: ?Sized, D: ?Sized> {
    config: &'a BackupConfig,
    lister: &'a L,
    dumper: &'a D,
}

impl<'a, L: DatabaseLister + ?Sized, D: Dumper + ?Sized> BackupJob<'a, L, D> {
    pub fn new(config: &'a BackupConfig, lister: &'a L, dumper: &'a D) -> Self {
        Self {
            config,
            lister,
            dumper,
        }
    }

    /// `out_dir/<database>_<millis>` and the matching `.tar` path
    pub fn backup_paths(&self, database: &str, now: DateTime<Utc>) -> (PathBuf, PathBuf) {
        let base_name = format!("{}_{}", database, now.timestamp_millis());
        let out_dir = self.config.out_dir();
        (
            out_dir.join(&base_name),
            out_dir.join(format!("{base_name}.{TAR_FILE_EXT}")),
        )
    }

    /// Runs discovery, backs up each database in isolation, then applies retention.
    ///
    /// Only failures before the per database loop (backup root, discovery)
    /// are returned as errors, everything else lands in the report.
    #[named]
    pub fn run(&self, now: DateTime<Utc>) -> Result<RunReport> {
        let out_dir = self.config.out_dir();
        if !out_dir.is_dir() {
            create_dir_all(out_dir)
                .map_err(Error::from)
                .add_msg(format!("Cannot create backup folder {:?}", out_dir))
                .add_fn_name(function_path!())?;
            tracing::info!("Folder {:?} has been created", out_dir);
        }

        let databases = discover(self.lister, self.config.mongo().exclude())
            .add_msg("Database discovery failed")
            .add_fn_name(function_path!())?;

        let mut report = RunReport::new(now);
        for database in databases {
            let span = tracing::info_span!("database", name = %database);
            let _enter = span.enter();

            match self.backup_database(&database, now) {
                Ok(archived) => {
                    tracing::info!("Backup for {:?} has been finished", database);
                    report.archived.push(archived);
                }
                Err(error) => {
                    tracing::error!("Backup for {:?} failed: {}", database, error);
                    report.failed.push(FailedDatabase { database, error });
                }
            }
        }

        if let Some(retention) = self.config.retention() {
            report.pruned = Some(retention.prune(out_dir, now));
        }

        tracing::info!(
            "Backup run finished: {} archived, {} failed",
            report.archived.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Dump, archive and clean up a single database
    ///
    /// The dump folder is removed whatever the outcome.
    #[named]
    pub fn backup_database(&self, database: &str, now: DateTime<Utc>) -> Result<ArchivedDatabase> {
        validate_database_name(database)
            .map_err(|_| Error::unsafe_database_name(database))
            .add_fn_name(function_path!())?;

        let (folder, archive) = self.backup_paths(database, now);
        tracing::info!(
            "Start backup for database: {:?} on folder: {:?}",
            database,
            folder
        );

        let res = self.dump_and_archive(database, &folder, &archive);

        tracing::info!("Cleanup backup folder {:?}", folder);
        let res = match (res, remove_dump_folder(&folder)) {
            (Ok(files), Ok(_)) => Ok(files),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(_)) => Err(e),
            (Err(e1), Err(e2)) => Err(e1.chain(e2)),
        };

        res.map(|files| ArchivedDatabase {
            database: database.to_string(),
            archive,
            files,
        })
        .add_fn_name(function_path!())
    }

    fn dump_and_archive(&self, database: &str, folder: &Path, archive: &Path) -> Result<usize> {
        let uri = self.config.mongo().uri().for_database(database);
        self.dumper.dump(database, &uri, folder)?;

        if !folder.is_dir() {
            return Err(Error::dump_output_missing(database, folder));
        }

        archive_folder(self.config.out_dir(), folder, archive)
    }

    /// Runs once, then reports through the configured notifications.
    pub fn run_and_notify(&self, now: DateTime<Utc>) -> Result<RunReport> {
        match self.run(now) {
            Ok(report) => {
                if !report.is_success() || self.config.notify_on_success() {
                    self.notify(report.subject(), &report);
                }
                Ok(report)
            }
            Err(e) => {
                self.notify("MongoDB backup aborted", &e);
                Err(e)
            }
        }
    }

    fn notify<D1: Display, D2: Display>(&self, topic: D1, msg: D2) {
        for notification in self.config.notifications() {
            if let Err(e) = notification.send(&topic, &msg) {
                tracing::warn!("Failed to send notification: {}", e);
            }
        }
    }

    /// Runs on every `cron` instant, forever
    ///
    /// A failed run is logged and the loop carries on, only an invalid cron
    /// expression ends it.
    pub fn start_loop(&self, cron: &str) -> Result<()> {
        let mut next = next_run(cron, &Utc::now())?;
        loop {
            let now = Utc::now();
            if now < next {
                tracing::info!("Sleeping until {next}");
                std::thread::sleep((next - now).to_std().unwrap_or_default());
                continue;
            }

            tracing::info!("Trying to create backup...");
            match self.run_and_notify(now) {
                Ok(report) if !report.is_success() => {
                    tracing::warn!("Backup run finished with failures:\n{report}")
                }
                Ok(_) => {}
                Err(e) => tracing::error!("{e}"),
            }
            next = next_run(cron, &now)?;
        }
    }
}

fn next_run(cron: &str, after: &DateTime<Utc>) -> Result<DateTime<Utc>> {
    cron_parser::parse(cron, after).map_err(|e| Error::invalid_cron(format!("{cron:?}: {e:?}")))
}

fn remove_dump_folder(folder: &Path) -> Result<()> {
    match std::fs::remove_dir_all(folder) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::from(e).add_msg(format!("Failed to remove {:?}", folder))),
    }
}
