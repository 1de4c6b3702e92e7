use crate::backup::result_error::error::Error;
use crate::backup::result_error::AddMsg;
use bon::Builder;
use chrono::{DateTime, Duration, Utc};
use getset::CopyGetters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use validator::Validate;
use walkdir::WalkDir;

/// Which file time decides a backup's age
#[derive(Clone, Copy, Default, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileTimestamp {
    /// Birth time, the modification time where the platform has none
    #[default]
    Created,
    Modified,
}

impl FileTimestamp {
    pub fn of(&self, metadata: &Metadata) -> std::io::Result<SystemTime> {
        match self {
            FileTimestamp::Created => metadata.created().or_else(|_| metadata.modified()),
            FileTimestamp::Modified => metadata.modified(),
        }
    }
}

#[skip_serializing_none]
#[derive(Clone, Validate, Serialize, Deserialize, Debug, Builder, CopyGetters)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    #[serde(with = "humantime_serde")]
    #[getset(get_copy = "pub")]
    max_age: std::time::Duration,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    timestamp: FileTimestamp,
}

#[derive(Debug, Default)]
pub struct PruneReport {
    pub removed: Vec<PathBuf>,
    pub errors: Vec<Error>,
}

impl PruneReport {
    /// Removes `path`, recording it as removed or failed. A path that is
    /// already gone is neither.
    fn remove(&mut self, path: &Path) {
        match std::fs::remove_file(path) {
            Ok(_) => self.removed.push(path.to_path_buf()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("{:?} already removed", path);
            }
            Err(e) => {
                tracing::warn!("Failed to remove {:?}: {}", path, e);
                self.errors
                    .push(Error::from(e).add_msg(format!("Removing {:?} failed", path)));
            }
        }
    }
}

impl RetentionConfig {
    /// Whether a file stamped `file_time` is past retention at `now`
    pub fn is_expired(&self, file_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match Duration::from_std(self.max_age) {
            Ok(max_age) => now.signed_duration_since(file_time) > max_age,
            // longer than chrono can represent, nothing is that old
            Err(_) => false,
        }
    }

    /// Deletes every regular file under `root` that is past retention at `now`
    ///
    /// Walks recursively without following symlinks. Failures are logged and
    /// collected in the report, a file that is already gone is skipped.
    pub fn prune<P: AsRef<Path>>(&self, root: P, now: DateTime<Utc>) -> PruneReport {
        let root = root.as_ref();
        tracing::info!(
            "Removing files older than {} under {:?}",
            humantime::format_duration(self.max_age),
            root
        );

        let mut report = PruneReport::default();
        for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry under {:?}: {}", root, e);
                    report.errors.push(e.into());
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let file_time = match entry
                .metadata()
                .map_err(Error::from)
                .and_then(|md| self.timestamp.of(&md).map_err(Error::from))
            {
                Ok(t) => DateTime::<Utc>::from(t),
                Err(e) => {
                    tracing::warn!("Cannot read timestamp of {:?}: {}", path, e);
                    report.errors.push(e.add_msg(format!("Reading {:?} failed", path)));
                    continue;
                }
            };

            if !self.is_expired(file_time, now) {
                tracing::trace!("Keeping {:?} from {}", path, file_time);
                continue;
            }

            tracing::info!("Removing out of retention file {:?}", path);
            report.remove(path);
        }

        tracing::info!(
            "Retention removed {} files with {} errors",
            report.removed.len(),
            report.errors.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{File, FileTimes};
    use tempfile::TempDir;

    fn config(secs: u64, timestamp: FileTimestamp) -> RetentionConfig {
        RetentionConfig::builder()
            .max_age(std::time::Duration::from_secs(secs))
            .timestamp(timestamp)
            .build()
    }

    fn write_aged(path: &Path, now: DateTime<Utc>, age_secs: i64) {
        std::fs::write(path, "backup").unwrap();
        let mtime: SystemTime = (now - Duration::seconds(age_secs)).into();
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_times(FileTimes::new().set_modified(mtime))
            .unwrap();
    }

    #[test]
    fn test_is_expired() {
        let now = Utc::now();
        let retention = config(3600, FileTimestamp::Created);
        assert!(!retention.is_expired(now - Duration::seconds(10), now));
        assert!(!retention.is_expired(now - Duration::seconds(3600), now));
        assert!(retention.is_expired(now - Duration::seconds(7200), now));
        assert!(!retention.is_expired(now + Duration::seconds(60), now));
    }

    #[test]
    fn test_prune_removes_only_old_files() {
        let temp_dir = TempDir::new().unwrap();
        let now = Utc::now();
        let fresh = temp_dir.path().join("fresh.tar");
        let stale = temp_dir.path().join("stale.tar");
        write_aged(&fresh, now, 10);
        write_aged(&stale, now, 7200);

        let report = config(3600, FileTimestamp::Modified).prune(temp_dir.path(), now);

        assert!(report.errors.is_empty());
        assert_eq!(report.removed, vec![stale.clone()]);
        assert!(fresh.exists());
        assert!(!stale.exists());
    }

    #[test]
    fn test_second_prune_removes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let now = Utc::now();
        write_aged(&temp_dir.path().join("fresh.tar"), now, 10);
        write_aged(&temp_dir.path().join("stale.tar"), now, 7200);

        let retention = config(3600, FileTimestamp::Modified);
        assert_eq!(retention.prune(temp_dir.path(), now).removed.len(), 1);
        let second = retention.prune(temp_dir.path(), now);
        assert!(second.removed.is_empty());
        assert!(second.errors.is_empty());
    }

    #[test]
    fn test_prune_uses_true_nested_path() {
        let temp_dir = TempDir::new().unwrap();
        let now = Utc::now();
        let nested_dir = temp_dir.path().join("nested");
        std::fs::create_dir(&nested_dir).unwrap();
        let nested = nested_dir.join("old.tar");
        write_aged(&nested, now, 7200);
        // same basename at the top level, must survive
        let top = temp_dir.path().join("old.tar");
        write_aged(&top, now, 10);

        let report = config(3600, FileTimestamp::Modified).prune(temp_dir.path(), now);

        assert_eq!(report.removed, vec![nested.clone()]);
        assert!(!nested.exists());
        assert!(top.exists());
        assert!(nested_dir.is_dir());
    }

    #[test]
    fn test_prune_with_created_timestamp_uses_injected_now() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.tar");
        std::fs::write(&file, "backup").unwrap();
        let retention = config(3600, FileTimestamp::Created);

        let report = retention.prune(temp_dir.path(), Utc::now() + Duration::seconds(10));
        assert!(report.removed.is_empty());
        assert!(file.exists());

        let report = retention.prune(temp_dir.path(), Utc::now() + Duration::seconds(7200));
        assert_eq!(report.removed, vec![file.clone()]);
        assert!(!file.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_prune_does_not_follow_symlinked_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let now = Utc::now();
        let target = outside.path().join("keep.tar");
        write_aged(&target, now, 7200);
        std::os::unix::fs::symlink(outside.path(), temp_dir.path().join("link")).unwrap();

        let report = config(3600, FileTimestamp::Modified).prune(temp_dir.path(), now);
        assert!(report.removed.is_empty());
        assert!(target.exists());
    }

    #[test]
    fn test_prune_missing_root_reports_error() {
        let temp_dir = TempDir::new().unwrap();
        let report = config(3600, FileTimestamp::Modified)
            .prune(temp_dir.path().join("missing"), Utc::now());
        assert!(report.removed.is_empty());
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_remove_vanished_file_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let gone = temp_dir.path().join("gone.tar");
        write_aged(&gone, Utc::now(), 7200);
        std::fs::remove_file(&gone).unwrap();

        let mut report = PruneReport::default();
        report.remove(&gone);
        assert!(report.removed.is_empty());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_remove_failure_is_recorded() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("not_a_file");
        std::fs::create_dir(&dir).unwrap();
        let file = temp_dir.path().join("old.tar");
        write_aged(&file, Utc::now(), 7200);

        let mut report = PruneReport::default();
        report.remove(&dir);
        report.remove(&file);

        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0].root_cause(), Error::Io(_)));
        assert_eq!(report.removed, vec![file.clone()]);
        assert!(dir.is_dir());
        assert!(!file.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_prune_continues_after_removal_failure() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let now = Utc::now();
        let locked_dir = temp_dir.path().join("locked");
        std::fs::create_dir(&locked_dir).unwrap();
        let locked = locked_dir.join("old.tar");
        write_aged(&locked, now, 7200);
        let free = temp_dir.path().join("old.tar");
        write_aged(&free, now, 7200);
        std::fs::set_permissions(&locked_dir, std::fs::Permissions::from_mode(0o555)).unwrap();

        // privileged users ignore directory permissions
        let canary = locked_dir.join("canary");
        let enforced = std::fs::write(&canary, "x").is_err();
        let _ = std::fs::remove_file(&canary);

        let report = config(3600, FileTimestamp::Modified).prune(temp_dir.path(), now);
        std::fs::set_permissions(&locked_dir, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert!(report.removed.contains(&free));
        assert!(!free.exists());
        if enforced {
            assert_eq!(report.errors.len(), 1);
            assert!(locked.exists());
        }
    }

    #[test]
    fn test_retention_config_deserialization() {
        let config: RetentionConfig =
            serde_json::from_str(r#"{"max_age": "3days", "timestamp": "modified"}"#).unwrap();
        assert_eq!(config.max_age(), std::time::Duration::from_secs(3 * 24 * 3600));
        assert_eq!(config.timestamp(), FileTimestamp::Modified);

        let config: RetentionConfig = serde_json::from_str(r#"{"max_age": "3m"}"#).unwrap();
        assert_eq!(config.max_age(), std::time::Duration::from_secs(180));
        assert_eq!(config.timestamp(), FileTimestamp::Created);
    }
}
