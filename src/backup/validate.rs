//! Validation functions for configuration values.
//!
//! Provides custom validation functions for directories, executables,
//! cron expressions and database names.

use chrono::Utc;
use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

use std::fs::DirBuilder;
use std::path::Path;

#[cfg(unix)]
static OUT_DIR_MODE: u32 = 0o755;

/// Creates `dir` and its parents, `0o755` on unix
pub fn create_dir_all<P: AsRef<Path>>(dir: P) -> std::io::Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(OUT_DIR_MODE);
    }
    builder.create(dir)
}

pub fn validate_dir_exist_or_created<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        create_dir_all(dir).map_err(|e| {
            ValidationError::new("InvalidDirectory").with_message(
                format!("cannot create or access out_dir path {:?}: {}", dir, e).into(),
            )
        })?;
        tracing::info!("Folder {:?} has been created", dir);
    }

    Ok(())
}

pub fn validate_writable_dir<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    validate_dir_exist_or_created(dir)?;
    let md = std::fs::metadata(dir).map_err(|e| {
        ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot access metadata for {:?}: {}", dir, e).into())
    })?;
    if md.permissions().readonly() {
        Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot write to dir {:?}", dir).into()))
    } else {
        Ok(())
    }
}

/// The dump binary must be an existing path or resolvable through `PATH`
pub fn validate_executable<P: AsRef<Path>>(binary: P) -> Result<(), ValidationError> {
    let binary = binary.as_ref();
    which::which(binary).map(|_| ()).map_err(|e| {
        ValidationError::new("InvalidExecutable")
            .with_message(format!("cannot find executable {:?}: {}", binary, e).into())
    })
}

pub fn validate_cron_str<S: AsRef<str>>(cron: S) -> Result<(), ValidationError> {
    let cron = cron.as_ref();
    if cron_parser::parse(cron, &Utc::now()).is_err() {
        return Err(ValidationError::new("InvalidCron")
            .with_message(format!("Invalid cron string: {cron:?}").into()));
    }

    Ok(())
}

/// A database name ends up as a folder name under the backup root
pub fn validate_database_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() || name == "." || name == ".." || !is_sanitized(name) {
        return Err(ValidationError::new("InvalidDatabaseName").with_message(
            format!(
                "Database name {:?} is not a safe file name, sanitized it would be {:?}",
                name,
                sanitize(name)
            )
            .into(),
        ));
    }

    Ok(())
}
