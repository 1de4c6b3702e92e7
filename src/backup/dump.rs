//! Invocation of the external dump binary.
//!
//! The binary is called as
//! `<binary> [extra_args...] --uri=<uri> [--gzip] -o <out_dir>` and waited on
//! synchronously. A non zero exit status fails the dump.

use crate::backup::connection_uri::ConnectionUri;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::validate::validate_executable;

use bon::Builder;
use function_name::named;
use getset::Getters;
use serde::{Deserialize, Serialize};
use validator::Validate;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

static DEFAULT_DUMP_BINARY: &str = "mongodump";

#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, PartialEq, Eq, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct DumpConfig {
    /// Path to `mongodump`, or a name looked up in `PATH`
    #[validate(custom(function = validate_executable))]
    #[serde(default = "default_binary")]
    #[builder(default = default_binary(), into)]
    binary: PathBuf,
    #[serde(default = "default_gzip")]
    #[builder(default = default_gzip())]
    gzip: bool,
    /// Passed before the generated arguments
    #[serde(default)]
    #[builder(default, into)]
    extra_args: Vec<String>,
}

fn default_binary() -> PathBuf {
    DEFAULT_DUMP_BINARY.into()
}

fn default_gzip() -> bool {
    true
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl DumpConfig {
    pub fn args(&self, uri: &ConnectionUri, out_dir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.extra_args.iter().map(OsString::from).collect();
        args.push(format!("--uri={}", uri.as_str()).into());
        if self.gzip {
            args.push("--gzip".into());
        }
        args.push("-o".into());
        args.push(out_dir.as_os_str().to_owned());
        args
    }
}

/// What the dump process left behind
#[derive(Debug)]
pub struct DumpOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl DumpOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Turns a failed exit status into [`Error::DumpFailed`].
    pub fn check<S: Into<String>>(self, database: S) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::dump_failed(
                database,
                self.status.to_string(),
                self.stderr,
            ))
        }
    }
}

pub trait Dumper {
    /// Dumps `database` into `out_dir`, which must not exist yet
    fn dump(&self, database: &str, uri: &ConnectionUri, out_dir: &Path) -> Result<DumpOutput>;
}

/// Runs the configured dump binary as a child process
#[derive(Clone, Debug)]
pub struct MongoDump {
    config: DumpConfig,
}

impl MongoDump {
    pub fn new(config: DumpConfig) -> Self {
        Self { config }
    }
}

impl Dumper for MongoDump {
    #[named]
    fn dump(&self, database: &str, uri: &ConnectionUri, out_dir: &Path) -> Result<DumpOutput> {
        let args = self.config.args(uri, out_dir);
        tracing::info!(
            "Running {:?} for database {:?} with uri {} into {:?}",
            self.config.binary,
            database,
            uri,
            out_dir
        );

        let output = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(Error::from)
            .add_msg(format!("Failed to run {:?}", self.config.binary))
            .add_fn_name(function_path!())?;

        let output = DumpOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !output.stdout.trim().is_empty() {
            tracing::debug!("Dump stdout:\n{}", output.stdout.trim_end());
        }
        // mongodump reports progress on stderr
        if !output.stderr.trim().is_empty() {
            tracing::debug!("Dump stderr:\n{}", output.stderr.trim_end());
        }
        tracing::info!("Dump of {:?} finished with {}", database, output.status);

        output.check(database).add_fn_name(function_path!())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn uri() -> ConnectionUri {
        ConnectionUri::parse("mongodb://localhost:27017/admin?tls=false")
            .unwrap()
            .for_database("shop")
    }

    #[test]
    fn test_args_layout() {
        let config = DumpConfig::builder()
            .binary("/usr/local/bin/mongodump")
            .extra_args(vec!["--quiet".to_string()])
            .build();

        let args = config.args(&uri(), Path::new("/backup/shop_1"));
        assert_eq!(
            args,
            vec![
                OsString::from("--quiet"),
                OsString::from("--uri=mongodb://localhost:27017/shop?tls=false"),
                OsString::from("--gzip"),
                OsString::from("-o"),
                OsString::from("/backup/shop_1"),
            ]
        );
    }

    #[test]
    fn test_args_without_gzip() {
        let config = DumpConfig::builder().gzip(false).build();
        let args = config.args(&uri(), Path::new("out"));
        assert!(!args.contains(&OsString::from("--gzip")));
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn test_dump_config_defaults() {
        let config: DumpConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.binary(), Path::new("mongodump"));
        assert!(*config.gzip());
        assert!(config.extra_args().is_empty());
        assert_eq!(config, DumpConfig::default());
    }

    #[test]
    fn test_dump_config_rejects_unknown_fields() {
        assert!(serde_json::from_str::<DumpConfig>(r#"{"bin": "x"}"#).is_err());
    }

    #[cfg(unix)]
    fn shell_dump(script: &str) -> MongoDump {
        // sh -c <script> <$0> <$1..>: $1 is --uri, $2 --gzip, $3 -o, $4 the folder
        MongoDump::new(
            DumpConfig::builder()
                .binary("sh")
                .extra_args(vec![
                    "-c".to_string(),
                    script.to_string(),
                    "mongodump".to_string(),
                ])
                .build(),
        )
    }

    #[cfg(unix)]
    #[test]
    fn test_successful_dump_writes_output() {
        let temp_dir = TempDir::new().unwrap();
        let out_dir = temp_dir.path().join("shop_1");
        let dumper = shell_dump(
            r#"mkdir -p "$4/shop" && echo "$1" > "$4/shop/uri.txt" && echo done >&2"#,
        );

        let output = dumper.dump("shop", &uri(), &out_dir).unwrap();
        assert!(output.success());
        assert_eq!(output.stderr.trim(), "done");

        let written = std::fs::read_to_string(out_dir.join("shop/uri.txt")).unwrap();
        assert_eq!(written.trim(), "--uri=mongodb://localhost:27017/shop?tls=false");
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_exit_status_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let dumper = shell_dump("echo 'auth failed' >&2; exit 3");

        let err = dumper
            .dump("shop", &uri(), &temp_dir.path().join("shop_1"))
            .unwrap_err();
        match err.root_cause() {
            Error::DumpFailed {
                database, stderr, ..
            } => {
                assert_eq!(database, "shop");
                assert!(stderr.contains("auth failed"));
            }
            e => panic!("Expected DumpFailed, got {e:?}"),
        }
    }

    #[test]
    fn test_missing_binary_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let dumper = MongoDump::new(
            DumpConfig::builder()
                .binary(temp_dir.path().join("no-such-mongodump"))
                .build(),
        );

        let err = dumper
            .dump("shop", &uri(), &temp_dir.path().join("shop_1"))
            .unwrap_err();
        assert!(matches!(err.root_cause(), Error::Io(_)));
    }
}
