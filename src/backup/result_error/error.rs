use crate::backup::result_error::{AddFunctionName, AddMsg};
use itertools::Itertools;
use std::path::PathBuf;
use thiserror::Error;
use thiserror_ext::Construct;

#[derive(Error, Debug, Construct)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    StripPrefix(#[from] std::path::StripPrefixError),
    #[error(transparent)]
    Lettre(#[from] lettre::error::Error),
    #[error(transparent)]
    LettreSmtp(#[from] lettre::transport::smtp::Error),
    #[error("Smtp server rejected message: {0}")]
    SmtpSendError(String),
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),
    #[error("Database name {0:?} is not usable as a file name")]
    UnsafeDatabaseName(String),
    #[error("Connection string {0:?} has no scheme, expected mongodb:// or mongodb+srv://")]
    InvalidConnectionString(String),
    #[error("Dump of database {database:?} exited with {status}:\n{}", indent::indent_all_with("  ", .stderr.as_str()))]
    DumpFailed {
        database: String,
        status: String,
        stderr: String,
    },
    #[error("Dump of database {database:?} did not create output folder {folder:?}")]
    DumpOutputMissing { database: String, folder: PathBuf },
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{} failed:\n{}", fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithFnName { error: Box<Error>, fn_name: String },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

impl<S: Into<String>> AddFunctionName<S> for Error {
    fn add_fn_name(self, fn_name: S) -> Self {
        Error::WithFnName {
            error: Box::new(self),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> AddMsg<S> for Error {
    fn add_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl Error {
    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(Error::into_iter)),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }

    /// Strips `WithMsg` and `WithFnName` layers down to the error that caused them.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::WithMsg { error, .. } | Error::WithFnName { error, .. } => error.root_cause(),
            e => e,
        }
    }
}
