//! MongoDB connection string handling.
//!
//! The configured URI is a template: its path names the database the
//! driver authenticates against, and [`ConnectionUri::for_database`]
//! swaps that path for the database being dumped. Display output masks
//! the password so the URI can be logged.
//!
//! Connection strings are validated by the driver's own parser, so
//! replica set host lists (`h1:27017,h2:27017`) and `mongodb+srv://`
//! work. The path is replaced at the string level since a host list is
//! not a valid URL authority.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use mongodb::options::ConnectionString;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Display, Formatter};
use std::ops::Range;

static MASKED_PASSWORD: &str = "***";
static SCHEME_SEPARATOR: &str = "://";

#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionUri {
    uri: String,
    /// `/<db>` between the host list and the query, empty when absent
    path: Range<usize>,
    password: Option<Range<usize>>,
}

impl ConnectionUri {
    pub fn parse<S: AsRef<str>>(uri: S) -> Result<Self> {
        let uri = uri.as_ref();
        let hosts_start = uri
            .find(SCHEME_SEPARATOR)
            .map(|i| i + SCHEME_SEPARATOR.len())
            .ok_or_else(|| Error::invalid_connection_string(uri))?;
        ConnectionString::parse(uri)?;

        let path_start = uri[hosts_start..]
            .find(['/', '?'])
            .map_or(uri.len(), |i| hosts_start + i);
        let path_end = if uri[path_start..].starts_with('/') {
            uri[path_start..]
                .find('?')
                .map_or(uri.len(), |i| path_start + i)
        } else {
            path_start
        };

        // user info ends at the last '@' of the authority, the password after its first ':'
        let password = uri[hosts_start..path_start].rfind('@').and_then(|at| {
            let user_info = hosts_start..hosts_start + at;
            uri[user_info.clone()]
                .find(':')
                .map(|colon| user_info.start + colon + 1..user_info.end)
        });

        Ok(Self {
            uri: uri.to_string(),
            path: path_start..path_end,
            password,
        })
    }

    /// Same hosts, credentials and query, with the path replaced by `/<database>`.
    pub fn for_database<S: AsRef<str>>(&self, database: S) -> Self {
        let path = format!("/{}", database.as_ref());
        let uri = format!(
            "{}{}{}",
            &self.uri[..self.path.start],
            path,
            &self.uri[self.path.end..]
        );
        Self {
            uri,
            path: self.path.start..self.path.start + path.len(),
            password: self.password.clone(),
        }
    }

    /// Full connection string, password included.
    pub fn as_str(&self) -> &str {
        &self.uri
    }
}

impl Display for ConnectionUri {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.password {
            Some(password) => write!(
                f,
                "{}{}{}",
                &self.uri[..password.start],
                MASKED_PASSWORD,
                &self.uri[password.end..]
            ),
            None => f.write_str(&self.uri),
        }
    }
}

impl Debug for ConnectionUri {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnectionUri({self})")
    }
}

impl Serialize for ConnectionUri {
    /// Serializes the masked form, never the password
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConnectionUri {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(raw).map_err(serde::de::Error::custom)
    }
}
