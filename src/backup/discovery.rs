use crate::backup::connection_uri::ConnectionUri;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};

use bon::Builder;
use derive_more::{Deref, Display, From};
use function_name::named;
use getset::Getters;
use globset::{Glob, GlobBuilder, GlobMatcher};
use itertools::Itertools;
use mongodb::sync::Client;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use validator::Validate;

use std::fmt::Formatter;
use std::result;

/// Database the listing connection is scoped to
static ADMIN_DATABASE: &str = "admin";
static DEFAULT_EXCLUDED: [&str; 3] = ["admin", "config", "local"];

/// Where to find the databases and which of them to leave alone
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct MongoConfig {
    #[builder(into)]
    uri: ConnectionUri,
    #[serde(default)]
    #[builder(default, into)]
    exclude: ExclusionSet,
}

/// Prefix of an exclusion matched verbatim, for names holding glob characters
static LITERAL_PREFIX: &str = "literal:";

/// A database name pattern
///
/// Glob syntax (`test_*`) matches many names and a name without glob
/// characters matches only itself. A name containing glob characters such
/// as `db[1]` is written `literal:db[1]` to be matched verbatim.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum NamePattern {
    #[display("literal:{_0}")]
    Literal(String),
    #[display("{_0}")]
    Glob(Glob),
}

impl NamePattern {
    pub fn new<S: AsRef<str>>(pattern: S) -> result::Result<Self, globset::Error> {
        let pattern = pattern.as_ref();
        if let Some(name) = pattern.strip_prefix(LITERAL_PREFIX) {
            return Ok(Self::literal(name));
        }
        GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map(NamePattern::Glob)
    }

    pub fn literal<S: Into<String>>(name: S) -> Self {
        Self::Literal(name.into())
    }

    pub fn matcher(&self) -> NameMatcher<'_> {
        match self {
            NamePattern::Literal(name) => NameMatcher::Literal(name),
            NamePattern::Glob(glob) => NameMatcher::Glob(glob.compile_matcher()),
        }
    }
}

pub enum NameMatcher<'a> {
    Literal(&'a str),
    Glob(GlobMatcher),
}

impl NameMatcher<'_> {
    pub fn is_match(&self, name: &str) -> bool {
        match self {
            NameMatcher::Literal(literal) => *literal == name,
            NameMatcher::Glob(matcher) => matcher.is_match(name),
        }
    }
}

impl Serialize for NamePattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct NamePatternVisitor;

impl Visitor<'_> for NamePatternVisitor {
    type Value = NamePattern;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a database name, a glob pattern or literal:<name>")
    }

    fn visit_str<E>(self, v: &str) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        NamePattern::new(v).map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for NamePattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        deserializer.deserialize_str(NamePatternVisitor)
    }
}

/// Databases that are never backed up, `admin`, `config` and `local` by default
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, From, Deref)]
#[serde(transparent)]
pub struct ExclusionSet(Vec<NamePattern>);

impl Default for ExclusionSet {
    fn default() -> Self {
        DEFAULT_EXCLUDED
            .iter()
            .copied()
            .map(NamePattern::literal)
            .collect_vec()
            .into()
    }
}

impl ExclusionSet {
    /// Drops excluded names, keeping the order of the rest.
    pub fn filter<I: IntoIterator<Item = String>>(&self, names: I) -> Vec<String> {
        let matchers = self.iter().map(NamePattern::matcher).collect_vec();
        names
            .into_iter()
            .filter(|name| {
                let excluded = matchers.iter().any(|m| m.is_match(name));
                if excluded {
                    tracing::debug!("Excluding database {:?}", name);
                }
                !excluded
            })
            .collect()
    }
}

pub trait DatabaseLister {
    /// Names of every database on the server, in server order
    fn list_database_names(&self) -> Result<Vec<String>>;
}

/// Lists databases through the MongoDB driver
///
/// A client is opened per call and dropped before returning, nothing is
/// kept connected while dumps run.
#[derive(Clone, Debug)]
pub struct MongoDatabaseLister {
    uri: ConnectionUri,
}

impl MongoDatabaseLister {
    pub fn new(uri: ConnectionUri) -> Self {
        Self { uri }
    }
}

impl DatabaseLister for MongoDatabaseLister {
    #[named]
    fn list_database_names(&self) -> Result<Vec<String>> {
        let uri = self.uri.for_database(ADMIN_DATABASE);
        tracing::info!("Connecting to {}", uri);

        let client = Client::with_uri_str(uri.as_str())
            .map_err(Error::from)
            .add_msg(format!("Failed to create client for {}", uri))
            .add_fn_name(function_path!())?;

        let names = client
            .list_database_names(None, None)
            .map_err(Error::from)
            .add_msg(format!("Failed to list databases on {}", uri))
            .add_fn_name(function_path!())?;
        drop(client);

        tracing::debug!("Server returned {} databases", names.len());
        Ok(names)
    }
}

/// Lists databases and removes the excluded ones.
pub fn discover<L: DatabaseLister + ?Sized>(
    lister: &L,
    exclusion: &ExclusionSet,
) -> Result<Vec<String>> {
    let names = lister.list_database_names()?;
    let total = names.len();
    let kept = exclusion.filter(names);
    tracing::info!(
        "Found {} databases, {} to back up: {:?}",
        total,
        kept.len(),
        kept
    );
    Ok(kept)
}
