use crate::backup::discovery::MongoConfig;
use crate::backup::dump::DumpConfig;
use crate::backup::function_path;
use crate::backup::notifications::NotificationConfig;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::retention::RetentionConfig;
use crate::backup::validate::{validate_cron_str, validate_writable_dir};
use bon::Builder;
use function_name::named;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use serde_yml::{Mapping, Value};
use std::fs::File;
use std::path::{Path, PathBuf};
use validator::Validate;

#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder, Getters, CopyGetters)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    /// Backup root, dump folders and archives live directly in it
    #[validate(custom(function = validate_writable_dir))]
    #[builder(into)]
    #[getset(get = "pub")]
    out_dir: PathBuf,
    #[validate(nested)]
    #[getset(get = "pub")]
    mongo: MongoConfig,
    #[validate(nested)]
    #[serde(default)]
    #[builder(default)]
    #[getset(get = "pub")]
    dump: DumpConfig,
    #[validate(nested)]
    #[getset(get = "pub")]
    retention: Option<RetentionConfig>,
    /// Runs on this schedule instead of once when set
    #[validate(custom(function = validate_cron_str))]
    #[builder(into)]
    #[getset(get = "pub")]
    cron: Option<String>,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    notify_on_success: bool,
    #[validate(nested)]
    #[serde(default)]
    #[builder(default)]
    #[getset(get = "pub")]
    notifications: Vec<NotificationConfig>,
}

/// Values given on the command line or through the environment, they win
/// over the config file
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub out_dir: Option<PathBuf>,
    pub uri: Option<String>,
    pub dump_binary: Option<PathBuf>,
    pub max_age: Option<String>,
}

impl ConfigOverrides {
    fn apply(&self, config: &mut Value) {
        if let Some(out_dir) = &self.out_dir {
            set_key(config, &["out_dir"], path_value(out_dir));
        }
        if let Some(uri) = &self.uri {
            set_key(config, &["mongo", "uri"], Value::String(uri.clone()));
        }
        if let Some(binary) = &self.dump_binary {
            set_key(config, &["dump", "binary"], path_value(binary));
        }
        if let Some(max_age) = &self.max_age {
            set_key(config, &["retention", "max_age"], Value::String(max_age.clone()));
        }
    }
}

fn path_value(path: &Path) -> Value {
    Value::String(path.to_string_lossy().into_owned())
}

/// Sets `keys` (a path of nested mapping keys) to `value`, creating mappings on the way
fn set_key(config: &mut Value, keys: &[&str], value: Value) {
    let Some((last, parents)) = keys.split_last() else {
        return;
    };

    let mut current = config;
    for key in parents {
        if !current.is_mapping() {
            *current = Value::Mapping(Mapping::new());
        }
        let Value::Mapping(map) = current else {
            unreachable!("replaced by a mapping above")
        };
        current = map
            .entry(Value::String(key.to_string()))
            .or_insert(Value::Null);
    }

    if !current.is_mapping() {
        *current = Value::Mapping(Mapping::new());
    }
    if let Value::Mapping(map) = current {
        map.insert(Value::String(last.to_string()), value);
    }
}

impl BackupConfig {
    /// Reads the YAML (or JSON) config file if any, applies `overrides` on top
    /// and deserializes the result. Validation is left to the caller.
    #[named]
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let mut value = match path {
            Some(path) => File::open(path)
                .map_err(Error::from)
                .and_then(|f| serde_yml::from_reader::<_, Value>(f).map_err(Error::from))
                .add_msg(format!("Parse YAML config failed: {:?}", path))
                .add_fn_name(function_path!())?,
            None => Value::Mapping(Mapping::new()),
        };
        if value.is_null() {
            value = Value::Mapping(Mapping::new());
        }

        overrides.apply(&mut value);
        serde_yml::from_value(value)
            .map_err(Error::from)
            .add_msg("Invalid configuration")
            .add_fn_name(function_path!())
    }

    /// Parses, validates and returns the config, the usual entry point
    pub fn load_validated(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let config = Self::load(path, overrides)?;
        config
            .validate()
            .map_err(Error::from)
            .add_msg(format!("Config validation failed: {:?}", path))?;
        Ok(config)
    }
}
