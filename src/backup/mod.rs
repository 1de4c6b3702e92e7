pub mod backup_config;
pub mod connection_uri;
pub mod discovery;
pub mod dump;
pub mod job;
pub mod notifications;
pub mod redacted;
pub mod result_error;
pub mod retention;
pub mod tar;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
