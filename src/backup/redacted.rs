//! Secret strings with redacted display and serialization.
//!
//! `RedactedString` holds credentials such as the SMTP password so they never
//! show up in logs, debug output or serialized configuration.

use bon::Builder;
use derive_more::From;
use getset::Getters;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Formatter};
use std::result;
use validator::Validate;
use zeroize::Zeroize;

/// Placeholder text shown instead of the secret
pub static REDACTED_SECRET: &str = "###REDACTED###";

/// A string that gets redacted in debug output and serialization
///
/// Memory is zeroed on drop.
#[derive(Validate, Clone, Zeroize, From, Builder, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct RedactedString {
    #[validate(length(min = 8))]
    #[builder(into)]
    inner: String,
}

impl Debug for RedactedString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", REDACTED_SECRET)
    }
}

impl Serialize for RedactedString {
    fn serialize<S: Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED_SECRET)
    }
}

impl<'de> Deserialize<'de> for RedactedString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        deserializer.deserialize_str(RedactedStringVisitor)
    }
}

impl Drop for RedactedString {
    fn drop(&mut self) {
        self.zeroize();
    }
}

pub struct RedactedStringVisitor;

impl Visitor<'_> for RedactedStringVisitor {
    type Value = RedactedString;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a string")
    }

    fn visit_str<E>(self, v: &str) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(RedactedString::builder().inner(v).build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_string_validation() {
        let valid = RedactedString::builder().inner("valid_password").build();
        assert!(valid.validate().is_ok());

        let invalid = RedactedString::builder().inner("short").build();
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_debug_and_serialize_hide_secret() {
        let secret = RedactedString::builder().inner("hunter2hunter2").build();
        assert_eq!(format!("{secret:?}"), REDACTED_SECRET);
        assert_eq!(
            serde_json::to_string(&secret).unwrap(),
            format!("\"{REDACTED_SECRET}\"")
        );
        assert_eq!(secret.inner(), "hunter2hunter2");
    }

    #[test]
    fn test_deserialize_keeps_secret() {
        let secret: RedactedString = serde_json::from_str("\"hunter2hunter2\"").unwrap();
        assert_eq!(secret.inner(), "hunter2hunter2");
    }
}
