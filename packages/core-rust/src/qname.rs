//! Qualified names used for service names and content types.
//!
//! # Wire format
//!
//! A `QName` serializes to the string `"{namespace}local"`. Names without a
//! namespace serialize to just the local part, so `"Order"` and `"{}Order"`
//! parse to the same value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A namespace-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    namespace: String,
    local: String,
}

impl QName {
    /// Creates a name in the given namespace.
    #[must_use]
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }

    /// Creates a name with an empty namespace.
    #[must_use]
    pub fn local(local: impl Into<String>) -> Self {
        Self::new(String::new(), local)
    }

    /// Namespace URI, empty when unqualified.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Local part of the name.
    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.local
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.local)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local)
        }
    }
}

/// Error returned when a string is not a valid `{namespace}local` name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QNameError {
    #[error("qualified name must not be empty")]
    Empty,
    #[error("unterminated namespace in qualified name: {0}")]
    UnterminatedNamespace(String),
}

impl FromStr for QName {
    type Err = QNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(QNameError::Empty);
        }
        let Some(rest) = s.strip_prefix('{') else {
            return Ok(Self::local(s));
        };
        let Some((namespace, local)) = rest.split_once('}') else {
            return Err(QNameError::UnterminatedNamespace(s.to_string()));
        };
        if local.is_empty() {
            return Err(QNameError::Empty);
        }
        Ok(Self::new(namespace, local))
    }
}

impl From<&str> for QName {
    /// Lenient conversion for literals: falls back to treating the whole
    /// string as the local part when it does not parse.
    fn from(s: &str) -> Self {
        s.parse().unwrap_or_else(|_| Self::local(s))
    }
}

impl Serialize for QName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for QName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
