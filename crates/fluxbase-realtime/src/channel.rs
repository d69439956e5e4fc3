//! Channel addressing.
//!
//! A channel is the string `table:<schema>.<table>`; the newtype keeps
//! parsing and formatting in one place.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A subscription channel addressing one table's change stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(String);

/// Error for malformed channel strings.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid channel {0:?}: expected \"table:<schema>.<table>\"")]
pub struct InvalidChannel(pub String);

impl Channel {
    /// The channel for a table's change stream.
    pub fn table(schema: &str, table: &str) -> Self {
        Self(format!("table:{schema}.{table}"))
    }

    /// Parse and validate a client-supplied channel string.
    pub fn parse(raw: &str) -> Result<Self, InvalidChannel> {
        let Some(rest) = raw.strip_prefix("table:") else {
            return Err(InvalidChannel(raw.to_string()));
        };
        let mut parts = rest.splitn(2, '.');
        let schema = parts.next().unwrap_or_default();
        let table = parts.next().unwrap_or_default();
        if schema.is_empty() || table.is_empty() {
            return Err(InvalidChannel(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
