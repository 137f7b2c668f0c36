// ABOUTME: Validated table name for readiness checks on secondary indexes.
// ABOUTME: Accepts 3-255 characters of alphanumerics, underscore, hyphen and dot.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableNameError {
    #[error("table name must be between 3 and 255 characters, got {0}")]
    InvalidLength(usize),

    #[error("invalid character in table name: '{0}'")]
    InvalidChar(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableName(String);

impl TableName {
    pub fn new(value: &str) -> Result<Self, TableNameError> {
        let trimmed = value.trim();
        if !(3..=255).contains(&trimmed.len()) {
            return Err(TableNameError::InvalidLength(trimmed.len()));
        }

        // Valid characters: alphanumeric, hyphen, underscore, dot
        for c in trimmed.chars() {
            if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
                return Err(TableNameError::InvalidChar(c));
            }
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TableName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TableName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        TableName::new(&value).map_err(serde::de::Error::custom)
    }
}
