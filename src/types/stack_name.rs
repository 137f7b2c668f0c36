// ABOUTME: Validated stack identifier for the cloud resource-management API.
// ABOUTME: Enforces the provider's naming rules: leading letter, alphanumerics and hyphens.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

const MAX_LEN: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StackNameError {
    #[error("stack name cannot be empty")]
    Empty,

    #[error("stack name exceeds maximum length of 128 characters")]
    TooLong,

    #[error("stack name must start with a letter")]
    InvalidStart,

    #[error("invalid character in stack name: '{0}'")]
    InvalidChar(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackName(String);

impl StackName {
    pub fn new(value: &str) -> Result<Self, StackNameError> {
        let Some(first) = value.chars().next() else {
            return Err(StackNameError::Empty);
        };

        if value.len() > MAX_LEN {
            return Err(StackNameError::TooLong);
        }

        if !first.is_ascii_alphabetic() {
            return Err(StackNameError::InvalidStart);
        }

        if let Some(c) = value
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && *c != '-')
        {
            return Err(StackNameError::InvalidChar(c));
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StackName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for StackName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StackName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        StackName::new(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_nested_stack_style_names() {
        let name = StackName::new("amplify-app-dev-api-1A2B3C").unwrap();
        assert_eq!(name.as_str(), "amplify-app-dev-api-1A2B3C");
    }

    #[test]
    fn rejects_leading_digit() {
        assert_eq!(StackName::new("1stack"), Err(StackNameError::InvalidStart));
    }

    #[test]
    fn rejects_underscore() {
        assert_eq!(
            StackName::new("my_stack"),
            Err(StackNameError::InvalidChar('_'))
        );
    }
}
