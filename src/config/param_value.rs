// ABOUTME: Stack parameter values with environment variable interpolation.
// ABOUTME: A value is either a literal or a reference to an environment variable.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Literal(String),
    FromEnv {
        #[serde(rename = "env")]
        var: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl ParamValue {
    pub fn resolve(&self) -> Result<String> {
        match self {
            ParamValue::Literal(s) => Ok(s.clone()),
            ParamValue::FromEnv { var, default } => match std::env::var(var) {
                Ok(val) => Ok(val),
                Err(_) => default
                    .clone()
                    .ok_or_else(|| Error::MissingEnvVar(var.clone())),
            },
        }
    }
}

pub fn resolve_params(map: &BTreeMap<String, ParamValue>) -> Result<BTreeMap<String, String>> {
    map.iter()
        .map(|(k, v)| v.resolve().map(|resolved| (k.clone(), resolved)))
        .collect()
}
