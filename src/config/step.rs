// ABOUTME: Step entries of a plan file: one stack with its forward and backward operations.
// ABOUTME: Converts into validated DeploymentSteps with templates resolved in the plan's bucket.

use serde::Deserialize;
use std::collections::BTreeMap;

use super::param_value::{ParamValue, resolve_params};
use crate::deploy::{DeploymentStep, StepOperation};
use crate::error::{Error, Result};
use crate::types::{StackName, TableName, TemplateLocation};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepConfig {
    pub stack: StackName,
    pub forward: OperationConfig,
    pub backward: OperationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationConfig {
    /// Object key of the template inside the plan's bucket.
    pub template: String,

    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,

    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Tables whose secondary indexes gate the step.
    #[serde(default)]
    pub tables: Vec<TableName>,

    #[serde(default)]
    pub idempotency_token: Option<String>,
}

impl OperationConfig {
    fn to_operation(&self, stack: &StackName, bucket: &str, region: &str) -> Result<StepOperation> {
        if self.template.trim().is_empty() {
            return Err(Error::InvalidConfig(format!(
                "stack {stack}: template path cannot be empty"
            )));
        }

        let mut builder = StepOperation::builder(
            stack.clone(),
            TemplateLocation::in_bucket(bucket, region, &self.template),
            region,
        )
        .parameters(resolve_params(&self.parameters)?)
        .capabilities(self.capabilities.iter().cloned())
        .tables(self.tables.iter().cloned());

        if let Some(token) = &self.idempotency_token {
            builder = builder.idempotency_token(token.clone());
        }

        Ok(builder.build())
    }
}

impl StepConfig {
    pub fn to_step(&self, bucket: &str, region: &str) -> Result<DeploymentStep> {
        let forward = self.forward.to_operation(&self.stack, bucket, region)?;
        let backward = self.backward.to_operation(&self.stack, bucket, region)?;
        DeploymentStep::new(forward, backward).map_err(|e| Error::InvalidConfig(e.to_string()))
    }
}
