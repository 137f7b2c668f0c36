// ABOUTME: Deployment steps: a forward operation paired with the operation that undoes it.
// ABOUTME: StepOperation is immutable once built; DeploymentSequence keeps insertion order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::cloud::UpdateRequest;
use crate::types::{StackName, TableName, TemplateLocation};

use super::error::InvalidStepError;

/// Which half of a step an action works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => f.write_str("forward"),
            Direction::Backward => f.write_str("backward"),
        }
    }
}

/// One directional unit of work: update `stack` to `template` with `parameters`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOperation {
    stack: StackName,
    template: TemplateLocation,
    region: String,
    parameters: BTreeMap<String, String>,
    capabilities: Vec<String>,
    idempotency_token: Option<String>,
    tables: BTreeSet<TableName>,
}

impl StepOperation {
    pub fn builder(
        stack: StackName,
        template: TemplateLocation,
        region: impl Into<String>,
    ) -> StepOperationBuilder {
        StepOperationBuilder {
            operation: StepOperation {
                stack,
                template,
                region: region.into(),
                parameters: BTreeMap::new(),
                capabilities: Vec::new(),
                idempotency_token: None,
                tables: BTreeSet::new(),
            },
        }
    }

    pub fn stack(&self) -> &StackName {
        &self.stack
    }

    pub fn template(&self) -> &TemplateLocation {
        &self.template
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn idempotency_token(&self) -> Option<&str> {
        self.idempotency_token.as_deref()
    }

    /// Tables whose secondary indexes must be active before the operation completes.
    pub fn tables(&self) -> &BTreeSet<TableName> {
        &self.tables
    }

    pub fn has_tables(&self) -> bool {
        !self.tables.is_empty()
    }

    /// The update request submitted for this operation.
    pub fn update_request(&self) -> UpdateRequest {
        UpdateRequest {
            stack: self.stack.clone(),
            template_url: self.template.url().to_string(),
            parameters: self.parameters.clone(),
            capabilities: self.capabilities.clone(),
            client_request_token: self.idempotency_token.clone(),
        }
    }
}

/// Builder for [`StepOperation`].
#[derive(Debug, Clone)]
pub struct StepOperationBuilder {
    operation: StepOperation,
}

impl StepOperationBuilder {
    /// Set a parameter, replacing any earlier value for the same name.
    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.operation
            .parameters
            .insert(name.into(), value.into());
        self
    }

    pub fn parameters<I, K, V>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.operation.parameters.extend(
            parameters
                .into_iter()
                .map(|(name, value)| (name.into(), value.into())),
        );
        self
    }

    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.operation.capabilities.push(capability.into());
        self
    }

    pub fn capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.operation
            .capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    pub fn idempotency_token(mut self, token: impl Into<String>) -> Self {
        self.operation.idempotency_token = Some(token.into());
        self
    }

    pub fn table(mut self, table: TableName) -> Self {
        self.operation.tables.insert(table);
        self
    }

    pub fn tables(mut self, tables: impl IntoIterator<Item = TableName>) -> Self {
        self.operation.tables.extend(tables);
        self
    }

    pub fn build(self) -> StepOperation {
        self.operation
    }
}

/// A forward operation and the backward operation that restores the
/// configuration it replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentStep {
    forward: StepOperation,
    backward: StepOperation,
}

impl DeploymentStep {
    /// Pair two operations. Both must target the same stack in a named region.
    pub fn new(forward: StepOperation, backward: StepOperation) -> Result<Self, InvalidStepError> {
        if forward.stack != backward.stack {
            return Err(InvalidStepError::StackMismatch {
                forward: forward.stack,
                backward: backward.stack,
            });
        }

        for operation in [&forward, &backward] {
            if operation.region.trim().is_empty() {
                return Err(InvalidStepError::MissingRegion(operation.stack.clone()));
            }
        }

        Ok(Self { forward, backward })
    }

    pub fn stack(&self) -> &StackName {
        &self.forward.stack
    }

    pub fn forward(&self) -> &StepOperation {
        &self.forward
    }

    pub fn backward(&self) -> &StepOperation {
        &self.backward
    }

    pub fn operation(&self, direction: Direction) -> &StepOperation {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        }
    }
}

/// Ordered steps: deployment runs front to back, rollback back to front.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentSequence {
    steps: Vec<DeploymentStep>,
}

impl DeploymentSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: DeploymentStep) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DeploymentStep> {
        self.steps.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DeploymentStep> {
        self.steps.iter()
    }
}

impl From<Vec<DeploymentStep>> for DeploymentSequence {
    fn from(steps: Vec<DeploymentStep>) -> Self {
        Self { steps }
    }
}

impl FromIterator<DeploymentStep> for DeploymentSequence {
    fn from_iter<I: IntoIterator<Item = DeploymentStep>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a DeploymentSequence {
    type Item = &'a DeploymentStep;
    type IntoIter = std::slice::Iter<'a, DeploymentStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}
