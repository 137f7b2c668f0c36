// ABOUTME: Plan file types and parsing for rollstack.yml.
// ABOUTME: Handles YAML parsing, plan discovery and conversion into a deployment sequence.

mod param_value;
mod polling;
mod step;

pub use param_value::{ParamValue, resolve_params};
pub use polling::PollingConfig;
pub use step::{OperationConfig, StepConfig};

use crate::deploy::{DeploymentSequence, OrchestratorSettings};
use crate::error::{Error, Result};
use nonempty::NonEmpty;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const PLAN_FILENAME: &str = "rollstack.yml";
pub const PLAN_FILENAME_ALT: &str = "rollstack.yaml";
pub const PLAN_FILENAME_DIR: &str = ".rollstack/plan.yml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    /// Names the deployment record; defaults to the first stack.
    #[serde(default)]
    pub name: Option<String>,

    /// Bucket holding every template of the plan.
    pub bucket: String,

    pub region: String,

    /// Where deployment records are kept.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(deserialize_with = "deserialize_steps")]
    pub steps: NonEmpty<StepConfig>,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".rollstack/state")
}

impl Plan {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let plan: Plan = serde_yaml::from_str(yaml)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(PLAN_FILENAME),
            dir.join(PLAN_FILENAME_ALT),
            dir.join(PLAN_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                tracing::debug!(path = %path.display(), "using plan file");
                return Self::load(path);
            }
        }

        Err(Error::PlanNotFound(dir.to_path_buf()))
    }

    /// Load `path` if given, otherwise discover a plan in `dir`.
    pub fn resolve(path: Option<&Path>, dir: &Path) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Self::discover(dir),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(Error::InvalidConfig("bucket cannot be empty".to_string()));
        }
        if self.region.trim().is_empty() {
            return Err(Error::InvalidConfig("region cannot be empty".to_string()));
        }
        if let Some(name) = &self.name
            && (name.is_empty() || name.contains(['/', '\\']))
        {
            return Err(Error::InvalidConfig(format!("invalid plan name: {name:?}")));
        }
        Ok(())
    }

    /// Name used for the deployment record.
    pub fn name(&self) -> &str {
        self.name
            .as_deref()
            .unwrap_or_else(|| self.steps.first().stack.as_str())
    }

    /// Build the validated step sequence, resolving parameters from the environment.
    pub fn sequence(&self) -> Result<DeploymentSequence> {
        self.steps
            .iter()
            .map(|step| step.to_step(&self.bucket, &self.region))
            .collect()
    }

    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            bucket: self.bucket.clone(),
            region: self.region.clone(),
            polling: self.polling.clone(),
        }
    }

    /// State directory, relative paths taken from `base`.
    pub fn state_dir_in(&self, base: &Path) -> PathBuf {
        if self.state_dir.is_absolute() {
            self.state_dir.clone()
        } else {
            base.join(&self.state_dir)
        }
    }
}

/// Write a starter plan file into `dir`.
pub fn init_plan(dir: &Path, force: bool) -> Result<PathBuf> {
    let path = dir.join(PLAN_FILENAME);

    if path.exists() && !force {
        return Err(Error::AlreadyExists(path));
    }

    std::fs::write(&path, TEMPLATE_PLAN)?;
    Ok(path)
}

const TEMPLATE_PLAN: &str = r#"bucket: my-deploy-bucket
region: us-east-1

polling:
  interval: 5s
  stability_timeout: 1h
  readiness_timeout: 30m

steps:
  - stack: my-api
    forward:
      template: my-api/v2.json
      parameters:
        Stage: prod
      capabilities: [CAPABILITY_IAM]
    backward:
      template: my-api/v1.json
      parameters:
        Stage: prod
      capabilities: [CAPABILITY_IAM]
"#;

fn deserialize_steps<'de, D>(deserializer: D) -> std::result::Result<NonEmpty<StepConfig>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let steps: Vec<StepConfig> = Vec::deserialize(deserializer)?;
    NonEmpty::from_vec(steps).ok_or_else(|| serde::de::Error::custom("at least one step is required"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_plan_parses() {
        let plan = Plan::from_yaml(TEMPLATE_PLAN).unwrap();
        assert_eq!(plan.name(), "my-api");
        assert_eq!(plan.sequence().unwrap().len(), 1);
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        init_plan(dir.path(), false).unwrap();
        assert!(matches!(
            init_plan(dir.path(), false),
            Err(Error::AlreadyExists(_))
        ));
        init_plan(dir.path(), true).unwrap();
    }
}
