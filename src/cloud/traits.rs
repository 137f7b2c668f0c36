// ABOUTME: Composable capability traits for the cloud resource-management API.
// ABOUTME: Defines StackOps, TableOps, ArtifactOps and the combined Cloud trait.

use async_trait::async_trait;

use super::error::CloudError;
use super::types::{IndexState, IndexStatus, StackDescription, StackEvent, UpdateRequest};
use crate::types::{StackName, TableName};

/// Stack lifecycle operations.
#[async_trait]
pub trait StackOps: Send + Sync {
    /// Describe the current status of a stack.
    async fn describe_stack(&self, stack: &StackName) -> Result<StackDescription, CloudError>;

    /// Submit an update of an existing stack.
    async fn update_stack(&self, request: &UpdateRequest) -> Result<(), CloudError>;

    /// Resource events for a stack, oldest first.
    async fn stack_events(&self, stack: &StackName) -> Result<Vec<StackEvent>, CloudError>;
}

/// Table status operations used for readiness gating.
#[async_trait]
pub trait TableOps: Send + Sync {
    /// Status of every secondary index of a table.
    async fn index_statuses(
        &self,
        table: &TableName,
        region: &str,
    ) -> Result<Vec<IndexStatus>, CloudError>;

    /// True iff every secondary index of the table is active.
    async fn is_table_ready(&self, table: &TableName, region: &str) -> Result<bool, CloudError> {
        let statuses = self.index_statuses(table, region).await?;
        Ok(statuses
            .iter()
            .all(|index| index.state == IndexState::Active))
    }
}

/// Artifact storage lookups.
#[async_trait]
pub trait ArtifactOps: Send + Sync {
    /// Whether an object exists at `path` in `bucket`.
    async fn object_exists(&self, bucket: &str, path: &str) -> Result<bool, CloudError>;
}

/// Everything the orchestrator needs from a provider.
pub trait Cloud: StackOps + TableOps + ArtifactOps + 'static {}

impl<T: StackOps + TableOps + ArtifactOps + 'static> Cloud for T {}
