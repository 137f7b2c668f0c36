// ABOUTME: In-memory cloud provider with simulated stack and index progressions.
// ABOUTME: Backs plan rehearsals and tests; failures are injected per template URL or table.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

use super::error::CloudError;
use super::traits::{ArtifactOps, StackOps, TableOps};
use super::types::{
    IndexState, IndexStatus, StackDescription, StackEvent, StackStatus, UpdateRequest,
};
use crate::types::{StackName, TableName};

/// A call received by the in-memory provider, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudCall {
    DescribeStack(StackName),
    UpdateStack {
        stack: StackName,
        template_url: String,
    },
    StackEvents(StackName),
    IndexStatuses(TableName),
    ObjectExists {
        bucket: String,
        path: String,
    },
}

#[derive(Debug)]
struct SimStack {
    status: StackStatus,
    reason: Option<String>,
    template_url: Option<String>,
    parameters: BTreeMap<String, String>,
    pending: Option<PendingUpdate>,
    events: Vec<StackEvent>,
    applied_tokens: HashSet<String>,
}

#[derive(Debug)]
struct PendingUpdate {
    polls_remaining: u32,
    /// The update does not settle before this instant, however often it is polled.
    not_before: Option<Instant>,
    outcome: StackStatus,
    reason: Option<String>,
}

#[derive(Debug)]
struct SimTable {
    polls_until_active: u32,
    failure: Option<CloudError>,
}

#[derive(Debug, Default)]
struct State {
    stacks: HashMap<StackName, SimStack>,
    tables: HashMap<TableName, SimTable>,
    objects: HashSet<(String, String)>,
    update_failures: HashMap<String, String>,
    settle_failures: HashMap<String, String>,
    settle_delays: HashMap<String, Duration>,
    settle_polls: u32,
    stack_throttles: HashMap<StackName, u32>,
    table_throttles: HashMap<TableName, u32>,
    next_event: u64,
    calls: Vec<CloudCall>,
    updates: Vec<UpdateRequest>,
}

impl State {
    fn push_event(&mut self, stack: &StackName, status: &str, reason: Option<String>) {
        self.next_event += 1;
        let event = StackEvent {
            id: format!("event-{}", self.next_event),
            stack: stack.clone(),
            logical_resource_id: stack.to_string(),
            resource_type: "AWS::CloudFormation::Stack".to_string(),
            status: status.to_string(),
            reason,
            timestamp: Utc::now(),
        };
        if let Some(sim) = self.stacks.get_mut(stack) {
            sim.events.push(event);
        }
    }
}

/// Cloud provider held entirely in memory.
///
/// Stacks settle after a configurable number of status polls. Failures are
/// keyed by template URL so the forward and backward halves of a step can be
/// failed independently.
#[derive(Debug, Default)]
pub struct InMemoryCloud {
    state: Mutex<State>,
}

impl InMemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stack in a settled status.
    pub fn add_stack(&self, stack: &StackName, status: StackStatus) {
        self.state.lock().stacks.insert(
            stack.clone(),
            SimStack {
                status,
                reason: None,
                template_url: None,
                parameters: BTreeMap::new(),
                pending: None,
                events: Vec::new(),
                applied_tokens: HashSet::new(),
            },
        );
    }

    /// Store an object so pre-flight finds it.
    pub fn put_object(&self, bucket: &str, path: &str) {
        self.state
            .lock()
            .objects
            .insert((bucket.to_string(), path.to_string()));
    }

    /// Register a table whose indexes become active after `polls` status checks.
    pub fn add_table(&self, table: &TableName, polls: u32) {
        self.state.lock().tables.insert(
            table.clone(),
            SimTable {
                polls_until_active: polls,
                failure: None,
            },
        );
    }

    /// Make every status check of `table` fail with `error`.
    pub fn fail_table(&self, table: &TableName, error: CloudError) {
        let mut state = self.state.lock();
        let sim = state.tables.entry(table.clone()).or_insert(SimTable {
            polls_until_active: 0,
            failure: None,
        });
        sim.failure = Some(error);
    }

    /// Reject update submissions for `template_url`.
    pub fn fail_update(&self, template_url: &str, message: &str) {
        self.state
            .lock()
            .update_failures
            .insert(template_url.to_string(), message.to_string());
    }

    /// Accept updates for `template_url` but settle them in `UPDATE_ROLLBACK_COMPLETE`.
    pub fn fail_settle(&self, template_url: &str, reason: &str) {
        self.state
            .lock()
            .settle_failures
            .insert(template_url.to_string(), reason.to_string());
    }

    /// Keep updates to `template_url` in progress for at least `delay` after submission.
    pub fn delay_settle(&self, template_url: &str, delay: Duration) {
        self.state
            .lock()
            .settle_delays
            .insert(template_url.to_string(), delay);
    }

    /// Answer the next `times` status polls of `stack` with `Throttled`.
    pub fn throttle_stack(&self, stack: &StackName, times: u32) {
        self.state.lock().stack_throttles.insert(stack.clone(), times);
    }

    /// Answer the next `times` index status checks of `table` with `Throttled`.
    pub fn throttle_table(&self, table: &TableName, times: u32) {
        self.state.lock().table_throttles.insert(table.clone(), times);
    }

    /// Number of `describe_stack` polls an update stays in progress for.
    pub fn set_settle_polls(&self, polls: u32) {
        self.state.lock().settle_polls = polls;
    }

    pub fn calls(&self) -> Vec<CloudCall> {
        self.state.lock().calls.clone()
    }

    /// Update requests that were applied, in order.
    pub fn updates(&self) -> Vec<UpdateRequest> {
        self.state.lock().updates.clone()
    }

    pub fn stack_status(&self, stack: &StackName) -> Option<StackStatus> {
        self.state.lock().stacks.get(stack).map(|sim| sim.status)
    }

    /// Template URL of the last update applied to `stack`.
    pub fn deployed_template(&self, stack: &StackName) -> Option<String> {
        self.state
            .lock()
            .stacks
            .get(stack)
            .and_then(|sim| sim.template_url.clone())
    }

    pub fn deployed_parameters(&self, stack: &StackName) -> Option<BTreeMap<String, String>> {
        self.state
            .lock()
            .stacks
            .get(stack)
            .map(|sim| sim.parameters.clone())
    }
}

/// Consume one pending throttle for `key`, if any are left.
fn take_throttle<K: Eq + std::hash::Hash>(throttles: &mut HashMap<K, u32>, key: &K) -> bool {
    match throttles.get_mut(key) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

#[async_trait]
impl StackOps for InMemoryCloud {
    async fn describe_stack(&self, stack: &StackName) -> Result<StackDescription, CloudError> {
        let mut state = self.state.lock();
        state.calls.push(CloudCall::DescribeStack(stack.clone()));
        if take_throttle(&mut state.stack_throttles, stack) {
            return Err(CloudError::Throttled(format!("rate exceeded for stack {stack}")));
        }

        let sim = state
            .stacks
            .get_mut(stack)
            .ok_or_else(|| CloudError::NotFound(format!("stack {stack} does not exist")))?;

        let mut settled = None;
        if let Some(pending) = sim.pending.as_mut() {
            let due = pending.not_before.is_none_or(|at| Instant::now() >= at);
            if pending.polls_remaining == 0 && due {
                sim.status = pending.outcome;
                sim.reason = pending.reason.clone();
                settled = Some((sim.status, sim.reason.clone()));
                sim.pending = None;
            } else {
                pending.polls_remaining = pending.polls_remaining.saturating_sub(1);
            }
        }

        let description = StackDescription {
            name: stack.clone(),
            status: sim.status,
            status_reason: sim.reason.clone(),
        };

        if let Some((status, reason)) = settled {
            state.push_event(stack, status.as_str(), reason);
        }

        Ok(description)
    }

    async fn update_stack(&self, request: &UpdateRequest) -> Result<(), CloudError> {
        let mut state = self.state.lock();
        state.calls.push(CloudCall::UpdateStack {
            stack: request.stack.clone(),
            template_url: request.template_url.clone(),
        });

        let settle_polls = state.settle_polls;
        let update_failure = state.update_failures.get(&request.template_url).cloned();
        let settle_failure = state.settle_failures.get(&request.template_url).cloned();
        let not_before = state
            .settle_delays
            .get(&request.template_url)
            .map(|delay| Instant::now() + *delay);

        let sim = state.stacks.get_mut(&request.stack).ok_or_else(|| {
            CloudError::NotFound(format!("stack {} does not exist", request.stack))
        })?;

        if let Some(token) = &request.client_request_token
            && sim.applied_tokens.contains(token)
        {
            return Ok(());
        }

        if sim.status.is_in_progress() {
            return Err(CloudError::Api(format!(
                "stack {} is in {} state and can not be updated",
                request.stack, sim.status
            )));
        }

        if let Some(message) = update_failure {
            return Err(CloudError::Api(message));
        }

        sim.status = StackStatus::UpdateInProgress;
        sim.reason = None;
        sim.template_url = Some(request.template_url.clone());
        sim.parameters = request.parameters.clone();
        sim.pending = Some(match settle_failure {
            Some(reason) => PendingUpdate {
                polls_remaining: settle_polls,
                not_before,
                outcome: StackStatus::UpdateRollbackComplete,
                reason: Some(reason),
            },
            None => PendingUpdate {
                polls_remaining: settle_polls,
                not_before,
                outcome: StackStatus::UpdateComplete,
                reason: None,
            },
        });
        if let Some(token) = &request.client_request_token {
            sim.applied_tokens.insert(token.clone());
        }

        state.updates.push(request.clone());
        state.push_event(&request.stack, StackStatus::UpdateInProgress.as_str(), None);
        Ok(())
    }

    async fn stack_events(&self, stack: &StackName) -> Result<Vec<StackEvent>, CloudError> {
        let mut state = self.state.lock();
        state.calls.push(CloudCall::StackEvents(stack.clone()));
        state
            .stacks
            .get(stack)
            .map(|sim| sim.events.clone())
            .ok_or_else(|| CloudError::NotFound(format!("stack {stack} does not exist")))
    }
}

#[async_trait]
impl TableOps for InMemoryCloud {
    async fn index_statuses(
        &self,
        table: &TableName,
        _region: &str,
    ) -> Result<Vec<IndexStatus>, CloudError> {
        let mut state = self.state.lock();
        state.calls.push(CloudCall::IndexStatuses(table.clone()));
        if take_throttle(&mut state.table_throttles, table) {
            return Err(CloudError::Throttled(format!("rate exceeded for table {table}")));
        }

        let sim = state
            .tables
            .get_mut(table)
            .ok_or_else(|| CloudError::NotFound(format!("table {table} does not exist")))?;

        if let Some(error) = &sim.failure {
            return Err(error.clone());
        }

        let index_state = if sim.polls_until_active == 0 {
            IndexState::Active
        } else {
            sim.polls_until_active -= 1;
            IndexState::Creating
        };

        Ok(vec![IndexStatus {
            index_name: format!("{table}-gsi"),
            state: index_state,
        }])
    }
}

#[async_trait]
impl ArtifactOps for InMemoryCloud {
    async fn object_exists(&self, bucket: &str, path: &str) -> Result<bool, CloudError> {
        let mut state = self.state.lock();
        state.calls.push(CloudCall::ObjectExists {
            bucket: bucket.to_string(),
            path: path.to_string(),
        });
        Ok(state
            .objects
            .contains(&(bucket.to_string(), path.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(stack: &StackName, url: &str, token: Option<&str>) -> UpdateRequest {
        UpdateRequest {
            stack: stack.clone(),
            template_url: url.to_string(),
            parameters: BTreeMap::new(),
            capabilities: vec![],
            client_request_token: token.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn update_settles_after_configured_polls() {
        let cloud = InMemoryCloud::new();
        let stack = StackName::new("api").unwrap();
        cloud.add_stack(&stack, StackStatus::CreateComplete);
        cloud.set_settle_polls(1);

        cloud
            .update_stack(&request(&stack, "https://t/1", None))
            .await
            .unwrap();

        let first = cloud.describe_stack(&stack).await.unwrap();
        assert_eq!(first.status, StackStatus::UpdateInProgress);
        let second = cloud.describe_stack(&stack).await.unwrap();
        assert_eq!(second.status, StackStatus::UpdateComplete);
    }

    #[tokio::test]
    async fn same_token_is_applied_once() {
        let cloud = InMemoryCloud::new();
        let stack = StackName::new("api").unwrap();
        cloud.add_stack(&stack, StackStatus::UpdateComplete);

        let req = request(&stack, "https://t/1", Some("token-1"));
        cloud.update_stack(&req).await.unwrap();
        cloud.describe_stack(&stack).await.unwrap();
        cloud.update_stack(&req).await.unwrap();

        assert_eq!(cloud.updates().len(), 1);
    }

    #[tokio::test]
    async fn update_rejected_while_in_progress() {
        let cloud = InMemoryCloud::new();
        let stack = StackName::new("api").unwrap();
        cloud.add_stack(&stack, StackStatus::UpdateComplete);
        cloud.set_settle_polls(5);

        cloud
            .update_stack(&request(&stack, "https://t/1", None))
            .await
            .unwrap();
        let err = cloud
            .update_stack(&request(&stack, "https://t/2", None))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Api(_)));
    }

    #[tokio::test]
    async fn delayed_update_outlasts_its_polls() {
        let cloud = InMemoryCloud::new();
        let stack = StackName::new("api").unwrap();
        cloud.add_stack(&stack, StackStatus::CreateComplete);
        cloud.delay_settle("https://t/1", Duration::from_millis(30));

        cloud
            .update_stack(&request(&stack, "https://t/1", None))
            .await
            .unwrap();
        let early = cloud.describe_stack(&stack).await.unwrap();
        assert_eq!(early.status, StackStatus::UpdateInProgress);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let late = cloud.describe_stack(&stack).await.unwrap();
        assert_eq!(late.status, StackStatus::UpdateComplete);
    }

    #[tokio::test]
    async fn throttles_run_out() {
        let cloud = InMemoryCloud::new();
        let stack = StackName::new("api").unwrap();
        cloud.add_stack(&stack, StackStatus::CreateComplete);
        cloud.throttle_stack(&stack, 2);

        for _ in 0..2 {
            let err = cloud.describe_stack(&stack).await.unwrap_err();
            assert!(err.is_retryable());
        }
        assert!(cloud.describe_stack(&stack).await.is_ok());
    }

    #[tokio::test]
    async fn table_becomes_ready_after_polls() {
        let cloud = InMemoryCloud::new();
        let table = TableName::new("Todo-dev").unwrap();
        cloud.add_table(&table, 2);

        assert!(!cloud.is_table_ready(&table, "us-east-1").await.unwrap());
        assert!(!cloud.is_table_ready(&table, "us-east-1").await.unwrap());
        assert!(cloud.is_table_ready(&table, "us-east-1").await.unwrap());
    }
}
