// ABOUTME: Step capabilities bound to a live cloud provider.
// ABOUTME: Mutation invoker, stability poller, readiness delegation and the stack event stream.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::cloud::{Cloud, CloudError, StackDescription};
use crate::config::PollingConfig;
use crate::throttle::RateLimiter;
use crate::types::StackName;

use super::capabilities::{EventWatch, StepCapabilities};
use super::error::StepError;
use super::observer::ProgressObserver;
use super::readiness::ReadinessWaiter;
use super::step::StepOperation;

/// [`StepCapabilities`] evaluated against a [`Cloud`].
pub struct CloudCapabilities<C: Cloud> {
    cloud: Arc<C>,
    readiness: ReadinessWaiter<C>,
    observer: Arc<dyn ProgressObserver>,
    poll_interval: Duration,
    event_interval: Duration,
    stability_timeout: Duration,
}

impl<C: Cloud> CloudCapabilities<C> {
    pub fn new(cloud: Arc<C>, polling: &PollingConfig, observer: Arc<dyn ProgressObserver>) -> Self {
        let limiter = Arc::new(RateLimiter::new(polling.requests_per_minute));
        let readiness = ReadinessWaiter::new(cloud.clone(), limiter, polling.interval)
            .with_timeout(polling.readiness_timeout);

        Self {
            cloud,
            readiness,
            observer,
            poll_interval: polling.interval,
            event_interval: polling.event_interval,
            stability_timeout: polling.stability_timeout,
        }
    }

    /// Poll `stack` until it leaves every in-progress status.
    ///
    /// Throttled polls are polled again; any other error fails the wait.
    async fn wait_until_settled(&self, stack: &StackName) -> Result<StackDescription, StepError> {
        loop {
            match self.cloud.describe_stack(stack).await {
                Ok(description) if !description.status.is_in_progress() => return Ok(description),
                Ok(description) => {
                    tracing::trace!(%stack, status = %description.status, "stack still settling");
                }
                Err(e) if e.is_retryable() => {
                    tracing::debug!(%stack, error = %e, "stack status poll throttled");
                }
                Err(e) => {
                    return Err(StepError::StabilityPoll {
                        stack: stack.clone(),
                        source: e,
                    });
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// [`Self::wait_until_settled`] bounded by the stability timeout.
    async fn settled_within_timeout(&self, stack: &StackName) -> Result<StackDescription, StepError> {
        tokio::time::timeout(self.stability_timeout, self.wait_until_settled(stack))
            .await
            .map_err(|_| StepError::StabilityTimeout {
                stack: stack.clone(),
                timeout: self.stability_timeout,
            })?
    }
}

#[async_trait]
impl<C: Cloud> StepCapabilities for CloudCapabilities<C> {
    async fn submit(&self, operation: &StepOperation) -> Result<(), StepError> {
        let stack = operation.stack();
        let description = self
            .cloud
            .describe_stack(stack)
            .await
            .map_err(|source| StepError::Operation {
                stack: stack.clone(),
                source,
            })?;

        // An update abandoned by a failed wait may still be running.
        let description = if description.status.is_in_progress() {
            tracing::info!(
                %stack,
                status = %description.status,
                "waiting for stack to leave in-progress status"
            );
            self.settled_within_timeout(stack).await?
        } else {
            description
        };

        if !description.status.is_deployable() {
            return Err(StepError::NotDeployable {
                stack: stack.clone(),
                status: description.status,
            });
        }

        tracing::info!(
            %stack,
            template = operation.template().path(),
            "submitting stack update"
        );
        self.cloud
            .update_stack(&operation.update_request())
            .await
            .map_err(|source| StepError::Operation {
                stack: stack.clone(),
                source,
            })
    }

    async fn await_stable(&self, operation: &StepOperation) -> Result<(), StepError> {
        let stack = operation.stack();
        let description = self.settled_within_timeout(stack).await?;

        let status = description.status;
        if status.is_stable_success() {
            tracing::debug!(%stack, %status, "stack stable");
            return Ok(());
        }
        Err(StepError::Unstable {
            stack: stack.clone(),
            status,
            reason: description
                .status_reason
                .unwrap_or_else(|| "no reason given".to_string()),
        })
    }

    async fn await_tables_ready(&self, operation: &StepOperation) -> Result<(), StepError> {
        self.readiness
            .wait(operation.tables(), operation.region())
            .await
    }

    fn watch_events(&self, operation: &StepOperation) -> EventWatch {
        let stack = operation.stack().clone();
        let cloud = self.cloud.clone();
        let observer = self.observer.clone();
        let interval = self.event_interval;
        let since = chrono::Utc::now();

        self.observer.on_events_started(&stack);

        let task_stack = stack.clone();
        let task = tokio::spawn(async move {
            let mut seen = HashSet::new();
            loop {
                match cloud.stack_events(&task_stack).await {
                    Ok(events) => {
                        for event in events {
                            if event.timestamp >= since && seen.insert(event.id.clone()) {
                                observer.on_stack_event(&event);
                            }
                        }
                    }
                    Err(CloudError::Throttled(_)) => {}
                    Err(e) => {
                        tracing::warn!(stack = %task_stack, error = %e, "stack event poll failed");
                    }
                }
                tokio::time::sleep(interval).await;
            }
        });

        let observer = self.observer.clone();
        EventWatch::new(task).on_stop(move || observer.on_events_stopped(&stack))
    }
}

impl<C: Cloud> std::fmt::Debug for CloudCapabilities<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudCapabilities")
            .field("poll_interval", &self.poll_interval)
            .field("event_interval", &self.event_interval)
            .field("stability_timeout", &self.stability_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{CloudCall, InMemoryCloud, StackStatus};
    use crate::deploy::observer::NoopObserver;
    use crate::types::{StackName, TemplateLocation};

    fn polling() -> PollingConfig {
        PollingConfig {
            interval: Duration::from_millis(1),
            event_interval: Duration::from_millis(1),
            stability_timeout: Duration::from_secs(5),
            readiness_timeout: Some(Duration::from_secs(5)),
            requests_per_minute: 6000,
        }
    }

    fn operation(path: &str) -> StepOperation {
        StepOperation::builder(
            StackName::new("api").unwrap(),
            TemplateLocation::in_bucket("deploys", "us-east-1", path),
            "us-east-1",
        )
        .parameter("Stage", "prod")
        .build()
    }

    fn bindings(cloud: Arc<InMemoryCloud>) -> CloudCapabilities<InMemoryCloud> {
        CloudCapabilities::new(cloud, &polling(), Arc::new(NoopObserver))
    }

    fn api() -> StackName {
        StackName::new("api").unwrap()
    }

    #[tokio::test]
    async fn submit_then_await_stable() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_stack(&StackName::new("api").unwrap(), StackStatus::CreateComplete);
        cloud.set_settle_polls(2);
        let caps = bindings(cloud.clone());

        let op = operation("api/v2.json");
        caps.submit(&op).await.unwrap();
        caps.await_stable(&op).await.unwrap();

        let stack = StackName::new("api").unwrap();
        assert_eq!(cloud.stack_status(&stack), Some(StackStatus::UpdateComplete));
        assert_eq!(cloud.deployed_template(&stack).as_deref(), Some(op.template().url()));
        assert_eq!(
            cloud.deployed_parameters(&stack).unwrap().get("Stage").map(String::as_str),
            Some("prod")
        );
    }

    #[tokio::test]
    async fn submit_rejects_stack_that_is_not_deployable() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_stack(&api(), StackStatus::UpdateRollbackFailed);

        let err = bindings(cloud.clone())
            .submit(&operation("api/v2.json"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StepError::NotDeployable { status: StackStatus::UpdateRollbackFailed, .. }
        ));
        assert!(cloud.updates().is_empty());
    }

    #[tokio::test]
    async fn submit_waits_for_running_update_to_settle() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_stack(&api(), StackStatus::CreateComplete);
        cloud.set_settle_polls(3);
        let caps = bindings(cloud.clone());

        caps.submit(&operation("api/v2.json")).await.unwrap();
        // The first update is still running; the second submission waits it out.
        caps.submit(&operation("api/v1.json")).await.unwrap();

        let paths: Vec<String> = cloud
            .updates()
            .iter()
            .map(|update| update.template_url.rsplit('/').next().unwrap().to_string())
            .collect();
        assert_eq!(paths, ["v2.json", "v1.json"]);
    }

    #[tokio::test]
    async fn submit_gives_up_on_stack_stuck_in_progress() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_stack(&api(), StackStatus::UpdateInProgress);
        let caps = CloudCapabilities::new(
            cloud.clone(),
            &PollingConfig {
                stability_timeout: Duration::from_millis(30),
                ..polling()
            },
            Arc::new(NoopObserver),
        );

        let err = caps.submit(&operation("api/v2.json")).await.unwrap_err();
        assert!(matches!(err, StepError::StabilityTimeout { .. }));
        assert_eq!(err.to_string(), "stack api did not stabilize within 30ms");
        assert!(cloud.updates().is_empty());
    }

    #[tokio::test]
    async fn throttled_status_polls_are_polled_again() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_stack(&api(), StackStatus::CreateComplete);
        let caps = bindings(cloud.clone());
        let op = operation("api/v2.json");

        caps.submit(&op).await.unwrap();
        cloud.throttle_stack(&api(), 2);
        caps.await_stable(&op).await.unwrap();

        let polls = cloud
            .calls()
            .into_iter()
            .filter(|call| matches!(call, CloudCall::DescribeStack(_)))
            .count();
        // One before the submission, two throttled, one that saw the result.
        assert_eq!(polls, 4);
    }

    #[tokio::test]
    async fn missing_stack_is_an_operation_error() {
        let cloud = Arc::new(InMemoryCloud::new());
        let err = bindings(cloud).submit(&operation("api/v2.json")).await.unwrap_err();
        assert!(matches!(err, StepError::Operation { source: CloudError::NotFound(_), .. }));
    }

    #[tokio::test]
    async fn failed_settle_is_unstable() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_stack(&StackName::new("api").unwrap(), StackStatus::UpdateComplete);
        let op = operation("api/v2.json");
        cloud.fail_settle(op.template().url(), "resource limit exceeded");
        let caps = bindings(cloud);

        caps.submit(&op).await.unwrap();
        let err = caps.await_stable(&op).await.unwrap_err();
        match err {
            StepError::Unstable { status, reason, .. } => {
                assert_eq!(status, StackStatus::UpdateRollbackComplete);
                assert_eq!(reason, "resource limit exceeded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
