//! Long-running-operation poller
//!
//! Turns an [`OperationHandle`] into a single awaited terminal result.
//! Transient control-plane faults are retried with bounded exponential
//! backoff; terminal results are cached so re-polling never issues another
//! remote query.

use crate::client::{OperationHandle, OperationStatus, ResourceClient, ResourceOutput};
use crate::context::RunContext;
use crate::error::{ErrorDetail, ProvisionError, Result};
use std::time::Duration;
use tokio::time::Instant;

/// Interval between status queries when neither the handle nor the control
/// plane supplies one.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Polling and transient-retry configuration.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Interval between status queries when the handle carries none
    pub interval: Duration,

    /// Maximum consecutive transient failures before giving up
    pub max_attempts: u32,

    /// Initial backoff delay after a transient failure
    pub initial_retry_delay: Duration,

    /// Backoff ceiling
    pub max_retry_delay: Duration,

    /// Backoff multiplier
    pub multiplier: f64,

    /// Overall budget for one operation; `None` means unbounded
    pub timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: 5,
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            multiplier: 2.0,
            timeout: None,
        }
    }
}

impl PollConfig {
    /// Backoff delay before retry `attempt` (0-based), capped at the ceiling.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let initial = self.initial_retry_delay.as_millis() as f64;
        let delay = initial * self.multiplier.powi(attempt as i32);
        let capped = delay.min(self.max_retry_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Cached terminal outcome of an operation.
#[derive(Debug, Clone)]
enum Terminal {
    Succeeded(ResourceOutput),
    Failed(ErrorDetail),
    Canceled,
}

impl Terminal {
    fn to_result(&self) -> Result<ResourceOutput> {
        match self {
            Terminal::Succeeded(output) => Ok(output.clone()),
            Terminal::Failed(detail) => Err(ProvisionError::RemoteRejected(detail.clone())),
            Terminal::Canceled => Err(ProvisionError::Canceled(
                "operation canceled by the control plane".to_string(),
            )),
        }
    }
}

/// Drives a single asynchronous remote operation to a terminal state.
pub struct OperationPoller<'a> {
    client: &'a dyn ResourceClient,
    handle: OperationHandle,
    config: PollConfig,
    terminal: Option<Terminal>,
}

impl<'a> OperationPoller<'a> {
    /// Begin tracking an operation. Never blocks and issues no query.
    pub fn start(client: &'a dyn ResourceClient, handle: OperationHandle, config: PollConfig) -> Self {
        Self {
            client,
            handle,
            config,
            terminal: None,
        }
    }

    /// Poll until the operation reaches a terminal state.
    ///
    /// Waits the handle's interval between attempts (default 10 seconds),
    /// preferring a server-supplied retry hint when present. Returns
    /// `Canceled`/`Timeout` as soon as the context is canceled or a deadline
    /// elapses, including mid-request. The remote operation is NOT canceled
    /// in that case, as most control planes have no cancel primitive; this
    /// is a client-side abandonment only.
    ///
    /// Once terminal, subsequent calls return the cached result without
    /// another remote query.
    pub async fn poll_until_done(&mut self, ctx: &RunContext) -> Result<ResourceOutput> {
        if let Some(terminal) = &self.terminal {
            return terminal.to_result();
        }

        let started = Instant::now();
        let budget = self.handle.deadline.or(self.config.timeout);
        let interval = self.handle.poll_interval.unwrap_or(self.config.interval);
        let mut failures: u32 = 0;

        loop {
            ctx.check()?;
            if let Some(budget) = budget {
                if started.elapsed() >= budget {
                    return Err(ProvisionError::Timeout(format!(
                        "operation '{}' still running after {:?}",
                        self.handle.locator, budget
                    )));
                }
            }

            match ctx.guard(self.client.query_status(&self.handle)).await? {
                Ok(OperationStatus::Running { retry_after }) => {
                    failures = 0;
                    let wait = capped(retry_after.unwrap_or(interval), budget, started);
                    tracing::trace!(operation = %self.handle.locator, ?wait, "still running");
                    ctx.sleep(wait).await?;
                }
                Ok(OperationStatus::Succeeded(output)) => {
                    tracing::debug!(operation = %self.handle.locator, "operation succeeded");
                    self.terminal = Some(Terminal::Succeeded(output.clone()));
                    return Ok(output);
                }
                Ok(OperationStatus::Failed(detail)) => {
                    tracing::debug!(operation = %self.handle.locator, error = %detail,
                        "operation failed");
                    self.terminal = Some(Terminal::Failed(detail.clone()));
                    return Err(ProvisionError::RemoteRejected(detail));
                }
                Ok(OperationStatus::Canceled) => {
                    self.terminal = Some(Terminal::Canceled);
                    return Err(ProvisionError::Canceled(
                        "operation canceled by the control plane".to_string(),
                    ));
                }
                Err(err) if err.is_retryable() => {
                    failures += 1;
                    if failures >= self.config.max_attempts {
                        tracing::warn!(operation = %self.handle.locator, attempts = failures,
                            "giving up after repeated transient failures");
                        return Err(err);
                    }
                    let delay = capped(self.config.retry_delay(failures - 1), budget, started);
                    tracing::debug!(operation = %self.handle.locator, attempt = failures,
                        ?delay, error = %err, "transient poll failure, backing off");
                    ctx.sleep(delay).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Never sleep past the operation budget.
fn capped(wait: Duration, budget: Option<Duration>, started: Instant) -> Duration {
    match budget {
        Some(budget) => wait.min(budget.saturating_sub(started.elapsed())),
        None => wait,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SubmitOutcome;
    use crate::step::StepAction;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Client whose `query_status` answers are scripted in order.
    struct ScriptedStatus {
        script: Mutex<Vec<Result<OperationStatus>>>,
        queries: Mutex<u32>,
    }

    impl ScriptedStatus {
        fn new(script: Vec<Result<OperationStatus>>) -> Self {
            let mut script = script;
            script.reverse();
            Self {
                script: Mutex::new(script),
                queries: Mutex::new(0),
            }
        }

        fn queries(&self) -> u32 {
            *self.queries.lock().unwrap()
        }
    }

    #[async_trait]
    impl ResourceClient for ScriptedStatus {
        async fn submit(
            &self,
            _action: StepAction,
            _kind: &str,
            _name: &str,
            _body: &serde_json::Value,
        ) -> Result<SubmitOutcome> {
            unimplemented!("not used by poller tests")
        }

        async fn query_status(&self, _handle: &OperationHandle) -> Result<OperationStatus> {
            *self.queries.lock().unwrap() += 1;
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok(OperationStatus::Running { retry_after: None }))
        }

        async fn fetch(&self, _kind: &str, _name: &str) -> Result<Option<ResourceOutput>> {
            unimplemented!("not used by poller tests")
        }
    }

    fn succeeded(id: &str) -> OperationStatus {
        OperationStatus::Succeeded(ResourceOutput::new(id, json!({})))
    }

    #[tokio::test(start_paused = true)]
    async fn waits_full_interval_between_polls() {
        let client = ScriptedStatus::new(vec![
            Ok(OperationStatus::Running { retry_after: None }),
            Ok(OperationStatus::Running { retry_after: None }),
            Ok(succeeded("/ops/1")),
        ]);
        let mut poller =
            OperationPoller::start(&client, OperationHandle::new("/ops/1"), PollConfig::default());

        let started = tokio::time::Instant::now();
        let output = poller
            .poll_until_done(&RunContext::background())
            .await
            .unwrap();

        // Two Running answers mean two full 10s waits before the third poll.
        assert!(started.elapsed() >= Duration::from_secs(20));
        assert_eq!(client.queries(), 3);
        assert_eq!(output.resource_id.as_deref(), Some("/ops/1"));
    }

    #[tokio::test(start_paused = true)]
    async fn honors_server_retry_hint() {
        let client = ScriptedStatus::new(vec![
            Ok(OperationStatus::Running {
                retry_after: Some(Duration::from_secs(3)),
            }),
            Ok(succeeded("/ops/2")),
        ]);
        let mut poller =
            OperationPoller::start(&client, OperationHandle::new("/ops/2"), PollConfig::default());

        let started = tokio::time::Instant::now();
        poller
            .poll_until_done(&RunContext::background())
            .await
            .unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_result_is_cached() {
        let client = ScriptedStatus::new(vec![Ok(succeeded("/ops/3"))]);
        let mut poller =
            OperationPoller::start(&client, OperationHandle::new("/ops/3"), PollConfig::default());
        let ctx = RunContext::background();

        let first = poller.poll_until_done(&ctx).await.unwrap();
        let second = poller.poll_until_done(&ctx).await.unwrap();

        assert_eq!(first.resource_id, second.resource_id);
        assert_eq!(client.queries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_then_surfaced() {
        let client = ScriptedStatus::new(vec![
            Err(ProvisionError::Transport("connection reset".into())),
            Err(ProvisionError::Transport("connection reset".into())),
            Err(ProvisionError::Transport("connection reset".into())),
        ]);
        let config = PollConfig {
            max_attempts: 3,
            ..PollConfig::default()
        };
        let mut poller = OperationPoller::start(&client, OperationHandle::new("/ops/4"), config);

        let err = poller
            .poll_until_done(&RunContext::background())
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Transport(_)));
        assert_eq!(client.queries(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_then_success_recovers() {
        let client = ScriptedStatus::new(vec![
            Err(ProvisionError::Transport("gateway timeout".into())),
            Ok(succeeded("/ops/5")),
        ]);
        let mut poller =
            OperationPoller::start(&client, OperationHandle::new("/ops/5"), PollConfig::default());

        let output = poller
            .poll_until_done(&RunContext::background())
            .await
            .unwrap();
        assert_eq!(output.resource_id.as_deref(), Some("/ops/5"));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_rejection_stops_immediately() {
        let client = ScriptedStatus::new(vec![Err(ProvisionError::RemoteRejected(
            ErrorDetail::new("BadRequest", "malformed handle").with_status(400),
        ))]);
        let mut poller =
            OperationPoller::start(&client, OperationHandle::new("/ops/6"), PollConfig::default());

        let err = poller
            .poll_until_done(&RunContext::background())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::RemoteRejected(_)));
        assert_eq!(client.queries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let client = ScriptedStatus::new(vec![]);
        let (ctx, cancel) = RunContext::new();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        });

        let mut poller =
            OperationPoller::start(&client, OperationHandle::new("/ops/7"), PollConfig::default());
        let err = poller.poll_until_done(&ctx).await.unwrap_err();

        assert!(matches!(err, ProvisionError::Canceled(_)));
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn handle_deadline_times_out() {
        let client = ScriptedStatus::new(vec![]);
        let handle = OperationHandle::new("/ops/8").with_deadline(Duration::from_secs(25));
        let mut poller = OperationPoller::start(&client, handle, PollConfig::default());

        let started = tokio::time::Instant::now();
        let err = poller
            .poll_until_done(&RunContext::background())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Timeout(_)));
        // The final wait is clipped to the budget, so the timeout lands on
        // it rather than one full interval past it.
        assert_eq!(started.elapsed(), Duration::from_secs(25));
    }

    /// Client whose status endpoint never answers.
    struct HangingStatus;

    #[async_trait]
    impl ResourceClient for HangingStatus {
        async fn submit(
            &self,
            _action: StepAction,
            _kind: &str,
            _name: &str,
            _body: &serde_json::Value,
        ) -> Result<SubmitOutcome> {
            unimplemented!("not used by poller tests")
        }

        async fn query_status(&self, _handle: &OperationHandle) -> Result<OperationStatus> {
            std::future::pending().await
        }

        async fn fetch(&self, _kind: &str, _name: &str) -> Result<Option<ResourceOutput>> {
            unimplemented!("not used by poller tests")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_reaches_an_in_flight_status_query() {
        let (ctx, cancel) = RunContext::new();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });

        let client = HangingStatus;
        let mut poller =
            OperationPoller::start(&client, OperationHandle::new("/ops/9"), PollConfig::default());

        let started = tokio::time::Instant::now();
        let err = poller.poll_until_done(&ctx).await.unwrap_err();

        assert!(matches!(err, ProvisionError::Canceled(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = PollConfig {
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(10),
            multiplier: 2.0,
            ..PollConfig::default()
        };

        assert_eq!(config.retry_delay(0), Duration::from_secs(1));
        assert_eq!(config.retry_delay(1), Duration::from_secs(2));
        assert_eq!(config.retry_delay(2), Duration::from_secs(4));
        assert_eq!(config.retry_delay(3), Duration::from_secs(8));
        assert_eq!(config.retry_delay(4), Duration::from_secs(10));
    }
}
