//! Long-running operation poller.
//!
//! Turns a status query into a bounded, cancellable wait:
//!
//! ```text
//! start -> wait initial_delay -> query -+-> pending / wrong operation / absent -> wait poll_interval -> query
//!                                       +-> target reached | failed | timed out | given up | cancelled
//! ```
//!
//! The poller knows nothing about resources. It receives a status-fetch
//! function, the states to stop at, the states to keep waiting on and a
//! [`PollConfig`].

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ClientResult;
use crate::error::{EngineError, Result};
use crate::types::{OperationState, OperationType, RemoteResource};

/// Timing and tolerance for one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Pause between the mutating call and the first query.
    pub initial_delay: Duration,
    /// Flat pause between queries.
    pub poll_interval: Duration,
    /// Total wall-clock budget, initial delay included.
    pub timeout: Duration,
    /// Consecutive not-found responses tolerated before giving up.
    pub absent_tolerance: u32,
}

impl PollConfig {
    pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15 * 60);

    /// Defaults for an operation type.
    ///
    /// A freshly created instance may take a while to become visible (six
    /// checks is three minutes at the default interval). An instance that
    /// vanishes during an update is gone.
    pub fn for_operation(operation: OperationType) -> Self {
        let absent_tolerance = match operation {
            OperationType::Create => 6,
            OperationType::Update => 3,
            OperationType::Delete => 20,
        };
        Self {
            initial_delay: Self::DEFAULT_INITIAL_DELAY,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            timeout: Self::DEFAULT_TIMEOUT,
            absent_tolerance,
        }
    }
}

/// Per-operation poll configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTimeouts {
    pub create: PollConfig,
    pub update: PollConfig,
    pub delete: PollConfig,
}

impl Default for PollTimeouts {
    fn default() -> Self {
        Self {
            create: PollConfig::for_operation(OperationType::Create),
            update: PollConfig::for_operation(OperationType::Update),
            delete: PollConfig::for_operation(OperationType::Delete),
        }
    }
}

impl PollTimeouts {
    pub fn get(&self, operation: OperationType) -> PollConfig {
        match operation {
            OperationType::Create => self.create,
            OperationType::Update => self.update,
            OperationType::Delete => self.delete,
        }
    }

    fn get_mut(&mut self, operation: OperationType) -> &mut PollConfig {
        match operation {
            OperationType::Create => &mut self.create,
            OperationType::Update => &mut self.update,
            OperationType::Delete => &mut self.delete,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.create.initial_delay = delay;
        self.update.initial_delay = delay;
        self.delete.initial_delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.create.poll_interval = interval;
        self.update.poll_interval = interval;
        self.delete.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, operation: OperationType, timeout: Duration) -> Self {
        self.get_mut(operation).timeout = timeout;
        self
    }
}

/// What a single status query saw.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation<T> {
    /// The awaited operation is visible in the given state.
    State(T, OperationState),
    /// The resource is visible but its last operation is a different one,
    /// typically a stale operation that has not been replaced yet.
    WrongOperation(T),
    /// The control plane reports no such resource.
    Absent,
}

impl Observation<RemoteResource> {
    /// Interpret a status query for the awaited operation type.
    ///
    /// Not found becomes [`Observation::Absent`]; any other client error is
    /// returned and ends the poll. A resource without a last operation has
    /// nothing in flight and counts as succeeded.
    pub fn of(
        result: ClientResult<RemoteResource>,
        awaited: OperationType,
    ) -> ClientResult<Self> {
        let resource = match result {
            Ok(resource) => resource,
            Err(e) if e.is_not_found() => return Ok(Observation::Absent),
            Err(e) => return Err(e),
        };

        let last = resource
            .last_operation
            .as_ref()
            .map(|op| (op.op_type, op.state));
        match last {
            None => Ok(Observation::State(resource, OperationState::Succeeded)),
            Some((op_type, state)) if op_type == awaited => {
                Ok(Observation::State(resource, state))
            }
            Some(_) => Ok(Observation::WrongOperation(resource)),
        }
    }
}

/// Which states end a wait and which keep it going.
///
/// `Failed` always ends the wait with [`EngineError::TerminalFailure`]. An
/// empty `target` means the wait succeeds when the resource is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitFor {
    pub target: &'static [OperationState],
    pub pending: &'static [OperationState],
}

impl WaitFor {
    /// Wait for a create or update to succeed.
    pub const SUCCEEDED: WaitFor = WaitFor {
        target: &[OperationState::Succeeded],
        pending: &[OperationState::Pending, OperationState::InProgress],
    };

    /// Wait for a resource to disappear. A succeeded delete operation that is
    /// still visible is not yet terminal.
    pub const ABSENT: WaitFor = WaitFor {
        target: &[],
        pending: &[
            OperationState::Pending,
            OperationState::InProgress,
            OperationState::Succeeded,
        ],
    };

    fn absence_is_target(&self) -> bool {
        self.target.is_empty()
    }
}

/// Terminal outcome of a successful wait.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    /// A target state was observed; carries the last observed value.
    Reached(T),
    /// The resource disappeared and absence was the target.
    Absent,
}

/// Waits for one operation on one resource.
pub struct Poller<'a> {
    operation: OperationType,
    id: &'a str,
    config: PollConfig,
    cancel: &'a CancellationToken,
}

impl<'a> Poller<'a> {
    pub fn new(
        operation: OperationType,
        id: &'a str,
        config: PollConfig,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            operation,
            id,
            config,
            cancel,
        }
    }

    /// Query `fetch` until a terminal outcome. The deadline and the
    /// cancellation token also bound each individual query.
    pub async fn wait<T, F, Fut>(&self, wait_for: WaitFor, mut fetch: F) -> Result<PollOutcome<T>>
    where
        T: Described,
        F: FnMut() -> Fut,
        Fut: Future<Output = ClientResult<Observation<T>>>,
    {
        let deadline = Instant::now() + self.config.timeout;
        self.pause(self.config.initial_delay, deadline).await?;

        let mut absent_checks = 0u32;
        let mut queries = 0u32;
        loop {
            queries += 1;
            let observation = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                _ = sleep_until(deadline) => return Err(self.timed_out()),
                observation = fetch() => observation?,
            };
            match observation {
                Observation::Absent if wait_for.absence_is_target() => {
                    info!(
                        "{} of {} complete: resource absent after {} queries",
                        self.operation, self.id, queries
                    );
                    return Ok(PollOutcome::Absent);
                }
                Observation::Absent => {
                    absent_checks += 1;
                    if absent_checks > self.config.absent_tolerance {
                        return Err(EngineError::GivenUp {
                            operation: self.operation,
                            id: self.id.to_string(),
                            checks: absent_checks,
                        });
                    }
                    warn!(
                        "{} of {}: not found ({}/{})",
                        self.operation, self.id, absent_checks, self.config.absent_tolerance
                    );
                }
                Observation::WrongOperation(_) => {
                    absent_checks = 0;
                    debug!(
                        "{} of {}: last operation is not {}, waiting",
                        self.operation, self.id, self.operation
                    );
                }
                Observation::State(value, state) => {
                    absent_checks = 0;
                    debug!("{} of {}: {}", self.operation, self.id, state);

                    if state == OperationState::Failed {
                        return Err(self.failure(value.description()));
                    }
                    if wait_for.target.contains(&state) {
                        info!(
                            "{} of {} reached {} after {} queries",
                            self.operation, self.id, state, queries
                        );
                        return Ok(PollOutcome::Reached(value));
                    }
                    if !wait_for.pending.contains(&state) {
                        return Err(EngineError::UnexpectedState {
                            operation: self.operation,
                            id: self.id.to_string(),
                            state,
                        });
                    }
                }
            }

            self.pause(self.config.poll_interval, deadline).await?;
        }
    }

    /// Sleep until `duration` passes or the deadline hits, whichever is first.
    async fn pause(&self, duration: Duration, deadline: Instant) -> Result<()> {
        let wake = (Instant::now() + duration).min(deadline);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(self.cancelled()),
            _ = sleep_until(wake) => {}
        }

        if Instant::now() >= deadline {
            return Err(self.timed_out());
        }
        Ok(())
    }

    fn cancelled(&self) -> EngineError {
        EngineError::Cancelled {
            operation: self.operation,
            id: self.id.to_string(),
        }
    }

    fn timed_out(&self) -> EngineError {
        EngineError::Timeout {
            operation: self.operation,
            id: self.id.to_string(),
            timeout: self.config.timeout,
        }
    }

    fn failure(&self, description: String) -> EngineError {
        EngineError::TerminalFailure {
            operation: self.operation,
            description,
        }
    }
}

/// Observed values that carry the remote failure description.
pub trait Described {
    fn description(&self) -> String;
}

impl Described for RemoteResource {
    fn description(&self) -> String {
        self.last_operation
            .as_ref()
            .map(|op| op.description.clone())
            .unwrap_or_default()
    }
}

impl Described for String {
    fn description(&self) -> String {
        self.clone()
    }
}
