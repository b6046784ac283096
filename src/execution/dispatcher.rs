//! Action dispatch.
//!
//! The `Dispatcher` runs an action against its target:
//! - A single host runs inline on the calling task
//! - A group fans out to one spawned worker per member
//! - Every host run holds a semaphore permit for its whole session
//!
//! Results are merged through a [`ResultAggregator`], which is the only
//! state shared between workers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore, watch};
use tokio::time::{Instant, timeout_at};
use tracing::{Instrument, debug, error, info_span, warn};

use crate::core::action::{Action, SpecError, Target};
use crate::core::directory::Directory;
use crate::core::host::HostDetail;
use crate::core::result::{ActionResult, StepResult, TaskResult};
use crate::core::step::Step;
use crate::transport::{Session, Transport};

use super::aggregator::{HostError, HostRun, ResultAggregator, TaskResultBuilder};
use super::step::{CommandFailurePolicy, StepOutcome, executor_for};

/// Default cap on simultaneously open sessions.
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Errors that stop an action before or while it is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("invalid action: {0}")]
    InvalidSpec(#[from] SpecError),

    #[error("duplicate target address: {0}")]
    DuplicateTarget(String),

    #[error("result for unregistered address: {0}")]
    UnknownTarget(String),
}

/// Runtime settings of a [`Dispatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub max_concurrency: usize,
    /// Upper bound for one host's whole session, unset by default.
    pub host_timeout: Option<Duration>,
    pub command_failure: CommandFailurePolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            host_timeout: None,
            command_failure: CommandFailurePolicy::default(),
        }
    }
}

impl DispatchConfig {
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_host_timeout(mut self, host_timeout: Duration) -> Self {
        self.host_timeout = Some(host_timeout);
        self
    }

    pub fn with_command_failure(mut self, policy: CommandFailurePolicy) -> Self {
        self.command_failure = policy;
        self
    }
}

/// Cancels the work of a [`Dispatcher`].
///
/// Hosts still running, or still waiting for a permit, stop with a
/// `cancelled` host error. Cancellation is permanent for the dispatcher.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Runs actions against hosts through a transport.
pub struct Dispatcher {
    directory: Arc<dyn Directory>,
    worker: HostWorker,
    cancel: Arc<watch::Sender<bool>>,
}

impl Dispatcher {
    /// Create a dispatcher. A `max_concurrency` of zero is treated as one.
    pub fn new(
        directory: Arc<dyn Directory>,
        transport: Arc<dyn Transport>,
        config: DispatchConfig,
    ) -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            directory,
            worker: HostWorker {
                transport,
                semaphore: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
                policy: config.command_failure,
                host_timeout: config.host_timeout,
                cancelled: receiver,
            },
            cancel: Arc::new(sender),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            sender: Arc::clone(&self.cancel),
        }
    }

    /// Permits not held by a running host.
    pub fn available_permits(&self) -> usize {
        self.worker.semaphore.available_permits()
    }

    /// Run one action to completion.
    ///
    /// Group members are resolved and registered before any host is
    /// contacted, so an unknown, empty or ambiguous group fails without side
    /// effects.
    pub async fn dispatch(&self, action: &Action) -> Result<ActionResult, DispatchError> {
        let span = info_span!(
            "action",
            name = %action.name(),
            target = %action.target(),
            steps = action.steps().len(),
        );

        async move {
            match action.target() {
                Target::Host(host) => self.dispatch_host(action, host).await,
                Target::Group(group) => self.dispatch_group(action, group).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn dispatch_host(
        &self,
        action: &Action,
        host: &Arc<HostDetail>,
    ) -> Result<ActionResult, DispatchError> {
        let mut aggregator = ResultAggregator::new(
            action.name(),
            action.target().to_string(),
            [host.address.clone()],
        )?;

        let run = self
            .worker
            .run(host, action.steps())
            .instrument(info_span!("host", address = %host.address))
            .await;
        aggregator.record(&host.address, run)?;

        Ok(aggregator.finish())
    }

    async fn dispatch_group(
        &self,
        action: &Action,
        group: &str,
    ) -> Result<ActionResult, DispatchError> {
        let members = self
            .directory
            .resolve_group(group)
            .map_err(SpecError::from)?;
        if members.is_empty() {
            return Err(SpecError::EmptyGroup(group.to_string()).into());
        }

        let aggregator = Arc::new(Mutex::new(ResultAggregator::new(
            action.name(),
            group,
            members.iter().map(|host| host.address.clone()),
        )?));

        debug!(group = %group, hosts = members.len(), "dispatching to group");

        let steps: Arc<[Step]> = Arc::from(action.steps());
        let mut handles = Vec::with_capacity(members.len());

        for host in members {
            let worker = self.worker.clone();
            let steps = Arc::clone(&steps);
            let aggregator = Arc::clone(&aggregator);
            let span = info_span!("host", address = %host.address);

            handles.push(tokio::spawn(
                async move {
                    let run = worker.run(&host, &steps).await;
                    aggregator.lock().await.record(&host.address, run)
                }
                .instrument(span),
            ));
        }

        let mut failure = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                }
                Err(e) => error!(error = %e, "host worker panicked"),
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        let result = aggregator.lock().await.finish();
        Ok(result)
    }

    /// Run actions one after the other and collect their results.
    ///
    /// An action that cannot be dispatched is recorded with its error and the
    /// batch continues. Duplicate targets end the batch.
    pub async fn run_task(&self, name: &str, actions: &[Action]) -> TaskResult {
        let mut builder = TaskResultBuilder::new(name);
        let span = info_span!("task", name = %name, run_id = %builder.run_id());

        for action in actions {
            match self.dispatch(action).instrument(span.clone()).await {
                Ok(result) => builder.push(result),
                Err(DispatchError::InvalidSpec(e)) => {
                    warn!(parent: &span, action = %action.name(), error = %e, "action skipped");
                    builder.push(ActionResult::failed(
                        action.name(),
                        action.target().to_string(),
                        e.to_string(),
                    ));
                }
                Err(e) => {
                    error!(parent: &span, action = %action.name(), error = %e, "task aborted");
                    builder.fail(e.to_string());
                    break;
                }
            }
        }

        builder.finish()
    }
}

/// Runs the steps of one action on one host.
#[derive(Clone)]
struct HostWorker {
    transport: Arc<dyn Transport>,
    semaphore: Arc<Semaphore>,
    policy: CommandFailurePolicy,
    host_timeout: Option<Duration>,
    cancelled: watch::Receiver<bool>,
}

impl HostWorker {
    async fn run(&self, host: &HostDetail, steps: &[Step]) -> HostRun {
        let mut cancelled = self.cancelled.clone();
        let already_cancelled = *cancelled.borrow();
        if already_cancelled {
            return HostRun::aborted(Vec::new(), HostError::Cancelled);
        }

        let _permit = tokio::select! {
            permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return HostRun::aborted(Vec::new(), HostError::Cancelled),
            },
            _ = wait_cancelled(&mut cancelled) => {
                return HostRun::aborted(Vec::new(), HostError::Cancelled);
            }
        };

        let started = Instant::now();
        let mut session = match self
            .bounded(&mut cancelled, started, self.transport.open(host))
            .await
        {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return stopped(Vec::new(), e.into()),
            Err(error) => return stopped(Vec::new(), error),
        };

        let mut done = Vec::with_capacity(steps.len());
        let error = self
            .bounded(
                &mut cancelled,
                started,
                self.run_steps(session.as_mut(), host, steps, &mut done),
            )
            .await
            .unwrap_or_else(Some);

        if let Err(e) = session.close().await {
            debug!(error = %e, "failed to close session");
        }

        match error {
            Some(error) => stopped(done, error),
            None => HostRun::completed(done),
        }
    }

    /// Race `work` against the host deadline and cancellation.
    async fn bounded<F: Future>(
        &self,
        cancelled: &mut watch::Receiver<bool>,
        started: Instant,
        work: F,
    ) -> Result<F::Output, HostError> {
        let limited = async {
            match self.host_timeout {
                Some(limit) => timeout_at(started + limit, work)
                    .await
                    .map_err(|_| HostError::TimedOut(limit)),
                None => Ok(work.await),
            }
        };

        tokio::select! {
            outcome = limited => outcome,
            _ = wait_cancelled(cancelled) => Err(HostError::Cancelled),
        }
    }

    /// Run every step on an open session. Completed results land in `done`
    /// as they finish, so they survive a timeout or cancellation.
    async fn run_steps(
        &self,
        session: &mut dyn Session,
        host: &HostDetail,
        steps: &[Step],
        done: &mut Vec<StepResult>,
    ) -> Option<HostError> {
        for (index, step) in steps.iter().enumerate() {
            debug!(step = index, kind = step.kind(), "starting step");

            match executor_for(step, self.policy).execute(session, host).await {
                StepOutcome::Completed(result) => done.push(result),
                StepOutcome::Aborted { mut partial, error } => {
                    partial.push_error(error.to_string());
                    done.push(partial);
                    return Some(error.into());
                }
            }
        }
        None
    }
}

fn stopped(done: Vec<StepResult>, error: HostError) -> HostRun {
    warn!(error = %error, completed = done.len(), "host stopped");
    HostRun::aborted(done, error)
}

/// Resolves once cancellation is requested. Never resolves if the sender is
/// gone.
async fn wait_cancelled(receiver: &mut watch::Receiver<bool>) {
    if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}
