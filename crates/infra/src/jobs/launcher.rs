//! Fault-tolerant job launcher.
//!
//! A launch goes through:
//!
//! 1. parameter validation (no record is created on failure)
//! 2. restart resolution against the last execution of the instance
//! 3. an atomic claim in the repository that creates the `STARTING` execution
//! 4. dispatch to a [`TaskExecutor`]; a rejection fails the execution
//! 5. the job body under the retry policy
//! 6. one terminal write of status, exit status and end time
//!
//! Whether the caller sees the final execution depends on the executor: an
//! inline executor returns the terminal result, a threaded one returns the
//! `STARTING` execution and the outcome is only visible in the repository.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::thread;

use chrono::Utc;
use forgebatch_core::{
    BatchStatus, DomainError, Entity, ExitStatus, JobExecution, JobExecutionId, JobParameters,
    LaunchId,
};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

use crate::config::LauncherConfig;
use crate::repository::{JobRepository, RepositoryError, RestartReason};

use super::executor::{SyncTaskExecutor, TaskExecutor, TaskRejected};
use super::retry::{self, RetryExhausted};
use super::types::{Job, RecoveryHandler, RetryPolicy};

/// Attempts for the terminal write when it races a concurrent update.
const TERMINAL_WRITE_ATTEMPTS: u32 = 3;

/// Launch error.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("invalid job parameters: {0}")]
    ParametersInvalid(#[source] DomainError),

    #[error("job '{job_name}' is already running (execution {execution_id})")]
    AlreadyRunning {
        job_name: String,
        execution_id: JobExecutionId,
    },

    #[error("restart rejected: {0}")]
    Restart(RestartReason),

    #[error("job instance '{job_name}' is already complete for parameters [{parameters}]")]
    InstanceAlreadyComplete { job_name: String, parameters: String },

    #[error(transparent)]
    TaskRejected(#[from] TaskRejected),

    #[error("retry exhausted after {attempts} attempt(s): {last_failure:#}")]
    RetryExhausted {
        attempts: u32,
        last_failure: anyhow::Error,
    },

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for LaunchError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::AlreadyRunning {
                job_name,
                execution_id,
            } => LaunchError::AlreadyRunning {
                job_name,
                execution_id,
            },
            RepositoryError::Restart { reason, .. } => LaunchError::Restart(reason),
            RepositoryError::InstanceAlreadyComplete {
                job_name,
                parameters,
            } => LaunchError::InstanceAlreadyComplete {
                job_name,
                parameters,
            },
            other => LaunchError::Repository(other),
        }
    }
}

impl From<RetryExhausted> for LaunchError {
    fn from(err: RetryExhausted) -> Self {
        LaunchError::RetryExhausted {
            attempts: err.attempts,
            last_failure: err.last_failure,
        }
    }
}

type LaunchOutcome = Result<JobExecution, LaunchError>;

/// Launches jobs against a [`JobRepository`].
#[derive(Clone)]
pub struct JobLauncher {
    repository: Arc<dyn JobRepository>,
    task_executor: Arc<dyn TaskExecutor>,
    retry_policy: RetryPolicy,
    recovery_handler: Option<RecoveryHandler>,
}

impl std::fmt::Debug for JobLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLauncher")
            .field("retry_policy", &self.retry_policy)
            .field("recovery_handler", &self.recovery_handler.is_some())
            .finish_non_exhaustive()
    }
}

impl JobLauncher {
    /// Inline dispatch, default retry policy, no recovery handler.
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self {
            repository,
            task_executor: Arc::new(SyncTaskExecutor),
            retry_policy: RetryPolicy::default(),
            recovery_handler: None,
        }
    }

    pub fn from_config(repository: Arc<dyn JobRepository>, config: &LauncherConfig) -> Self {
        Self::new(repository)
            .with_task_executor(config.task_executor())
            .with_retry_policy(config.retry_policy.clone())
    }

    pub fn with_task_executor(mut self, task_executor: Arc<dyn TaskExecutor>) -> Self {
        self.task_executor = task_executor;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_recovery_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&JobExecution, &anyhow::Error) -> ExitStatus + Send + Sync + 'static,
    {
        self.recovery_handler = Some(Arc::new(handler));
        self
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repository
    }

    /// Launch `job` for `parameters`.
    ///
    /// With inline dispatch the returned execution is terminal; with threaded
    /// dispatch it is the `STARTING` execution.
    pub fn launch(&self, job: Arc<dyn Job>, parameters: &JobParameters) -> LaunchOutcome {
        let launch_id = LaunchId::new();
        let span = info_span!("launch", job = job.name(), launch_id = %launch_id);
        let _entered = span.enter();

        if let Some(validator) = job.parameters_validator() {
            validator
                .validate(parameters)
                .map_err(LaunchError::ParametersInvalid)?;
        }

        self.check_restart(job.as_ref(), parameters)?;

        let execution = self.repository.create_job_execution(job.name(), parameters)?;
        info!(
            job_execution_id = ?execution.id(),
            job_instance_id = %execution.job_instance().id(),
            "launching job"
        );

        let slot: Arc<Mutex<Option<LaunchOutcome>>> = Arc::new(Mutex::new(None));
        let caller = thread::current().id();

        let task = {
            let job = job.clone();
            let repository = self.repository.clone();
            let policy = self.retry_policy.clone();
            let handler = self.recovery_handler.clone();
            let execution = execution.clone();
            let slot = slot.clone();
            let span = span.clone();

            Box::new(move || {
                let _entered = span.enter();
                let outcome = run_job(job.as_ref(), repository.as_ref(), execution, &policy, handler.as_ref());

                if thread::current().id() == caller {
                    if let Ok(mut guard) = slot.lock() {
                        *guard = Some(outcome);
                    }
                } else if let Err(err) = outcome {
                    error!(error = %err, "asynchronous job run failed");
                }
            })
        };

        if let Err(rejected) = self.task_executor.execute(task) {
            let mut execution = execution;
            if let Err(err) = record_rejection(self.repository.as_ref(), &mut execution, &rejected) {
                error!(error = %err, rejection = %rejected, "failed to record task rejection");
                return Err(err.into());
            }
            return Err(LaunchError::TaskRejected(rejected));
        }

        let ran_inline = slot.lock().ok().and_then(|mut guard| guard.take());
        match ran_inline {
            Some(outcome) => outcome,
            None => Ok(execution),
        }
    }

    /// Reject launches the last execution of the instance forbids.
    fn check_restart(&self, job: &dyn Job, parameters: &JobParameters) -> Result<(), LaunchError> {
        let Some(last) = self.repository.get_last_job_execution(job.name(), parameters)? else {
            return Ok(());
        };

        if last.status() == BatchStatus::Completed {
            return Err(LaunchError::InstanceAlreadyComplete {
                job_name: job.name().to_string(),
                parameters: parameters.to_identity_key(),
            });
        }
        if !job.is_restartable() {
            return Err(LaunchError::Restart(RestartReason::NotRestartable));
        }

        for step in last.step_executions() {
            if step.status().is_running() {
                return Err(LaunchError::AlreadyRunning {
                    job_name: job.name().to_string(),
                    execution_id: step.job_execution_id(),
                });
            }
            if step.status() == BatchStatus::Unknown {
                return Err(LaunchError::Restart(RestartReason::UnknownStepStatus {
                    step_name: step.step_name().to_string(),
                }));
            }
        }

        debug!(
            previous_execution_id = ?last.id(),
            previous_status = %last.status(),
            "restarting job instance"
        );
        Ok(())
    }
}

/// Run the job body to a terminal, persisted state.
fn run_job(
    job: &dyn Job,
    repository: &dyn JobRepository,
    mut execution: JobExecution,
    policy: &RetryPolicy,
    handler: Option<&RecoveryHandler>,
) -> LaunchOutcome {
    execution.start_time = Some(Utc::now());
    execution.upgrade_status(BatchStatus::Started);
    if let Err(err) = repository.update(&mut execution) {
        return abort_run(repository, execution, err);
    }

    let result = retry::execute(policy, |attempt| {
        execution.exit_status = ExitStatus::executing();
        debug!(attempt, "running job body");

        let outcome = catch_unwind(AssertUnwindSafe(|| job.execute(&mut execution, repository)))
            .unwrap_or_else(|panic| Err(anyhow::anyhow!("job panicked: {}", panic_message(panic.as_ref()))));

        if let Err(failure) = &outcome {
            execution.add_failure(format!("attempt {attempt}: {failure:#}"));
        }
        outcome
    });

    let outcome = match result {
        Ok(()) => {
            if let Err(err) = repository.synchronize_status(&mut execution) {
                return abort_run(repository, execution, err);
            }
            if execution.is_stopping() {
                execution.set_status(BatchStatus::Stopped);
                execution.exit_status = execution.exit_status.and(&ExitStatus::stopped());
            } else {
                execution.upgrade_status(BatchStatus::Completed);
                execution.exit_status = execution.exit_status.and(&ExitStatus::completed());
            }
            Ok(())
        }
        Err(exhausted) => {
            execution.upgrade_status(BatchStatus::Failed);
            match handler {
                Some(recover) => {
                    warn!(
                        attempts = exhausted.attempts,
                        error = %exhausted.last_failure,
                        "retries exhausted, recovering"
                    );
                    execution.exit_status = recover(&execution, &exhausted.last_failure);
                    Ok(())
                }
                None => {
                    execution.exit_status = failed_exit_status(&exhausted);
                    Err(exhausted)
                }
            }
        }
    };

    execution.end_time = Some(Utc::now());
    write_terminal(repository, &mut execution)?;
    repository.update_job_execution_context(&execution)?;

    info!(
        job_execution_id = ?execution.id(),
        status = %execution.status(),
        exit_code = execution.exit_status.exit_code(),
        "job execution finished"
    );

    outcome.map(|()| execution).map_err(LaunchError::from)
}

/// Persist the terminal state, re-syncing and retrying on a lost race.
fn write_terminal(repository: &dyn JobRepository, execution: &mut JobExecution) -> Result<(), RepositoryError> {
    let mut attempt = 1;
    loop {
        match repository.update(execution) {
            Err(err) if err.is_optimistic_lock() && attempt < TERMINAL_WRITE_ATTEMPTS => {
                debug!(attempt, error = %err, "terminal write lost a race, retrying");
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Fail a run whose own bookkeeping broke. The execution is written `FAILED`
/// before `cause` is returned; a failing terminal write is returned instead.
fn abort_run(repository: &dyn JobRepository, mut execution: JobExecution, cause: RepositoryError) -> LaunchOutcome {
    error!(job_execution_id = ?execution.id(), error = %cause, "job run aborted");

    execution.upgrade_status(BatchStatus::Failed);
    execution.exit_status = ExitStatus::failed().add_exit_description(cause.to_string());
    execution.add_failure(cause.to_string());
    execution.end_time = Some(Utc::now());
    write_terminal(repository, &mut execution)?;

    Err(cause.into())
}

fn failed_exit_status(exhausted: &RetryExhausted) -> ExitStatus {
    ExitStatus::failed().add_exit_description(format!("{:#}", exhausted.last_failure))
}

/// Mark an execution the executor refused as `FAILED` and persist it.
fn record_rejection(
    repository: &dyn JobRepository,
    execution: &mut JobExecution,
    rejected: &TaskRejected,
) -> Result<(), RepositoryError> {
    execution.upgrade_status(BatchStatus::Failed);
    execution.exit_status = ExitStatus::failed().add_exit_description(rejected.to_string());
    execution.end_time = Some(Utc::now());
    execution.add_failure(rejected.to_string());

    write_terminal(repository, execution)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
