use forgebatch_core::{
    ContextOwner, ExecutionContext, JobExecution, JobExecutionId, JobInstance, JobParameters,
    StepExecution, StepExecutionId,
};
use thiserror::Error;

use super::error::StoreError;

/// Which restart rule rejected a launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartReason {
    /// The job is not restartable and the instance already ran.
    NotRestartable,
    /// A step of the last execution ended in `UNKNOWN`.
    UnknownStepStatus { step_name: String },
    /// The last execution itself ended in `UNKNOWN`.
    UnknownStatus(JobExecutionId),
}

impl std::fmt::Display for RestartReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartReason::NotRestartable => write!(f, "job is not restartable"),
            RestartReason::UnknownStepStatus { step_name } => {
                write!(f, "step '{step_name}' is in UNKNOWN status")
            }
            RestartReason::UnknownStatus(id) => {
                write!(f, "job execution {id} is in UNKNOWN status")
            }
        }
    }
}

/// Job repository error.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("a job execution for '{job_name}' is already running (id={execution_id})")]
    AlreadyRunning {
        job_name: String,
        execution_id: JobExecutionId,
    },

    #[error("cannot restart '{job_name}': {reason}")]
    Restart {
        job_name: String,
        reason: RestartReason,
    },

    #[error("job instance '{job_name}' already completed for parameters [{parameters}]")]
    InstanceAlreadyComplete { job_name: String, parameters: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RepositoryError {
    pub fn is_optimistic_lock(&self) -> bool {
        matches!(self, RepositoryError::Store(e) if e.is_optimistic_lock())
    }
}

/// Bookkeeping boundary used by the launcher, the operator and the step
/// engine.
///
/// All reads return owned copies with their step executions and execution
/// contexts attached. Writes follow the store contracts: `add_*` saves,
/// `update*` is optimistic-lock checked.
pub trait JobRepository: Send + Sync {
    fn is_job_instance_exists(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<bool, RepositoryError>;

    /// Atomically claim the instance for a new execution, or reject.
    ///
    /// Under one lock: resolve (or create) the instance, reject when its
    /// stored execution is running, `UNKNOWN` or `COMPLETED`, otherwise save
    /// a `STARTING` execution that carries the previous job-level context.
    fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobExecution, RepositoryError>;

    /// Persist `execution`, pulling in concurrent status changes first.
    fn update(&self, execution: &mut JobExecution) -> Result<(), RepositoryError>;

    fn synchronize_status(&self, execution: &mut JobExecution) -> Result<(), RepositoryError>;

    fn add_step_execution(&self, step: &mut StepExecution) -> Result<(), RepositoryError>;

    fn add_step_executions(&self, steps: &mut [StepExecution]) -> Result<(), RepositoryError> {
        for step in steps.iter_mut() {
            self.add_step_execution(step)?;
        }
        Ok(())
    }

    fn update_step_execution(&self, step: &mut StepExecution) -> Result<(), RepositoryError>;

    fn update_job_execution_context(&self, execution: &JobExecution) -> Result<(), RepositoryError>;

    fn update_step_execution_context(&self, step: &StepExecution) -> Result<(), RepositoryError>;

    fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, RepositoryError>;

    fn get_last_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobExecution>, RepositoryError>;

    fn get_last_step_execution(
        &self,
        instance: &JobInstance,
        step_name: &str,
    ) -> Result<Option<StepExecution>, RepositoryError>;

    fn find_job_executions(&self, instance: &JobInstance) -> Result<Vec<JobExecution>, RepositoryError>;

    fn find_running_job_executions(&self, job_name: &str) -> Result<Vec<JobExecution>, RepositoryError>;

    fn get_job_execution(&self, id: JobExecutionId) -> Result<Option<JobExecution>, RepositoryError>;

    fn get_step_execution(
        &self,
        job_execution_id: JobExecutionId,
        step_id: StepExecutionId,
    ) -> Result<Option<StepExecution>, RepositoryError>;

    fn get_execution_context(
        &self,
        owner: ContextOwner,
    ) -> Result<Option<ExecutionContext>, RepositoryError>;
}
