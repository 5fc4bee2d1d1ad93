//! Stop and abandon running or finished job executions.

use std::sync::Arc;

use forgebatch_core::{BatchStatus, JobExecution, JobExecutionId};
use thiserror::Error;
use tracing::info;

use crate::repository::{JobRepository, RepositoryError};

/// Attempts for a status write that keeps losing optimistic-lock races.
const MAX_WRITE_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("job execution {0} not found")]
    NotFound(JobExecutionId),

    #[error("job execution {id} is not running (status {status})")]
    NotRunning { id: JobExecutionId, status: BatchStatus },

    #[error("job execution {id} is still running (status {status})")]
    StillRunning { id: JobExecutionId, status: BatchStatus },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Operator-side control of executions recorded in a [`JobRepository`].
#[derive(Clone)]
pub struct JobOperator {
    repository: Arc<dyn JobRepository>,
}

impl std::fmt::Debug for JobOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOperator").finish_non_exhaustive()
    }
}

impl JobOperator {
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self { repository }
    }

    /// Request a cooperative stop. The running body observes `STOPPING`
    /// through `synchronize_status`; running steps are flagged
    /// terminate-only.
    pub fn stop(&self, id: JobExecutionId) -> Result<JobExecution, OperatorError> {
        let execution = self.write_status(id, BatchStatus::Stopping, |execution| {
            if execution.is_running() {
                Ok(())
            } else {
                Err(OperatorError::NotRunning {
                    id,
                    status: execution.status(),
                })
            }
        })?;

        for step in execution.step_executions() {
            if !step.status().is_running() || step.is_terminate_only() {
                continue;
            }
            let mut step = step.clone();
            step.set_terminate_only();
            self.repository.update_step_execution(&mut step)?;
        }

        info!(job_execution_id = %id, "stop requested");
        Ok(execution)
    }

    /// Mark a finished execution so it is never restarted from.
    pub fn abandon(&self, id: JobExecutionId) -> Result<JobExecution, OperatorError> {
        let execution = self.write_status(id, BatchStatus::Abandoned, |execution| {
            if execution.is_running() {
                Err(OperatorError::StillRunning {
                    id,
                    status: execution.status(),
                })
            } else {
                Ok(())
            }
        })?;

        info!(job_execution_id = %id, "execution abandoned");
        Ok(execution)
    }

    fn write_status<F>(
        &self,
        id: JobExecutionId,
        status: BatchStatus,
        precondition: F,
    ) -> Result<JobExecution, OperatorError>
    where
        F: Fn(&JobExecution) -> Result<(), OperatorError>,
    {
        let mut attempt = 1;
        loop {
            let mut execution = self
                .repository
                .get_job_execution(id)?
                .ok_or(OperatorError::NotFound(id))?;
            precondition(&execution)?;

            execution.upgrade_status(status);
            match self.repository.update(&mut execution) {
                Ok(()) => return Ok(execution),
                Err(err) if err.is_optimistic_lock() && attempt < MAX_WRITE_ATTEMPTS => {
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::SimpleJobRepository;
    use forgebatch_core::{Entity, JobParameters, StepExecution};

    fn setup() -> (Arc<SimpleJobRepository>, JobOperator) {
        let repository = Arc::new(SimpleJobRepository::in_memory());
        let operator = JobOperator::new(repository.clone());
        (repository, operator)
    }

    #[test]
    fn stop_marks_execution_and_running_steps() {
        let (repository, operator) = setup();
        let execution = repository.create_job_execution("foo", &JobParameters::new()).unwrap();
        let mut step = StepExecution::new("load", &execution).unwrap();
        repository.add_step_execution(&mut step).unwrap();

        let stopped = operator.stop(execution.id().unwrap()).unwrap();

        assert_eq!(stopped.status(), BatchStatus::Stopping);
        let stored_step = repository
            .get_step_execution(execution.id().unwrap(), step.id().unwrap())
            .unwrap()
            .unwrap();
        assert!(stored_step.is_terminate_only());
    }

    #[test]
    fn stop_requires_a_running_execution() {
        let (repository, operator) = setup();
        let mut execution = repository.create_job_execution("foo", &JobParameters::new()).unwrap();
        execution.upgrade_status(BatchStatus::Completed);
        repository.update(&mut execution).unwrap();

        assert!(matches!(
            operator.stop(execution.id().unwrap()),
            Err(OperatorError::NotRunning { status: BatchStatus::Completed, .. })
        ));
        assert!(matches!(
            operator.stop(JobExecutionId::new(999)),
            Err(OperatorError::NotFound(_))
        ));
    }

    #[test]
    fn abandon_only_finished_executions() {
        let (repository, operator) = setup();
        let mut execution = repository.create_job_execution("foo", &JobParameters::new()).unwrap();
        let id = execution.id().unwrap();

        assert!(matches!(operator.abandon(id), Err(OperatorError::StillRunning { .. })));

        execution.upgrade_status(BatchStatus::Failed);
        repository.update(&mut execution).unwrap();

        let abandoned = operator.abandon(id).unwrap();
        assert_eq!(abandoned.status(), BatchStatus::Abandoned);
    }
}
