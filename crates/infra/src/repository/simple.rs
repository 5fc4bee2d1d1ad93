use std::sync::{Arc, Mutex};

use chrono::Utc;
use forgebatch_core::{
    BatchStatus, ContextOwner, Entity, ExecutionContext, JobExecution, JobExecutionId,
    JobInstance, JobParameters, StepExecution, StepExecutionId,
};
use tracing::{debug, info};

use super::context_store::{ExecutionContextStore, InMemoryExecutionContextStore};
use super::error::StoreError;
use super::instance_store::{InMemoryJobInstanceStore, JobInstanceStore};
use super::job_execution_store::{InMemoryJobExecutionStore, JobExecutionStore};
use super::step_execution_store::{InMemoryStepExecutionStore, StepExecutionStore};
use super::r#trait::{JobRepository, RepositoryError, RestartReason};

/// [`JobRepository`] composed from the four stores.
pub struct SimpleJobRepository {
    instances: Arc<dyn JobInstanceStore>,
    executions: Arc<dyn JobExecutionStore>,
    steps: Arc<dyn StepExecutionStore>,
    contexts: Arc<dyn ExecutionContextStore>,
    /// Serializes claim-or-reject in `create_job_execution`.
    launch_lock: Mutex<()>,
}

impl SimpleJobRepository {
    pub fn new(
        instances: Arc<dyn JobInstanceStore>,
        executions: Arc<dyn JobExecutionStore>,
        steps: Arc<dyn StepExecutionStore>,
        contexts: Arc<dyn ExecutionContextStore>,
    ) -> Self {
        Self {
            instances,
            executions,
            steps,
            contexts,
            launch_lock: Mutex::new(()),
        }
    }

    /// Repository backed by fresh in-memory stores.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryJobInstanceStore::new()),
            Arc::new(InMemoryJobExecutionStore::new()),
            Arc::new(InMemoryStepExecutionStore::new()),
            Arc::new(InMemoryExecutionContextStore::new()),
        )
    }

    fn load_job_context(&self, execution: &mut JobExecution) -> Result<(), RepositoryError> {
        if let Some(id) = execution.id() {
            if let Some(context) = self.contexts.get_execution_context(ContextOwner::Job(id))? {
                execution.execution_context = context;
            }
        }
        Ok(())
    }

    fn load_step_context(&self, step: &mut StepExecution) -> Result<(), RepositoryError> {
        if let Some(id) = step.id() {
            if let Some(context) = self.contexts.get_execution_context(ContextOwner::Step(id))? {
                step.execution_context = context;
            }
        }
        Ok(())
    }

    /// Attach stored steps and contexts to a copy read from the store.
    fn hydrate(&self, mut execution: JobExecution) -> Result<JobExecution, RepositoryError> {
        self.load_job_context(&mut execution)?;
        self.steps.add_step_executions(&mut execution)?;

        let mut steps = execution.step_executions().to_vec();
        for step in &mut steps {
            self.load_step_context(step)?;
        }
        execution.set_step_executions(steps);
        Ok(execution)
    }

    fn check_claimable(
        &self,
        instance: &JobInstance,
        parameters: &JobParameters,
    ) -> Result<(), RepositoryError> {
        for existing in self.executions.find_job_executions(instance)? {
            let id = existing.id().ok_or(StoreError::MissingId("job execution"))?;

            if existing.is_running() {
                return Err(RepositoryError::AlreadyRunning {
                    job_name: instance.job_name().to_string(),
                    execution_id: id,
                });
            }
            match existing.status() {
                BatchStatus::Unknown => {
                    return Err(RepositoryError::Restart {
                        job_name: instance.job_name().to_string(),
                        reason: RestartReason::UnknownStatus(id),
                    });
                }
                BatchStatus::Completed => {
                    return Err(RepositoryError::InstanceAlreadyComplete {
                        job_name: instance.job_name().to_string(),
                        parameters: parameters.to_identity_key(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl Default for SimpleJobRepository {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for SimpleJobRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleJobRepository").finish_non_exhaustive()
    }
}

impl JobRepository for SimpleJobRepository {
    fn is_job_instance_exists(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<bool, RepositoryError> {
        Ok(self.instances.get_job_instance(job_name, parameters)?.is_some())
    }

    fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobExecution, RepositoryError> {
        let _claim = self.launch_lock.lock().map_err(|_| StoreError::Poisoned)?;

        let (instance, restart_context) = match self.instances.get_job_instance(job_name, parameters)? {
            Some(instance) => {
                self.check_claimable(&instance, parameters)?;

                let mut context = ExecutionContext::new();
                if let Some(mut last) = self.executions.get_last_job_execution(&instance)? {
                    self.load_job_context(&mut last)?;
                    context = last.execution_context;
                }
                (instance, context)
            }
            None => (
                self.instances.create_job_instance(job_name, parameters)?,
                ExecutionContext::new(),
            ),
        };

        let mut execution =
            JobExecution::new(instance, parameters.clone()).with_execution_context(restart_context);
        execution.last_updated = Some(Utc::now());

        self.executions.save_job_execution(&mut execution)?;
        self.contexts.save_job_context(&execution)?;
        execution.execution_context.clear_dirty_flag();

        info!(
            job = job_name,
            job_execution_id = %execution.id().map(|id| id.get()).unwrap_or_default(),
            job_instance_id = %execution.job_instance().id(),
            "created job execution"
        );
        Ok(execution)
    }

    fn update(&self, execution: &mut JobExecution) -> Result<(), RepositoryError> {
        execution.id().ok_or(StoreError::MissingId("job execution"))?;

        execution.last_updated = Some(Utc::now());
        self.executions.synchronize_status(execution)?;
        self.executions.update_job_execution(execution)?;

        debug!(
            job = execution.job_name(),
            status = %execution.status(),
            version = execution.version(),
            "updated job execution"
        );
        Ok(())
    }

    fn synchronize_status(&self, execution: &mut JobExecution) -> Result<(), RepositoryError> {
        Ok(self.executions.synchronize_status(execution)?)
    }

    fn add_step_execution(&self, step: &mut StepExecution) -> Result<(), RepositoryError> {
        let parent = step.job_execution_id();
        if self.executions.get_job_execution(parent)?.is_none() {
            return Err(RepositoryError::NotFound(format!(
                "job execution {parent} for step '{}'",
                step.step_name()
            )));
        }

        step.last_updated = Some(Utc::now());
        self.steps.save_step_execution(step)?;
        self.contexts.save_step_context(step)?;
        Ok(())
    }

    fn update_step_execution(&self, step: &mut StepExecution) -> Result<(), RepositoryError> {
        step.last_updated = Some(Utc::now());
        self.steps.update_step_execution(step)?;

        // Surface a stop request on the parent to the step engine.
        if let Some(parent) = self.executions.get_job_execution(step.job_execution_id())? {
            if parent.is_stopping() {
                step.set_terminate_only();
            }
        }
        Ok(())
    }

    fn update_job_execution_context(&self, execution: &JobExecution) -> Result<(), RepositoryError> {
        Ok(self.contexts.update_job_context(execution)?)
    }

    fn update_step_execution_context(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        Ok(self.contexts.update_step_context(step)?)
    }

    fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, RepositoryError> {
        Ok(self.instances.get_job_instance(job_name, parameters)?)
    }

    fn get_last_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobExecution>, RepositoryError> {
        let Some(instance) = self.instances.get_job_instance(job_name, parameters)? else {
            return Ok(None);
        };
        self.executions
            .get_last_job_execution(&instance)?
            .map(|e| self.hydrate(e))
            .transpose()
    }

    fn get_last_step_execution(
        &self,
        instance: &JobInstance,
        step_name: &str,
    ) -> Result<Option<StepExecution>, RepositoryError> {
        let Some(mut step) = self.steps.get_last_step_execution(instance.id(), step_name)? else {
            return Ok(None);
        };
        self.load_step_context(&mut step)?;
        Ok(Some(step))
    }

    fn find_job_executions(&self, instance: &JobInstance) -> Result<Vec<JobExecution>, RepositoryError> {
        self.executions
            .find_job_executions(instance)?
            .into_iter()
            .map(|e| self.hydrate(e))
            .collect()
    }

    fn find_running_job_executions(&self, job_name: &str) -> Result<Vec<JobExecution>, RepositoryError> {
        self.executions
            .find_running_job_executions(job_name)?
            .into_iter()
            .map(|e| self.hydrate(e))
            .collect()
    }

    fn get_job_execution(&self, id: JobExecutionId) -> Result<Option<JobExecution>, RepositoryError> {
        self.executions
            .get_job_execution(id)?
            .map(|e| self.hydrate(e))
            .transpose()
    }

    fn get_step_execution(
        &self,
        job_execution_id: JobExecutionId,
        step_id: StepExecutionId,
    ) -> Result<Option<StepExecution>, RepositoryError> {
        let Some(mut step) = self.steps.get_step_execution(job_execution_id, step_id)? else {
            return Ok(None);
        };
        self.load_step_context(&mut step)?;
        Ok(Some(step))
    }

    fn get_execution_context(
        &self,
        owner: ContextOwner,
    ) -> Result<Option<ExecutionContext>, RepositoryError> {
        Ok(self.contexts.get_execution_context(owner)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(run: i64) -> JobParameters {
        JobParameters::builder().add_long("run", run).build()
    }

    fn finish(repo: &SimpleJobRepository, execution: &mut JobExecution, status: BatchStatus) {
        execution.upgrade_status(status);
        execution.end_time = Some(Utc::now());
        repo.update(execution).unwrap();
    }

    #[test]
    fn first_launch_creates_instance_and_starting_execution() {
        let repo = SimpleJobRepository::in_memory();
        assert!(!repo.is_job_instance_exists("foo", &params(1)).unwrap());

        let execution = repo.create_job_execution("foo", &params(1)).unwrap();

        assert!(repo.is_job_instance_exists("foo", &params(1)).unwrap());
        assert_eq!(execution.status(), BatchStatus::Starting);
        assert_eq!(execution.version(), 1);
        assert!(execution.last_updated.is_some());
    }

    #[test]
    fn running_execution_blocks_a_second_claim() {
        let repo = SimpleJobRepository::in_memory();
        let first = repo.create_job_execution("foo", &params(1)).unwrap();

        let err = repo.create_job_execution("foo", &params(1)).unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::AlreadyRunning { execution_id, .. } if Some(execution_id) == first.id()
        ));

        // other parameters form another instance
        repo.create_job_execution("foo", &params(2)).unwrap();
    }

    #[test]
    fn completed_instance_cannot_run_again() {
        let repo = SimpleJobRepository::in_memory();
        let mut execution = repo.create_job_execution("foo", &params(1)).unwrap();
        finish(&repo, &mut execution, BatchStatus::Completed);

        assert!(matches!(
            repo.create_job_execution("foo", &params(1)),
            Err(RepositoryError::InstanceAlreadyComplete { .. })
        ));
    }

    #[test]
    fn unknown_execution_cannot_be_claimed() {
        let repo = SimpleJobRepository::in_memory();
        let mut execution = repo.create_job_execution("foo", &params(1)).unwrap();
        finish(&repo, &mut execution, BatchStatus::Unknown);

        assert!(matches!(
            repo.create_job_execution("foo", &params(1)),
            Err(RepositoryError::Restart {
                reason: RestartReason::UnknownStatus(_),
                ..
            })
        ));
    }

    #[test]
    fn restart_carries_previous_job_context() {
        let repo = SimpleJobRepository::in_memory();
        let mut first = repo.create_job_execution("foo", &params(1)).unwrap();
        first.execution_context.put_long("processed", 40);
        repo.update_job_execution_context(&first).unwrap();
        finish(&repo, &mut first, BatchStatus::Failed);

        let second = repo.create_job_execution("foo", &params(1)).unwrap();

        assert_ne!(second.id(), first.id());
        assert_eq!(second.execution_context.get_long("processed"), Some(40));
        assert!(repo.get_job_execution(first.id().unwrap()).unwrap().is_none());
        assert_eq!(
            repo.find_job_executions(second.job_instance()).unwrap().len(),
            1
        );
    }

    #[test]
    fn restart_keeps_the_previous_step_checkpoint() {
        let repo = SimpleJobRepository::in_memory();
        let mut first = repo.create_job_execution("foo", &params(1)).unwrap();
        let mut step = StepExecution::new("load", &first).unwrap();
        repo.add_step_execution(&mut step).unwrap();
        step.upgrade_status(BatchStatus::Failed);
        repo.update_step_execution(&mut step).unwrap();
        step.execution_context.put_long("load.item.current", 42);
        repo.update_step_execution_context(&step).unwrap();
        finish(&repo, &mut first, BatchStatus::Failed);

        let second = repo.create_job_execution("foo", &params(1)).unwrap();

        let last = repo
            .get_last_step_execution(second.job_instance(), "load")
            .unwrap()
            .unwrap();
        assert_eq!(last.id(), step.id());
        assert_eq!(last.execution_context.get_long("load.item.current"), Some(42));

        // the restarted step takes over the checkpoint, older lineages go
        let mut resumed = StepExecution::new("load", &second).unwrap();
        resumed.execution_context = last.execution_context.clone();
        repo.add_step_execution(&mut resumed).unwrap();

        assert!(repo.get_execution_context(ContextOwner::Step(step.id().unwrap())).unwrap().is_none());
        let last = repo
            .get_last_step_execution(second.job_instance(), "load")
            .unwrap()
            .unwrap();
        assert_eq!(last.id(), resumed.id());
        assert_eq!(last.execution_context.get_long("load.item.current"), Some(42));
    }

    #[test]
    fn update_pulls_in_concurrent_stop_before_writing() {
        let repo = SimpleJobRepository::in_memory();
        let mut execution = repo.create_job_execution("foo", &params(1)).unwrap();

        let mut stopper = repo.get_job_execution(execution.id().unwrap()).unwrap().unwrap();
        stopper.upgrade_status(BatchStatus::Stopping);
        repo.update(&mut stopper).unwrap();

        execution.upgrade_status(BatchStatus::Started);
        repo.update(&mut execution).unwrap();

        assert_eq!(execution.status(), BatchStatus::Stopping);
        assert_eq!(execution.version(), 3);
    }

    #[test]
    fn reads_attach_steps_and_contexts() {
        let repo = SimpleJobRepository::in_memory();
        let execution = repo.create_job_execution("foo", &params(1)).unwrap();

        let mut step = StepExecution::new("load", &execution).unwrap();
        step.execution_context.put_string("cursor", "line-10");
        repo.add_step_execution(&mut step).unwrap();

        let loaded = repo.get_job_execution(execution.id().unwrap()).unwrap().unwrap();
        assert_eq!(loaded.step_executions().len(), 1);
        assert_eq!(
            loaded.step_executions()[0].execution_context.get_string("cursor"),
            Some("line-10")
        );

        let last = repo
            .get_last_step_execution(execution.job_instance(), "load")
            .unwrap()
            .unwrap();
        assert_eq!(last.id(), step.id());
        assert_eq!(
            repo.get_step_execution(execution.id().unwrap(), step.id().unwrap())
                .unwrap()
                .unwrap()
                .execution_context
                .get_string("cursor"),
            Some("line-10")
        );
    }

    #[test]
    fn step_of_unknown_execution_is_rejected() {
        let repo = SimpleJobRepository::in_memory();
        let other = SimpleJobRepository::in_memory();
        let execution = other.create_job_execution("foo", &params(1)).unwrap();
        let mut step = StepExecution::new("load", &execution).unwrap();

        assert!(matches!(
            repo.add_step_execution(&mut step),
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[test]
    fn step_update_flags_terminate_only_when_job_is_stopping() {
        let repo = SimpleJobRepository::in_memory();
        let mut execution = repo.create_job_execution("foo", &params(1)).unwrap();
        let mut step = StepExecution::new("load", &execution).unwrap();
        repo.add_step_execution(&mut step).unwrap();

        repo.update_step_execution(&mut step).unwrap();
        assert!(!step.is_terminate_only());

        execution.upgrade_status(BatchStatus::Stopping);
        repo.update(&mut execution).unwrap();

        repo.update_step_execution(&mut step).unwrap();
        assert!(step.is_terminate_only());
        assert_eq!(step.version(), 3);
    }

    #[test]
    fn running_executions_are_found_by_name() {
        let repo = SimpleJobRepository::in_memory();
        repo.create_job_execution("foo", &params(1)).unwrap();
        let mut done = repo.create_job_execution("foo", &params(2)).unwrap();
        finish(&repo, &mut done, BatchStatus::Completed);

        assert_eq!(repo.find_running_job_executions("foo").unwrap().len(), 1);
        assert!(repo.find_running_job_executions("bar").unwrap().is_empty());
    }
}
