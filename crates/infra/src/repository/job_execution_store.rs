//! Job execution storage with optimistic locking.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use forgebatch_core::{Entity, JobExecution, JobExecutionId, JobInstance};
use forgebatch_core::entity::StoreRecord;
use tracing::debug;

use super::error::StoreError;

/// Job execution store abstraction.
///
/// ## Versioning
///
/// `save` assigns the next id and version 1. `update` succeeds only when the
/// caller's version equals the stored one, and then bumps the version on both
/// the caller's record and the stored copy. The version check and the write
/// happen under one exclusive section.
///
/// ## Copies
///
/// Every read returns an owned copy; callers can never mutate stored state
/// without going through `update`.
pub trait JobExecutionStore: Send + Sync {
    /// The execution must not have an id yet.
    fn save_job_execution(&self, execution: &mut JobExecution) -> Result<(), StoreError>;

    fn update_job_execution(&self, execution: &mut JobExecution) -> Result<(), StoreError>;

    /// All stored executions of `instance`, most recent (highest id) first.
    fn find_job_executions(&self, instance: &JobInstance) -> Result<Vec<JobExecution>, StoreError>;

    /// The execution of `instance` with the latest creation time.
    fn get_last_job_execution(
        &self,
        instance: &JobInstance,
    ) -> Result<Option<JobExecution>, StoreError>;

    /// Executions of jobs named `job_name` whose status is running.
    fn find_running_job_executions(&self, job_name: &str) -> Result<Vec<JobExecution>, StoreError>;

    fn get_job_execution(&self, id: JobExecutionId) -> Result<Option<JobExecution>, StoreError>;

    /// When the stored version differs from the caller's, pull in the stored
    /// status (upgrade only) and version. Other fields are left alone.
    fn synchronize_status(&self, execution: &mut JobExecution) -> Result<(), StoreError>;
}

/// In-memory job execution store.
///
/// Keeps at most one execution per job instance: saving a new execution
/// evicts the older ones of the same instance, bounding memory for a
/// long-lived process.
#[derive(Debug, Default)]
pub struct InMemoryJobExecutionStore {
    executions: RwLock<HashMap<JobExecutionId, JobExecution>>,
    last_id: AtomicU64,
}

impl InMemoryJobExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let executions = self.executions.read().map_err(|_| StoreError::Poisoned)?;
        Ok(executions.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    fn next_id(&self) -> JobExecutionId {
        JobExecutionId::new(self.last_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl JobExecutionStore for InMemoryJobExecutionStore {
    fn save_job_execution(&self, execution: &mut JobExecution) -> Result<(), StoreError> {
        if let Some(id) = execution.id() {
            return Err(StoreError::AlreadySaved {
                entity: "job execution",
                id: id.get(),
            });
        }

        let mut executions = self.executions.write().map_err(|_| StoreError::Poisoned)?;

        let instance_id = execution.job_instance().id();
        let before = executions.len();
        executions.retain(|_, stored| stored.job_instance().id() != instance_id);
        let evicted = before - executions.len();

        let id = self.next_id();
        execution.assign_id(id);
        execution.set_version(1);
        executions.insert(id, execution.clone());

        debug!(
            job_execution_id = %id,
            job_instance_id = %instance_id,
            evicted,
            "saved job execution"
        );
        Ok(())
    }

    fn update_job_execution(&self, execution: &mut JobExecution) -> Result<(), StoreError> {
        let id = execution.id().ok_or(StoreError::MissingId("job execution"))?;

        let mut executions = self.executions.write().map_err(|_| StoreError::Poisoned)?;
        let stored = executions.get(&id).ok_or(StoreError::NotSaved {
            entity: "job execution",
            id: id.get(),
        })?;

        if stored.version() != execution.version() {
            return Err(StoreError::OptimisticLock {
                entity: "job execution",
                id: id.get(),
                attempted: execution.version(),
                current: stored.version(),
            });
        }

        execution.set_version(execution.version() + 1);
        executions.insert(id, execution.clone());
        Ok(())
    }

    fn find_job_executions(&self, instance: &JobInstance) -> Result<Vec<JobExecution>, StoreError> {
        let executions = self.executions.read().map_err(|_| StoreError::Poisoned)?;
        let mut result: Vec<JobExecution> = executions
            .values()
            .filter(|e| e.job_instance().id() == instance.id())
            .cloned()
            .collect();

        result.sort_by(|a, b| b.id().cmp(&a.id()));
        Ok(result)
    }

    fn get_last_job_execution(
        &self,
        instance: &JobInstance,
    ) -> Result<Option<JobExecution>, StoreError> {
        let executions = self.executions.read().map_err(|_| StoreError::Poisoned)?;
        Ok(executions
            .values()
            .filter(|e| e.job_instance().id() == instance.id())
            .max_by(|a, b| {
                a.create_time()
                    .cmp(&b.create_time())
                    .then_with(|| a.id().cmp(&b.id()))
            })
            .cloned())
    }

    fn find_running_job_executions(&self, job_name: &str) -> Result<Vec<JobExecution>, StoreError> {
        let executions = self.executions.read().map_err(|_| StoreError::Poisoned)?;
        let mut result: Vec<JobExecution> = executions
            .values()
            .filter(|e| e.job_name() == job_name && e.is_running())
            .cloned()
            .collect();

        result.sort_by(|a, b| b.id().cmp(&a.id()));
        Ok(result)
    }

    fn get_job_execution(&self, id: JobExecutionId) -> Result<Option<JobExecution>, StoreError> {
        let executions = self.executions.read().map_err(|_| StoreError::Poisoned)?;
        Ok(executions.get(&id).cloned())
    }

    fn synchronize_status(&self, execution: &mut JobExecution) -> Result<(), StoreError> {
        let id = execution.id().ok_or(StoreError::MissingId("job execution"))?;

        let executions = self.executions.read().map_err(|_| StoreError::Poisoned)?;
        let stored = executions.get(&id).ok_or(StoreError::NotSaved {
            entity: "job execution",
            id: id.get(),
        })?;

        if stored.version() != execution.version() {
            execution.upgrade_status(stored.status());
            execution.set_version(stored.version());
        }
        Ok(())
    }
}
