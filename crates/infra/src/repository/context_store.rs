//! Execution context storage.

use std::collections::HashMap;
use std::sync::RwLock;

use forgebatch_core::{
    ContextOwner, Entity, ExecutionContext, JobExecution, JobExecutionId, JobInstanceId,
    OwnerKind, StepExecution,
};
use tracing::debug;

use super::error::StoreError;

/// Key/value blob store for restart state, keyed by owner (job or step
/// execution).
///
/// `update_*` replaces the stored context wholesale. `save_*` additionally
/// purges contexts left behind by older executions of the same job instance,
/// so only the most recent lineage per instance is retained.
pub trait ExecutionContextStore: Send + Sync {
    fn get_execution_context(
        &self,
        owner: ContextOwner,
    ) -> Result<Option<ExecutionContext>, StoreError>;

    /// First write of a job execution's context. Drops job-level contexts of
    /// the same instance that belong to another job execution. Step-level
    /// contexts stay readable until the new execution saves its first step.
    fn save_job_context(&self, execution: &JobExecution) -> Result<(), StoreError>;

    /// First write of a step execution's context. Drops step-level contexts of
    /// the same instance that belong to another job execution.
    fn save_step_context(&self, step: &StepExecution) -> Result<(), StoreError>;

    fn save_step_contexts(&self, steps: &[StepExecution]) -> Result<(), StoreError> {
        for step in steps {
            self.save_step_context(step)?;
        }
        Ok(())
    }

    fn update_job_context(&self, execution: &JobExecution) -> Result<(), StoreError>;

    fn update_step_context(&self, step: &StepExecution) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct StoredContext {
    job_instance_id: JobInstanceId,
    job_execution_id: JobExecutionId,
    context: ExecutionContext,
}

/// In-memory context store. Volatile; intended for tests/dev and single
/// process deployments.
#[derive(Debug, Default)]
pub struct InMemoryExecutionContextStore {
    contexts: RwLock<HashMap<ContextOwner, StoredContext>>,
}

impl InMemoryExecutionContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored contexts.
    pub fn len(&self) -> Result<usize, StoreError> {
        let contexts = self.contexts.read().map_err(|_| StoreError::Poisoned)?;
        Ok(contexts.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    fn put(&self, owner: ContextOwner, stored: StoredContext) -> Result<(), StoreError> {
        let mut contexts = self.contexts.write().map_err(|_| StoreError::Poisoned)?;
        contexts.insert(owner, stored);
        Ok(())
    }

    fn purge_and_put(
        &self,
        kinds: &[OwnerKind],
        owner: ContextOwner,
        stored: StoredContext,
    ) -> Result<(), StoreError> {
        let mut contexts = self.contexts.write().map_err(|_| StoreError::Poisoned)?;
        let before = contexts.len();
        contexts.retain(|key, existing| {
            !(kinds.contains(&key.kind())
                && existing.job_instance_id == stored.job_instance_id
                && existing.job_execution_id != stored.job_execution_id)
        });
        let purged = before - contexts.len();
        if purged > 0 {
            debug!(
                job_instance_id = %stored.job_instance_id,
                purged,
                "purged execution contexts of previous executions"
            );
        }
        contexts.insert(owner, stored);
        Ok(())
    }
}

fn job_entry(execution: &JobExecution) -> Result<(ContextOwner, StoredContext), StoreError> {
    let id = execution.id().ok_or(StoreError::MissingId("job execution"))?;
    Ok((
        ContextOwner::Job(id),
        StoredContext {
            job_instance_id: execution.job_instance().id(),
            job_execution_id: id,
            context: execution.execution_context.clone(),
        },
    ))
}

fn step_entry(step: &StepExecution) -> Result<(ContextOwner, StoredContext), StoreError> {
    let id = step.id().ok_or(StoreError::MissingId("step execution"))?;
    Ok((
        ContextOwner::Step(id),
        StoredContext {
            job_instance_id: step.job_instance_id(),
            job_execution_id: step.job_execution_id(),
            context: step.execution_context.clone(),
        },
    ))
}

impl ExecutionContextStore for InMemoryExecutionContextStore {
    fn get_execution_context(
        &self,
        owner: ContextOwner,
    ) -> Result<Option<ExecutionContext>, StoreError> {
        let contexts = self.contexts.read().map_err(|_| StoreError::Poisoned)?;
        Ok(contexts.get(&owner).map(|stored| stored.context.clone()))
    }

    fn save_job_context(&self, execution: &JobExecution) -> Result<(), StoreError> {
        let (owner, stored) = job_entry(execution)?;
        self.purge_and_put(&[OwnerKind::Job], owner, stored)
    }

    fn save_step_context(&self, step: &StepExecution) -> Result<(), StoreError> {
        let (owner, stored) = step_entry(step)?;
        self.purge_and_put(&[OwnerKind::Step], owner, stored)
    }

    fn update_job_context(&self, execution: &JobExecution) -> Result<(), StoreError> {
        let (owner, stored) = job_entry(execution)?;
        self.put(owner, stored)
    }

    fn update_step_context(&self, step: &StepExecution) -> Result<(), StoreError> {
        let (owner, stored) = step_entry(step)?;
        self.put(owner, stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgebatch_core::entity::StoreRecord;
    use forgebatch_core::{JobInstance, JobParameters, StepExecutionId};

    fn saved_execution(instance_id: u64, execution_id: u64) -> JobExecution {
        let instance = JobInstance::new(JobInstanceId::new(instance_id), "job", &JobParameters::new());
        let mut execution = JobExecution::new(instance, JobParameters::new());
        execution.assign_id(JobExecutionId::new(execution_id));
        execution
    }

    fn saved_step(execution: &JobExecution, step_id: u64) -> StepExecution {
        let mut step = StepExecution::new(format!("step{step_id}"), execution).unwrap();
        step.assign_id(StepExecutionId::new(step_id));
        step
    }

    #[test]
    fn update_replaces_context_wholesale() {
        let store = InMemoryExecutionContextStore::new();
        let mut execution = saved_execution(1, 1);
        execution.execution_context.put_long("a", 1);
        execution.execution_context.put_long("b", 2);
        store.save_job_context(&execution).unwrap();

        execution.execution_context = ExecutionContext::new();
        execution.execution_context.put_long("c", 3);
        store.update_job_context(&execution).unwrap();

        let stored = store
            .get_execution_context(ContextOwner::Job(JobExecutionId::new(1)))
            .unwrap()
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored.get_long("c"), Some(3));
    }

    #[test]
    fn returned_context_is_a_copy() {
        let store = InMemoryExecutionContextStore::new();
        let execution = saved_execution(1, 1);
        store.save_job_context(&execution).unwrap();

        let owner = ContextOwner::Job(JobExecutionId::new(1));
        let mut copy = store.get_execution_context(owner).unwrap().unwrap();
        copy.put_string("mutated", "yes");

        assert!(store.get_execution_context(owner).unwrap().unwrap().is_empty());
    }

    #[test]
    fn saving_a_new_job_lineage_purges_only_previous_job_contexts() {
        let store = InMemoryExecutionContextStore::new();

        let first = saved_execution(1, 1);
        store.save_job_context(&first).unwrap();
        store.save_step_context(&saved_step(&first, 1)).unwrap();
        store.save_step_context(&saved_step(&first, 2)).unwrap();

        let other_instance = saved_execution(2, 5);
        store.save_job_context(&other_instance).unwrap();
        assert_eq!(store.len().unwrap(), 4);

        let second = saved_execution(1, 2);
        store.save_job_context(&second).unwrap();

        assert_eq!(store.len().unwrap(), 4);
        assert!(store.get_execution_context(ContextOwner::Job(JobExecutionId::new(1))).unwrap().is_none());
        assert!(store.get_execution_context(ContextOwner::Job(JobExecutionId::new(2))).unwrap().is_some());
        assert!(store.get_execution_context(ContextOwner::Step(StepExecutionId::new(1))).unwrap().is_some());
        assert!(store.get_execution_context(ContextOwner::Job(JobExecutionId::new(5))).unwrap().is_some());
    }

    #[test]
    fn first_step_of_a_new_lineage_purges_previous_step_contexts() {
        let store = InMemoryExecutionContextStore::new();

        let first = saved_execution(1, 1);
        store.save_step_context(&saved_step(&first, 1)).unwrap();
        store.save_step_context(&saved_step(&first, 2)).unwrap();

        let second = saved_execution(1, 2);
        store.save_job_context(&second).unwrap();
        store.save_step_context(&saved_step(&second, 3)).unwrap();

        assert!(store.get_execution_context(ContextOwner::Step(StepExecutionId::new(1))).unwrap().is_none());
        assert!(store.get_execution_context(ContextOwner::Step(StepExecutionId::new(2))).unwrap().is_none());
        assert!(store.get_execution_context(ContextOwner::Step(StepExecutionId::new(3))).unwrap().is_some());
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn sibling_steps_of_the_same_execution_are_kept() {
        let store = InMemoryExecutionContextStore::new();
        let execution = saved_execution(1, 1);

        store
            .save_step_contexts(&[saved_step(&execution, 1), saved_step(&execution, 2)])
            .unwrap();

        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn unsaved_owner_is_rejected() {
        let store = InMemoryExecutionContextStore::new();
        let instance = JobInstance::new(JobInstanceId::new(1), "job", &JobParameters::new());
        let execution = JobExecution::new(instance, JobParameters::new());

        assert_eq!(
            store.save_job_context(&execution),
            Err(StoreError::MissingId("job execution"))
        );
    }
}
