//! Step execution storage.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use forgebatch_core::{
    Entity, JobExecution, JobExecutionId, JobInstanceId, StepExecution, StepExecutionId,
};
use forgebatch_core::entity::StoreRecord;
use tracing::debug;

use super::error::StoreError;

/// Step execution store abstraction. Same id/version discipline as
/// [`super::JobExecutionStore`], at step granularity.
pub trait StepExecutionStore: Send + Sync {
    fn save_step_execution(&self, step: &mut StepExecution) -> Result<(), StoreError>;

    fn save_step_executions(&self, steps: &mut [StepExecution]) -> Result<(), StoreError> {
        for step in steps.iter_mut() {
            self.save_step_execution(step)?;
        }
        Ok(())
    }

    fn update_step_execution(&self, step: &mut StepExecution) -> Result<(), StoreError>;

    fn get_step_execution(
        &self,
        job_execution_id: JobExecutionId,
        step_id: StepExecutionId,
    ) -> Result<Option<StepExecution>, StoreError>;

    /// Most recently started execution of `step_name` within `job_instance_id`.
    fn get_last_step_execution(
        &self,
        job_instance_id: JobInstanceId,
        step_name: &str,
    ) -> Result<Option<StepExecution>, StoreError>;

    /// Replace `execution`'s step collection with the stored steps, highest id
    /// first. Left unchanged when nothing is stored for it.
    fn add_step_executions(&self, execution: &mut JobExecution) -> Result<(), StoreError>;
}

/// In-memory step execution store, grouped by parent job execution.
#[derive(Debug, Default)]
pub struct InMemoryStepExecutionStore {
    steps: RwLock<HashMap<JobExecutionId, BTreeMap<StepExecutionId, StepExecution>>>,
    last_id: AtomicU64,
}

impl InMemoryStepExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored step executions across all job executions.
    pub fn len(&self) -> Result<usize, StoreError> {
        let steps = self.steps.read().map_err(|_| StoreError::Poisoned)?;
        Ok(steps.values().map(BTreeMap::len).sum())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    fn next_id(&self) -> StepExecutionId {
        StepExecutionId::new(self.last_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl StepExecutionStore for InMemoryStepExecutionStore {
    fn save_step_execution(&self, step: &mut StepExecution) -> Result<(), StoreError> {
        if let Some(id) = step.id() {
            return Err(StoreError::AlreadySaved {
                entity: "step execution",
                id: id.get(),
            });
        }

        let mut steps = self.steps.write().map_err(|_| StoreError::Poisoned)?;
        let job_execution_id = step.job_execution_id();
        let job_instance_id = step.job_instance_id();

        // First step of a new lineage: drop the steps of older executions of
        // the same instance. Siblings of this execution are never touched.
        if !steps.contains_key(&job_execution_id) {
            let before = steps.len();
            steps.retain(|_, group| {
                group
                    .values()
                    .next()
                    .is_none_or(|s| s.job_instance_id() != job_instance_id)
            });
            let evicted = before - steps.len();
            if evicted > 0 {
                debug!(
                    %job_instance_id,
                    %job_execution_id,
                    evicted,
                    "evicted step executions of previous job executions"
                );
            }
        }

        let id = self.next_id();
        step.assign_id(id);
        step.set_version(1);
        steps
            .entry(job_execution_id)
            .or_default()
            .insert(id, step.clone());
        Ok(())
    }

    fn update_step_execution(&self, step: &mut StepExecution) -> Result<(), StoreError> {
        let id = step.id().ok_or(StoreError::MissingId("step execution"))?;
        let not_saved = StoreError::NotSaved {
            entity: "step execution",
            id: id.get(),
        };

        let mut steps = self.steps.write().map_err(|_| StoreError::Poisoned)?;
        let group = steps.get_mut(&step.job_execution_id()).ok_or(not_saved.clone())?;
        let stored = group.get(&id).ok_or(not_saved)?;

        if stored.version() != step.version() {
            return Err(StoreError::OptimisticLock {
                entity: "step execution",
                id: id.get(),
                attempted: step.version(),
                current: stored.version(),
            });
        }

        step.set_version(step.version() + 1);
        group.insert(id, step.clone());
        Ok(())
    }

    fn get_step_execution(
        &self,
        job_execution_id: JobExecutionId,
        step_id: StepExecutionId,
    ) -> Result<Option<StepExecution>, StoreError> {
        let steps = self.steps.read().map_err(|_| StoreError::Poisoned)?;
        Ok(steps
            .get(&job_execution_id)
            .and_then(|group| group.get(&step_id))
            .cloned())
    }

    fn get_last_step_execution(
        &self,
        job_instance_id: JobInstanceId,
        step_name: &str,
    ) -> Result<Option<StepExecution>, StoreError> {
        let steps = self.steps.read().map_err(|_| StoreError::Poisoned)?;
        Ok(steps
            .values()
            .flat_map(BTreeMap::values)
            .filter(|s| s.job_instance_id() == job_instance_id && s.step_name() == step_name)
            .max_by(|a, b| {
                a.start_time
                    .cmp(&b.start_time)
                    .then_with(|| a.id().cmp(&b.id()))
            })
            .cloned())
    }

    fn add_step_executions(&self, execution: &mut JobExecution) -> Result<(), StoreError> {
        let id = execution.id().ok_or(StoreError::MissingId("job execution"))?;

        let steps = self.steps.read().map_err(|_| StoreError::Poisoned)?;
        let Some(group) = steps.get(&id) else {
            return Ok(());
        };
        if group.is_empty() {
            return Ok(());
        }

        execution.set_step_executions(group.values().rev().cloned().collect());
        Ok(())
    }
}
