//! Job instances and the execution records of jobs and steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::entity::{Entity, StoreRecord};
use crate::error::{DomainError, DomainResult};
use crate::id::{JobExecutionId, JobInstanceId, StepExecutionId};
use crate::parameters::JobParameters;
use crate::status::{BatchStatus, ExitStatus};

/// One logical job: a job name plus its identifying parameters.
///
/// Equality ignores the store-assigned id: two instances are equal iff the
/// name and the identifying parameters match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInstance {
    id: JobInstanceId,
    job_name: String,
    parameters: JobParameters,
}

impl JobInstance {
    /// Only the identifying subset of `parameters` is kept.
    pub fn new(id: JobInstanceId, job_name: impl Into<String>, parameters: &JobParameters) -> Self {
        Self {
            id,
            job_name: job_name.into(),
            parameters: parameters.identifying(),
        }
    }

    pub fn id(&self) -> JobInstanceId {
        self.id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn parameters(&self) -> &JobParameters {
        &self.parameters
    }

    pub fn identity_key(&self) -> String {
        self.parameters.to_identity_key()
    }

    pub fn matches(&self, job_name: &str, parameters: &JobParameters) -> bool {
        self.job_name == job_name && self.identity_key() == parameters.to_identity_key()
    }
}

impl PartialEq for JobInstance {
    fn eq(&self, other: &Self) -> bool {
        self.job_name == other.job_name && self.identity_key() == other.identity_key()
    }
}

impl Eq for JobInstance {}

/// One attempt to run a [`JobInstance`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    id: Option<JobExecutionId>,
    version: u64,
    job_instance: JobInstance,
    job_parameters: JobParameters,
    status: BatchStatus,
    pub exit_status: ExitStatus,
    create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub execution_context: ExecutionContext,
    step_executions: Vec<StepExecution>,
    /// Descriptions of failures seen while running, oldest first.
    pub failures: Vec<String>,
}

impl JobExecution {
    pub fn new(job_instance: JobInstance, job_parameters: JobParameters) -> Self {
        Self {
            id: None,
            version: 0,
            job_instance,
            job_parameters,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::unknown(),
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            last_updated: None,
            execution_context: ExecutionContext::new(),
            step_executions: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn with_execution_context(mut self, execution_context: ExecutionContext) -> Self {
        self.execution_context = execution_context;
        self
    }

    pub fn with_create_time(mut self, create_time: DateTime<Utc>) -> Self {
        self.create_time = create_time;
        self
    }

    pub fn job_instance(&self) -> &JobInstance {
        &self.job_instance
    }

    pub fn job_name(&self) -> &str {
        self.job_instance.job_name()
    }

    pub fn job_parameters(&self) -> &JobParameters {
        &self.job_parameters
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    /// Overwrite the status unconditionally. Prefer [`Self::upgrade_status`].
    pub fn set_status(&mut self, status: BatchStatus) {
        self.status = status;
    }

    /// Move to `status` only if it ranks above the current one.
    pub fn upgrade_status(&mut self, status: BatchStatus) {
        self.status = self.status.upgrade_to(status);
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn is_stopping(&self) -> bool {
        self.status == BatchStatus::Stopping
    }

    pub fn step_executions(&self) -> &[StepExecution] {
        &self.step_executions
    }

    /// Replace the step history, e.g. with the view loaded from a store.
    pub fn set_step_executions(&mut self, step_executions: Vec<StepExecution>) {
        self.step_executions = step_executions;
    }

    /// Add or replace (by id) a step execution in the history.
    pub fn add_step_execution(&mut self, step_execution: StepExecution) {
        match step_execution.id() {
            Some(id) => {
                if let Some(existing) = self
                    .step_executions
                    .iter_mut()
                    .find(|s| s.id() == Some(id))
                {
                    *existing = step_execution;
                    return;
                }
                self.step_executions.push(step_execution);
            }
            None => self.step_executions.push(step_execution),
        }
    }

    pub fn add_failure(&mut self, failure: impl Into<String>) {
        self.failures.push(failure.into());
    }
}

impl Entity for JobExecution {
    type Id = JobExecutionId;

    fn id(&self) -> Option<JobExecutionId> {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl StoreRecord for JobExecution {
    fn assign_id(&mut self, id: JobExecutionId) {
        self.id = Some(id);
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// One attempt to run a named step within a [`JobExecution`].
///
/// The parent is referenced by id only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    id: Option<StepExecutionId>,
    version: u64,
    step_name: String,
    job_execution_id: JobExecutionId,
    job_instance_id: JobInstanceId,
    status: BatchStatus,
    pub exit_status: ExitStatus,
    pub read_count: u64,
    pub write_count: u64,
    pub commit_count: u64,
    pub rollback_count: u64,
    pub filter_count: u64,
    pub read_skip_count: u64,
    pub process_skip_count: u64,
    pub write_skip_count: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub execution_context: ExecutionContext,
    terminate_only: bool,
    pub failures: Vec<String>,
}

impl StepExecution {
    /// The parent job execution must already be saved.
    pub fn new(step_name: impl Into<String>, job_execution: &JobExecution) -> DomainResult<Self> {
        let job_execution_id = job_execution.id().ok_or_else(|| {
            DomainError::illegal_state("step execution requires a saved job execution")
        })?;

        Ok(Self {
            id: None,
            version: 0,
            step_name: step_name.into(),
            job_execution_id,
            job_instance_id: job_execution.job_instance().id(),
            status: BatchStatus::Starting,
            exit_status: ExitStatus::executing(),
            read_count: 0,
            write_count: 0,
            commit_count: 0,
            rollback_count: 0,
            filter_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            start_time: Utc::now(),
            end_time: None,
            last_updated: None,
            execution_context: ExecutionContext::new(),
            terminate_only: false,
            failures: Vec::new(),
        })
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn job_execution_id(&self) -> JobExecutionId {
        self.job_execution_id
    }

    pub fn job_instance_id(&self) -> JobInstanceId {
        self.job_instance_id
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn set_status(&mut self, status: BatchStatus) {
        self.status = status;
    }

    pub fn upgrade_status(&mut self, status: BatchStatus) {
        self.status = self.status.upgrade_to(status);
    }

    pub fn skip_count(&self) -> u64 {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    /// Ask the step engine to stop this step at the next chunk boundary.
    pub fn set_terminate_only(&mut self) {
        self.terminate_only = true;
    }

    pub fn is_terminate_only(&self) -> bool {
        self.terminate_only
    }
}

impl Entity for StepExecution {
    type Id = StepExecutionId;

    fn id(&self) -> Option<StepExecutionId> {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl StoreRecord for StepExecution {
    fn assign_id(&mut self, id: StepExecutionId) {
        self.id = Some(id);
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(name: &str) -> JobInstance {
        JobInstance::new(JobInstanceId::new(1), name, &JobParameters::new())
    }

    #[test]
    fn instance_equality_ignores_id_and_non_identifying_parameters() {
        let params = JobParameters::builder()
            .add_string("file", "a.csv")
            .add_non_identifying("note", crate::ParameterValue::Long(1))
            .build();
        let a = JobInstance::new(JobInstanceId::new(1), "import", &params);
        let b = JobInstance::new(
            JobInstanceId::new(2),
            "import",
            &JobParameters::builder().add_string("file", "a.csv").build(),
        );
        assert_eq!(a, b);
        assert!(a.matches("import", &params));
        assert!(!a.matches("export", &params));
        assert_ne!(a, instance("import"));
    }

    #[test]
    fn new_execution_is_unsaved_and_starting() {
        let execution = JobExecution::new(instance("foo"), JobParameters::new());
        assert_eq!(execution.id(), None);
        assert_eq!(execution.version(), 0);
        assert_eq!(execution.status(), BatchStatus::Starting);
        assert_eq!(execution.exit_status, ExitStatus::unknown());
        assert!(execution.is_running());
    }

    #[test]
    fn upgrade_status_is_monotonic_on_executions() {
        let mut execution = JobExecution::new(instance("foo"), JobParameters::new());
        execution.upgrade_status(BatchStatus::Failed);
        execution.upgrade_status(BatchStatus::Started);
        assert_eq!(execution.status(), BatchStatus::Failed);
    }

    #[test]
    fn step_execution_requires_saved_parent() {
        let mut execution = JobExecution::new(instance("foo"), JobParameters::new());
        assert!(matches!(
            StepExecution::new("step1", &execution),
            Err(DomainError::IllegalState(_))
        ));

        execution.assign_id(JobExecutionId::new(9));
        let step = StepExecution::new("step1", &execution).unwrap();
        assert_eq!(step.job_execution_id(), JobExecutionId::new(9));
        assert_eq!(step.job_instance_id(), JobInstanceId::new(1));
        assert_eq!(step.status(), BatchStatus::Starting);
    }

    #[test]
    fn add_step_execution_replaces_by_id() {
        let mut execution = JobExecution::new(instance("foo"), JobParameters::new());
        execution.assign_id(JobExecutionId::new(1));

        let mut step = StepExecution::new("step1", &execution).unwrap();
        step.assign_id(StepExecutionId::new(5));
        execution.add_step_execution(step.clone());

        step.read_count = 10;
        execution.add_step_execution(step);
        assert_eq!(execution.step_executions().len(), 1);
        assert_eq!(execution.step_executions()[0].read_count, 10);
    }
}
