//! Job execution repository.
//!
//! Process-local bookkeeping for job instances, job and step executions, and
//! their execution contexts. Every store hands out owned copies and checks an
//! optimistic-lock version on update; a durable backend must honor the same
//! contracts.
//!
//! The in-memory stores retain only the most recent execution lineage per job
//! instance, so a long-lived process does not grow without bound.

pub mod context_store;
pub mod error;
pub mod instance_store;
pub mod job_execution_store;
pub mod simple;
pub mod step_execution_store;
pub mod r#trait;

pub use context_store::{ExecutionContextStore, InMemoryExecutionContextStore};
pub use error::StoreError;
pub use instance_store::{InMemoryJobInstanceStore, JobInstanceStore};
pub use job_execution_store::{InMemoryJobExecutionStore, JobExecutionStore};
pub use simple::SimpleJobRepository;
pub use step_execution_store::{InMemoryStepExecutionStore, StepExecutionStore};
pub use r#trait::{JobRepository, RepositoryError, RestartReason};
