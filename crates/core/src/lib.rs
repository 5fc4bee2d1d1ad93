//! `forgebatch-core`: batch domain model.
//!
//! This crate contains the **pure domain** of the batch engine: job instances,
//! executions, statuses, parameters and restart state. Storage and launching
//! live in `forgebatch-infra`.

pub mod context;
pub mod entity;
pub mod error;
pub mod execution;
pub mod id;
pub mod parameters;
pub mod status;
pub mod tracking;

pub use context::{ContextOwner, ExecutionContext, OwnerKind};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use execution::{JobExecution, JobInstance, StepExecution};
pub use id::{JobExecutionId, JobInstanceId, LaunchId, StepExecutionId};
pub use parameters::{
    DefaultJobParametersValidator, JobParameter, JobParameters, JobParametersBuilder,
    JobParametersValidator, ParameterValue,
};
pub use status::{BatchStatus, ExitStatus};
pub use tracking::{ItemSource, TrackingReader};
