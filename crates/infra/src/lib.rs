//! Infrastructure layer: in-memory execution repository, job launching,
//! configuration.

pub mod config;
pub mod jobs;
pub mod repository;


pub use config::{ExecutorKind, LauncherConfig};
pub use jobs::{
    BackoffStrategy, Job, JobLauncher, JobOperator, LaunchError, OperatorError, RetryPolicy,
    SimpleJob, SyncTaskExecutor, TaskExecutor, TaskRejected, ThreadTaskExecutor,
};
pub use repository::{JobRepository, RepositoryError, RestartReason, SimpleJobRepository, StoreError};
