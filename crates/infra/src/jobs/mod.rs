//! Job launching with retry, backoff and pluggable dispatch.
//!
//! ## Components
//!
//! - `Job`: a named, optionally restartable body with a parameter validator
//! - `RetryPolicy`: bounded attempts with fixed, linear or exponential backoff
//! - `TaskExecutor`: inline or thread-per-task dispatch
//! - `JobLauncher`: restart resolution, single-flight claim, retried run
//! - `JobOperator`: stop and abandon

pub mod executor;
pub mod launcher;
pub mod operator;
pub mod retry;
pub mod types;

pub use executor::{SyncTaskExecutor, Task, TaskExecutor, TaskRejected, ThreadTaskExecutor};
pub use launcher::{JobLauncher, LaunchError};
pub use operator::{JobOperator, OperatorError};
pub use retry::RetryExhausted;
pub use types::{BackoffStrategy, Job, RecoveryHandler, RetryPolicy, SimpleJob};
