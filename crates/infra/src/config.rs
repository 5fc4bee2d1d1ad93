//! Launcher configuration loaded from the environment.

use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::jobs::{BackoffStrategy, RetryPolicy, SyncTaskExecutor, TaskExecutor, ThreadTaskExecutor};

pub const ENV_RETRY_MAX_ATTEMPTS: &str = "FORGEBATCH_RETRY_MAX_ATTEMPTS";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "FORGEBATCH_RETRY_BASE_DELAY_MS";
pub const ENV_RETRY_MAX_DELAY_MS: &str = "FORGEBATCH_RETRY_MAX_DELAY_MS";
pub const ENV_RETRY_BACKOFF: &str = "FORGEBATCH_RETRY_BACKOFF";
pub const ENV_EXECUTOR: &str = "FORGEBATCH_EXECUTOR";
pub const ENV_EXECUTOR_MAX_CONCURRENT: &str = "FORGEBATCH_EXECUTOR_MAX_CONCURRENT";

/// How launched jobs are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutorKind {
    /// Run on the launching thread.
    #[default]
    Sync,
    /// Run on a bounded set of worker threads.
    Thread,
}

impl FromStr for ExecutorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "thread" => Ok(Self::Thread),
            other => Err(format!("unknown executor '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub retry_policy: RetryPolicy,
    pub executor: ExecutorKind,
    pub max_concurrent: usize,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            executor: ExecutorKind::Sync,
            max_concurrent: 4,
        }
    }
}

impl LauncherConfig {
    /// Read `FORGEBATCH_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys keep their default;
    /// unparseable ones are logged and also keep their default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let retry = &defaults.retry_policy;

        let retry_policy = RetryPolicy {
            max_attempts: parse_or(&lookup, ENV_RETRY_MAX_ATTEMPTS, retry.max_attempts).max(1),
            base_delay: Duration::from_millis(parse_or(
                &lookup,
                ENV_RETRY_BASE_DELAY_MS,
                retry.base_delay.as_millis() as u64,
            )),
            max_delay: Duration::from_millis(parse_or(
                &lookup,
                ENV_RETRY_MAX_DELAY_MS,
                retry.max_delay.as_millis() as u64,
            )),
            strategy: parse_or::<BackoffStrategy, _>(&lookup, ENV_RETRY_BACKOFF, retry.strategy),
            jitter: retry.jitter,
        };

        Self {
            retry_policy,
            executor: parse_or(&lookup, ENV_EXECUTOR, defaults.executor),
            max_concurrent: parse_or(&lookup, ENV_EXECUTOR_MAX_CONCURRENT, defaults.max_concurrent),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_executor(mut self, executor: ExecutorKind) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn task_executor(&self) -> Arc<dyn TaskExecutor> {
        match self.executor {
            ExecutorKind::Sync => Arc::new(SyncTaskExecutor),
            ExecutorKind::Thread => Arc::new(ThreadTaskExecutor::new(self.max_concurrent)),
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(err) => {
                warn!(key, value = %raw, error = %err, default = %default, "invalid config value, using default");
                default
            }
        },
    }
}

impl Display for ExecutorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutorKind::Sync => f.write_str("sync"),
            ExecutorKind::Thread => f.write_str("thread"),
        }
    }
}
