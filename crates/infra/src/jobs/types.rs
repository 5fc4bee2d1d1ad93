//! Core job types and policies.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use forgebatch_core::{ExitStatus, JobExecution, JobParametersValidator};
use serde::{Deserialize, Serialize};

use crate::repository::JobRepository;

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential),
            "linear" => Ok(Self::Linear),
            other => Err(format!("unknown backoff strategy '{other}'")),
        }
    }
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => f.write_str("fixed"),
            Self::Exponential => f.write_str("exponential"),
            Self::Linear => f.write_str("linear"),
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of invocations, including the first (at least 1)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Run once, never retry.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay to wait after failed attempt `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi((attempt - 1).min(62) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * attempt as f64).min(max_ms),
        };

        // Deterministic jitter derived from the attempt number
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    /// Whether another invocation is allowed after `attempts_made`.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts.max(1)
    }
}

/// A launchable batch job.
///
/// The body gets the running execution (already `STARTED` and persisted) and
/// the repository, so it can add step executions and save restart state. An
/// `Err` or a panic fails the current attempt.
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    fn is_restartable(&self) -> bool {
        true
    }

    fn parameters_validator(&self) -> Option<&dyn JobParametersValidator> {
        None
    }

    fn execute(&self, execution: &mut JobExecution, repository: &dyn JobRepository) -> anyhow::Result<()>;
}

type JobBody =
    dyn Fn(&mut JobExecution, &dyn JobRepository) -> anyhow::Result<()> + Send + Sync;

/// [`Job`] built from a closure.
pub struct SimpleJob {
    name: String,
    restartable: bool,
    validator: Option<Box<dyn JobParametersValidator>>,
    body: Box<JobBody>,
}

impl SimpleJob {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut JobExecution, &dyn JobRepository) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            restartable: true,
            validator: None,
            body: Box::new(body),
        }
    }

    pub fn with_restartable(mut self, restartable: bool) -> Self {
        self.restartable = restartable;
        self
    }

    pub fn with_validator(mut self, validator: impl JobParametersValidator + 'static) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }
}

impl fmt::Debug for SimpleJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleJob")
            .field("name", &self.name)
            .field("restartable", &self.restartable)
            .field("validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

impl Job for SimpleJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_restartable(&self) -> bool {
        self.restartable
    }

    fn parameters_validator(&self) -> Option<&dyn JobParametersValidator> {
        self.validator.as_deref()
    }

    fn execute(&self, execution: &mut JobExecution, repository: &dyn JobRepository) -> anyhow::Result<()> {
        (self.body)(execution, repository)
    }
}

/// Called once retries are exhausted; returns the exit status to record.
/// The execution is still persisted `FAILED`.
pub type RecoveryHandler = Arc<dyn Fn(&JobExecution, &anyhow::Error) -> ExitStatus + Send + Sync>;
