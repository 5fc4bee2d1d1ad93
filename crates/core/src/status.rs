//! Lifecycle status (`BatchStatus`) and business outcome (`ExitStatus`).

use core::cmp::Ordering;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a job or step execution.
///
/// Statuses are ordered by [`BatchStatus::ordinal`], with `Unknown` as the
/// maximum. [`BatchStatus::upgrade_to`] relies on this ordering so that a
/// status never moves backward.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Starting,
    Started,
    Stopping,
    Stopped,
    Completed,
    Failed,
    Abandoned,
    Unknown,
}

impl BatchStatus {
    pub const ALL: [BatchStatus; 8] = [
        BatchStatus::Starting,
        BatchStatus::Started,
        BatchStatus::Stopping,
        BatchStatus::Stopped,
        BatchStatus::Completed,
        BatchStatus::Failed,
        BatchStatus::Abandoned,
        BatchStatus::Unknown,
    ];

    pub const fn ordinal(self) -> u8 {
        match self {
            BatchStatus::Starting => 0,
            BatchStatus::Started => 1,
            BatchStatus::Stopping => 2,
            BatchStatus::Stopped => 3,
            BatchStatus::Completed => 4,
            BatchStatus::Failed => 5,
            BatchStatus::Abandoned => 6,
            BatchStatus::Unknown => 7,
        }
    }

    /// `Starting`, `Started` and `Stopping` executions still hold the instance.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Completed
                | BatchStatus::Failed
                | BatchStatus::Stopped
                | BatchStatus::Abandoned
        )
    }

    pub fn is_unsuccessful(self) -> bool {
        self == BatchStatus::Failed || self > BatchStatus::Failed
    }

    /// Returns the greater of the two statuses.
    pub fn upgrade_to(self, other: BatchStatus) -> BatchStatus {
        if other > self { other } else { self }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Starting => "STARTING",
            BatchStatus::Started => "STARTED",
            BatchStatus::Stopping => "STOPPING",
            BatchStatus::Stopped => "STOPPED",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Abandoned => "ABANDONED",
            BatchStatus::Unknown => "UNKNOWN",
        }
    }
}

impl PartialOrd for BatchStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BatchStatus {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ordinal().cmp(&other.ordinal())
    }
}

impl core::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business-level outcome of an execution: an exit code plus a free-form
/// description.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExitStatus {
    exit_code: String,
    exit_description: String,
}

impl ExitStatus {
    pub const UNKNOWN: &'static str = "UNKNOWN";
    pub const EXECUTING: &'static str = "EXECUTING";
    pub const COMPLETED: &'static str = "COMPLETED";
    pub const NOOP: &'static str = "NOOP";
    pub const FAILED: &'static str = "FAILED";
    pub const STOPPED: &'static str = "STOPPED";

    pub fn new(exit_code: impl Into<String>) -> Self {
        Self {
            exit_code: exit_code.into(),
            exit_description: String::new(),
        }
    }

    pub fn with_description(
        exit_code: impl Into<String>,
        exit_description: impl Into<String>,
    ) -> Self {
        Self {
            exit_code: exit_code.into(),
            exit_description: exit_description.into(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN)
    }

    pub fn executing() -> Self {
        Self::new(Self::EXECUTING)
    }

    pub fn completed() -> Self {
        Self::new(Self::COMPLETED)
    }

    pub fn noop() -> Self {
        Self::new(Self::NOOP)
    }

    pub fn failed() -> Self {
        Self::new(Self::FAILED)
    }

    pub fn stopped() -> Self {
        Self::new(Self::STOPPED)
    }

    pub fn exit_code(&self) -> &str {
        &self.exit_code
    }

    pub fn exit_description(&self) -> &str {
        &self.exit_description
    }

    /// Well-known codes rank from `EXECUTING` (1) to `UNKNOWN` (6); any custom
    /// code ranks above all of them.
    pub fn severity(&self) -> u8 {
        match self.exit_code.as_str() {
            Self::EXECUTING => 1,
            Self::COMPLETED => 2,
            Self::NOOP => 3,
            Self::STOPPED => 4,
            Self::FAILED => 5,
            Self::UNKNOWN => 6,
            _ => 7,
        }
    }

    pub fn is_running(&self) -> bool {
        self.exit_code == Self::EXECUTING || self.exit_code == Self::UNKNOWN
    }

    /// Combine with another status, keeping the more severe exit code. Both
    /// descriptions are kept.
    pub fn and(&self, other: &ExitStatus) -> ExitStatus {
        let mut combined = if other.severity() > self.severity() {
            ExitStatus::with_description(other.exit_code.clone(), self.exit_description.clone())
        } else {
            self.clone()
        };
        combined = combined.add_exit_description(&other.exit_description);
        combined
    }

    pub fn replace_exit_code(&self, exit_code: impl Into<String>) -> ExitStatus {
        ExitStatus::with_description(exit_code, self.exit_description.clone())
    }

    /// Appends a description, separated by `"; "`. Empty or already present
    /// descriptions are ignored.
    pub fn add_exit_description(&self, description: impl AsRef<str>) -> ExitStatus {
        let description = description.as_ref();
        if description.is_empty() || self.exit_description == description {
            return self.clone();
        }
        let exit_description = if self.exit_description.is_empty() {
            description.to_string()
        } else {
            format!("{}; {}", self.exit_description, description)
        };
        ExitStatus::with_description(self.exit_code.clone(), exit_description)
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        Self::unknown()
    }
}

impl core::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.exit_description.is_empty() {
            f.write_str(&self.exit_code)
        } else {
            write!(f, "{}: {}", self.exit_code, self.exit_description)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn unknown_is_the_maximum_status() {
        for status in BatchStatus::ALL {
            assert!(status <= BatchStatus::Unknown);
        }
        assert_eq!(BatchStatus::Failed.upgrade_to(BatchStatus::Unknown), BatchStatus::Unknown);
        assert_eq!(BatchStatus::Unknown.upgrade_to(BatchStatus::Starting), BatchStatus::Unknown);
    }

    #[test]
    fn upgrade_never_moves_backward() {
        assert_eq!(BatchStatus::Started.upgrade_to(BatchStatus::Starting), BatchStatus::Started);
        assert_eq!(BatchStatus::Started.upgrade_to(BatchStatus::Stopping), BatchStatus::Stopping);
        assert_eq!(BatchStatus::Completed.upgrade_to(BatchStatus::Stopped), BatchStatus::Completed);
    }

    #[test]
    fn running_and_terminal_subsets() {
        let running: Vec<_> = BatchStatus::ALL.into_iter().filter(|s| s.is_running()).collect();
        assert_eq!(
            running,
            vec![BatchStatus::Starting, BatchStatus::Started, BatchStatus::Stopping]
        );
        assert!(!BatchStatus::Unknown.is_terminal());
        assert!(BatchStatus::Abandoned.is_terminal());
    }

    #[test]
    fn status_serializes_in_upper_case() {
        let json = serde_json::to_string(&BatchStatus::Stopping).unwrap();
        assert_eq!(json, "\"STOPPING\"");
    }

    #[test]
    fn exit_status_and_keeps_more_severe_code() {
        let completed = ExitStatus::completed();
        let failed = ExitStatus::with_description(ExitStatus::FAILED, "boom");

        let combined = completed.and(&failed);
        assert_eq!(combined.exit_code(), ExitStatus::FAILED);
        assert_eq!(combined.exit_description(), "boom");

        let combined = failed.and(&ExitStatus::completed());
        assert_eq!(combined.exit_code(), ExitStatus::FAILED);
    }

    #[test]
    fn custom_exit_code_outranks_well_known_codes() {
        let custom = ExitStatus::new("COMPLETED_WITH_SKIPS");
        assert_eq!(custom.and(&ExitStatus::failed()).exit_code(), "COMPLETED_WITH_SKIPS");
    }

    #[test]
    fn add_exit_description_appends_once() {
        let status = ExitStatus::failed()
            .add_exit_description("first")
            .add_exit_description("second")
            .add_exit_description("");
        assert_eq!(status.exit_description(), "first; second");
        assert_eq!(status.to_string(), "FAILED: first; second");
    }

    fn any_status() -> impl Strategy<Value = BatchStatus> {
        (0usize..BatchStatus::ALL.len()).prop_map(|i| BatchStatus::ALL[i])
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Any sequence of upgrades ends at the maximum status of the sequence
        /// and never decreases along the way.
        #[test]
        fn upgrades_are_monotonic(statuses in prop::collection::vec(any_status(), 1..20)) {
            let mut current = BatchStatus::Starting;
            for status in &statuses {
                let next = current.upgrade_to(*status);
                prop_assert!(next >= current);
                prop_assert!(next >= *status);
                current = next;
            }
            let max = statuses.iter().copied().max().unwrap_or(BatchStatus::Starting);
            prop_assert_eq!(current, max.max(BatchStatus::Starting));
        }
    }
}
