use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified result of one host launch. Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Passed,
    Crashed,
    Hung,
    Interrupted,
}

impl TestOutcome {
    /// Crashes and hangs both count against the batch.
    pub fn is_failure(self) -> bool {
        matches!(self, TestOutcome::Crashed | TestOutcome::Hung)
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestOutcome::Passed => "passed",
            TestOutcome::Crashed => "crashed",
            TestOutcome::Hung => "hung",
            TestOutcome::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}
