use super::load_order::LoadOrderSummary;
use serde::Serialize;
use std::fmt;

/// How many names each status column keeps
pub const STATUS_HISTORY: usize = 20;

/// Phase of the isolation state machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    SanityCheck,
    StandardBatching,
    Subdividing,
    TurboRetry,
    Retest,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::SanityCheck => "Sanity check",
            Phase::StandardBatching => "Batch testing",
            Phase::Subdividing => "Subdividing",
            Phase::TurboRetry => "Turbo retry",
            Phase::Retest => "Retesting failed",
            Phase::Done => "Done",
        };
        f.write_str(s)
    }
}

/// Live status of a run, shown by the status display
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStatus {
    pub phase: Phase,

    /// Members of the batch currently on the host
    pub testing: Vec<String>,

    /// Most recently passed plugins, oldest first
    pub recently_passed: Vec<String>,

    /// Isolated culprits, oldest first
    pub failed: Vec<String>,

    pub launches: usize,
    pub summary: LoadOrderSummary,
    pub turbo: bool,
    pub paused: bool,
}

impl RunStatus {
    /// Append passed plugins, keeping only the last [`STATUS_HISTORY`].
    pub fn push_passed(&mut self, plugins: &[String]) {
        self.recently_passed.extend(plugins.iter().cloned());
        let excess = self.recently_passed.len().saturating_sub(STATUS_HISTORY);
        self.recently_passed.drain(..excess);
    }

    pub fn push_failed(&mut self, plugin: &str) {
        self.failed.push(plugin.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recently_passed_is_bounded() {
        let mut status = RunStatus::default();
        let plugins: Vec<String> = (0..25).map(|i| format!("P{i}.esp")).collect();
        status.push_passed(&plugins);

        assert_eq!(status.recently_passed.len(), STATUS_HISTORY);
        assert_eq!(status.recently_passed[0], "P5.esp");
        assert_eq!(status.recently_passed.last().unwrap(), "P24.esp");
    }
}
