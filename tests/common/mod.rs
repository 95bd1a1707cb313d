//! Shared fixtures for the integration tests.
//!
//! `ScriptedMonitor` stands in for the host: a launch fails whenever one of
//! the configured culprits is in the active set.

#![allow(dead_code)]

use camino::Utf8PathBuf;
use crashbisect::models::{LoadOrder, TestOutcome};
use crashbisect::services::{
    IsolationContext, IsolationSettings, LaunchError, MonitorError, OperatorControl,
    PauseContext, PauseDecision, ProcessMonitor,
};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Load order with `required` as the baseline and `rest` as the pool.
pub fn load_order(required: &[&str], rest: &[&str]) -> LoadOrder {
    let entries: Vec<String> = required.iter().chain(rest).map(|s| s.to_string()).collect();
    LoadOrder::new(&entries, &names(required), &[], &[])
}

/// The A.esm + B..E.esp load order used by the end-to-end scenarios
pub fn five_plugins() -> LoadOrder {
    load_order(&["A.esm"], &["B.esp", "C.esp", "D.esp", "E.esp"])
}

pub fn context(batch_size: usize) -> IsolationContext {
    IsolationContext::new(IsolationSettings {
        batch_size,
        wait: Duration::from_millis(10),
        turbo_batch: false,
        retest_failed: false,
    })
}

/// Fake host: fails while a culprit is loaded.
#[derive(Debug, Clone)]
pub struct ScriptedMonitor {
    culprits: HashSet<String>,
    failure: TestOutcome,
    interrupts: VecDeque<usize>,
    launch_error_at: Option<usize>,
    heal_after: Option<usize>,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl ScriptedMonitor {
    pub fn new(culprits: &[&str]) -> Self {
        Self {
            culprits: culprits.iter().map(|s| s.to_string()).collect(),
            failure: TestOutcome::Crashed,
            interrupts: VecDeque::new(),
            launch_error_at: None,
            heal_after: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Report failures as `outcome` instead of a crash.
    pub fn failing_with(mut self, outcome: TestOutcome) -> Self {
        self.failure = outcome;
        self
    }

    /// Interrupt the given launches (1-based).
    pub fn interrupting(mut self, launches: &[usize]) -> Self {
        self.interrupts = launches.iter().copied().collect();
        self
    }

    /// Fail to start the host on the given launch.
    pub fn launch_error_at(mut self, launch: usize) -> Self {
        self.launch_error_at = Some(launch);
        self
    }

    /// Culprits stop failing after this many launches.
    pub fn healing_after(mut self, launches: usize) -> Self {
        self.heal_after = Some(launches);
        self
    }

    /// Handle to the recorded active sets; stays valid after the monitor moves.
    pub fn calls(&self) -> Arc<Mutex<Vec<Vec<String>>>> {
        Arc::clone(&self.calls)
    }
}

impl ProcessMonitor for ScriptedMonitor {
    async fn run(
        &mut self,
        active_set: &[String],
        _timeout: Duration,
    ) -> Result<TestOutcome, MonitorError> {
        let launch = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(active_set.to_vec());
            calls.len()
        };

        if self.launch_error_at == Some(launch) {
            return Err(MonitorError::Launch(LaunchError::ExecutableNotFound(
                Utf8PathBuf::from("Game.exe"),
            )));
        }
        if self.interrupts.front() == Some(&launch) {
            self.interrupts.pop_front();
            return Ok(TestOutcome::Interrupted);
        }

        let healed = self.heal_after.is_some_and(|n| launch > n);
        if !healed && active_set.iter().any(|p| self.culprits.contains(p)) {
            Ok(self.failure)
        } else {
            Ok(TestOutcome::Passed)
        }
    }
}

/// Operator that answers pauses from a script and counts them.
#[derive(Debug, Clone)]
pub struct ScriptedOperator {
    decisions: VecDeque<PauseDecision>,
    pauses: Arc<Mutex<Vec<PauseContext>>>,
}

impl ScriptedOperator {
    pub fn new(decisions: &[PauseDecision]) -> Self {
        Self {
            decisions: decisions.iter().copied().collect(),
            pauses: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Operator for runs that are never interrupted
    pub fn silent() -> Self {
        Self::new(&[])
    }

    pub fn pauses(&self) -> Arc<Mutex<Vec<PauseContext>>> {
        Arc::clone(&self.pauses)
    }
}

impl OperatorControl for ScriptedOperator {
    fn on_pause(&mut self, context: &PauseContext) -> PauseDecision {
        self.pauses.lock().unwrap().push(context.clone());
        self.decisions
            .pop_front()
            .unwrap_or(PauseDecision::QuitKeepState)
    }
}
