use super::launcher::{HostCommand, HostLauncher, LaunchError, LaunchOutcome};
use super::load_order_file::{LoadOrderFile, LoadOrderFileError};
use crate::models::{TestOutcome, TimeoutOutcome};
use std::time::Duration;
use thiserror::Error;

/// Errors that stop a launch from producing an outcome
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("Failed to materialize load order: {0}")]
    Materialize(#[from] LoadOrderFileError),
}

/// Runs one active set against the host and classifies what happened.
///
/// The isolation engine only ever talks to this trait, so it can be driven
/// by a scripted fake in tests.
#[allow(async_fn_in_trait)]
pub trait ProcessMonitor {
    /// # Arguments
    /// * `active_set` - Plugins to enable for this launch, in load-order sequence
    /// * `timeout` - How long the host may run before it is classified
    async fn run(
        &mut self,
        active_set: &[String],
        timeout: Duration,
    ) -> Result<TestOutcome, MonitorError>;
}

/// Map a raw launch outcome to a test outcome.
///
/// A tracked process that vanishes has no exit status, so it counts as a crash.
pub fn classify(outcome: LaunchOutcome, on_timeout: TimeoutOutcome) -> TestOutcome {
    match outcome {
        LaunchOutcome::Exited { success: true, .. } => TestOutcome::Passed,
        LaunchOutcome::Exited { success: false, .. } => TestOutcome::Crashed,
        LaunchOutcome::Vanished => TestOutcome::Crashed,
        LaunchOutcome::TimedOut => match on_timeout {
            TimeoutOutcome::Hung => TestOutcome::Hung,
            TimeoutOutcome::Passed => TestOutcome::Passed,
        },
        LaunchOutcome::Interrupted => TestOutcome::Interrupted,
    }
}

/// [`ProcessMonitor`] over the real load-order file and any [`HostLauncher`].
///
/// Each run writes the active set, launches the host, classifies the result
/// and then waits the settle delay so the host can release its files.
pub struct GameProcessMonitor<L: HostLauncher> {
    launcher: L,
    file: LoadOrderFile,
    command: HostCommand,
    settle_delay: Duration,
    on_timeout: TimeoutOutcome,
    dump_load_order: bool,
}

impl<L: HostLauncher> GameProcessMonitor<L> {
    pub fn new(launcher: L, file: LoadOrderFile, command: HostCommand) -> Self {
        Self {
            launcher,
            file,
            command,
            settle_delay: Duration::ZERO,
            on_timeout: TimeoutOutcome::Hung,
            dump_load_order: false,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_timeout_outcome(mut self, on_timeout: TimeoutOutcome) -> Self {
        self.on_timeout = on_timeout;
        self
    }

    /// Log the materialized file at debug level before every launch.
    pub fn with_load_order_dump(mut self, enabled: bool) -> Self {
        self.dump_load_order = enabled;
        self
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }
}

impl<L: HostLauncher> ProcessMonitor for GameProcessMonitor<L> {
    async fn run(
        &mut self,
        active_set: &[String],
        timeout: Duration,
    ) -> Result<TestOutcome, MonitorError> {
        self.file.write_active(active_set)?;
        if self.dump_load_order {
            tracing::debug!(
                "Load order for this launch ({} plugins):\n{}",
                active_set.len(),
                self.file.render_active(active_set)
            );
        }

        let raw = self.launcher.launch_and_wait(&self.command, timeout).await?;
        let outcome = classify(raw, self.on_timeout);
        tracing::debug!("Launch finished: {:?} -> {}", raw, outcome);

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        Ok(outcome)
    }
}
