use super::launcher::LaunchError;
use super::load_order_file::LoadOrderFileError;
use super::monitor::{MonitorError, ProcessMonitor};
use super::planner::{Batch, BatchKind, BatchPlanner, Subdivision};
use crate::metrics::Metrics;
use crate::models::{LoadOrder, LoadOrderError, LoadOrderSummary, Phase, TestOutcome};
use crate::session::{OutcomeEvent, OutcomeSender};
use crate::state::StatusBoard;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that end a run abnormally
#[derive(Error, Debug)]
pub enum IsolationError {
    #[error("Core plugins are unstable ({outcome} on the sanity check): {}", .plugins.join(", "))]
    RequiredPluginFailure {
        plugins: Vec<String>,
        outcome: TestOutcome,
    },

    #[error("Host could not be launched: {0}")]
    FatalLaunch(#[source] LaunchError),

    #[error(transparent)]
    Materialize(LoadOrderFileError),

    #[error(transparent)]
    LoadOrder(#[from] LoadOrderError),
}

impl From<MonitorError> for IsolationError {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::Launch(e) => IsolationError::FatalLaunch(e),
            MonitorError::Materialize(e) => IsolationError::Materialize(e),
        }
    }
}

/// What the operator wants after an interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseDecision {
    /// Relaunch the interrupted batch
    Resume,
    /// Stop and put the original load order back
    RevertAndQuit,
    /// Stop and leave the load-order file as it is
    QuitKeepState,
}

/// What the operator sees when asked for a [`PauseDecision`]
#[derive(Debug, Clone)]
pub struct PauseContext {
    pub phase: Phase,
    pub batch: Vec<String>,
    pub summary: LoadOrderSummary,
    pub launches: usize,
}

/// Source of operator decisions after an interrupt
pub trait OperatorControl {
    fn on_pause(&mut self, context: &PauseContext) -> PauseDecision;
}

/// Tunables for one run
#[derive(Debug, Clone)]
pub struct IsolationSettings {
    pub batch_size: usize,
    pub wait: Duration,
    pub turbo_batch: bool,
    pub retest_failed: bool,
}

impl Default for IsolationSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            wait: Duration::from_secs(11),
            turbo_batch: false,
            retest_failed: false,
        }
    }
}

/// Everything a run shares with the rest of the session.
///
/// Built once per session; there is no global state.
#[derive(Clone)]
pub struct IsolationContext {
    pub settings: IsolationSettings,
    pub status: Option<StatusBoard>,
    pub log: Option<OutcomeSender>,
    pub metrics: Arc<Metrics>,
}

impl IsolationContext {
    pub fn new(settings: IsolationSettings) -> Self {
        Self {
            settings,
            status: None,
            log: None,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_status(mut self, status: StatusBoard) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_log(mut self, log: OutcomeSender) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    fn record(&self, event: OutcomeEvent) {
        if let Some(log) = &self.log {
            log.record(event);
        }
    }

    fn show<F: FnOnce(&StatusBoard)>(&self, f: F) {
        if let Some(status) = &self.status {
            f(status);
        }
    }
}

/// How a run that returned normally ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Success,
    /// The operator stopped the run; `revert` asks for the original load order back
    Aborted { revert: bool },
}

/// One host launch as the isolator saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRecord {
    pub launch: usize,
    pub phase: Phase,
    pub kind: BatchKind,
    pub members: Vec<String>,
    pub outcome: TestOutcome,
}

/// One isolated culprit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Isolation {
    pub plugin: String,

    /// Launches spent on this isolation, the failing batch included
    pub launches: usize,

    /// Size of the batch whose failure started the isolation
    pub batch_size: usize,

    /// Identified by elimination without ever being run alone
    pub inferred: bool,

    /// Outcome of the solo retest, when one ran
    pub retest: Option<TestOutcome>,
}

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    pub completion: Completion,
    pub load_order: LoadOrder,
    pub history: Vec<BatchRecord>,
    pub isolations: Vec<Isolation>,
}

impl RunReport {
    pub fn summary(&self) -> LoadOrderSummary {
        self.load_order.summary()
    }

    pub fn launches(&self) -> usize {
        self.history.len()
    }

    /// Culprits found by elimination only
    pub fn inferred(&self) -> Vec<String> {
        self.isolations
            .iter()
            .filter(|i| i.inferred)
            .map(|i| i.plugin.clone())
            .collect()
    }
}

enum Step {
    Tested(TestOutcome),
    Abort { revert: bool },
}

/// Drives the bisection state machine over one load order.
///
/// ```text
/// SanityCheck -> StandardBatching -> Subdividing -> (TurboRetry) -> Done
/// ```
///
/// A failing batch is halved; the left half (ceiling) is tested and the right
/// half is only tested by elimination when the left passes. A failing batch
/// of `n` plugins therefore costs at most `ceil(log2(n)) + 1` launches.
pub struct CrashIsolator<M: ProcessMonitor, O: OperatorControl> {
    load_order: LoadOrder,
    monitor: M,
    operator: O,
    ctx: IsolationContext,
    planner: BatchPlanner,
    phase: Phase,
    history: Vec<BatchRecord>,
    isolations: Vec<Isolation>,
}

impl<M: ProcessMonitor, O: OperatorControl> CrashIsolator<M, O> {
    pub fn new(load_order: LoadOrder, monitor: M, operator: O, ctx: IsolationContext) -> Self {
        let planner = BatchPlanner::new(ctx.settings.batch_size);
        Self {
            load_order,
            monitor,
            operator,
            ctx,
            planner,
            phase: Phase::SanityCheck,
            history: Vec::new(),
            isolations: Vec::new(),
        }
    }

    /// Run the state machine to completion.
    ///
    /// # Returns
    /// A report for successful and operator-aborted runs; sanity and launch
    /// failures come back as errors.
    pub async fn run(mut self) -> Result<RunReport, IsolationError> {
        let completion = self.drive().await?;
        self.enter(Phase::Done);

        let summary = self.load_order.summary();
        self.ctx.show(|s| {
            s.set_summary(summary);
        });
        tracing::info!(
            "Run finished ({:?}): {} passed, {} failed, {} untested, {} launches",
            completion,
            summary.passed,
            summary.failed,
            summary.untested,
            self.history.len()
        );

        Ok(RunReport {
            completion,
            load_order: self.load_order,
            history: self.history,
            isolations: self.isolations,
        })
    }

    async fn drive(&mut self) -> Result<Completion, IsolationError> {
        self.enter(Phase::SanityCheck);
        let sanity = self.planner.initial_sanity_batch();
        match self.test(&sanity).await? {
            Step::Abort { revert } => return Ok(Completion::Aborted { revert }),
            Step::Tested(outcome) if outcome.is_failure() => {
                let plugins = self.load_order.core();
                tracing::error!("Sanity check {}: {}", outcome, plugins.join(", "));
                return Err(IsolationError::RequiredPluginFailure { plugins, outcome });
            }
            Step::Tested(_) => {
                let core = self.load_order.core();
                self.load_order.mark_passed(&core)?;
                tracing::info!("Sanity check passed with {} core plugins", core.len());
            }
        }

        loop {
            self.enter(Phase::StandardBatching);
            let Some(batch) = self.planner.next_standard_batch(&self.load_order)? else {
                break;
            };

            match self.test(&batch).await? {
                Step::Abort { revert } => return Ok(Completion::Aborted { revert }),
                Step::Tested(outcome) if outcome.is_failure() => {
                    if let Some(abort) = self.isolate(batch).await? {
                        return Ok(abort);
                    }
                    if self.ctx.settings.turbo_batch {
                        if let Some(abort) = self.turbo_retry().await? {
                            return Ok(abort);
                        }
                    }
                }
                Step::Tested(_) => self.pass(&batch)?,
            }
        }

        if self.ctx.settings.retest_failed {
            if let Some(abort) = self.retest_failed().await? {
                return Ok(abort);
            }
        }
        Ok(Completion::Success)
    }

    /// Bisect a failing batch down to one culprit.
    async fn isolate(&mut self, failing: Batch) -> Result<Option<Completion>, IsolationError> {
        self.enter(Phase::Subdividing);
        let started_at = self.history.len().saturating_sub(1);
        let batch_size = failing.len();
        let mut suspect = failing;
        let mut inferred = false;

        loop {
            let Some(split) = self.planner.subdivide(&suspect) else {
                return Ok(None);
            };

            match split {
                Subdivision::Culprit(plugin) => {
                    self.load_order.mark_failed(std::slice::from_ref(&plugin))?;
                    self.ctx.metrics.record_plugin_failed();

                    let launches = self.history.len() - started_at;
                    if inferred {
                        tracing::warn!(
                            "{} isolated by elimination only, it was never run alone",
                            plugin
                        );
                    } else {
                        tracing::info!("{} isolated after {} launches", plugin, launches);
                    }
                    self.ctx.record(OutcomeEvent::CulpritIsolated {
                        plugin: plugin.clone(),
                        inferred,
                        launches,
                    });
                    self.ctx.show(|s| {
                        s.record_culprit(&plugin, inferred);
                    });
                    self.isolations.push(Isolation {
                        plugin,
                        launches,
                        batch_size,
                        inferred,
                        retest: None,
                    });
                    return Ok(None);
                }
                Subdivision::Halves { left, right } => match self.test(&left).await? {
                    Step::Abort { revert } => return Ok(Some(Completion::Aborted { revert })),
                    Step::Tested(outcome) if outcome.is_failure() => {
                        // The right half goes back to the untested pool.
                        suspect = left;
                        inferred = false;
                    }
                    Step::Tested(_) => {
                        self.pass(&left)?;
                        suspect = right;
                        inferred = true;
                    }
                },
            }
        }
    }

    /// Retest everything left in one batch after a culprit was removed.
    async fn turbo_retry(&mut self) -> Result<Option<Completion>, IsolationError> {
        loop {
            self.enter(Phase::TurboRetry);
            let Some(mega) = self.planner.mega_batch(&self.load_order)? else {
                return Ok(None);
            };

            match self.test(&mega).await? {
                Step::Abort { revert } => return Ok(Some(Completion::Aborted { revert })),
                Step::Tested(outcome) if outcome.is_failure() => {
                    if let Some(abort) = self.isolate(mega).await? {
                        return Ok(Some(abort));
                    }
                }
                Step::Tested(_) => {
                    self.pass(&mega)?;
                    return Ok(None);
                }
            }
        }
    }

    /// Give every failed plugin one solo launch on top of the full baseline.
    async fn retest_failed(&mut self) -> Result<Option<Completion>, IsolationError> {
        let failed = self.load_order.failed();
        if failed.is_empty() {
            return Ok(None);
        }
        self.enter(Phase::Retest);

        for plugin in failed {
            self.load_order.reset_for_retest(&plugin)?;
            let batch = self.planner.retest_batch(&self.load_order, &plugin)?;

            let outcome = match self.test(&batch).await? {
                Step::Abort { revert } => {
                    self.load_order.mark_failed(std::slice::from_ref(&plugin))?;
                    return Ok(Some(Completion::Aborted { revert }));
                }
                Step::Tested(outcome) => outcome,
            };

            if outcome.is_failure() {
                self.load_order.mark_failed(std::slice::from_ref(&plugin))?;
            } else {
                tracing::warn!("{} passed its solo retest, keeping it", plugin);
                self.pass(&batch)?;
            }

            if let Some(isolation) = self.isolations.iter_mut().find(|i| i.plugin == plugin) {
                isolation.retest = Some(outcome);
                if outcome.is_failure() {
                    isolation.inferred = false;
                }
            }
            self.ctx.record(OutcomeEvent::Retested { plugin, outcome });
        }
        Ok(None)
    }

    /// Launch one batch, handling operator interrupts until there is an outcome.
    async fn test(&mut self, batch: &Batch) -> Result<Step, IsolationError> {
        loop {
            let active = self.load_order.active_set(batch.members())?;
            self.ctx.show(|s| {
                s.start_batch(batch.members());
            });
            tracing::info!(
                "Testing {} batch of {} ({} active plugins)",
                batch.kind(),
                batch.len(),
                active.len()
            );

            let started = Instant::now();
            let outcome = self.monitor.run(&active, self.ctx.settings.wait).await?;
            self.ctx.metrics.record_launch(outcome, started.elapsed());

            let record = BatchRecord {
                launch: self.history.len() + 1,
                phase: self.phase,
                kind: batch.kind(),
                members: batch.members().to_vec(),
                outcome,
            };
            self.ctx.record(OutcomeEvent::BatchTested {
                launch: record.launch,
                phase: record.phase,
                kind: record.kind,
                members: record.members.clone(),
                outcome,
            });
            self.history.push(record);

            if outcome != TestOutcome::Interrupted {
                return Ok(Step::Tested(outcome));
            }

            self.ctx.show(|s| {
                s.set_paused(true);
            });
            let context = PauseContext {
                phase: self.phase,
                batch: batch.members().to_vec(),
                summary: self.load_order.summary(),
                launches: self.history.len(),
            };
            let decision = self.operator.on_pause(&context);
            tracing::info!("Paused during {}: {:?}", self.phase, decision);
            self.ctx.record(OutcomeEvent::Note(format!(
                "Paused during {}: {:?}",
                self.phase, decision
            )));

            match decision {
                PauseDecision::Resume => {
                    self.ctx.show(|s| {
                        s.set_paused(false);
                    });
                }
                PauseDecision::RevertAndQuit => return Ok(Step::Abort { revert: true }),
                PauseDecision::QuitKeepState => return Ok(Step::Abort { revert: false }),
            }
        }
    }

    fn pass(&mut self, batch: &Batch) -> Result<(), IsolationError> {
        self.load_order.mark_passed(batch.members())?;
        self.ctx.metrics.record_plugins_passed(batch.len());
        let summary = self.load_order.summary();
        self.ctx.show(|s| {
            s.record_passed(batch.members());
            s.set_summary(summary);
        });
        Ok(())
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::debug!("Phase {} -> {}", self.phase, phase);
        }
        self.phase = phase;
        self.ctx.show(|s| {
            s.set_phase(phase);
        });
    }
}
