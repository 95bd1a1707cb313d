// Status board module
//
// Wraps RunStatus with thread-safe access and emits change events for the
// status display.

use crate::metrics::Metrics;
use crate::models::{LoadOrderSummary, Phase, RunStatus};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

/// Change events emitted when the run status is modified
///
/// Consumers may lag or miss events; each event carries enough to redraw.
#[derive(Clone, Debug, PartialEq)]
pub enum StatusChange {
    PhaseChanged {
        phase: Phase,
    },

    /// A batch went onto the host
    BatchStarted {
        members: Vec<String>,
        launch: usize,
    },

    PluginsPassed {
        plugins: Vec<String>,
    },

    CulpritIsolated {
        plugin: String,
        inferred: bool,
    },

    SummaryUpdated {
        summary: LoadOrderSummary,
    },

    PauseChanged {
        paused: bool,
    },
}

/// Thread-safe run status with event emission
///
/// - [`read()`](Self::read) for reading status
/// - [`update()`](Self::update) for mutations with automatic event emission
/// - [`subscribe()`](Self::subscribe) for listening to changes
#[derive(Clone)]
pub struct StatusBoard {
    status: Arc<RwLock<RunStatus>>,
    status_tx: broadcast::Sender<StatusChange>,
    metrics: Option<Arc<Metrics>>,
}

impl StatusBoard {
    /// Create a StatusBoard with a broadcast buffer of 100 events
    pub fn new() -> Self {
        let (status_tx, _) = broadcast::channel(100);
        Self {
            status: Arc::new(RwLock::new(RunStatus::default())),
            status_tx,
            metrics: None,
        }
    }

    /// Count events sent while nobody was listening.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn snapshot(&self) -> RunStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&RunStatus) -> R,
    {
        let status = self.status.read().unwrap_or_else(PoisonError::into_inner);
        f(&status)
    }

    /// Update the status and emit change events
    ///
    /// # Returns
    /// The StatusChange events that were emitted
    pub fn update<F>(&self, update_fn: F) -> Vec<StatusChange>
    where
        F: FnOnce(&mut RunStatus),
    {
        let changes = {
            let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
            let old_status = status.clone();
            update_fn(&mut status);
            detect_changes(&old_status, &status)
        };

        for change in &changes {
            if self.status_tx.send(change.clone()).is_err() {
                if let Some(metrics) = &self.metrics {
                    metrics.record_status_broadcast_error();
                }
            }
        }
        changes
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.status_tx.subscribe()
    }

    pub fn set_phase(&self, phase: Phase) -> Vec<StatusChange> {
        self.update(|s| s.phase = phase)
    }

    pub fn start_batch(&self, members: &[String]) -> Vec<StatusChange> {
        self.update(|s| {
            s.testing = members.to_vec();
            s.launches += 1;
        })
    }

    pub fn record_passed(&self, plugins: &[String]) -> Vec<StatusChange> {
        self.update(|s| s.push_passed(plugins))
    }

    pub fn record_culprit(&self, plugin: &str, inferred: bool) -> Vec<StatusChange> {
        let mut changes = self.update(|s| s.push_failed(plugin));

        let event = StatusChange::CulpritIsolated {
            plugin: plugin.to_string(),
            inferred,
        };
        let _ = self.status_tx.send(event.clone());
        changes.push(event);
        changes
    }

    pub fn set_summary(&self, summary: LoadOrderSummary) -> Vec<StatusChange> {
        self.update(|s| s.summary = summary)
    }

    pub fn set_paused(&self, paused: bool) -> Vec<StatusChange> {
        self.update(|s| s.paused = paused)
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

fn detect_changes(old: &RunStatus, new: &RunStatus) -> Vec<StatusChange> {
    let mut changes = Vec::new();

    if old.phase != new.phase {
        changes.push(StatusChange::PhaseChanged { phase: new.phase });
    }

    if old.launches != new.launches || old.testing != new.testing {
        changes.push(StatusChange::BatchStarted {
            members: new.testing.clone(),
            launch: new.launches,
        });
    }

    if old.recently_passed != new.recently_passed {
        let fresh = new
            .recently_passed
            .iter()
            .filter(|p| !old.recently_passed.contains(p))
            .cloned()
            .collect();
        changes.push(StatusChange::PluginsPassed { plugins: fresh });
    }

    if old.summary != new.summary {
        changes.push(StatusChange::SummaryUpdated {
            summary: new.summary,
        });
    }

    if old.paused != new.paused {
        changes.push(StatusChange::PauseChanged { paused: new.paused });
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_new_status_board() {
        let board = StatusBoard::new();
        let status = board.snapshot();
        assert_eq!(status.phase, Phase::SanityCheck);
        assert_eq!(status.launches, 0);
    }

    #[test]
    fn test_update_with_change_detection() {
        let board = StatusBoard::new();

        let changes = board.update(|s| {
            s.phase = Phase::StandardBatching;
            s.paused = true;
        });

        assert_eq!(changes.len(), 2);
        assert!(matches!(
            changes[0],
            StatusChange::PhaseChanged {
                phase: Phase::StandardBatching
            }
        ));
        assert!(matches!(changes[1], StatusChange::PauseChanged { paused: true }));
    }

    #[test]
    fn test_start_batch_counts_launches() {
        let board = StatusBoard::new();
        board.start_batch(&names(&["A.esp"]));
        let changes = board.start_batch(&names(&["A.esp"]));

        assert_eq!(
            changes,
            vec![StatusChange::BatchStarted {
                members: names(&["A.esp"]),
                launch: 2
            }]
        );
    }

    #[test]
    fn test_record_passed_reports_new_names_only() {
        let board = StatusBoard::new();
        board.record_passed(&names(&["A.esp"]));
        let changes = board.record_passed(&names(&["B.esp", "C.esp"]));

        assert_eq!(
            changes,
            vec![StatusChange::PluginsPassed {
                plugins: names(&["B.esp", "C.esp"])
            }]
        );
    }

    #[test]
    fn test_subscribe_receives_culprit() {
        let board = StatusBoard::new();
        let mut rx = board.subscribe();

        board.record_culprit("Bad.esp", true);

        let event = rx.try_recv().unwrap();
        assert_eq!(
            event,
            StatusChange::CulpritIsolated {
                plugin: "Bad.esp".to_string(),
                inferred: true
            }
        );
        assert_eq!(board.read(|s| s.failed.clone()), names(&["Bad.esp"]));
    }

    #[test]
    fn test_send_without_listener_is_counted() {
        let metrics = Arc::new(Metrics::new());
        let board = StatusBoard::new().with_metrics(Arc::clone(&metrics));
        board.set_paused(true);
        assert_eq!(
            metrics
                .status_broadcast_errors
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_clone_shares_status() {
        let board1 = StatusBoard::new();
        let board2 = board1.clone();
        board1.set_phase(Phase::Done);
        assert_eq!(board2.snapshot().phase, Phase::Done);
    }
}
