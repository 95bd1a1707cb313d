//! Terminal status display.
//!
//! A listener thread mirrors the [`StatusBoard`] from its change events and
//! redraws a three-column table (testing / recently passed / failed) whenever
//! a batch starts, a culprit is isolated or the run pauses.

use crate::models::{RunStatus, STATUS_HISTORY};
use crate::services::Isolation;
use crate::session::SessionSummary;
use crate::state::{StatusBoard, StatusChange};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use owo_colors::OwoColorize;
use std::thread::JoinHandle;
use tokio::sync::broadcast::error::RecvError;

/// Shorten a plugin name to `max` characters, ending in `...` when cut.
pub fn truncate(name: &str, max: usize) -> String {
    if name.chars().count() <= max {
        return name.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut short: String = name.chars().take(keep).collect();
    short.push_str("...");
    short
}

/// Local copy of the run status, rebuilt from change events
#[derive(Debug, Clone, Default)]
pub struct StatusView {
    status: RunStatus,
    truncate_length: usize,
}

impl StatusView {
    pub fn new(truncate_length: usize, turbo: bool) -> Self {
        Self {
            status: RunStatus {
                turbo,
                ..Default::default()
            },
            truncate_length,
        }
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    /// Fold one event into the view.
    ///
    /// # Returns
    /// `true` when the table should be redrawn
    pub fn apply(&mut self, change: &StatusChange) -> bool {
        match change {
            StatusChange::PhaseChanged { phase } => {
                self.status.phase = *phase;
                false
            }
            StatusChange::BatchStarted { members, launch } => {
                self.status.testing = members.clone();
                self.status.launches = *launch;
                true
            }
            StatusChange::PluginsPassed { plugins } => {
                self.status.push_passed(plugins);
                false
            }
            StatusChange::CulpritIsolated { plugin, .. } => {
                if !self.status.failed.contains(plugin) {
                    self.status.push_failed(plugin);
                }
                true
            }
            StatusChange::SummaryUpdated { summary } => {
                self.status.summary = *summary;
                false
            }
            StatusChange::PauseChanged { paused } => {
                self.status.paused = *paused;
                *paused
            }
        }
    }

    /// Render the header lines and the three-column table.
    pub fn render(&self) -> String {
        let status = &self.status;
        let summary = status.summary;
        let tested = summary.passed + summary.failed + summary.quarantined;

        let mut out = String::new();
        if status.turbo {
            out.push_str(&format!("{}\n", "Turbo Batch Mode: Active".bold().yellow()));
        }
        out.push_str(&format!(
            "{}  launch #{}  {}\n",
            status.phase.bold().cyan(),
            status.launches,
            if status.paused {
                "PAUSED".red().bold().to_string()
            } else {
                String::new()
            }
        ));
        out.push_str(&format!(
            "Total: {}  Tested: {}  {}  {}  Remaining: {}\n",
            summary.total,
            tested,
            format!("Passed: {}", summary.passed).green(),
            format!("Failed: {}", summary.failed).red(),
            summary.untested
        ));
        out.push_str(&format!(
            "Currently testing batch size: {}\n",
            status.testing.len()
        ));

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Testing").fg(Color::Cyan),
                Cell::new("Recently Passed").fg(Color::Green),
                Cell::new("Failed").fg(Color::Red),
            ]);

        let testing = last(&status.testing);
        let passed = last(&status.recently_passed);
        let failed = last(&status.failed);
        let rows = testing.len().max(passed.len()).max(failed.len());

        for i in 0..rows {
            table.add_row(vec![
                Cell::new(self.cell(testing, i)).fg(Color::Cyan),
                Cell::new(self.cell(passed, i)).fg(Color::Green),
                Cell::new(self.cell(failed, i)).fg(Color::Red),
            ]);
        }

        out.push_str(&table.to_string());
        out.push('\n');
        out
    }

    fn cell(&self, column: &[String], i: usize) -> String {
        column
            .get(i)
            .map(|name| truncate(name, self.truncate_length))
            .unwrap_or_default()
    }
}

fn last(list: &[String]) -> &[String] {
    &list[list.len().saturating_sub(STATUS_HISTORY)..]
}

/// Spawn the status display thread.
///
/// The thread owns only a receiver, so it exits once every [`StatusBoard`]
/// clone has been dropped.
pub fn spawn_status_renderer(
    board: &StatusBoard,
    truncate_length: usize,
    turbo: bool,
) -> JoinHandle<()> {
    let mut rx = board.subscribe();
    let mut view = StatusView::new(truncate_length, turbo);

    std::thread::spawn(move || {
        loop {
            match rx.blocking_recv() {
                Ok(change) => {
                    if view.apply(&change) {
                        // Clear screen and home the cursor before redrawing.
                        print!("\x1B[2J\x1B[H{}", view.render());
                    }
                }
                Err(RecvError::Closed) => {
                    tracing::debug!("Status channel closed, renderer exiting");
                    break;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Status renderer lagged, skipped {} updates", skipped);
                }
            }
        }
    })
}

/// Render the end-of-session report.
pub fn render_summary(summary: &SessionSummary, isolations: &[Isolation]) -> String {
    let counts = summary.counts;
    let mut out = format!(
        "{} {}  {}  {}  {} launches\n",
        "Summary:".bold().cyan(),
        format!("{} passed", counts.passed).green(),
        format!("{} failed", counts.failed + counts.quarantined).red(),
        format!("{} untested", counts.untested).yellow(),
        summary.metrics.launches
    );

    if isolations.is_empty() {
        out.push_str(&format!("{}\n", "No crashing plugins found.".green()));
        return out;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Plugin",
        "Launches",
        "Batch",
        "Evidence",
        "Retest",
    ]);

    for isolation in isolations {
        let evidence = if isolation.inferred {
            Cell::new("inferred").fg(Color::Yellow)
        } else {
            Cell::new("reproduced").fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(&isolation.plugin),
            Cell::new(isolation.launches),
            Cell::new(isolation.batch_size),
            evidence,
            Cell::new(
                isolation
                    .retest
                    .map(|o| o.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]);
    }

    out.push_str(&table.to_string());
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LoadOrderSummary, Phase};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Short.esp", 25), "Short.esp");
        assert_eq!(truncate("AVeryLongPluginName.esp", 10), "AVeryLo...");
        assert_eq!(truncate("Ünïcödé.esp", 6), "Ünï...");
    }

    #[test]
    fn test_view_redraws_on_batch_and_culprit() {
        let mut view = StatusView::new(25, false);

        assert!(!view.apply(&StatusChange::PhaseChanged {
            phase: Phase::Subdividing
        }));
        assert!(view.apply(&StatusChange::BatchStarted {
            members: names(&["B.esp", "C.esp"]),
            launch: 2
        }));
        assert!(view.apply(&StatusChange::CulpritIsolated {
            plugin: "C.esp".to_string(),
            inferred: true
        }));
        assert!(!view.apply(&StatusChange::PauseChanged { paused: false }));

        assert_eq!(view.status().phase, Phase::Subdividing);
        assert_eq!(view.status().launches, 2);
        assert_eq!(view.status().failed, names(&["C.esp"]));
    }

    #[test]
    fn test_render_lists_columns() {
        let mut view = StatusView::new(8, true);
        view.apply(&StatusChange::BatchStarted {
            members: names(&["LongPluginName.esp"]),
            launch: 1,
        });
        view.apply(&StatusChange::PluginsPassed {
            plugins: names(&["A.esp"]),
        });
        view.apply(&StatusChange::SummaryUpdated {
            summary: LoadOrderSummary {
                total: 4,
                passed: 1,
                failed: 0,
                quarantined: 0,
                untested: 3,
            },
        });

        let out = view.render();
        assert!(out.contains("Turbo Batch Mode: Active"));
        assert!(out.contains("Recently Passed"));
        assert!(out.contains("LongP..."));
        assert!(out.contains("A.esp"));
        assert!(out.contains("Remaining: 3"));
    }

    #[test]
    fn test_renderer_exits_when_board_dropped() {
        let board = StatusBoard::new();
        let handle = spawn_status_renderer(&board, 25, false);
        board.set_phase(Phase::Done);
        drop(board);
        handle.join().unwrap();
    }
}
