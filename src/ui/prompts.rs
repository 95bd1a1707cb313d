//! Operator prompts: the pause menu and the end-of-session choice.

use crate::models::QuarantineDisposition;
use crate::services::{OperatorControl, PauseContext, PauseDecision};
use anyhow::{Context, Result};
use dialoguer::Select;
use owo_colors::OwoColorize;
use std::fmt;

/// What to do with the load-order file once a run has finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FinishAction {
    /// Move culprit files into the session quarantine directory
    Relocate,
    /// Comment culprits out of the load-order file
    Comment,
    /// Put the original load-order file back
    Revert,
    /// Leave the load-order file exactly as the last launch wrote it
    Keep,
}

impl FinishAction {
    /// Quarantine disposition for the actions that quarantine at all
    pub fn disposition(self) -> Option<QuarantineDisposition> {
        match self {
            FinishAction::Relocate => Some(QuarantineDisposition::Relocated),
            FinishAction::Comment => Some(QuarantineDisposition::Commented),
            FinishAction::Revert | FinishAction::Keep => None,
        }
    }
}

impl fmt::Display for FinishAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FinishAction::Relocate => "relocate",
            FinishAction::Comment => "comment",
            FinishAction::Revert => "revert",
            FinishAction::Keep => "keep",
        };
        f.write_str(s)
    }
}

/// Ask how to finish a session that found `failed` culprits.
pub fn prompt_finish_action(failed: usize) -> Result<FinishAction> {
    println!(
        "{} {} plugin(s) failed. What now?",
        "?".bold().yellow(),
        failed
    );

    let selection = Select::new()
        .with_prompt("Finish session")
        .items(&[
            "Quarantine failed plugins (move files)",
            "Comment failed plugins out of the load order",
            "Revert to the original load order",
            "Exit without changes",
        ])
        .default(1)
        .interact()
        .context("Failed to get user input")?;

    Ok(match selection {
        0 => FinishAction::Relocate,
        1 => FinishAction::Comment,
        2 => FinishAction::Revert,
        _ => FinishAction::Keep,
    })
}

/// Pause menu shown after Ctrl+C interrupts a launch
#[derive(Debug, Default)]
pub struct ConsoleOperator;

impl ConsoleOperator {
    pub fn new() -> Self {
        Self
    }
}

impl OperatorControl for ConsoleOperator {
    fn on_pause(&mut self, context: &PauseContext) -> PauseDecision {
        println!();
        println!(
            "{} during {} (launch #{}, batch of {})",
            "PAUSED".bold().red(),
            context.phase,
            context.launches,
            context.batch.len()
        );
        println!(
            "{} passed, {} failed, {} untested",
            context.summary.passed.green(),
            context.summary.failed.red(),
            context.summary.untested
        );

        let selection = Select::new()
            .with_prompt("Paused")
            .items(&[
                "Resume (relaunch this batch)",
                "Revert to the original load order and quit",
                "Quit and keep the current load order",
            ])
            .default(0)
            .interact();

        match selection {
            Ok(0) => PauseDecision::Resume,
            Ok(1) => PauseDecision::RevertAndQuit,
            Ok(_) => PauseDecision::QuitKeepState,
            Err(e) => {
                tracing::warn!("Pause prompt failed ({}), reverting and quitting", e);
                PauseDecision::RevertAndQuit
            }
        }
    }
}
