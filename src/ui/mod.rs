// UI module - terminal surface for a session
//
// This module contains:
// - console: status display thread and end-of-session report
// - prompts: ConsoleOperator (pause menu) and the finish-action prompt

pub mod console;
pub mod prompts;

pub use console::{StatusView, render_summary, spawn_status_renderer, truncate};
pub use prompts::{ConsoleOperator, FinishAction, prompt_finish_action};
