// crashbisect - isolate crashing plugins by bisecting the load order
//
// This is the library crate containing the isolation engine and its
// collaborators. The binary crate (main.rs) provides the terminal entry point.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod session;
pub mod state;
pub mod ui;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use metrics::{Metrics, MetricsSnapshot};
pub use models::{LoadOrder, Plugin, PluginStatus, TestOutcome, UserConfig};
pub use services::{CrashIsolator, IsolationContext, IsolationSettings, RunReport};
pub use session::SessionStore;
pub use state::{StatusBoard, StatusChange};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
