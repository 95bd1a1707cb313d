//! Services module - the crash-isolation engine and its collaborators.
//!
//! The engine finds the plugins that make the host crash or hang by launching
//! it against controlled subsets of the load order and bisecting failures.
//! Services have no terminal dependencies; operator input and the status
//! display reach them through traits and channels.
//!
//! # Components
//!
//! - [`CrashIsolator`]: the bisection state machine. Drives the planner and the
//!   monitor for a whole run and owns the [`crate::models::LoadOrder`] meanwhile.
//! - [`BatchPlanner`]: picks the sanity, standard and mega batches and splits
//!   failing ones.
//! - [`ProcessMonitor`]: runs one active set and classifies the outcome.
//!   [`GameProcessMonitor`] is the real implementation; the isolator only
//!   sees the trait.
//! - [`HostLauncher`]: the only OS-facing piece, with [`SystemLauncher`]
//!   backed by `tokio::process` and a [`ProcessProbe`].
//! - [`LoadOrderFile`]: reads and writes the external plain-text load order.
//! - [`QuarantineManager`]: relocates or comments out culprits at session end.
//!
//! # Usage Example
//!
//! ```ignore
//! use crashbisect::services::*;
//!
//! let file = LoadOrderFile::read("plugins.txt")?;
//! let load_order = LoadOrder::new(file.entries(), &required, &optional, &keywords);
//! let monitor = GameProcessMonitor::new(SystemLauncher::new(), file.clone(), command);
//! let ctx = IsolationContext::new(IsolationSettings::default());
//!
//! let report = CrashIsolator::new(load_order, monitor, operator, ctx).run().await?;
//! ```

pub mod isolator;
pub mod launcher;
pub mod load_order_file;
pub mod monitor;
pub mod planner;
pub mod quarantine;

pub use isolator::{
    BatchRecord, Completion, CrashIsolator, Isolation, IsolationContext, IsolationError,
    IsolationSettings, OperatorControl, PauseContext, PauseDecision, RunReport,
};
pub use launcher::{
    HostCommand, HostLauncher, LaunchError, LaunchOutcome, ProcessProbe, SystemLauncher,
    SystemProbe,
};
pub use load_order_file::{LoadOrderFile, LoadOrderFileError, RemovalMarker, REMOVED_SECTION};
pub use monitor::{GameProcessMonitor, MonitorError, ProcessMonitor, classify};
pub use planner::{Batch, BatchKind, BatchPlanner, Subdivision};
pub use quarantine::{QuarantineError, QuarantineManager, QuarantineReport};
