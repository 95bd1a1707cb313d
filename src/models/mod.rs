//! Data models for crashbisect.
//!
//! - [`LoadOrder`]: the live, ordered plugin list with per-plugin category and status
//! - [`Plugin`]: a single load-order entry
//! - [`UserConfig`]: settings, core plugin lists and paths loaded from `crashbisect.yaml`
//! - [`TestOutcome`]: the classified result of one host launch
//! - [`RunStatus`]: live progress shown by the status display
//! - [`MAX_CONCURRENT_HOST_PROCESSES`]: always 1, the host owns shared save/config state

pub mod config;
pub mod load_order;
pub mod outcome;
pub mod plugin;
pub mod run_status;

pub use config::{
    ConfigError, CorePlugins, DebugSettings, PathSettings, Settings, TimeoutOutcome, UserConfig,
};
pub use load_order::{LoadOrder, LoadOrderError, LoadOrderSummary};
pub use outcome::TestOutcome;
pub use plugin::{Plugin, PluginCategory, PluginStatus, QuarantineDisposition};
pub use run_status::{Phase, RunStatus, STATUS_HISTORY};

/// Maximum number of host processes alive at once.
///
/// The host application is exclusive over its save and configuration state,
/// so batches are strictly serialized.
pub const MAX_CONCURRENT_HOST_PROCESSES: usize = 1;
