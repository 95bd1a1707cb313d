//! crashbisect - find the plugins that crash the game
//!
//! Main entry point for the terminal application.
//!
//! # Overview
//!
//! The binary wires the library together for one session:
//! - Configuration loading ([`ConfigManager`]) with CLI overrides
//! - Logging infrastructure (daily file rotation + stderr warnings)
//! - Tokio async runtime (4 worker threads for host process management)
//! - Status display thread fed by a [`StatusBoard`]
//! - The [`CrashIsolator`] run, followed by quarantine or revert
//!
//! # Execution Flow
//!
//! 1. Load `crashbisect.yaml` from the config directory, apply CLI flags
//! 2. Initialize logging → `<config dir>/logs/crashbisect.<date>`
//! 3. Create the session directories and back up the load-order file
//! 4. Run the isolator; Ctrl+C pauses the current launch
//! 5. Show the summary, then quarantine, revert or keep per the finish action
//! 6. Flush the outcome log and seal `session_summary.yaml`
//!
//! # Exit codes
//!
//! 0 success, 2 sanity-check failure, 3 launch failure, 4 operator abort,
//! 1 anything else.

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use crashbisect::logging::{self, LOG_DIR, LOG_PREFIX};
use crashbisect::models::{LoadOrder, UserConfig};
use crashbisect::services::{
    Completion, GameProcessMonitor, HostCommand, IsolationError, LoadOrderFile,
    QuarantineManager, RunReport, SystemLauncher,
};
use crashbisect::session::{
    OutcomeEvent, OutcomeLog, OutcomeSender, SessionOutcome, SessionSummary,
};
use crashbisect::ui::{self, ConsoleOperator, FinishAction};
use crashbisect::{
    APP_NAME, ConfigManager, CrashIsolator, IsolationContext, IsolationSettings, Metrics,
    SessionStore, StatusBoard, VERSION,
};
use owo_colors::OwoColorize;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "crashbisect", version, about = "Isolate crashing plugins by bisecting the load order")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Directory holding crashbisect.yaml and the diagnostic logs
    #[arg(long, global = true, default_value = "crashbisect Data")]
    config_dir: Utf8PathBuf,

    /// Debug-level logging, also on stderr
    #[arg(long, global = true)]
    debug: bool,

    /// Retest the whole remaining pool after each isolated culprit
    #[arg(long, global = true)]
    turbo: bool,

    /// Standard batch size
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// What to do with culprits at the end of the run; asks when omitted
    #[arg(long, global = true, value_enum)]
    on_finish: Option<FinishAction>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Run an isolation session (default)
    Run,
    /// Restore the newest session backup into the load-order file
    Restore,
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    fn apply_overrides(&self, config: &mut UserConfig) {
        if self.debug {
            config.debug.debug_mode = true;
        }
        if self.turbo {
            config.settings.turbo_batch_mode = true;
        }
        if let Some(batch_size) = self.batch_size {
            config.settings.batch_size = batch_size;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match try_main(&cli) {
        Ok(outcome) => exit_code(outcome),
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(1)
        }
    }
}

fn exit_code(outcome: SessionOutcome) -> ExitCode {
    match outcome {
        SessionOutcome::Success => ExitCode::SUCCESS,
        SessionOutcome::SanityFailure => ExitCode::from(2),
        SessionOutcome::LaunchFailure => ExitCode::from(3),
        SessionOutcome::Aborted { .. } => ExitCode::from(4),
        SessionOutcome::Error => ExitCode::from(1),
    }
}

fn try_main(cli: &Cli) -> Result<SessionOutcome> {
    let config_manager = ConfigManager::new(&cli.config_dir)?;
    let command = cli.command.unwrap_or(Command::Run);

    if let Command::InitConfig { force } = command {
        if config_manager.init_default(force)? {
            println!("Wrote {}", config_manager.config_path());
        } else {
            println!(
                "{} already exists, use --force to overwrite",
                config_manager.config_path()
            );
        }
        return Ok(SessionOutcome::Success);
    }

    // Write the defaults up front so the notice can be logged once logging is up.
    let first_run = config_manager.init_default(false)?;
    let mut config = config_manager.load_user_config()?;
    cli.apply_overrides(&mut config);

    let _guard = logging::setup_logging_with_console(
        &cli.config_dir.join(LOG_DIR),
        LOG_PREFIX,
        config.debug.debug_mode,
        true,
    )?;
    tracing::info!("Starting {} v{}", APP_NAME, VERSION);
    if first_run {
        tracing::warn!(
            "No config file found, wrote defaults to {}",
            config_manager.config_path()
        );
    }

    let result = match command {
        Command::Restore => restore(&config),
        _ => run_session(config, cli.on_finish),
    };
    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }
    result
}

/// `crashbisect restore`: put the newest backup back.
fn restore(config: &UserConfig) -> Result<SessionOutcome> {
    if config.paths.plugin_file.trim().is_empty() {
        bail!("paths.plugin_file is not configured");
    }
    let plugin_file = Utf8PathBuf::from(config.paths.plugin_file.as_str());

    match SessionStore::restore_latest(&config.paths.session_root, &plugin_file)? {
        Some(backup) => println!("{} {} from {}", "Restored".green(), plugin_file, backup),
        None => println!(
            "{} No session backup under {}",
            "!".yellow(),
            config.paths.session_root
        ),
    }
    Ok(SessionOutcome::Success)
}

fn run_session(config: UserConfig, on_finish: Option<FinishAction>) -> Result<SessionOutcome> {
    config.validate()?;

    // Host processes are strictly serialized; the workers serve process
    // management, the outcome log writer and signal handling.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(4)
        .thread_name("crashbisect-worker")
        .build()
        .context("Failed to create tokio runtime")?;

    let result = runtime.block_on(session(config, on_finish));

    runtime.shutdown_timeout(Duration::from_secs(5));
    tracing::info!("Session shutdown complete");
    result
}

async fn session(config: UserConfig, on_finish: Option<FinishAction>) -> Result<SessionOutcome> {
    let plugin_file = Utf8PathBuf::from(config.paths.plugin_file.as_str());
    let data_dir = match &config.paths.data_dir {
        Some(dir) => Utf8PathBuf::from(dir.as_str()),
        None => plugin_file
            .parent()
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|| Utf8PathBuf::from(".")),
    };

    let store = SessionStore::create(&config.paths.session_root)?;
    store.backup_original(&plugin_file)?;

    let file = LoadOrderFile::read(&plugin_file)?;
    let load_order = LoadOrder::new(
        file.entries(),
        &config.core_plugins.required,
        &config.core_plugins.optional,
        &config.settings.patch_keywords,
    );
    for missing in load_order.missing_core() {
        tracing::warn!("Core plugin {} is not in the load order", missing);
    }
    tracing::info!(
        "Loaded {} plugins from {} ({} core)",
        load_order.len(),
        plugin_file,
        load_order.core().len()
    );

    let metrics = Arc::new(Metrics::new());
    let board = StatusBoard::new().with_metrics(Arc::clone(&metrics));
    let renderer = ui::spawn_status_renderer(
        &board,
        config.settings.truncate_length,
        config.settings.turbo_batch_mode,
    );

    let log = OutcomeLog::open(&store.results_path()).await?;
    log.sender().record(OutcomeEvent::SessionStarted {
        session: store.id().to_string(),
        plugins: load_order.len(),
    });

    // Every Ctrl+C bumps the counter; the launcher treats a change as an interrupt.
    let (interrupt_tx, interrupt_rx) = watch::channel(0u64);
    let signals = tokio::spawn(async move {
        let mut count = 0u64;
        while tokio::signal::ctrl_c().await.is_ok() {
            count += 1;
            tracing::info!("Interrupt received");
            if interrupt_tx.send(count).is_err() {
                break;
            }
        }
    });

    let command = HostCommand::new(config.paths.game_exe.as_str())
        .with_args(config.paths.game_args.clone())
        .tracking(config.paths.game_process_name.clone());
    let launcher = SystemLauncher::new()
        .with_interrupt(interrupt_rx)
        .with_turbo(config.settings.turbo_mode)
        .with_cleanup_processes(config.paths.cleanup_processes.clone());
    let monitor = GameProcessMonitor::new(launcher, file.clone(), command)
        .with_settle_delay(Duration::from_secs(config.settings.after_close_delay))
        .with_timeout_outcome(config.settings.timeout_outcome)
        .with_load_order_dump(config.debug.show_load_order_per_batch);

    let settings = IsolationSettings {
        batch_size: config.settings.batch_size,
        wait: Duration::from_secs(config.settings.wait_seconds),
        turbo_batch: config.settings.turbo_batch_mode,
        retest_failed: config.settings.retest_failed,
    };
    let ctx = IsolationContext::new(settings)
        .with_status(board.clone())
        .with_log(log.sender())
        .with_metrics(Arc::clone(&metrics));

    let result = CrashIsolator::new(load_order, monitor, ConsoleOperator::new(), ctx)
        .run()
        .await;
    signals.abort();

    // The renderer exits once the last board is gone.
    drop(board);
    if renderer.join().is_err() {
        tracing::warn!("Status renderer panicked");
    }

    let mut summary = SessionSummary {
        session: store.id().to_string(),
        outcome: SessionOutcome::Error,
        counts: Default::default(),
        metrics: metrics.snapshot(),
        failed: Vec::new(),
        inferred: Vec::new(),
        quarantined: Vec::new(),
        finish_action: None,
    };
    let finish = Finish {
        store: &store,
        plugin_file: &plugin_file,
        data_dir: &data_dir,
        file: &file,
        on_finish,
        log: log.sender(),
    };
    let concluded = finish.conclude(result, &mut summary);
    if let Err(e) = &concluded {
        log.sender()
            .record(OutcomeEvent::Note(format!("Session ended with error: {:#}", e)));
    }

    // The log of record and the sealed summary are written before any error surfaces.
    let concluded = log.close_with(concluded).await;
    summary.metrics = metrics.snapshot();
    let sealed = store.seal(&summary);
    metrics.log_summary();

    let outcome = concluded?;
    println!("Session {} sealed: {}", store.id(), sealed?);
    Ok(outcome)
}

/// Everything the end of a session touches after the isolator returns
struct Finish<'a> {
    store: &'a SessionStore,
    plugin_file: &'a Utf8Path,
    data_dir: &'a Utf8Path,
    file: &'a LoadOrderFile,
    on_finish: Option<FinishAction>,
    log: OutcomeSender,
}

impl Finish<'_> {
    /// Restore, quarantine or keep per the run result, filling in `summary`.
    fn conclude(
        &self,
        result: Result<RunReport, IsolationError>,
        summary: &mut SessionSummary,
    ) -> Result<SessionOutcome> {
        let report = match result {
            Ok(report) => {
                summary.outcome = match report.completion {
                    Completion::Success => SessionOutcome::Success,
                    Completion::Aborted { revert } => SessionOutcome::Aborted { reverted: revert },
                };
                Some(report)
            }
            Err(err) => {
                eprintln!("{} {}", "Run failed:".red().bold(), err);
                self.log
                    .record(OutcomeEvent::Note(format!("Run failed: {}", err)));
                summary.outcome = match err {
                    IsolationError::RequiredPluginFailure { .. } => SessionOutcome::SanityFailure,
                    IsolationError::FatalLaunch(_) => SessionOutcome::LaunchFailure,
                    _ => SessionOutcome::Error,
                };
                None
            }
        };

        if let Some(report) = &report {
            summary.counts = report.summary();
            summary.failed = report.load_order.failed();
            summary.inferred = report.inferred();
        }
        let isolations = report
            .as_ref()
            .map(|r| r.isolations.clone())
            .unwrap_or_default();
        print!("{}", ui::render_summary(summary, &isolations));

        match (summary.outcome, report) {
            (SessionOutcome::Success, Some(report)) => self.finish_success(report, summary)?,
            (SessionOutcome::Aborted { reverted: true }, _) => {
                self.store.restore_original(self.plugin_file)?;
            }
            (SessionOutcome::Aborted { reverted: false }, _) => {}
            _ => self
                .store
                .restore_original(self.plugin_file)
                .context("Failed to restore the original load order")?,
        }
        Ok(summary.outcome)
    }

    fn finish_success(&self, mut report: RunReport, summary: &mut SessionSummary) -> Result<()> {
        let action = match self.on_finish {
            Some(action) => action,
            None if summary.failed.is_empty() => FinishAction::Comment,
            None => ui::prompt_finish_action(summary.failed.len())?,
        };

        match action.disposition() {
            Some(disposition) => {
                let manager = QuarantineManager::new(
                    self.data_dir,
                    self.store.quarantine_dir(),
                    self.store.marker_timestamp(),
                );
                let applied = manager.apply(&mut report.load_order, disposition, self.file)?;
                for plugin in &applied.relocated {
                    println!("{} {}", "Quarantined:".red(), plugin);
                }
                for plugin in &applied.commented {
                    println!("{} {}", "Commented out:".red(), plugin);
                }
                summary.quarantined = report.load_order.quarantined();
                summary.counts = report.summary();
            }
            None if action == FinishAction::Revert => {
                self.store.restore_original(self.plugin_file)?;
                println!("{}", "Restored the original load order.".yellow());
            }
            None => println!("{}", "Load-order file left as is.".yellow()),
        }
        self.log
            .record(OutcomeEvent::Note(format!("Finished with action: {}", action)));
        summary.finish_action = Some(action.to_string());
        Ok(())
    }
}
