use crate::models::{Phase, TestOutcome};
use crate::services::planner::BatchKind;
use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fmt;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// One line of the session's log of record
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeEvent {
    SessionStarted {
        session: String,
        plugins: usize,
    },
    BatchTested {
        launch: usize,
        phase: Phase,
        kind: BatchKind,
        members: Vec<String>,
        outcome: TestOutcome,
    },
    CulpritIsolated {
        plugin: String,
        inferred: bool,
        launches: usize,
    },
    Retested {
        plugin: String,
        outcome: TestOutcome,
    },
    Note(String),
}

impl fmt::Display for OutcomeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeEvent::SessionStarted { session, plugins } => {
                write!(f, "Session {} started with {} plugins", session, plugins)
            }
            OutcomeEvent::BatchTested {
                launch,
                phase,
                kind,
                members,
                outcome,
            } => write!(
                f,
                "#{} [{}] {} batch ({}): {} -> {}",
                launch,
                phase,
                kind,
                members.len(),
                members.join(", "),
                outcome.to_string().to_uppercase()
            ),
            OutcomeEvent::CulpritIsolated {
                plugin,
                inferred,
                launches,
            } => {
                let how = if *inferred {
                    "INFERRED by elimination, never run alone"
                } else {
                    "reproduced alone"
                };
                write!(
                    f,
                    "CULPRIT {} ({}, {} launches)",
                    plugin, how, launches
                )
            }
            OutcomeEvent::Retested { plugin, outcome } => {
                write!(f, "Retest {} -> {}", plugin, outcome.to_string().to_uppercase())
            }
            OutcomeEvent::Note(text) => f.write_str(text),
        }
    }
}

/// Cheap handle the isolator uses to append events. Never blocks.
#[derive(Debug, Clone)]
pub struct OutcomeSender {
    tx: mpsc::UnboundedSender<OutcomeEvent>,
}

impl OutcomeSender {
    pub fn record(&self, event: OutcomeEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!("Outcome log is closed, event dropped");
        }
    }
}

/// Append-only session log written by a background task.
///
/// Events are flushed line by line. [`close`](Self::close) drains whatever
/// is still queued and joins the writer, after which the file is complete.
pub struct OutcomeLog {
    tx: mpsc::UnboundedSender<OutcomeEvent>,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<std::io::Result<usize>>,
}

impl OutcomeLog {
    /// Open (or append to) the log file and start the writer task.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(path: &Utf8Path) -> Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open outcome log: {}", path))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(write_events(file, rx, shutdown_rx));

        tracing::debug!("Outcome log writer started: {}", path);
        Ok(Self {
            tx,
            shutdown,
            handle,
        })
    }

    pub fn sender(&self) -> OutcomeSender {
        OutcomeSender {
            tx: self.tx.clone(),
        }
    }

    /// Flush every queued event and join the writer.
    ///
    /// # Returns
    /// Number of lines written over the log's lifetime
    pub async fn close(self) -> Result<usize> {
        let _ = self.shutdown.send(());
        drop(self.tx);
        let written = self
            .handle
            .await
            .context("Outcome log writer panicked")?
            .context("Failed to write outcome log")?;
        tracing::debug!("Outcome log closed after {} lines", written);
        Ok(written)
    }

    /// Close the log, then hand back `result`.
    ///
    /// The log is flushed even when `result` is an error; a close failure
    /// only surfaces when `result` itself succeeded.
    pub async fn close_with<T>(self, result: Result<T>) -> Result<T> {
        let closed = self.close().await;
        match (result, closed) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(close_err)) => {
                tracing::warn!("{:#}", close_err);
                Err(e)
            }
        }
    }
}

async fn write_events(
    mut file: tokio::fs::File,
    mut rx: mpsc::UnboundedReceiver<OutcomeEvent>,
    mut shutdown: oneshot::Receiver<()>,
) -> std::io::Result<usize> {
    let mut written = 0;
    loop {
        tokio::select! {
            biased;
            event = rx.recv() => match event {
                Some(event) => {
                    write_line(&mut file, &event).await?;
                    written += 1;
                }
                None => break,
            },
            _ = &mut shutdown => {
                // Senders may still be alive; stop accepting and drain.
                rx.close();
                while let Some(event) = rx.recv().await {
                    write_line(&mut file, &event).await?;
                    written += 1;
                }
                break;
            }
        }
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

async fn write_line(file: &mut tokio::fs::File, event: &OutcomeEvent) -> std::io::Result<()> {
    let line = format!(
        "[{}] {}\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        event
    );
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_line_format() {
        let event = OutcomeEvent::BatchTested {
            launch: 3,
            phase: Phase::StandardBatching,
            kind: BatchKind::Standard,
            members: vec!["B.esp".to_string(), "C.esp".to_string()],
            outcome: TestOutcome::Crashed,
        };
        assert_eq!(
            event.to_string(),
            "#3 [Batch testing] standard batch (2): B.esp, C.esp -> CRASHED"
        );
    }

    #[test]
    fn test_inferred_culprit_is_flagged() {
        let event = OutcomeEvent::CulpritIsolated {
            plugin: "E.esp".to_string(),
            inferred: true,
            launches: 3,
        };
        assert!(event.to_string().contains("INFERRED"));
    }

    #[tokio::test]
    async fn test_close_flushes_queued_events() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = camino::Utf8PathBuf::try_from(temp_dir.path().join("log.txt")).unwrap();

        let log = OutcomeLog::open(&path).await.unwrap();
        let sender = log.sender();
        for i in 0..50 {
            sender.record(OutcomeEvent::Note(format!("line {i}")));
        }

        // The sender outlives the log; close must not wait for it.
        let written = log.close().await.unwrap();
        assert_eq!(written, 50);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 50);
        assert!(content.lines().last().unwrap().ends_with("line 49"));
        drop(sender);
    }

    #[tokio::test]
    async fn test_close_with_error_still_flushes() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = camino::Utf8PathBuf::try_from(temp_dir.path().join("log.txt")).unwrap();

        let log = OutcomeLog::open(&path).await.unwrap();
        let sender = log.sender();
        sender.record(OutcomeEvent::Note("Run finished".to_string()));
        sender.record(OutcomeEvent::Note("Quarantine failed".to_string()));

        let result: Result<()> = Err(anyhow::anyhow!("Failed to relocate C.esp"));
        let err = log.close_with(result).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to relocate C.esp");

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.lines().last().unwrap().ends_with("Quarantine failed"));
    }
}
