//! Periodic cleanup scheduling.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::RemoteStateSettings;
use crate::gc::StaleStateCleanup;

/// Runs a [`StaleStateCleanup`] every `cleanup_interval`.
///
/// The schedule follows the settings channel: a new interval takes effect
/// immediately, and an interval `<= 0` pauses the schedule until it turns
/// positive again.
pub struct CleanupScheduler {
    task: Arc<dyn StaleStateCleanup>,
    settings: watch::Receiver<RemoteStateSettings>,
}

/// Handle to a spawned [`CleanupScheduler`].
#[derive(Debug)]
pub struct CleanupHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl CleanupHandle {
    /// Stops the schedule and waits for the loop to exit.
    ///
    /// A cleanup pass already running is allowed to finish.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        if let Err(err) = self.join.await {
            tracing::warn!(error = %err, "cleanup scheduler exited abnormally");
        }
    }
}

impl CleanupScheduler {
    /// Creates a scheduler driven by `settings`.
    #[must_use]
    pub fn new(
        task: Arc<dyn StaleStateCleanup>,
        settings: watch::Receiver<RemoteStateSettings>,
    ) -> Self {
        Self { task, settings }
    }

    /// Spawns the schedule onto the current runtime.
    #[must_use]
    pub fn spawn(self) -> CleanupHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));
        CleanupHandle { shutdown, join }
    }

    /// Runs the schedule until `shutdown` flips to true or either channel
    /// closes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            let settings = self.settings.borrow_and_update().clone();
            let Some(interval) = settings.cleanup_interval() else {
                tracing::debug!("stale state cleanup paused");
                tokio::select! {
                    changed = self.settings.changed() => if changed.is_err() { return },
                    _ = shutdown.changed() => return,
                }
                continue;
            };

            tokio::select! {
                () = tokio::time::sleep(interval) => {
                    match self.task.cleanup(&settings).await {
                        Ok(result) if result.has_errors() => {
                            tracing::warn!(
                                errors = result.errors.len(),
                                deleted = result.objects_deleted(),
                                "stale state cleanup finished with errors"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => {
                            tracing::error!(error = %err, "stale state cleanup failed");
                        }
                    }
                }
                changed = self.settings.changed() => if changed.is_err() { return },
                _ = shutdown.changed() => return,
            }
        }
    }
}
