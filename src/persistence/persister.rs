//! Background Snapshot Persister
//!
//! Periodically writes the whole store to disk through a
//! [`SnapshotWriter`]. Runs on its own interval, independent of the expiry
//! sweeper.
//!
//! - Ticks where the store's generation hasn't moved since the last
//!   successful write are skipped.
//! - A failed write is logged and retried on the next tick; it never stops
//!   the loop.
//! - On shutdown one last snapshot is written if anything changed.

use crate::persistence::snapshot::{SnapshotError, SnapshotWriter};
use crate::storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Writes one snapshot of `store` on a blocking thread.
///
/// # Returns
///
/// The number of records written.
pub async fn persist_now(
    store: &Store,
    writer: &Arc<SnapshotWriter>,
) -> Result<usize, SnapshotError> {
    let entries = store.snapshot();
    let writer = Arc::clone(writer);
    tokio::task::spawn_blocking(move || writer.write(&entries)).await?
}

/// A handle to the running persister.
///
/// Dropping the handle signals the task to stop; use
/// [`SnapshotPersister::shutdown`] to also wait for the final write.
#[derive(Debug)]
pub struct SnapshotPersister {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SnapshotPersister {
    /// Starts the persister as a background task.
    pub fn start(store: Arc<Store>, writer: SnapshotWriter, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            path = %writer.path().display(),
            interval_ms = interval.as_millis() as u64,
            "Snapshot persister started"
        );

        let task = tokio::spawn(persister_loop(store, Arc::new(writer), interval, shutdown_rx));

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Stops the loop and waits for the final snapshot to be written.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Snapshot persister task failed");
            }
        }
        info!("Snapshot persister stopped");
    }
}

impl Drop for SnapshotPersister {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn persister_loop(
    store: Arc<Store>,
    writer: Arc<SnapshotWriter>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // None until the first successful write, so a fresh file always appears
    let mut last_written: Option<u64> = None;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Snapshot persister received shutdown signal");
                    persist_if_changed(&store, &writer, &mut last_written).await;
                    return;
                }
            }
        }

        persist_if_changed(&store, &writer, &mut last_written).await;
    }
}

async fn persist_if_changed(
    store: &Store,
    writer: &Arc<SnapshotWriter>,
    last_written: &mut Option<u64>,
) {
    let generation = store.generation();
    if *last_written == Some(generation) {
        return;
    }

    match persist_now(store, writer).await {
        Ok(records) => {
            *last_written = Some(generation);
            debug!(records = records, generation = generation, "Store persisted");
        }
        Err(e) => {
            error!(error = %e, "Snapshot write failed, will retry on next tick");
        }
    }
}
