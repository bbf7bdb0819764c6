//! Liveness supervisor.
//!
//! Periodically demotes devices that have gone quiet. A device is
//! considered offline once nothing has been heard from it for the
//! configured threshold (three missed 30-second heartbeats by default).

use std::time::Duration;

use tracing::{info, warn};

use crate::storage::Database;
use sentra_core::unix_timestamp;

/// Spawn the sweep task. Runs until the shutdown signal fires.
pub fn spawn_liveness_task(
    db: Database,
    interval: Duration,
    offline_after_secs: i64,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let cutoff = unix_timestamp() - offline_after_secs;
                    match db.mark_offline_stale(cutoff).await {
                        Ok(demoted) if !demoted.is_empty() => {
                            info!(count = demoted.len(), devices = ?demoted, "Marked stale devices offline");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "Liveness sweep failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("Liveness supervisor shutting down");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweep_demotes_stale_devices() {
        let db = Database::open_in_memory().await.unwrap();
        db.touch_device("stale").await.unwrap();
        db.touch_device("fresh").await.unwrap();
        sqlx::query("UPDATE devices SET last_seen = last_seen - 600 WHERE id = 'stale'")
            .execute(db.pool())
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let task = spawn_liveness_task(db.clone(), Duration::from_millis(20), 90, shutdown_rx);

        // Give the sweep a couple of ticks of real time.
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(db.get_device("stale").await.unwrap().unwrap().status, "offline");
        assert_eq!(db.get_device("fresh").await.unwrap().unwrap().status, "online");

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_task_promptly() {
        let db = Database::open_in_memory().await.unwrap();
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let task = spawn_liveness_task(db, Duration::from_secs(3600), 90, shutdown_rx);
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
