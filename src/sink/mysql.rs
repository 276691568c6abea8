use std::time::UNIX_EPOCH;

use sqlx::MySqlPool;
use tokio::sync::mpsc;

use super::{Error, Result, SamplePoint};
use crate::error::ResultOkLogExt;

/// Writes point batches into the `container_series` table.
#[derive(Debug, Clone)]
pub struct MySqlPointWriter {
    db: MySqlPool,
    machine_id: String,
}

impl MySqlPointWriter {
    pub fn new(db: MySqlPool, machine_id: impl Into<String>) -> Self {
        Self {
            db,
            machine_id: machine_id.into(),
        }
    }

    /// Inserts one batch of points inside a single transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WriteError`] if the transaction or any insert
    /// fails; the whole batch is rolled back in that case.
    pub async fn write_batch(&self, points: &[SamplePoint]) -> Result<()> {
        const INSERT_QUERY: &str = r#"
INSERT INTO container_series (
    timestamp, machine_id, container_id, series, device, value
) VALUES (
    ?, ?, ?, ?, ?, ?
)
"#;
        let mut tx: sqlx::Transaction<'_, sqlx::MySql> =
            self.db.begin().await.map_err(Error::WriteError)?;

        for point in points {
            let timestamp = point
                .timestamp
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            sqlx::query(INSERT_QUERY)
                .bind(timestamp)
                .bind(&self.machine_id)
                .bind(&point.container)
                .bind(point.series)
                .bind(point.device.as_deref())
                .bind(point.value)
                .execute(&mut *tx)
                .await
                .map_err(Error::WriteError)?;
        }
        tx.commit().await.map_err(Error::WriteError)?;

        Ok(())
    }
}

/// Spawns the writer task draining batches from the buffered sinks.
///
/// The task ends once every sender half of the channel is gone. Write
/// failures are logged and the batch dropped; the next flush is the retry.
pub fn spawn_writer(
    writer: MySqlPointWriter,
    mut rx: mpsc::Receiver<Vec<SamplePoint>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(batch) = rx.recv().await {
            writer
                .write_batch(&batch)
                .await
                .ok_log("failed to write stats batch");
        }
    })
}
