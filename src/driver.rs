//! # Ingestion Driver
//!
//! Owns the current record and feeds it samples from the peer adapter.
//!
//! This module handles:
//! - Receiving peer events from a channel, with a timeout instead of polling
//! - Starting a fresh record whenever the current one has sealed
//! - Force-sealing on disconnect or on a malformed message
//! - Pushing the latest frame text to the display after each sample
//! - Keeping sealed records whose file could not be written, and retrying them
//! - Waiting for outstanding seal work on shutdown

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::display::DisplaySink;
use crate::error::{ArchiverError, Result};
use crate::record::live::{LiveRecord, SealContext, SealReport};

/// Event delivered by the peer-connection adapter
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// One ingestion message (`sensor_data` + `sensor_units`)
    Sample(Value),
    /// The peer connection dropped
    Disconnected,
}

/// Counters kept by the driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub samples: u64,
    pub rejected: u64,
    pub records: u64,
}

/// Single owner of the live record
pub struct IngestDriver<D: DisplaySink> {
    ctx: Arc<SealContext>,
    receive_timeout: Duration,
    display: D,
    current: Option<LiveRecord>,
    /// Sealed records still sealing, or whose file could not be written
    retired: Vec<LiveRecord>,
    stats: DriverStats,
}

impl<D: DisplaySink> IngestDriver<D> {
    pub fn new(ctx: Arc<SealContext>, receive_timeout: Duration, display: D) -> Self {
        Self {
            ctx,
            receive_timeout,
            display,
            current: None,
            retired: Vec::new(),
            stats: DriverStats::default(),
        }
    }

    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    /// The record currently receiving samples, if one has been started
    pub fn current(&self) -> Option<&LiveRecord> {
        self.current.as_ref()
    }

    fn retire_current(&mut self) {
        if let Some(record) = self.current.take() {
            self.retired.push(record);
        }
        // Unwritten records stay so their data can be retried
        self.retired
            .retain(|record| record.seal_report().map_or(true, |report| report.flush_failed()));
    }

    /// Retry the write of every sealed record whose flush failed
    ///
    /// Returns how many retries were started.
    pub fn retry_failed_flushes(&mut self) -> usize {
        let retried = self.retired.iter().filter(|record| record.retry_flush()).count();
        if retried > 0 {
            info!("Retrying write of {} sealed records", retried);
        }
        retried
    }

    /// Current record, replacing it first if it has sealed
    fn live_record(&mut self) -> &LiveRecord {
        if self.current.as_ref().is_some_and(|record| !record.is_live()) {
            self.retire_current();
        }

        let ctx = &self.ctx;
        let stats = &mut self.stats;
        self.current.get_or_insert_with(|| {
            stats.records += 1;
            debug!("Starting record #{}", stats.records);
            LiveRecord::new(Arc::clone(ctx))
        })
    }

    /// Ingest one peer message and refresh the display
    ///
    /// A malformed message force-seals the current record.
    ///
    /// # Errors
    ///
    /// Returns `MalformedMessage` for messages missing required keys.
    pub fn handle_sample(&mut self, message: &Value) -> Result<()> {
        let mut result = self.live_record().ingest(message);

        // The window may close between the liveness check and the ingest
        if matches!(result, Err(ArchiverError::RecordSealed)) {
            self.retire_current();
            result = self.live_record().ingest(message);
        }

        match result {
            Ok(()) => {
                self.stats.samples += 1;
                let text = self.live_record().latest_as_text();
                self.display.show(&text);
                Ok(())
            }
            Err(e) => {
                warn!("Rejected peer message, sealing current record: {}", e);
                self.stats.rejected += 1;
                self.seal_current();
                Err(e)
            }
        }
    }

    /// Seal the current record ahead of its window
    pub fn seal_current(&mut self) {
        if let Some(record) = &self.current {
            record.force_seal();
        }
        self.retire_current();
    }

    /// Consume peer events until the channel closes
    pub async fn run(&mut self, events: &mut mpsc::Receiver<PeerEvent>) {
        info!("Waiting for sensor samples");

        loop {
            match tokio::time::timeout(self.receive_timeout, events.recv()).await {
                Ok(Some(PeerEvent::Sample(message))) => {
                    // Already logged; a bad message never stops the loop
                    let _ = self.handle_sample(&message);
                }
                Ok(Some(PeerEvent::Disconnected)) => {
                    info!("Sensor peer disconnected, sealing current record");
                    self.seal_current();
                }
                Ok(None) => {
                    info!("Peer event channel closed");
                    self.seal_current();
                    break;
                }
                Err(_) => {
                    debug!("No sample within {:?}", self.receive_timeout);
                    self.retry_failed_flushes();
                }
            }
        }
    }

    /// Seal the current record and wait for every pending seal to finish
    ///
    /// A record whose file could not be written gets one more attempt. Returns
    /// the reports of records that were still sealing or unwritten.
    pub async fn shutdown(&mut self) -> Vec<SealReport> {
        self.seal_current();

        let mut reports = Vec::new();
        for record in self.retired.drain(..) {
            let mut report = record.wait_sealed().await;
            if report.flush_failed() && record.retry_flush() {
                report = record.wait_sealed().await;
            }
            if report.flush_failed() {
                error!("Sealed record of {} frames was never written", report.frames);
            }
            reports.push(report);
        }

        info!(
            "Driver stopped: {} samples, {} rejected, {} records",
            self.stats.samples, self.stats.rejected, self.stats.records
        );
        reports
    }
}

/// Forward newline-delimited JSON messages from `reader` as peer events
///
/// Blank lines are skipped and unparseable lines are logged and dropped. End
/// of input is reported as a disconnect.
pub async fn forward_json_lines<R>(reader: R, events: mpsc::Sender<PeerEvent>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match serde_json::from_str::<Value>(line) {
                    Ok(message) => {
                        if events.send(PeerEvent::Sample(message)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("Ignoring unparseable peer line: {}", e),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Peer input failed: {}", e);
                break;
            }
        }
    }

    let _ = events.send(PeerEvent::Disconnected).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::mocks::RecordingDisplay;
    use crate::display::{DisplaySettings, DisplayZone};
    use crate::store::LocalStore;
    use serde_json::json;
    use tempfile::TempDir;

    fn driver(base: &std::path::Path, lifespan: Duration) -> (IngestDriver<RecordingDisplay>, RecordingDisplay) {
        let ctx = Arc::new(SealContext::new(
            LocalStore::new(base, "outRecords", "inRecords"),
            None,
            DisplaySettings::new(DisplayZone::parse("utc").unwrap(), "%H:%M:%S").unwrap(),
            lifespan,
        ));
        let display = RecordingDisplay::default();
        (IngestDriver::new(ctx, Duration::from_millis(100), display.clone()), display)
    }

    fn sample(uva: f64) -> Value {
        json!({"sensor_data": {"uva": uva}, "sensor_units": {"uva": "%"}})
    }

    #[tokio::test]
    async fn test_sample_starts_record_and_updates_display() {
        let temp_dir = TempDir::new().unwrap();
        let (mut driver, display) = driver(temp_dir.path(), Duration::from_secs(60));

        assert!(driver.current().is_none());
        driver.handle_sample(&sample(1.5)).unwrap();
        driver.handle_sample(&sample(2.5)).unwrap();

        assert_eq!(driver.current().map(|r| r.len()), Some(2));
        assert_eq!(driver.stats().records, 1);

        let texts = display.texts();
        assert_eq!(texts.len(), 2);
        assert!(texts[1].ends_with("uva: 2.5 %"));
        driver.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_message_seals_and_next_sample_starts_fresh() {
        let temp_dir = TempDir::new().unwrap();
        let (mut driver, display) = driver(temp_dir.path(), Duration::from_secs(60));

        let err = driver.handle_sample(&json!({"sensor_units": {}}));
        assert!(matches!(err, Err(ArchiverError::MalformedMessage(_))));
        assert!(driver.current().is_none(), "Rejected message must seal the record");
        assert!(display.texts().is_empty());

        driver.handle_sample(&sample(2.0)).unwrap();
        assert_eq!(driver.stats().records, 2);
        assert_eq!(driver.stats().rejected, 1);
        assert_eq!(driver.current().map(|r| r.is_live()), Some(true));

        driver.shutdown().await;
        let store = LocalStore::new(temp_dir.path(), "outRecords", "inRecords");
        assert_eq!(store.list_pending_files().unwrap().len(), 1, "Empty record writes no file");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sealed_record_is_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let (mut driver, _) = driver(temp_dir.path(), Duration::from_secs(2));

        driver.handle_sample(&sample(1.0)).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        driver.handle_sample(&sample(2.0)).unwrap();

        assert_eq!(driver.stats().records, 2);
        assert_eq!(driver.current().map(|r| r.len()), Some(1));
        driver.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_until_channel_closes() {
        let temp_dir = TempDir::new().unwrap();
        let (mut driver, display) = driver(temp_dir.path(), Duration::from_secs(60));
        let (tx, mut rx) = mpsc::channel(8);

        tx.send(PeerEvent::Sample(sample(1.0))).await.unwrap();
        tx.send(PeerEvent::Sample(sample(2.0))).await.unwrap();
        tx.send(PeerEvent::Disconnected).await.unwrap();
        drop(tx);

        driver.run(&mut rx).await;
        driver.shutdown().await;

        assert_eq!(display.texts().len(), 2);
        assert_eq!(driver.stats().records, 1);
        assert!(driver.current().is_none());

        let store = LocalStore::new(temp_dir.path(), "outRecords", "inRecords");
        let paths = store.pending_paths().unwrap();
        assert_eq!(paths.len(), 1);
        let snapshot: crate::record::frame::RecordSnapshot =
            serde_json::from_str(&std::fs::read_to_string(&paths[0]).unwrap()).unwrap();
        assert_eq!(snapshot.sensor_data.len(), 2);
    }

    fn frames_on_disk(base: &std::path::Path) -> usize {
        LocalStore::new(base, "outRecords", "inRecords")
            .pending_paths()
            .unwrap()
            .iter()
            .map(|path| {
                let snapshot: crate::record::frame::RecordSnapshot =
                    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
                snapshot.sensor_data.len()
            })
            .sum()
    }

    #[tokio::test]
    async fn test_seal_then_ingest_keeps_every_frame() {
        let temp_dir = TempDir::new().unwrap();
        let (mut driver, _) = driver(temp_dir.path(), Duration::from_secs(60));

        driver.handle_sample(&sample(1.0)).unwrap();
        driver.seal_current();
        driver.handle_sample(&sample(2.0)).unwrap();

        let reports = driver.shutdown().await;
        assert!(reports.iter().all(|report| !report.flush_failed()));
        assert_eq!(frames_on_disk(temp_dir.path()), 2, "Every accepted sample must reach disk");
    }

    #[tokio::test]
    async fn test_unwritten_record_is_kept_and_retried() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("base");
        std::fs::write(&base, "").unwrap();
        let (mut driver, _) = driver(&base, Duration::from_secs(60));

        driver.handle_sample(&sample(1.0)).unwrap();
        driver.seal_current();
        assert!(driver.retired[0].wait_sealed().await.flush_failed());

        // Rotation must not drop the unwritten record
        driver.retire_current();
        assert_eq!(driver.retired.len(), 1);

        std::fs::remove_file(&base).unwrap();
        assert_eq!(driver.retry_failed_flushes(), 1);

        driver.shutdown().await;
        assert_eq!(frames_on_disk(&base), 1);
    }

    #[tokio::test]
    async fn test_forward_json_lines() {
        let input = b"{\"sensor_data\": {\"uva\": 1}, \"sensor_units\": {}}\n\nnot json\n[1]\n";
        let (tx, mut rx) = mpsc::channel(8);

        forward_json_lines(&input[..], tx).await;

        assert!(matches!(rx.recv().await, Some(PeerEvent::Sample(_))));
        assert_eq!(rx.recv().await, Some(PeerEvent::Sample(json!([1]))));
        assert_eq!(rx.recv().await, Some(PeerEvent::Disconnected));
        assert_eq!(rx.recv().await, None);
    }
}
