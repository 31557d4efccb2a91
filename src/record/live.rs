//! # Live Record
//!
//! A record accepts samples for one window and then seals exactly once.
//!
//! ## Lifecycle
//!
//! ```text
//! Live --(window timer fires)----> Sealed --> flush to disk --> ship pending files
//!      \--(force_seal on disconnect)--/
//! ```
//!
//! The phase and the accumulator share one lock, so an ingest can never
//! interleave with the seal transition and nothing is accepted once sealed.
//! The seal work (flush, reachability probe, upload) runs on a background task
//! and never propagates errors; outcomes are logged and kept in a
//! [`SealReport`]. A record whose file could not be written keeps its data and
//! can retry with [`LiveRecord::retry_flush`].
//!
//! Writes into the pending area and shipping out of it are serialized per
//! [`SealContext`], so one batch never picks up a file another seal is writing.

use parking_lot::Mutex;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

use super::accumulator::Accumulator;
use super::frame::{IngestMessage, RecordSnapshot};
use super::timer::WindowTimer;
use crate::archive::client::RemoteArchiveClient;
use crate::config::Config;
use crate::display::{format_latest, DisplaySettings, NO_DATA_TEXT};
use crate::error::{ArchiverError, Result};
use crate::store::LocalStore;

/// Seconds since the Unix epoch, as stamped on ingested frames
pub fn now_epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// What happened when a record sealed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SealReport {
    /// Frames the record held when it sealed
    pub frames: usize,
    /// Archive file written, if any
    pub file: Option<PathBuf>,
    /// Set when data existed but could not be written
    pub flush_error: Option<String>,
    /// Pending files shipped to the archive host
    pub uploaded: usize,
    /// Set when shipping was attempted and failed or the host was unreachable
    pub upload_error: Option<String>,
}

impl SealReport {
    /// Data was present but the archive file was not written
    pub fn flush_failed(&self) -> bool {
        self.flush_error.is_some()
    }
}

/// Everything a record needs to seal: where to write, where to ship, how to render
#[derive(Debug)]
pub struct SealContext {
    store: LocalStore,
    archive: Option<RemoteArchiveClient>,
    display: DisplaySettings,
    lifespan: Duration,
    /// Held while writing into or shipping out of the pending area
    pending_lock: AsyncMutex<()>,
}

impl SealContext {
    pub fn new(
        store: LocalStore,
        archive: Option<RemoteArchiveClient>,
        display: DisplaySettings,
        lifespan: Duration,
    ) -> Self {
        Self {
            store,
            archive,
            display,
            lifespan,
            pending_lock: AsyncMutex::new(()),
        }
    }

    /// Build the store, optional archive client and display settings from config
    ///
    /// # Errors
    ///
    /// Returns `Config` if the display section does not parse
    pub fn from_config(config: &Config) -> Result<Self> {
        let archive = config
            .archive
            .enabled
            .then(|| RemoteArchiveClient::from_config(&config.archive));

        Ok(Self::new(
            LocalStore::from_config(&config.store),
            archive,
            config.display_settings()?,
            config.lifespan(),
        ))
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn lifespan(&self) -> Duration {
        self.lifespan
    }

    pub fn display(&self) -> &DisplaySettings {
        &self.display
    }

    /// Flush `snapshot` (if any) and then ship every pending file
    async fn seal(&self, snapshot: Option<RecordSnapshot>) -> SealReport {
        let mut report = SealReport::default();

        match snapshot {
            None => debug!("Sealed record holds no data, nothing to write"),
            Some(snapshot) => {
                report.frames = snapshot.sensor_data.len();
                match self.flush(snapshot).await {
                    Ok(path) => {
                        info!("Wrote {} frames to {}", report.frames, path.display());
                        report.file = Some(path);
                    }
                    Err(e) => {
                        error!("Failed to write sealed record: {}", e);
                        report.flush_error = Some(e.to_string());
                    }
                }
            }
        }

        if self.archive.is_some() {
            match self.ship_pending().await {
                Ok(uploaded) => report.uploaded = uploaded,
                Err(e) => {
                    warn!("Pending records stay local: {}", e);
                    report.upload_error = Some(e.to_string());
                }
            }
        }

        report
    }

    async fn flush(&self, snapshot: RecordSnapshot) -> Result<PathBuf> {
        let first = snapshot.first_timestamp().unwrap_or_else(now_epoch_secs);
        let store = self.store.clone();

        let _pending = self.pending_lock.lock().await;
        tokio::task::spawn_blocking(move || store.write_new_record(&snapshot, first))
            .await
            .map_err(|e| ArchiverError::Io(std::io::Error::other(e.to_string())))?
    }

    /// Upload every pending file if the archive host answers
    ///
    /// Only one call ships at a time; a second caller waits and then sees
    /// whatever the first left behind. Returns the number of files shipped;
    /// `Ok(0)` when archiving is off or nothing is pending.
    ///
    /// # Errors
    ///
    /// Returns `Remote` if the host is unreachable, or the listing/upload error.
    pub async fn ship_pending(&self) -> Result<usize> {
        let Some(client) = &self.archive else {
            return Ok(0);
        };

        let _pending = self.pending_lock.lock().await;
        if !client.is_reachable().await {
            return Err(ArchiverError::Remote("archive host unreachable".to_string()));
        }

        let pending = self.store.pending_paths()?;
        if pending.is_empty() {
            return Ok(0);
        }

        client.upload(&pending).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Live,
    Sealed,
}

#[derive(Debug)]
struct RecordState {
    phase: Phase,
    accumulator: Accumulator,
}

#[derive(Debug)]
struct RecordShared {
    state: Mutex<RecordState>,
    report: watch::Sender<Option<SealReport>>,
    ctx: Arc<SealContext>,
}

impl RecordShared {
    /// Move to `Sealed`; only the first caller gets `Some(snapshot)`
    fn close(&self) -> Option<Option<RecordSnapshot>> {
        let mut state = self.state.lock();
        if state.phase == Phase::Sealed {
            return None;
        }
        state.phase = Phase::Sealed;
        Some(state.accumulator.snapshot())
    }

    async fn finish(&self, snapshot: Option<RecordSnapshot>) {
        let report = self.ctx.seal(snapshot).await;
        self.report.send_replace(Some(report));
    }
}

/// One window of telemetry: live until its timer fires or it is force-sealed
#[derive(Debug)]
pub struct LiveRecord {
    shared: Arc<RecordShared>,
    timer: WindowTimer,
}

impl LiveRecord {
    /// Start a new live record and arm its window timer
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(ctx: Arc<SealContext>) -> Self {
        let (report, _) = watch::channel(None);
        let lifespan = ctx.lifespan();
        let shared = Arc::new(RecordShared {
            state: Mutex::new(RecordState {
                phase: Phase::Live,
                accumulator: Accumulator::new(),
            }),
            report,
            ctx,
        });

        let timer_shared = Arc::clone(&shared);
        let timer = WindowTimer::arm(lifespan, move || async move {
            if let Some(snapshot) = timer_shared.close() {
                info!("Record window of {:?} elapsed, sealing", lifespan);
                timer_shared.finish(snapshot).await;
            }
        });

        debug!("Started live record with lifespan {:?}", lifespan);
        Self { shared, timer }
    }

    /// Add one ingestion message to the record
    ///
    /// The frame is stamped with the current time.
    ///
    /// # Errors
    ///
    /// - `MalformedMessage` if `sensor_data` or `sensor_units` is missing
    /// - `RecordSealed` if the record no longer accepts samples
    pub fn ingest(&self, message: &Value) -> Result<()> {
        let message = IngestMessage::from_value(message)?;

        let mut state = self.shared.state.lock();
        if state.phase != Phase::Live {
            return Err(ArchiverError::RecordSealed);
        }

        let (frame, units) = message.into_frame(now_epoch_secs());
        state.accumulator.append(frame, units);
        Ok(())
    }

    /// Seal now, ahead of the timer
    ///
    /// No ingest is accepted once this returns. The flush and upload run in
    /// the background; use [`LiveRecord::wait_sealed`] to await them. Returns
    /// `false` if the record was already sealed.
    pub fn force_seal(&self) -> bool {
        self.timer.cancel();

        let Some(snapshot) = self.shared.close() else {
            return false;
        };

        info!("Force-sealing record early");
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            shared.finish(snapshot).await;
        });
        true
    }

    /// Write the sealed data again after a failed flush
    ///
    /// Runs in the background like the original seal; [`LiveRecord::wait_sealed`]
    /// waits for the new attempt. Returns `false` unless the record sealed,
    /// finished its seal work and failed to write its file.
    pub fn retry_flush(&self) -> bool {
        if !self.seal_report().is_some_and(|report| report.flush_failed()) {
            return false;
        }

        let snapshot = self.shared.state.lock().accumulator.snapshot();
        self.shared.report.send_replace(None);

        info!("Retrying write of sealed record");
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            shared.finish(snapshot).await;
        });
        true
    }

    pub fn is_live(&self) -> bool {
        self.shared.state.lock().phase == Phase::Live
    }

    /// Number of frames ingested so far
    pub fn len(&self) -> usize {
        self.shared.state.lock().accumulator.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Latest frame with units as display text, or "No data available"
    pub fn latest_as_text(&self) -> String {
        let state = self.shared.state.lock();
        match state.accumulator.latest() {
            Some(frame) => format_latest(frame, state.accumulator.units(), self.shared.ctx.display()),
            None => NO_DATA_TEXT.to_string(),
        }
    }

    /// Outcome of the seal, once the background work has finished
    pub fn seal_report(&self) -> Option<SealReport> {
        self.shared.report.borrow().clone()
    }

    /// Wait until the record has sealed and its seal work has finished
    pub async fn wait_sealed(&self) -> SealReport {
        let mut rx = self.shared.report.subscribe();
        loop {
            if let Some(report) = rx.borrow_and_update().clone() {
                return report;
            }
            // The sender lives as long as `self`, so this only fails on teardown
            if rx.changed().await.is_err() {
                return SealReport::default();
            }
        }
    }
}
