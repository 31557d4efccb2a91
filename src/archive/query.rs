//! # Archive Query
//!
//! Pulls record files for a stamp range from the archive host into the staging
//! area and assembles them into one dataset.
//!
//! Files are read in name order, which is chronological order. Unreadable or
//! corrupt files are logged and skipped; the query itself only fails when the
//! range is invalid or the remote listing cannot be obtained.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::client::{validate_range, RemoteArchiveClient};
use crate::display::DisplaySettings;
use crate::error::Result;
use crate::record::accumulator::Accumulator;
use crate::record::frame::{FieldValue, SampleFrame, UnitMap};
use crate::store::LocalStore;

/// Archive file layout as read back; both keys tolerated missing
#[derive(Debug, Deserialize)]
struct ArchiveFileContents {
    #[serde(default)]
    sensor_data: Vec<SampleFrame>,
    #[serde(default)]
    sensor_units: Option<UnitMap>,
}

/// One frame of an assembled dataset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetFrame {
    /// Timestamp rendered in the display timezone and format
    pub timestamp: String,
    /// Raw epoch seconds
    pub epoch: f64,
    #[serde(flatten)]
    pub fields: indexmap::IndexMap<String, FieldValue>,
}

/// Contiguous frames from a set of archive files
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ArchiveDataset {
    pub frames: Vec<DatasetFrame>,
    /// Units of the first file that defines them; `None` if no file did
    pub units: Option<UnitMap>,
    /// Files that contributed frames, in read order
    pub files: Vec<PathBuf>,
}

impl ArchiveDataset {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }
}

/// Assembles archive datasets for stamp ranges
#[derive(Debug, Clone)]
pub struct ArchiveAssembler {
    client: RemoteArchiveClient,
    store: LocalStore,
    display: DisplaySettings,
}

impl ArchiveAssembler {
    pub fn new(client: RemoteArchiveClient, store: LocalStore, display: DisplaySettings) -> Self {
        Self {
            client,
            store,
            display,
        }
    }

    /// Fetch and assemble all records with stamps in `[start, end]`
    ///
    /// The staging area is cleared first so the dataset holds exactly this
    /// query's files.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTimestamp` for malformed bounds, or an error if the
    /// staging area cannot be cleared or the remote listing fails. Individual
    /// file failures are skipped.
    pub async fn query(&self, start: &str, end: &str) -> Result<ArchiveDataset> {
        validate_range(start, end)?;

        self.store.clear_staging_area()?;
        let remote_paths = self.client.list_matching(start, end).await?;

        let outcomes = self.client.fetch(&remote_paths, self.store.staging_dir()).await;
        let fetched = outcomes.iter().filter(|outcome| outcome.result.is_ok()).count();
        info!(
            "Fetched {}/{} archive files for [{}, {}]",
            fetched,
            remote_paths.len(),
            start,
            end
        );

        let staged = self.store.staged_paths()?;
        Ok(assemble(&staged, &self.display))
    }
}

/// Concatenate archive files in sorted name order
///
/// Units come from the first file that has them. Every timestamp is rendered
/// with `display`.
pub fn assemble(paths: &[PathBuf], display: &DisplaySettings) -> ArchiveDataset {
    let mut sorted: Vec<&PathBuf> = paths.iter().collect();
    sorted.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut accumulator = Accumulator::new();
    let mut files = Vec::new();

    for path in sorted {
        let contents = match read_archive_file(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Skipping archive file {}: {}", path.display(), e);
                continue;
            }
        };

        if let Some(units) = contents.sensor_units.filter(|units| !units.is_empty()) {
            accumulator.capture_units(units);
        }
        for frame in contents.sensor_data {
            accumulator.push_frame(frame);
        }
        files.push(path.clone());
    }

    let frames = accumulator
        .frames()
        .iter()
        .map(|frame| DatasetFrame {
            timestamp: display.format_timestamp(frame.timestamp),
            epoch: frame.timestamp,
            fields: frame.fields.clone(),
        })
        .collect();

    ArchiveDataset {
        frames,
        units: accumulator.units().cloned(),
        files,
    }
}

fn read_archive_file(path: &Path) -> Result<ArchiveFileContents> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
