//! # Local Store Module
//!
//! Filesystem area for record files.
//!
//! This module handles:
//! - Writing sealed records into the pending-upload directory (`outRecords`)
//! - Listing pending files for the uploader
//! - Managing the staging directory (`inRecords`) that archive queries fetch into

pub mod naming;

use std::fs::{self, File};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{ArchiverError, Result};
use crate::record::frame::RecordSnapshot;
use self::naming::record_file_name;

/// Later stamps tried when a record name is already taken
const MAX_NAME_PROBES: u32 = 60;

const TEMP_PREFIX: &str = ".";
const TEMP_SUFFIX: &str = ".tmp";

/// In-progress name for `file_name`; never listed as pending
fn temp_name(file_name: &str) -> String {
    format!("{}{}{}", TEMP_PREFIX, file_name, TEMP_SUFFIX)
}

fn is_temp_name(file_name: &str) -> bool {
    file_name.starts_with(TEMP_PREFIX) && file_name.ends_with(TEMP_SUFFIX)
}

/// Pending-upload and staging directories under one base path
#[derive(Debug, Clone)]
pub struct LocalStore {
    pending_dir: PathBuf,
    staging_dir: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at `base`
    ///
    /// Directories are created lazily on first write.
    pub fn new<P: AsRef<Path>>(base: P, pending_dir: &str, staging_dir: &str) -> Self {
        let base = base.as_ref();
        Self {
            pending_dir: base.join(pending_dir),
            staging_dir: base.join(staging_dir),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(&config.base_dir, &config.pending_dir, &config.staging_dir)
    }

    pub fn pending_dir(&self) -> &Path {
        &self.pending_dir
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Names of regular files awaiting upload, sorted
    ///
    /// A missing directory means nothing is pending.
    pub fn list_pending_files(&self) -> Result<Vec<String>> {
        Ok(regular_files(&self.pending_dir)?
            .into_iter()
            .filter_map(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
            .collect())
    }

    /// Full paths of regular files awaiting upload, sorted
    pub fn pending_paths(&self) -> Result<Vec<PathBuf>> {
        regular_files(&self.pending_dir)
    }

    /// Full paths of regular files in the staging area, sorted by name
    pub fn staged_paths(&self) -> Result<Vec<PathBuf>> {
        regular_files(&self.staging_dir)
    }

    /// Delete every regular file in the staging area
    ///
    /// Subdirectories are left alone. Returns the number of files removed.
    pub fn clear_staging_area(&self) -> Result<usize> {
        let files = regular_files(&self.staging_dir)?;
        for path in &files {
            fs::remove_file(path)?;
        }
        debug!("Cleared {} staged files from {}", files.len(), self.staging_dir.display());
        Ok(files.len())
    }

    /// Persist a record snapshot as `file_name` in the pending directory
    ///
    /// The data goes to a hidden temp file first and only appears under
    /// `file_name` once fully written and synced, so listings never see a
    /// partial record. Never overwrites: an existing file with the same name
    /// is an error.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory or file cannot be created or written
    /// (`AlreadyExists` when the name is taken), `Json` if serialization fails.
    pub fn write_record(&self, snapshot: &RecordSnapshot, file_name: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.pending_dir)?;
        let path = self.pending_dir.join(file_name);
        let temp_path = self.pending_dir.join(temp_name(file_name));

        let published = write_synced(&temp_path, snapshot)
            .and_then(|()| fs::hard_link(&temp_path, &path).map_err(ArchiverError::from));

        if let Err(e) = fs::remove_file(&temp_path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove temp record {}: {}", temp_path.display(), e);
            }
        }

        published?;
        Ok(path)
    }

    /// Persist `snapshot` under the first free record name at or after `first_epoch`
    ///
    /// A taken name moves the stamp forward one second, so records whose first
    /// frames share a second still get distinct files.
    ///
    /// # Errors
    ///
    /// Returns the write error, or `AlreadyExists` if every probed name is taken.
    pub fn write_new_record(&self, snapshot: &RecordSnapshot, first_epoch: f64) -> Result<PathBuf> {
        for offset in 0..MAX_NAME_PROBES {
            let name = record_file_name(first_epoch + f64::from(offset));
            match self.write_record(snapshot, &name) {
                Err(ArchiverError::Io(e)) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("{} is taken, trying the next second", name);
                }
                other => return other,
            }
        }

        Err(ArchiverError::Io(io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free record name within {} s of the first frame", MAX_NAME_PROBES),
        )))
    }
}

fn write_synced(path: &Path, snapshot: &RecordSnapshot) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, snapshot)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Sorted regular files directly inside `dir`, minus temp files; empty if `dir` does not exist
fn regular_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() && !is_temp_name(&entry.file_name().to_string_lossy()) {
            files.push(entry.path());
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::frame::{FieldValue, SampleFrame, UnitMap};
    use indexmap::IndexMap;
    use tempfile::TempDir;

    fn snapshot() -> RecordSnapshot {
        let mut fields = IndexMap::new();
        fields.insert("uva".to_string(), FieldValue::from(1.2));
        let mut units = UnitMap::new();
        units.insert("uva".to_string(), "%".to_string());
        RecordSnapshot {
            sensor_data: vec![SampleFrame::new(fields, 1_700_000_000.0)],
            sensor_units: units,
        }
    }

    #[test]
    fn test_missing_dirs_list_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new(temp_dir.path(), "outRecords", "inRecords");

        assert!(store.list_pending_files().unwrap().is_empty());
        assert_eq!(store.clear_staging_area().unwrap(), 0);
    }

    #[test]
    fn test_write_record_creates_dirs_and_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new(temp_dir.path().join("nested"), "outRecords", "inRecords");

        let path = store.write_record(&snapshot(), "record.20231114221320.json").unwrap();
        assert!(path.starts_with(store.pending_dir()));

        let contents = fs::read_to_string(&path).unwrap();
        let parsed: RecordSnapshot = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed, snapshot());

        assert_eq!(store.list_pending_files().unwrap(), vec!["record.20231114221320.json"]);
    }

    #[test]
    fn test_write_record_never_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new(temp_dir.path(), "outRecords", "inRecords");

        store.write_record(&snapshot(), "record.20231114221320.json").unwrap();
        let err = store.write_record(&snapshot(), "record.20231114221320.json");
        assert!(err.is_err(), "Second write with the same name must fail");
    }

    #[test]
    fn test_write_record_leaves_no_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new(temp_dir.path(), "outRecords", "inRecords");

        store.write_record(&snapshot(), "record.20231114221320.json").unwrap();
        let _ = store.write_record(&snapshot(), "record.20231114221320.json");

        let names: Vec<String> = fs::read_dir(store.pending_dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["record.20231114221320.json"]);
    }

    #[test]
    fn test_list_pending_skips_in_progress_writes() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new(temp_dir.path(), "outRecords", "inRecords");

        fs::create_dir_all(store.pending_dir()).unwrap();
        fs::write(store.pending_dir().join(".record.20240101000000.json.tmp"), "{\"sensor_da").unwrap();
        fs::write(store.pending_dir().join("record.20240102000000.json"), "{}").unwrap();

        assert_eq!(store.list_pending_files().unwrap(), vec!["record.20240102000000.json"]);
        assert_eq!(store.pending_paths().unwrap().len(), 1);
    }

    #[test]
    fn test_write_new_record_moves_past_taken_names() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new(temp_dir.path(), "outRecords", "inRecords");
        let first = 1_700_000_000.25;

        let a = store.write_new_record(&snapshot(), first).unwrap();
        let b = store.write_new_record(&snapshot(), first + 0.5).unwrap();
        let c = store.write_new_record(&snapshot(), first).unwrap();

        let name = |p: &PathBuf| p.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name(&a), record_file_name(first));
        assert_eq!(name(&b), record_file_name(first + 1.0));
        assert_eq!(name(&c), record_file_name(first + 2.0));
        assert_eq!(store.list_pending_files().unwrap().len(), 3, "No record may be dropped on a name clash");
    }

    #[test]
    fn test_list_pending_skips_directories() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new(temp_dir.path(), "outRecords", "inRecords");

        fs::create_dir_all(store.pending_dir().join("subdir")).unwrap();
        fs::write(store.pending_dir().join("record.20240102000000.json"), "{}").unwrap();
        fs::write(store.pending_dir().join("record.20240101000000.json"), "{}").unwrap();

        assert_eq!(
            store.list_pending_files().unwrap(),
            vec!["record.20240101000000.json", "record.20240102000000.json"]
        );
    }

    #[test]
    fn test_clear_staging_area() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new(temp_dir.path(), "outRecords", "inRecords");

        fs::create_dir_all(store.staging_dir().join("keep")).unwrap();
        fs::write(store.staging_dir().join("a.json"), "{}").unwrap();
        fs::write(store.staging_dir().join("b.json"), "{}").unwrap();

        assert_eq!(store.clear_staging_area().unwrap(), 2);
        assert!(store.staged_paths().unwrap().is_empty());
        assert!(store.staging_dir().join("keep").is_dir());
    }
}
