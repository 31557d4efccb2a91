//! # Telemetry Archiver Library
//!
//! Windowed records for sensor telemetry with local persistence and remote
//! archive shipping.
//!
//! Samples from a sensor peer accumulate in a live record for a fixed window.
//! When the window closes (or the peer drops) the record seals once, is written
//! to `outRecords/` as `record.<YYYYMMDDHHMMSS>.json`, and every pending file is
//! shipped to the archive host when it is reachable. Archived records can later
//! be pulled back by stamp range and assembled into one dataset.

pub mod archive;
pub mod config;
pub mod display;
pub mod driver;
pub mod error;
pub mod record;
pub mod store;
