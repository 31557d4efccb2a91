//! # Record Module
//!
//! Windowed telemetry records.
//!
//! This module handles:
//! - Parsing ingestion messages into timestamped sample frames
//! - Buffering frames in arrival order with a first-write-wins unit map
//! - The one-shot window timer that ends a record's live phase
//! - Sealing: flushing the record to disk and shipping pending files

pub mod accumulator;
pub mod frame;
pub mod live;
pub mod timer;

pub use accumulator::Accumulator;
pub use frame::{FieldValue, IngestMessage, RecordSnapshot, SampleFrame, UnitMap};
pub use live::{LiveRecord, SealContext, SealReport};
pub use timer::{TimerState, WindowTimer};
