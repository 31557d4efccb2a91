//! # Accumulator
//!
//! Append-only buffer of sample frames sharing one unit map.
//!
//! Frames are kept in arrival order. The unit map is captured from the first
//! append and never replaced afterwards.

use super::frame::{RecordSnapshot, SampleFrame, UnitMap};

/// Ordered frame buffer with a first-write-wins unit map
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    frames: Vec<SampleFrame>,
    units: Option<UnitMap>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame, capturing `units` only if none are set yet
    pub fn append(&mut self, frame: SampleFrame, units: UnitMap) {
        self.frames.push(frame);
        self.capture_units(units);
    }

    /// Append a frame without offering a unit map
    pub fn push_frame(&mut self, frame: SampleFrame) {
        self.frames.push(frame);
    }

    /// Set the unit map unless one is already set
    ///
    /// Returns `true` if `units` was taken.
    pub fn capture_units(&mut self, units: UnitMap) -> bool {
        if self.units.is_some() {
            return false;
        }
        self.units = Some(units);
        true
    }

    /// Snapshot of the buffered data in archive-file layout
    ///
    /// Returns `None` when there is nothing to persist: no frames yet, or no
    /// unit map captured.
    #[must_use]
    pub fn snapshot(&self) -> Option<RecordSnapshot> {
        if self.frames.is_empty() {
            return None;
        }

        let units = self.units.as_ref()?;
        Some(RecordSnapshot {
            sensor_data: self.frames.clone(),
            sensor_units: units.clone(),
        })
    }

    /// Most recently appended frame
    pub fn latest(&self) -> Option<&SampleFrame> {
        self.frames.last()
    }

    /// Captured unit map, if any frame has been appended
    pub fn units(&self) -> Option<&UnitMap> {
        self.units.as_ref()
    }

    pub fn frames(&self) -> &[SampleFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
