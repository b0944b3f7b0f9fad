//! In-process shared frame region
//!
//! One buffer guarded by a mutex, a notification condition and an optional
//! producer timestamp. The writer half stands in for the external producer;
//! dropping it invalidates the region.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::source::{FrameAccess, FrameSource};
use crate::types::{FrameGeometry, Timestamp};
use crate::{RecorderError, Result};

struct RegionState {
    buffer: Vec<u8>,
    sequence: u64,
    timestamp: Option<Timestamp>,
    valid: bool,
}

struct Shared {
    name: String,
    geometry: FrameGeometry,
    state: Mutex<RegionState>,
    notify: Condvar,
}

/// Factory for in-process frame regions
pub struct MemoryRegion;

impl MemoryRegion {
    /// Create a region sized for one I420 frame and return its two halves
    pub fn create(name: impl Into<String>, geometry: FrameGeometry) -> (RegionWriter, RegionReader) {
        let name = name.into();
        debug!(name = %name, bytes = geometry.frame_size(), "Created frame region");

        let shared = Arc::new(Shared {
            name,
            geometry,
            state: Mutex::new(RegionState {
                buffer: vec![0; geometry.frame_size()],
                sequence: 0,
                timestamp: None,
                valid: true,
            }),
            notify: Condvar::new(),
        });

        let writer = RegionWriter { shared: Arc::clone(&shared) };
        let reader = RegionReader { shared, last_seen: 0, woke_at: Timestamp::default() };
        (writer, reader)
    }
}

/// Producer half of a [`MemoryRegion`]
pub struct RegionWriter {
    shared: Arc<Shared>,
}

impl RegionWriter {
    /// Overwrite the frame buffer and notify the reader
    ///
    /// Blocks while the reader holds exclusive access.
    pub fn publish(&self, frame: &[u8], timestamp: Option<Timestamp>) -> Result<()> {
        let expected = self.shared.geometry.frame_size();
        if frame.len() != expected {
            return Err(RecorderError::invalid_input(
                "frame",
                format!("{} bytes", frame.len()),
                format!("region '{}' holds frames of {} bytes", self.shared.name, expected),
            ));
        }

        let mut state = self.shared.state.lock();
        if !state.valid {
            return Err(RecorderError::source_invalidated(format!(
                "region '{}' was invalidated",
                self.shared.name
            )));
        }
        state.buffer.copy_from_slice(frame);
        state.timestamp = timestamp;
        state.sequence += 1;
        trace!(sequence = state.sequence, "Published frame");
        drop(state);

        self.shared.notify.notify_all();
        Ok(())
    }

    /// Number of frames published so far
    pub fn published(&self) -> u64 {
        self.shared.state.lock().sequence
    }

    /// Mark the region unusable and wake any waiting reader
    pub fn invalidate(&self) {
        let mut state = self.shared.state.lock();
        if state.valid {
            state.valid = false;
            debug!(name = %self.shared.name, "Frame region invalidated");
        }
        drop(state);
        self.shared.notify.notify_all();
    }
}

impl Drop for RegionWriter {
    fn drop(&mut self) {
        self.invalidate();
    }
}

/// Consumer half of a [`MemoryRegion`]
pub struct RegionReader {
    shared: Arc<Shared>,
    last_seen: u64,
    woke_at: Timestamp,
}

/// Exclusive view of the region's buffer
pub struct RegionAccess<'a> {
    state: MutexGuard<'a, RegionState>,
    woke_at: Timestamp,
}

impl FrameAccess for RegionAccess<'_> {
    fn data(&self) -> &[u8] {
        &self.state.buffer
    }

    fn capture_timestamp(&self) -> Timestamp {
        self.state.timestamp.unwrap_or(self.woke_at)
    }
}

impl FrameSource for RegionReader {
    type Access<'a> = RegionAccess<'a>;

    fn name(&self) -> &str {
        &self.shared.name
    }

    fn geometry(&self) -> FrameGeometry {
        self.shared.geometry
    }

    fn wait_for_frame(&mut self) -> Result<()> {
        let mut state = self.shared.state.lock();
        loop {
            if !state.valid {
                return Err(RecorderError::source_invalidated(format!(
                    "region '{}' is no longer valid",
                    self.shared.name
                )));
            }
            if state.sequence > self.last_seen {
                if state.sequence > self.last_seen + 1 {
                    debug!(skipped = state.sequence - self.last_seen - 1, "Frames overwritten before read");
                }
                self.last_seen = state.sequence;
                break;
            }
            self.shared.notify.wait(&mut state);
        }
        self.woke_at = Timestamp::now();
        Ok(())
    }

    fn begin_access(&mut self) -> Result<RegionAccess<'_>> {
        let state = self.shared.state.lock();
        if !state.valid {
            return Err(RecorderError::source_invalidated(format!(
                "region '{}' is no longer valid",
                self.shared.name
            )));
        }
        Ok(RegionAccess { state, woke_at: self.woke_at })
    }

    fn is_valid(&self) -> bool {
        self.shared.state.lock().valid
    }
}
