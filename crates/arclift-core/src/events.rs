//! The event surface exposed to callers during archive operations.
//!
//! Sessions are synchronous; events are plain trait calls on the caller's
//! handler, and the handler's return values are the cancellation and
//! conflict-resolution channel. Cooperative cancellation works by
//! returning a stop decision here — the session relays it to the engine at
//! the next callback boundary instead of interrupting native code.

use std::path::Path;
use std::path::PathBuf;

use crate::entry::ArchiveEntry;

/// Decision returned when an item is about to be processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemFlow {
    /// Process the item.
    Continue,
    /// Skip this item, keep going with the rest.
    Skip,
    /// Stop the whole operation.
    Cancel,
}

/// Decision returned after an item finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep going.
    Continue,
    /// Stop the whole operation.
    Cancel,
}

/// Decision returned when an extraction target already exists on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverwriteDecision {
    /// Replace the existing file.
    Overwrite,
    /// Extract to a different path instead.
    Rename(PathBuf),
    /// Leave the existing file alone and discard the item's bytes.
    Skip,
    /// Stop the whole operation.
    Cancel,
}

/// Events raised while unpacking. Every method has a neutral default, so
/// handlers implement only what they care about.
pub trait ExtractEvents {
    /// The archive was opened and the engine announced the total
    /// uncompressed size.
    fn on_open(&mut self, total_bytes: u64) {
        let _ = total_bytes;
    }

    /// An item is about to be unpacked. `percent_done` counts items, not
    /// bytes.
    fn on_item_start(&mut self, entry: &ArchiveEntry, percent_done: u8) -> ItemFlow {
        let _ = (entry, percent_done);
        ItemFlow::Continue
    }

    /// An item finished successfully.
    fn on_item_finished(&mut self, entry: &ArchiveEntry, percent_done: u8) -> Flow {
        let _ = (entry, percent_done);
        Flow::Continue
    }

    /// Byte progress crossed a whole-percent boundary.
    fn on_progress(&mut self, percent: u8, delta: u8) {
        let _ = (percent, delta);
    }

    /// The extraction target already exists.
    fn on_overwrite(&mut self, path: &Path) -> OverwriteDecision {
        let _ = path;
        OverwriteDecision::Overwrite
    }
}

/// Events raised while packing.
pub trait UpdateEvents {
    /// An item is about to be read and compressed.
    fn on_item_start(&mut self, name: &str, percent_done: u8) -> Flow {
        let _ = (name, percent_done);
        Flow::Continue
    }

    /// The current item was compressed.
    fn on_item_finished(&mut self) {}

    /// Byte progress crossed a whole-percent boundary.
    fn on_progress(&mut self, percent: u8, delta: u8) {
        let _ = (percent, delta);
    }
}

/// Handler that ignores every event.
#[derive(Debug, Default)]
pub struct NoopEvents;

impl ExtractEvents for NoopEvents {}
impl UpdateEvents for NoopEvents {}

/// Whole-percent progress accounting over a byte total.
///
/// Emits only when the percentage crosses a new whole boundary, carrying
/// both the absolute percentage and the delta since the last emission. A
/// value that would exceed 100 resets the accounting — the engine's byte
/// reporting rounds optimistically for some formats, and a clamp beats a
/// panicking subtraction.
#[derive(Debug, Default)]
pub struct ProgressMeter {
    total: u64,
    counted: u64,
    reported: u64,
}

impl ProgressMeter {
    /// A meter with no total yet; [`ProgressMeter::advance`] stays silent
    /// until one is set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the denominator announced by the engine.
    pub fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    /// The denominator currently in effect.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.total
    }

    /// Accounts `bytes` and returns `(percent, delta)` when a new whole
    /// percentage was crossed.
    pub fn advance(&mut self, bytes: u64) -> Option<(u8, u8)> {
        if self.total == 0 {
            return None;
        }

        let before = self.reported * 100 / self.total;
        self.counted += bytes;
        let now = self.counted * 100 / self.total;

        if now > 100 {
            self.counted = 0;
            self.reported = 0;
            return None;
        }

        if now > before {
            self.reported = self.counted;
            Some((now as u8, (now - before) as u8))
        } else {
            None
        }
    }
}
