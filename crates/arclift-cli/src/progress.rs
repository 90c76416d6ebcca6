//! Progress bar wiring for archive operations.

use std::path::Path;

use arclift_core::ArchiveEntry;
use arclift_core::ExtractEvents;
use arclift_core::Flow;
use arclift_core::ItemFlow;
use arclift_core::OverwriteDecision;
use arclift_core::UpdateEvents;
use indicatif::ProgressBar;
use indicatif::ProgressStyle;

/// Event handler rendering a percentage bar and honoring `--force`.
pub struct CliProgress {
    bar: ProgressBar,
    force: bool,
    skipped_existing: usize,
}

impl CliProgress {
    pub fn new(quiet: bool, force: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(100);
            bar.set_style(
                ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        };

        Self {
            bar,
            force,
            skipped_existing: 0,
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    pub fn skipped_existing(&self) -> usize {
        self.skipped_existing
    }
}

impl ExtractEvents for CliProgress {
    fn on_item_start(&mut self, entry: &ArchiveEntry, _percent: u8) -> ItemFlow {
        self.bar.set_message(entry.file_name().to_string());
        ItemFlow::Continue
    }

    fn on_item_finished(&mut self, _entry: &ArchiveEntry, _percent: u8) -> Flow {
        Flow::Continue
    }

    fn on_progress(&mut self, percent: u8, _delta: u8) {
        self.bar.set_position(u64::from(percent));
    }

    fn on_overwrite(&mut self, path: &Path) -> OverwriteDecision {
        if self.force {
            OverwriteDecision::Overwrite
        } else {
            self.bar
                .println(format!("skipping existing file: {}", path.display()));
            self.skipped_existing += 1;
            OverwriteDecision::Skip
        }
    }
}

impl UpdateEvents for CliProgress {
    fn on_item_start(&mut self, name: &str, _percent: u8) -> Flow {
        self.bar.set_message(name.to_string());
        Flow::Continue
    }

    fn on_progress(&mut self, percent: u8, _delta: u8) {
        self.bar.set_position(u64::from(percent));
    }
}
