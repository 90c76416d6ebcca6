//! The extraction protocol state machine.
//!
//! The engine drives this callback: it announces the total size, asks for
//! an output stream per item, pushes the item bytes, and reports a result
//! code per item. The callback owns all session policy — destination
//! resolution, overwrite conflicts, skip/cancel decisions, progress
//! accounting and failure collection — and degrades gracefully: any
//! per-item problem resolves to the discard sink so the remaining items
//! keep flowing.

use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use crate::engine::Abort;
use crate::engine::AskMode;
use crate::engine::CallbackResult;
use crate::engine::ExtractCallback;
use crate::engine::OperationResult;
use crate::entry::ArchiveEntry;
use crate::error::FailureKind;
use crate::error::ItemFailure;
use crate::events::ExtractEvents;
use crate::events::Flow;
use crate::events::ItemFlow;
use crate::events::OverwriteDecision;
use crate::events::ProgressMeter;
use crate::extract::path::sanitize_entry_name;
use crate::io::OutputSink;
use crate::report::ExtractionReport;

/// Where extracted bytes go.
pub(crate) enum OutputMode<'a> {
    /// Materialize items below a directory. `wanted` restricts which
    /// indexes produce output; items outside it (the solid-block padding)
    /// run against the discard sink without raising item events.
    Directory {
        /// Destination directory, already sanitized.
        dir: PathBuf,
        /// Requested indexes, `None` for all.
        wanted: Option<HashSet<u32>>,
    },
    /// Extract exactly one item into a caller stream.
    SingleStream {
        /// The index whose bytes reach the target.
        index: u32,
        /// Taken on first use.
        target: Option<&'a mut dyn Write>,
    },
    /// Decode and discard everything (integrity test).
    Test,
}

pub(crate) struct SessionCallback<'a> {
    entries: &'a [ArchiveEntry],
    events: &'a mut dyn ExtractEvents,
    mode: OutputMode<'a>,
    password: Option<String>,
    preserve_paths: bool,
    archive_file_name: Option<String>,
    planned_items: usize,
    meter: ProgressMeter,
    report: ExtractionReport,
    cancelled: bool,
    done_items: usize,
    current_index: u32,
    current_eventful: bool,
    current_counts: bool,
    sink: Option<OutputSink<'a>>,
}

impl<'a> SessionCallback<'a> {
    pub(crate) fn new(
        entries: &'a [ArchiveEntry],
        events: &'a mut dyn ExtractEvents,
        mode: OutputMode<'a>,
        password: Option<String>,
        preserve_paths: bool,
        archive_file_name: Option<String>,
    ) -> Self {
        let planned_items = match &mode {
            OutputMode::Directory { wanted: Some(w), .. } => w.len(),
            OutputMode::Directory { wanted: None, .. } | OutputMode::Test => entries.len(),
            OutputMode::SingleStream { .. } => 1,
        };

        Self {
            entries,
            events,
            mode,
            password,
            preserve_paths,
            archive_file_name,
            planned_items: planned_items.max(1),
            meter: ProgressMeter::new(),
            report: ExtractionReport::new(),
            cancelled: false,
            done_items: 0,
            current_index: 0,
            current_eventful: false,
            current_counts: false,
            sink: None,
        }
    }

    /// Final report; flags cooperative cancellation.
    pub(crate) fn into_report(mut self) -> ExtractionReport {
        self.report.cancelled = self.cancelled;
        self.report
    }

    pub(crate) const fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    fn percent_done(&self) -> u8 {
        ((self.done_items * 100 / self.planned_items).min(100)) as u8
    }

    /// Entry name with the fallbacks used when the archive metadata lacks
    /// one: a single-item archive reuses the archive's own file name with
    /// a `.tar` suffix (the common case is a compressed tarball whose
    /// inner name was never stored), anything else gets an indexed
    /// placeholder.
    fn resolve_name(&self, entry: &ArchiveEntry) -> String {
        if !entry.is_nameless() {
            return entry.path.clone();
        }

        if self.entries.len() == 1 {
            if let Some(file_name) = &self.archive_file_name {
                let base = file_name
                    .rfind('.')
                    .map_or(file_name.as_str(), |dot| &file_name[..dot]);
                let mut base = base.to_string();
                if !base.to_ascii_lowercase().ends_with(".tar") {
                    base.push_str(".tar");
                }
                return base;
            }
        }

        format!("[no name] {}", entry.index)
    }

    fn record_failure(&mut self, index: u32, path: Option<PathBuf>, kind: FailureKind) {
        log::warn!("item {index} failed: {kind}");
        self.report.failures.push(ItemFailure { index, path, kind });
    }

    /// Resolves the output for one directory-mode item. Any failure along
    /// the way is recorded and degraded to the discard sink; only caller
    /// cancellation aborts.
    fn open_directory_sink(&mut self, index: u32) -> CallbackResult<()> {
        let Some(entry) = self.entries.get(index as usize).cloned() else {
            return Ok(());
        };

        let OutputMode::Directory { dir, .. } = &self.mode else {
            return Ok(());
        };
        let dir = dir.clone();

        self.current_eventful = true;
        self.done_items += 1;
        let percent = self.percent_done();

        let name = self.resolve_name(&entry);
        let relative = if self.preserve_paths {
            sanitize_entry_name(&name)
        } else {
            let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name.as_str());
            sanitize_entry_name(file_name)
        };

        if relative.is_empty() {
            self.record_failure(
                index,
                None,
                FailureKind::Path("entry name is empty after sanitization".to_string()),
            );
            return Ok(());
        }

        let mut target = dir.join(relative);

        if entry.is_directory {
            match self.events.on_item_start(&entry, percent) {
                ItemFlow::Cancel => {
                    self.cancelled = true;
                    return Err(Abort);
                }
                ItemFlow::Skip => {
                    self.report.skipped += 1;
                    return Ok(());
                }
                ItemFlow::Continue => {}
            }

            if let Err(err) = std::fs::create_dir_all(&target) {
                self.record_failure(index, Some(target), FailureKind::Io(err.to_string()));
            } else {
                self.report.directories_created += 1;
            }
            // No bytes flow for a directory; the discard sink stands in.
            return Ok(());
        }

        let mut renamed_by_handler = false;
        if target.exists() {
            match self.events.on_overwrite(&target) {
                OverwriteDecision::Cancel => {
                    self.cancelled = true;
                    return Err(Abort);
                }
                OverwriteDecision::Skip => {
                    self.report.skipped += 1;
                    return Ok(());
                }
                OverwriteDecision::Rename(new_path) => {
                    target = new_path;
                    renamed_by_handler = true;
                }
                OverwriteDecision::Overwrite => {}
            }
        }

        match self.events.on_item_start(&entry, percent) {
            ItemFlow::Cancel => {
                self.cancelled = true;
                return Err(Abort);
            }
            ItemFlow::Skip => {
                self.report.skipped += 1;
                return Ok(());
            }
            ItemFlow::Continue => {}
        }

        if let Some(parent) = target.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                self.record_failure(index, Some(target), FailureKind::Io(err.to_string()));
                return Ok(());
            }
        }

        match File::create(&target) {
            Ok(file) => {
                self.sink = Some(OutputSink::File {
                    file,
                    path: target,
                    mtime: entry.modified,
                });
                self.current_counts = true;
            }
            Err(err) => {
                let kind = if renamed_by_handler {
                    FailureKind::Callback(format!(
                        "conflict handler chose an unusable path: {err}"
                    ))
                } else {
                    FailureKind::Io(err.to_string())
                };
                self.record_failure(index, Some(target), kind);
            }
        }

        Ok(())
    }
}

impl ExtractCallback for SessionCallback<'_> {
    fn set_total(&mut self, total: u64) {
        self.meter.set_total(total);
        self.events.on_open(total);
    }

    fn get_stream(&mut self, index: u32, mode: AskMode) -> CallbackResult<()> {
        if self.cancelled {
            return Err(Abort);
        }

        self.current_index = index;
        self.current_eventful = false;
        self.current_counts = false;
        self.sink = Some(OutputSink::Discard);

        if mode != AskMode::Extract {
            return Ok(());
        }

        match &mut self.mode {
            OutputMode::Test => Ok(()),
            OutputMode::SingleStream { index: wanted, target } => {
                if index == *wanted {
                    if let Some(stream) = target.take() {
                        self.sink = Some(OutputSink::Stream(stream));
                        self.current_eventful = true;
                        self.current_counts = true;
                        self.done_items += 1;
                    }
                }
                Ok(())
            }
            OutputMode::Directory { wanted, .. } => {
                if wanted.as_ref().is_some_and(|w| !w.contains(&index)) {
                    // Solid-block padding: decoded for position, never
                    // materialized, invisible to item events.
                    return Ok(());
                }
                self.open_directory_sink(index)
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> CallbackResult<usize> {
        let mut write_error = None;
        if let Some(sink) = &mut self.sink {
            let is_discard = sink.is_discard();
            match sink.write(data) {
                Ok(n) => {
                    if !is_discard {
                        self.report.bytes_written += n as u64;
                    }
                }
                Err(err) => write_error = Some(err.to_string()),
            }
        }

        if let Some(reason) = write_error {
            // Degrade this item to the discard sink; later items are
            // unaffected.
            self.sink = Some(OutputSink::Discard);
            self.current_counts = false;
            let index = self.current_index;
            self.record_failure(index, None, FailureKind::Io(reason));
        }

        if let Some((percent, delta)) = self.meter.advance(data.len() as u64) {
            self.events.on_progress(percent, delta);
        }
        Ok(data.len())
    }

    fn set_operation_result(&mut self, result: OperationResult) -> CallbackResult<()> {
        let sink = self.sink.take();
        let entry = self.entries.get(self.current_index as usize).cloned();

        if result == OperationResult::Ok {
            let counts = self.current_counts;
            if let Some(sink) = sink {
                match sink.finish() {
                    Ok(()) => {
                        if counts {
                            self.report.files_extracted += 1;
                        }
                    }
                    Err(err) => {
                        let index = self.current_index;
                        self.record_failure(index, None, FailureKind::Io(err.to_string()));
                    }
                }
            }

            if self.current_eventful {
                if let Some(entry) = entry {
                    let percent = self.percent_done();
                    if self.events.on_item_finished(&entry, percent) == Flow::Cancel {
                        self.cancelled = true;
                    }
                }
            }
        } else {
            let index = self.current_index;
            let path = entry.map(|e| PathBuf::from(e.path));
            self.record_failure(index, path, FailureKind::Engine(result));
        }

        Ok(())
    }

    fn password(&mut self) -> Option<String> {
        self.password.clone()
    }
}

/// Sanitized destination helper shared by the session entry points.
pub(crate) fn sanitize_destination(dir: &Path) -> PathBuf {
    PathBuf::from(super::path::sanitize_path(
        &dir.to_string_lossy(),
        true,
    ))
}
