//! Archive opening and extraction sessions.

mod callback;
mod path;

use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use crate::engine::EngineError;
use crate::engine::InArchive;
use crate::engine::ItemProp;
use crate::engine::PropValue;
use crate::engine::SourceStream;
use crate::engine::registry;
use crate::engine::registry::EngineRegistry;
use crate::engine::registry::UserId;
use crate::entry::ArchiveEntry;
use crate::error::ArchiveError;
use crate::error::Result;
use crate::events::ExtractEvents;
use crate::events::NoopEvents;
use crate::formats::ArchiveFormat;
use crate::formats::SniffResult;
use crate::formats::sniff_format;
use crate::io::MultiVolumeReader;
use crate::io::OffsetStream;
use crate::report::ExtractionReport;

use callback::OutputMode;
use callback::SessionCallback;
use callback::sanitize_destination;

/// Options for opening an archive.
#[derive(Debug)]
pub struct ReaderOptions {
    /// Password for encrypted archives.
    pub password: Option<String>,
    /// Keep entry directory structure below the destination. When off,
    /// every item lands flat under the destination by file name.
    pub preserve_paths: bool,
    /// Skip signature sniffing and force a format.
    pub format_hint: Option<ArchiveFormat>,
}

impl ReaderOptions {
    /// Default options: no password, structure preserved, format sniffed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            password: None,
            preserve_paths: true,
            format_hint: None,
        }
    }

    /// Sets the archive password.
    #[must_use]
    pub fn password<S: Into<String>>(mut self, password: S) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Forces a format instead of sniffing.
    #[must_use]
    pub const fn format(mut self, format: ArchiveFormat) -> Self {
        self.format_hint = Some(format);
        self
    }

    /// Extract items flat, without their directory structure.
    #[must_use]
    pub const fn flatten(mut self) -> Self {
        self.preserve_paths = false;
        self
    }
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// An opened archive: enumerated entries plus the extraction operations.
///
/// Opening sniffs the format, acquires a per-format engine instance from
/// the registry, opens the archive and sweeps the entry metadata. The
/// session owns its engine instance exclusively; dropping the reader
/// closes the archive and returns the registry reference, in that order.
pub struct ArchiveReader {
    registry: &'static EngineRegistry,
    user: UserId,
    format: ArchiveFormat,
    start_offset: u64,
    is_sfx: bool,
    is_solid: bool,
    archive: Option<Box<dyn InArchive>>,
    entries: Vec<ArchiveEntry>,
    password: Option<String>,
    preserve_paths: bool,
    archive_file_name: Option<String>,
    volume_paths: Vec<PathBuf>,
}

impl ArchiveReader {
    /// Opens the archive at `path` with default options.
    ///
    /// A path ending in a `.001`-style suffix opens the whole volume set.
    ///
    /// # Errors
    ///
    /// Structural failures only: I/O, no recognizable signature, no engine
    /// handler for the format, or an archive that will not open.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, ReaderOptions::new())
    }

    /// Opens the archive at `path`.
    ///
    /// # Errors
    ///
    /// See [`ArchiveReader::open`].
    pub fn open_with<P: AsRef<Path>>(path: P, options: ReaderOptions) -> Result<Self> {
        Self::open_in(registry::global(), path, options)
    }

    /// Opens the archive at `path` against a specific registry.
    ///
    /// # Errors
    ///
    /// See [`ArchiveReader::open`].
    pub fn open_in<P: AsRef<Path>>(
        registry: &'static EngineRegistry,
        path: P,
        options: ReaderOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;

        let sniffed = match options.format_hint {
            Some(format) => SniffResult {
                format,
                offset: 0,
                is_sfx: false,
            },
            None => sniff_format(&mut file)?,
        };

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());

        let mut volume_paths = Vec::new();
        let source: Box<dyn SourceStream> = if is_first_volume(path) {
            let reader = MultiVolumeReader::open(path)?;
            volume_paths = reader.volume_paths();
            Box::new(reader)
        } else {
            Box::new(OffsetStream::new(file, sniffed.offset)?)
        };

        Self::finish_open(registry, source, sniffed, options, file_name, volume_paths)
    }

    /// Opens an archive from a seekable stream.
    ///
    /// # Errors
    ///
    /// See [`ArchiveReader::open`]; sources shorter than the signature
    /// window are rejected before any engine work.
    pub fn open_stream(stream: Box<dyn SourceStream>, options: ReaderOptions) -> Result<Self> {
        Self::open_stream_in(registry::global(), stream, options)
    }

    /// Opens an archive from a seekable stream against a specific
    /// registry.
    ///
    /// # Errors
    ///
    /// See [`ArchiveReader::open_stream`].
    pub fn open_stream_in(
        registry: &'static EngineRegistry,
        mut stream: Box<dyn SourceStream>,
        options: ReaderOptions,
    ) -> Result<Self> {
        let sniffed = match options.format_hint {
            Some(format) => SniffResult {
                format,
                offset: 0,
                is_sfx: false,
            },
            None => sniff_format(&mut stream)?,
        };

        let source: Box<dyn SourceStream> = Box::new(OffsetStream::new(stream, sniffed.offset)?);
        Self::finish_open(registry, source, sniffed, options, None, Vec::new())
    }

    fn finish_open(
        registry: &'static EngineRegistry,
        source: Box<dyn SourceStream>,
        sniffed: SniffResult,
        options: ReaderOptions,
        archive_file_name: Option<String>,
        volume_paths: Vec<PathBuf>,
    ) -> Result<Self> {
        let user = UserId::next();
        let mut archive = registry.acquire_reader(user, sniffed.format)?;

        if let Err(err) = archive.open(source, options.password.as_deref()) {
            drop(archive);
            registry.release_reader(user, sniffed.format);
            return Err(err);
        }

        let count = archive.item_count();
        let entries: Vec<ArchiveEntry> = (0..count)
            .map(|index| ArchiveEntry::read(&mut *archive, index))
            .collect();

        // Formats that do not report the solid property are assumed solid,
        // except zip, whose entries are always independent.
        let is_solid = match archive.archive_property(ItemProp::Solid) {
            PropValue::Bool(solid) => solid,
            _ => sniffed.format != ArchiveFormat::Zip,
        };

        log::debug!(
            "opened {} archive ({count} items, solid: {is_solid}, offset: {})",
            sniffed.format,
            sniffed.offset
        );

        Ok(Self {
            registry,
            user,
            format: sniffed.format,
            start_offset: sniffed.offset,
            is_sfx: sniffed.is_sfx,
            is_solid,
            archive: Some(archive),
            entries,
            password: options.password,
            preserve_paths: options.preserve_paths,
            archive_file_name,
            volume_paths,
        })
    }

    /// The sniffed (or forced) archive format.
    #[must_use]
    pub const fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// Byte offset the archive starts at (nonzero behind an SFX stub).
    #[must_use]
    pub const fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Whether the archive sits behind an executable wrapper.
    #[must_use]
    pub const fn is_sfx(&self) -> bool {
        self.is_sfx
    }

    /// Whether entries are compressed into solid blocks.
    #[must_use]
    pub const fn is_solid(&self) -> bool {
        self.is_solid
    }

    /// The enumerated entries. Stale after [`ArchiveReader::close`].
    #[must_use]
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Volume files backing this archive, empty for single-file archives.
    #[must_use]
    pub fn volume_paths(&self) -> &[PathBuf] {
        &self.volume_paths
    }

    /// Extracts every item below `dir`.
    ///
    /// Per-item failures accumulate on the report instead of aborting.
    ///
    /// # Errors
    ///
    /// Structural failures only; see [`ArchiveReader::open`] plus
    /// [`ArchiveError::OperationFailed`].
    pub fn extract_to_dir<P: AsRef<Path>>(
        &mut self,
        dir: P,
        events: &mut dyn ExtractEvents,
    ) -> Result<ExtractionReport> {
        self.run_directory(dir.as_ref(), None, events)
    }

    /// Extracts the items at `indexes` below `dir`.
    ///
    /// For solid archives the engine is handed every index up to the
    /// highest requested one — solid blocks decode sequentially — but only
    /// the requested items are materialized.
    ///
    /// # Errors
    ///
    /// [`ArchiveError::InvalidParameter`] for an out-of-range index, plus
    /// the structural failures of [`ArchiveReader::extract_to_dir`].
    pub fn extract_indexes<P: AsRef<Path>>(
        &mut self,
        dir: P,
        indexes: &[u32],
        events: &mut dyn ExtractEvents,
    ) -> Result<ExtractionReport> {
        let count = self.entries.len() as u32;
        if let Some(bad) = indexes.iter().find(|&&index| index >= count) {
            return Err(ArchiveError::InvalidParameter {
                name: "indexes".to_string(),
                reason: format!("index {bad} is outside the archive ({count} items)"),
            });
        }

        let mut sorted = indexes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        self.run_directory(dir.as_ref(), Some(sorted), events)
    }

    /// Extracts the single item at `index` into `target`.
    ///
    /// # Errors
    ///
    /// [`ArchiveError::InvalidParameter`] for an out-of-range index, plus
    /// the structural failures of [`ArchiveReader::extract_to_dir`].
    pub fn extract_to_stream(
        &mut self,
        index: u32,
        target: &mut dyn Write,
        events: &mut dyn ExtractEvents,
    ) -> Result<ExtractionReport> {
        let count = self.entries.len() as u32;
        if index >= count {
            return Err(ArchiveError::InvalidParameter {
                name: "index".to_string(),
                reason: format!("index {index} is outside the archive ({count} items)"),
            });
        }

        let mut indexes = vec![index];
        let method = &self.entries[index as usize].method;
        if self.is_solid && !method.eq_ignore_ascii_case("copy") {
            indexes = solid_indexes(&indexes);
        }

        let mode = OutputMode::SingleStream {
            index,
            target: Some(target),
        };
        self.run(Some(indexes), false, mode, events)
    }

    /// Extracts the entry named `name` into `target`.
    ///
    /// # Errors
    ///
    /// [`ArchiveError::EntryNotFound`] when no non-directory entry has
    /// that path, plus the failures of [`ArchiveReader::extract_to_stream`].
    pub fn extract_file(
        &mut self,
        name: &str,
        target: &mut dyn Write,
        events: &mut dyn ExtractEvents,
    ) -> Result<ExtractionReport> {
        let index = self
            .entries
            .iter()
            .find(|entry| entry.path == name && !entry.is_directory)
            .map(|entry| entry.index)
            .ok_or_else(|| ArchiveError::EntryNotFound {
                name: name.to_string(),
            })?;
        self.extract_to_stream(index, target, events)
    }

    /// Runs an integrity test over every item without producing output.
    ///
    /// # Errors
    ///
    /// Structural failures only; damaged items make the result `false`,
    /// not an error.
    pub fn verify(&mut self) -> Result<bool> {
        let mut events = NoopEvents;
        match self.run(None, true, OutputMode::Test, &mut events) {
            Ok(report) => Ok(report.failures.is_empty() && !report.cancelled),
            Err(ArchiveError::OperationFailed { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Closes the archive and returns the engine reference. Idempotent;
    /// also runs on drop.
    pub fn close(&mut self) {
        if let Some(mut archive) = self.archive.take() {
            // Disposal order matters: the handle closes (and with it the
            // source stream), the instance drops, then the registry
            // reference goes back.
            archive.close();
            drop(archive);
            self.registry.release_reader(self.user, self.format);
        }
        self.entries.clear();
    }

    fn run_directory(
        &mut self,
        dir: &Path,
        requested: Option<Vec<u32>>,
        events: &mut dyn ExtractEvents,
    ) -> Result<ExtractionReport> {
        let (actual, wanted) = match requested {
            None => (None, None),
            Some(sorted) => {
                let wanted: HashSet<u32> = sorted.iter().copied().collect();
                let actual = if self.is_solid {
                    solid_indexes(&sorted)
                } else {
                    sorted
                };
                (Some(actual), Some(wanted))
            }
        };

        let mode = OutputMode::Directory {
            dir: sanitize_destination(dir),
            wanted,
        };
        self.run(actual, false, mode, events)
    }

    fn run<'a>(
        &'a mut self,
        indexes: Option<Vec<u32>>,
        test_only: bool,
        mode: OutputMode<'a>,
        events: &'a mut dyn ExtractEvents,
    ) -> Result<ExtractionReport> {
        let archive = self.archive.as_mut().ok_or_else(|| ArchiveError::OpenFailed {
            reason: "the archive is closed".to_string(),
        })?;

        let mut session = SessionCallback::new(
            &self.entries,
            events,
            mode,
            self.password.clone(),
            self.preserve_paths,
            self.archive_file_name.clone(),
        );

        let outcome = archive.extract(indexes.as_deref(), test_only, &mut session);
        let cancelled = session.was_cancelled();
        let mut report = session.into_report();

        match outcome {
            Ok(()) => {}
            Err(EngineError::Aborted) => report.cancelled = true,
            Err(EngineError::Failed(reason)) => {
                if !cancelled {
                    return Err(ArchiveError::OperationFailed { reason });
                }
                report.cancelled = true;
            }
        }

        Ok(report)
    }
}

impl Drop for ArchiveReader {
    fn drop(&mut self) {
        self.close();
    }
}

/// Whether `path` names the first file of a volume set.
fn is_first_volume(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(".001"))
}

/// The indexes actually handed to the engine when a strict subset of a
/// solid archive is requested: everything up to and including the highest
/// requested index, because solid blocks decode from their start.
fn solid_indexes(indexes: &[u32]) -> Vec<u32> {
    let max = indexes.iter().copied().max().unwrap_or(0);
    if max > 0 {
        (0..=max).collect()
    } else {
        indexes.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_indexes_expand_to_prefix() {
        assert_eq!(solid_indexes(&[5]), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(solid_indexes(&[2, 4]), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_solid_indexes_zero_needs_no_expansion() {
        assert_eq!(solid_indexes(&[0]), vec![0]);
        assert_eq!(solid_indexes(&[]), Vec::<u32>::new());
    }

    #[test]
    fn test_first_volume_detection() {
        assert!(is_first_volume(Path::new("backup.7z.001")));
        assert!(!is_first_volume(Path::new("backup.7z.002")));
        assert!(!is_first_volume(Path::new("backup.7z")));
    }
}
