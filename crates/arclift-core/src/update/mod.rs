//! Archive creation and modification sessions.

mod callback;
mod params;

pub use params::CompressionLevel;
pub use params::CompressionMethod;
pub use params::ZipEncryptionMethod;
pub use params::dictionary_size_mib;

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use crate::engine::EngineError;
use crate::engine::SourceStream;
use crate::engine::TargetStream;
use crate::engine::registry;
use crate::engine::registry::EngineRegistry;
use crate::engine::registry::UserId;
use crate::entry::ArchiveEntry;
use crate::error::ArchiveError;
use crate::error::Result;
use crate::events::UpdateEvents;
use crate::formats::ArchiveFormat;
use crate::formats::sniff_format;
use crate::io::MultiVolumeWriter;
use crate::io::OffsetStream;
use crate::report::UpdateReport;

use callback::ATTR_DIRECTORY;
use callback::ATTR_NORMAL;
use callback::ItemSource;
use callback::ModifySlot;
use callback::UpdateItem;
use callback::UpdatePlan;
use callback::UpdateSessionCallback;

/// Edits applied to an existing archive without recompressing it.
#[derive(Debug, Default)]
pub struct Modifications {
    renames: BTreeMap<u32, String>,
    deletions: BTreeSet<u32>,
}

impl Modifications {
    /// No edits yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Renames the entry at `index` to `name`.
    #[must_use]
    pub fn rename<S: Into<String>>(mut self, index: u32, name: S) -> Self {
        self.renames.insert(index, name.into());
        self
    }

    /// Removes the entry at `index`.
    #[must_use]
    pub fn delete(mut self, index: u32) -> Self {
        self.deletions.insert(index);
        self
    }

    fn highest_index(&self) -> Option<u32> {
        let rename_max = self.renames.keys().next_back().copied();
        let delete_max = self.deletions.iter().next_back().copied();
        rename_max.max(delete_max)
    }
}

/// Configured compression session; one instance can run several
/// operations.
///
/// The container format is fixed at construction; level, method and the
/// remaining knobs are builder-style. A method that is invalid for the
/// container silently falls back to the container default, mirroring the
/// engine's own leniency.
pub struct ArchiveWriter {
    registry: &'static EngineRegistry,
    format: ArchiveFormat,
    level: CompressionLevel,
    method: CompressionMethod,
    password: Option<String>,
    encrypt_headers: bool,
    zip_encryption: ZipEncryptionMethod,
    custom_params: BTreeMap<String, String>,
    volume_size: Option<u64>,
    preserve_paths: bool,
    default_item_name: String,
}

impl ArchiveWriter {
    /// A writer producing `format` archives with default settings.
    #[must_use]
    pub fn new(format: ArchiveFormat) -> Self {
        Self::new_in(registry::global(), format)
    }

    /// A writer bound to a specific registry.
    #[must_use]
    pub fn new_in(registry: &'static EngineRegistry, format: ArchiveFormat) -> Self {
        Self {
            registry,
            format,
            level: CompressionLevel::default(),
            method: CompressionMethod::default(),
            password: None,
            encrypt_headers: false,
            zip_encryption: ZipEncryptionMethod::default(),
            custom_params: BTreeMap::new(),
            volume_size: None,
            preserve_paths: true,
            default_item_name: "default".to_string(),
        }
    }

    /// Sets the compression level.
    #[must_use]
    pub const fn level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the compression method. Methods invalid for the container fall
    /// back to [`CompressionMethod::Default`].
    #[must_use]
    pub fn method(mut self, method: CompressionMethod) -> Self {
        self.method = if method.is_valid_for(self.format) {
            method
        } else {
            CompressionMethod::Default
        };
        self
    }

    /// The method that will actually be used.
    #[must_use]
    pub const fn effective_method(&self) -> CompressionMethod {
        self.method
    }

    /// Sets the archive password.
    #[must_use]
    pub fn password<S: Into<String>>(mut self, password: S) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Also encrypts the archive headers (7z only).
    #[must_use]
    pub const fn encrypt_headers(mut self, encrypt: bool) -> Self {
        self.encrypt_headers = encrypt;
        self
    }

    /// Entry encryption method for zip output.
    #[must_use]
    pub const fn zip_encryption(mut self, method: ZipEncryptionMethod) -> Self {
        self.zip_encryption = method;
        self
    }

    /// Adds a named engine parameter.
    #[must_use]
    pub fn custom_param<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.custom_params.insert(key.into(), value.into());
        self
    }

    /// Splits the output into volumes of `size` bytes.
    #[must_use]
    pub const fn volume_size(mut self, size: u64) -> Self {
        self.volume_size = Some(size);
        self
    }

    /// Stores entries flat, by file name only.
    #[must_use]
    pub const fn flatten(mut self) -> Self {
        self.preserve_paths = false;
        self
    }

    /// Entry name used when a source stream has no name of its own.
    #[must_use]
    pub fn default_item_name<S: Into<String>>(mut self, name: S) -> Self {
        self.default_item_name = name.into();
        self
    }

    /// Estimated dictionary memory for the configured method and level,
    /// in MiB.
    #[must_use]
    pub fn dictionary_size_mib(&self) -> f32 {
        dictionary_size_mib(self.method, self.level)
    }

    /// Packs `sources` (files, or directories as empty entries) into a new
    /// archive at `archive_path`.
    ///
    /// Entry names keep the structure below the sources' common root
    /// unless the writer was flattened.
    ///
    /// # Errors
    ///
    /// Structural failures: unreadable sources, engine load or handler
    /// errors, multi-volume output on a format that cannot produce it.
    pub fn compress_files<P: AsRef<Path>>(
        &self,
        archive_path: P,
        sources: &[PathBuf],
        events: &mut dyn UpdateEvents,
    ) -> Result<UpdateReport> {
        let items = self.build_file_items(sources)?;
        self.create_archive(archive_path.as_ref(), items, events)
    }

    /// Recursively packs the contents of `dir` into a new archive.
    ///
    /// # Errors
    ///
    /// See [`ArchiveWriter::compress_files`].
    pub fn compress_directory<P: AsRef<Path>>(
        &self,
        archive_path: P,
        dir: P,
        events: &mut dyn UpdateEvents,
    ) -> Result<UpdateReport> {
        let root = dir.as_ref();
        let mut items = Vec::new();

        for entry in walkdir::WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|err| {
                std::io::Error::other(format!("cannot walk \"{}\": {err}", root.display()))
            })?;
            let meta = entry.metadata().map_err(std::io::Error::other)?;

            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_path_buf();
            let name = if self.preserve_paths {
                join_entry_name(&relative)
            } else {
                relative
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            };

            items.push(file_item(name, entry.path().to_path_buf(), &meta));
        }

        self.create_archive(archive_path.as_ref(), items, events)
    }

    /// Compresses one stream into `target` as a single-entry archive.
    ///
    /// # Errors
    ///
    /// See [`ArchiveWriter::compress_files`].
    pub fn compress_stream<R>(
        &self,
        mut source: R,
        target: &mut dyn TargetStream,
        events: &mut dyn UpdateEvents,
    ) -> Result<UpdateReport>
    where
        R: SourceStream + 'static,
    {
        let size = stream_len(&mut source)?;
        let item = UpdateItem {
            name: self.default_item_name.clone(),
            is_directory: false,
            size,
            attributes: ATTR_NORMAL,
            modified: None,
            created: None,
            accessed: None,
            source: ItemSource::Stream(Some(Box::new(source))),
        };

        self.run_new(target, UpdatePlan::Create { items: vec![item] }, events)
    }

    /// Compresses an ordered name-to-stream dictionary into `target`.
    /// A `None` stream produces a directory entry.
    ///
    /// # Errors
    ///
    /// See [`ArchiveWriter::compress_files`].
    pub fn compress_stream_dict(
        &self,
        entries: Vec<(String, Option<Box<dyn SourceStream>>)>,
        target: &mut dyn TargetStream,
        events: &mut dyn UpdateEvents,
    ) -> Result<UpdateReport> {
        let mut items = Vec::with_capacity(entries.len());
        for (name, stream) in entries {
            let item = match stream {
                Some(mut stream) => {
                    let size = stream_len(&mut stream)?;
                    UpdateItem {
                        name,
                        is_directory: false,
                        size,
                        attributes: ATTR_NORMAL,
                        modified: None,
                        created: None,
                        accessed: None,
                        source: ItemSource::Stream(Some(Box::new(BoxedSource(stream)))),
                    }
                }
                None => UpdateItem {
                    name,
                    is_directory: true,
                    size: 0,
                    attributes: ATTR_DIRECTORY,
                    modified: None,
                    created: None,
                    accessed: None,
                    source: ItemSource::Stream(None),
                },
            };
            items.push(item);
        }

        self.run_new(target, UpdatePlan::Create { items }, events)
    }

    /// Appends `sources` to the existing archive at `archive_path`,
    /// keeping the current entries untouched.
    ///
    /// # Errors
    ///
    /// See [`ArchiveWriter::compress_files`]; the existing archive must
    /// open, and appending does not support multi-volume output.
    pub fn append_files<P: AsRef<Path>>(
        &self,
        archive_path: P,
        sources: &[PathBuf],
        events: &mut dyn UpdateEvents,
    ) -> Result<UpdateReport> {
        let items = self.build_file_items(sources)?;
        self.update_existing(archive_path.as_ref(), ExistingOp::Append(items), events)
    }

    /// Applies renames and deletions to the existing archive at
    /// `archive_path` without recompressing the surviving entries.
    ///
    /// # Errors
    ///
    /// [`ArchiveError::ModifyUnsupported`] when the loaded engine version
    /// cannot modify archives, [`ArchiveError::InvalidParameter`] for
    /// out-of-range indexes, and the structural failures of
    /// [`ArchiveWriter::compress_files`].
    pub fn modify<P: AsRef<Path>>(
        &self,
        archive_path: P,
        changes: Modifications,
        events: &mut dyn UpdateEvents,
    ) -> Result<UpdateReport> {
        if !self.registry.modify_capable()? {
            return Err(ArchiveError::ModifyUnsupported);
        }
        self.update_existing(archive_path.as_ref(), ExistingOp::Modify(changes), events)
    }

    fn build_file_items(&self, sources: &[PathBuf]) -> Result<Vec<UpdateItem>> {
        let root_len = if self.preserve_paths {
            common_root_components(sources)
        } else {
            usize::MAX
        };

        let mut items = Vec::with_capacity(sources.len());
        for path in sources {
            let meta = std::fs::metadata(path)?;
            let name = if self.preserve_paths {
                let components: Vec<String> = path_components(path);
                let keep_from = root_len.min(components.len().saturating_sub(1));
                components[keep_from..].join("/")
            } else {
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            };
            items.push(file_item(name, path.clone(), &meta));
        }
        Ok(items)
    }

    fn create_archive(
        &self,
        archive_path: &Path,
        items: Vec<UpdateItem>,
        events: &mut dyn UpdateEvents,
    ) -> Result<UpdateReport> {
        let plan = UpdatePlan::Create { items };

        if let Some(volume_size) = self.volume_size {
            if !self.format.supports_multivolume_output() {
                return Err(ArchiveError::MultiVolumeUnsupported {
                    format: self.format,
                });
            }

            let mut target = MultiVolumeWriter::create(archive_path, volume_size)?;
            let report = self.run_new(&mut target, plan, events)?;
            target.finish()?;
            Ok(report)
        } else {
            let mut target = File::create(archive_path)?;
            self.run_new(&mut target, plan, events)
        }
    }

    fn run_new(
        &self,
        target: &mut dyn TargetStream,
        plan: UpdatePlan,
        events: &mut dyn UpdateEvents,
    ) -> Result<UpdateReport> {
        let assembled = params::assemble(
            self.format,
            self.level,
            self.method,
            &self.custom_params,
            self.encrypt_headers,
            self.zip_encryption,
        );

        let user = UserId::next();
        let mut writer = self.registry.acquire_writer(user, self.format)?;

        let result = (|| {
            writer
                .set_properties(&assembled.props)
                .map_err(engine_failure)?;

            let count = plan.output_count();
            let mut session = UpdateSessionCallback::new(
                plan,
                events,
                self.password.clone(),
                assembled.warnings,
            );
            let outcome = writer.update_items(target, count, &mut session);
            finish_session(session, outcome)
        })();

        drop(writer);
        self.registry.release_writer(user, self.format);
        result
    }

    fn update_existing(
        &self,
        archive_path: &Path,
        op: ExistingOp,
        events: &mut dyn UpdateEvents,
    ) -> Result<UpdateReport> {
        if self.volume_size.is_some() {
            return Err(ArchiveError::InvalidParameter {
                name: "volume_size".to_string(),
                reason: "multi-volume output is only available when creating a new archive"
                    .to_string(),
            });
        }

        let mut file = File::open(archive_path)?;
        let sniffed = sniff_format(&mut file)?;
        if !sniffed.format.can_compress() {
            return Err(ArchiveError::UnsupportedFormat {
                format: sniffed.format,
            });
        }

        let user = UserId::next();
        let mut archive = self.registry.acquire_reader(user, sniffed.format)?;

        let result = (|| {
            let source = Box::new(OffsetStream::new(file, sniffed.offset)?);
            archive.open(source, self.password.as_deref())?;

            let count = archive.item_count();
            let entries: Vec<ArchiveEntry> = (0..count)
                .map(|index| ArchiveEntry::read(&mut *archive, index))
                .collect();

            let plan = match op {
                ExistingOp::Append(items) => UpdatePlan::Append {
                    existing: count,
                    items,
                },
                ExistingOp::Modify(changes) => {
                    if let Some(highest) = changes.highest_index() {
                        if highest >= count {
                            return Err(ArchiveError::InvalidParameter {
                                name: "changes".to_string(),
                                reason: format!(
                                    "index {highest} is outside the archive ({count} items)"
                                ),
                            });
                        }
                    }

                    let slots: Vec<ModifySlot> = entries
                        .iter()
                        .filter(|entry| !changes.deletions.contains(&entry.index))
                        .map(|entry| ModifySlot {
                            source_index: entry.index,
                            new_name: changes.renames.get(&entry.index).cloned(),
                            entry: entry.clone(),
                        })
                        .collect();
                    UpdatePlan::Modify { slots }
                }
            };

            let assembled = params::assemble(
                self.format,
                self.level,
                self.method,
                &self.custom_params,
                self.encrypt_headers,
                self.zip_encryption,
            );

            // The update runs into a sibling temp file; the original is
            // replaced only after the engine finished cleanly.
            let temp_path = PathBuf::from(format!("{}.~", archive_path.display()));
            let mut target = File::create(&temp_path)?;

            let count = plan.output_count();
            let run = (|| {
                let writer = archive.writer().ok_or(ArchiveError::ModifyUnsupported)?;
                writer
                    .set_properties(&assembled.props)
                    .map_err(engine_failure)?;

                let mut session = UpdateSessionCallback::new(
                    plan,
                    events,
                    self.password.clone(),
                    assembled.warnings,
                );
                let outcome = writer.update_items(&mut target, count, &mut session);
                finish_session(session, outcome)
            })();

            drop(target);
            archive.close();

            match run {
                Ok(report) if !report.cancelled => {
                    std::fs::rename(&temp_path, archive_path)?;
                    Ok(report)
                }
                other => {
                    let _ = std::fs::remove_file(&temp_path);
                    other
                }
            }
        })();

        drop(archive);
        self.registry.release_reader(user, sniffed.format);
        result
    }
}

enum ExistingOp {
    Append(Vec<UpdateItem>),
    Modify(Modifications),
}

fn engine_failure(err: EngineError) -> ArchiveError {
    match err {
        EngineError::Aborted => ArchiveError::Cancelled,
        EngineError::Failed(reason) => ArchiveError::OperationFailed { reason },
    }
}

fn finish_session(
    session: UpdateSessionCallback<'_>,
    outcome: std::result::Result<(), EngineError>,
) -> Result<UpdateReport> {
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

fn file_item(name: String, path: PathBuf, meta: &std::fs::Metadata) -> UpdateItem {
    let is_directory = meta.is_dir();
    UpdateItem {
        name,
        is_directory,
        size: if is_directory { 0 } else { meta.len() },
        attributes: if is_directory { ATTR_DIRECTORY } else { ATTR_NORMAL },
        modified: meta.modified().ok(),
        created: meta.created().ok(),
        accessed: meta.accessed().ok(),
        source: if is_directory {
            ItemSource::Stream(None)
        } else {
            ItemSource::Disk(path)
        },
    }
}

fn stream_len<S: Seek + ?Sized>(stream: &mut S) -> std::io::Result<u64> {
    let len = stream.seek(SeekFrom::End(0))?;
    stream.seek(SeekFrom::Start(0))?;
    Ok(len)
}

/// Read-only view over a boxed seekable source, so it can live inside the
/// plainer read-only item source.
struct BoxedSource(Box<dyn SourceStream>);

impl Read for BoxedSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

fn path_components(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::RootDir => None,
            Component::Prefix(prefix) => Some(prefix.as_os_str().to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

/// Number of leading path components shared by every source, never
/// consuming a full path. Entry names are what remains after the root.
fn common_root_components(sources: &[PathBuf]) -> usize {
    if sources.is_empty() {
        return 0;
    }

    let split: Vec<Vec<String>> = sources.iter().map(|p| path_components(p)).collect();
    let limit = split
        .iter()
        .map(|components| components.len().saturating_sub(1))
        .min()
        .unwrap_or(0);

    let mut common = 0;
    while common < limit {
        let probe = &split[0][common];
        if split.iter().all(|components| &components[common] == probe) {
            common += 1;
        } else {
            break;
        }
    }
    common
}

fn join_entry_name(relative: &Path) -> String {
    path_components(relative).join("/")
}
