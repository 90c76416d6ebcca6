//! The seam between the managed layer and the native archive engine.
//!
//! The native engine exposes a handful of vtable-style interfaces: archive
//! readers and writers, and the callback objects they invoke to pull or push
//! bytes, report progress and signal per-item outcomes. This module models
//! each of those roles as a Rust trait with explicit ownership: a session
//! owns the callback it hands to the engine and outlives every invocation.
//!
//! The production implementation ([`native`]) drives the real dynamically
//! loaded library through the fixed binary contract in [`ffi`]. Tests inject
//! scripted engines through [`EngineProvider`].

pub mod ffi;
pub mod native;
pub mod registry;

use std::io::Read;
use std::io::Seek;
use std::io::Write;
use std::time::SystemTime;

use crate::error::ArchiveError;
use crate::formats::ArchiveFormat;

/// Per-item outcome vocabulary fixed by the native engine.
///
/// These codes are surfaced to callers verbatim; do not collapse or rename
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    /// Success.
    Ok,
    /// The compression method of the item is not supported.
    UnsupportedMethod,
    /// A data error occurred.
    DataError,
    /// The CRC check failed.
    CrcError,
    /// The item is unavailable.
    Unavailable,
    /// Unexpected end of data.
    UnexpectedEnd,
    /// Trailing data after the archive end.
    DataAfterEnd,
    /// The input is not an archive.
    NotAnArchive,
    /// The archive headers are damaged.
    HeadersError,
    /// The supplied password is wrong.
    WrongPassword,
}

impl OperationResult {
    /// Decodes the raw engine code. Codes outside the known vocabulary are
    /// treated as data errors.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::UnsupportedMethod,
            3 => Self::CrcError,
            4 => Self::Unavailable,
            5 => Self::UnexpectedEnd,
            6 => Self::DataAfterEnd,
            7 => Self::NotAnArchive,
            8 => Self::HeadersError,
            9 => Self::WrongPassword,
            _ => Self::DataError,
        }
    }
}

/// Extraction mode the engine announces when requesting an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskMode {
    /// The item will be unpacked.
    Extract,
    /// The item will be decoded but its bytes discarded (integrity test).
    Test,
    /// The item is skipped.
    Skip,
}

/// Item and archive property identifiers.
///
/// The discriminants are the engine's PROPID values and are part of the
/// binary contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ItemProp {
    /// Entry path inside the archive.
    Path = 3,
    /// File name extension.
    Extension = 5,
    /// Directory flag.
    IsDirectory = 6,
    /// Uncompressed size.
    Size = 7,
    /// File attributes.
    Attributes = 9,
    /// Creation time.
    CreationTime = 10,
    /// Last access time.
    LastAccessTime = 11,
    /// Last write time.
    LastWriteTime = 12,
    /// Archive-level solid flag.
    Solid = 13,
    /// Encryption flag.
    Encrypted = 15,
    /// CRC of the entry data.
    Crc = 19,
    /// Anti-item flag (7z incremental backups).
    IsAnti = 21,
    /// Compression method name.
    Method = 22,
    /// Entry comment.
    Comment = 28,
}

/// A dynamically typed property value read from or supplied to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    /// No value stored.
    Empty,
    /// Boolean property.
    Bool(bool),
    /// 32-bit integer property.
    U32(u32),
    /// 64-bit integer property.
    U64(u64),
    /// String property.
    Str(String),
    /// Timestamp property.
    Time(SystemTime),
}

impl PropValue {
    /// Returns the string value, or `default` when the property holds
    /// something else. Mirrors the lenient casts the engine's variant
    /// plumbing requires: a missing or mistyped property must not abort an
    /// enumeration pass.
    #[must_use]
    pub fn str_or(&self, default: &str) -> String {
        match self {
            Self::Str(s) => s.clone(),
            _ => default.to_string(),
        }
    }

    /// Returns the boolean value, or `default` for other variants.
    #[must_use]
    pub const fn bool_or(&self, default: bool) -> bool {
        match self {
            Self::Bool(b) => *b,
            _ => default,
        }
    }

    /// Returns the integer value widened to 64 bits, or `default`.
    #[must_use]
    pub const fn u64_or(&self, default: u64) -> u64 {
        match self {
            Self::U64(v) => *v,
            Self::U32(v) => *v as u64,
            _ => default,
        }
    }

    /// Returns the 32-bit integer value, or `default`.
    #[must_use]
    pub const fn u32_or(&self, default: u32) -> u32 {
        match self {
            Self::U32(v) => *v,
            _ => default,
        }
    }

    /// Returns the timestamp, or `None` for other variants.
    #[must_use]
    pub const fn time(&self) -> Option<SystemTime> {
        match self {
            Self::Time(t) => Some(*t),
            _ => None,
        }
    }
}

/// Signal returned from a callback to make the engine stop the operation.
///
/// Maps onto the engine's abort result code. Cooperative cancellation is
/// implemented by returning this from the next callback opportunity rather
/// than by interrupting native code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abort;

/// Result type for callback methods invoked by the engine.
pub type CallbackResult<T> = Result<T, Abort>;

/// Structural failure reported by an engine drive call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The operation was aborted through a callback.
    Aborted,
    /// The engine reported a failure code for the whole operation.
    Failed(String),
}

/// The role the engine invokes while unpacking: it announces the total
/// uncompressed size, requests an output stream per item, streams the item
/// bytes through [`ExtractCallback::write`], and reports the per-item
/// outcome.
pub trait ExtractCallback {
    /// Total uncompressed size of the operation, used as the progress
    /// denominator. May never be called.
    fn set_total(&mut self, total: u64);

    /// Announces the next item. After `Ok(())` the engine streams the item's
    /// bytes through [`ExtractCallback::write`]; the callback decides
    /// internally whether those bytes reach a real destination or a discard
    /// sink. `Err(Abort)` stops the whole operation.
    fn get_stream(&mut self, index: u32, mode: AskMode) -> CallbackResult<()>;

    /// Delivers a chunk of the current item's unpacked bytes.
    fn write(&mut self, data: &[u8]) -> CallbackResult<usize>;

    /// Announces the operation mode right before decoding an item.
    fn prepare_operation(&mut self, mode: AskMode) {
        let _ = mode;
    }

    /// Per-item outcome. `Err(Abort)` stops the remaining items.
    fn set_operation_result(&mut self, result: OperationResult) -> CallbackResult<()>;

    /// Password for encrypted archives, if any.
    fn password(&mut self) -> Option<String> {
        None
    }
}

/// Placement of one update item relative to the existing archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateItemInfo {
    /// Whether new data is supplied for this output index.
    pub new_data: bool,
    /// Whether new properties are supplied for this output index.
    pub new_properties: bool,
    /// The source index in the existing archive to copy from, if any.
    pub index_in_archive: Option<u32>,
}

/// The role the engine invokes while packing: it asks where each output
/// item comes from, pulls properties and source bytes, and reports per-item
/// outcomes.
pub trait UpdateCallback {
    /// Total source size of the operation.
    fn set_total(&mut self, total: u64);

    /// Placement of the item at `index` in the output archive.
    fn update_item_info(&mut self, index: u32) -> UpdateItemInfo;

    /// Property value for a new item.
    fn property(&mut self, index: u32, prop: ItemProp) -> PropValue;

    /// Prepares the source stream for the item at `index`. After `Ok(())`
    /// the engine pulls bytes through [`UpdateCallback::read`].
    fn get_stream(&mut self, index: u32) -> CallbackResult<()>;

    /// Pulls a chunk of the current item's source bytes.
    fn read(&mut self, buf: &mut [u8]) -> CallbackResult<usize>;

    /// Per-item outcome.
    fn set_operation_result(&mut self, result: OperationResult) -> CallbackResult<()>;

    /// Password for archive encryption: (defined, value).
    fn password(&mut self) -> (bool, Option<String>) {
        (false, None)
    }
}

/// Random-access byte source handed to the engine when opening an archive.
///
/// The engine seeks freely, so sources must be seekable; the volume and
/// offset stream adapters in [`crate::io`] all qualify.
pub trait SourceStream: Read + Seek + Send {}

impl<T: Read + Seek + Send + ?Sized> SourceStream for T {}

/// Random-access byte target the engine writes a new archive into.
pub trait TargetStream: Write + Seek + Send {
    /// Pre-sizes the target. Targets that cannot (or need not) honor this
    /// treat it as a no-op.
    fn set_size(&mut self, size: u64) -> std::io::Result<()> {
        let _ = size;
        Ok(())
    }
}

/// A value for a named compression parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Numeric parameter.
    U32(u32),
    /// String parameter.
    Str(String),
}

/// An opened in-archive instance bound to one format.
pub trait InArchive: Send {
    /// Opens the archive from a seekable source. Structural failures —
    /// the input is not an archive of this format, or the header password
    /// is wrong — are fatal.
    fn open(
        &mut self,
        stream: Box<dyn SourceStream>,
        password: Option<&str>,
    ) -> Result<(), ArchiveError>;

    /// Number of items in the opened archive.
    fn item_count(&self) -> u32;

    /// Reads one property of one item.
    fn item_property(&mut self, index: u32, prop: ItemProp) -> PropValue;

    /// Reads one archive-level property.
    fn archive_property(&mut self, prop: ItemProp) -> PropValue;

    /// Drives the extraction protocol over `indexes` (or all items when
    /// `None`). `test_only` decodes without producing output streams.
    fn extract(
        &mut self,
        indexes: Option<&[u32]>,
        test_only: bool,
        callback: &mut dyn ExtractCallback,
    ) -> Result<(), EngineError>;

    /// The update interface of the same native object, for in-place
    /// modification. `None` when the handler cannot write.
    fn writer(&mut self) -> Option<&mut dyn OutArchive> {
        None
    }

    /// Closes the archive. Idempotent.
    fn close(&mut self);
}

/// An out-archive instance bound to one writable format.
pub trait OutArchive: Send {
    /// Applies the assembled compression parameters.
    fn set_properties(&mut self, props: &[(String, ParamValue)]) -> Result<(), EngineError>;

    /// Drives the update protocol producing `count` output items.
    fn update_items(
        &mut self,
        target: &mut dyn TargetStream,
        count: u32,
        callback: &mut dyn UpdateCallback,
    ) -> Result<(), EngineError>;
}

/// A loaded engine, able to mint per-format instances.
pub trait Engine: Send {
    /// Creates a reader instance for `format`, or `None` when the engine
    /// build lacks the handler.
    fn create_reader(&self, format: ArchiveFormat) -> Option<Box<dyn InArchive>>;

    /// Creates a writer instance for `format`, or `None`.
    fn create_writer(&self, format: ArchiveFormat) -> Option<Box<dyn OutArchive>>;

    /// Engine major version; gates the in-place modification capability.
    fn major_version(&self) -> u32;
}

/// Produces the engine on first demand. The production provider loads the
/// native library; tests substitute scripted engines.
pub trait EngineProvider: Send + Sync {
    /// Loads the engine. Called at most once per registry lifecycle.
    fn load(&self) -> Result<Box<dyn Engine>, ArchiveError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_result_codes_roundtrip() {
        assert_eq!(OperationResult::from_code(0), OperationResult::Ok);
        assert_eq!(OperationResult::from_code(1), OperationResult::UnsupportedMethod);
        assert_eq!(OperationResult::from_code(2), OperationResult::DataError);
        assert_eq!(OperationResult::from_code(3), OperationResult::CrcError);
        assert_eq!(OperationResult::from_code(9), OperationResult::WrongPassword);
    }

    #[test]
    fn test_operation_result_unknown_code_is_data_error() {
        assert_eq!(OperationResult::from_code(42), OperationResult::DataError);
        assert_eq!(OperationResult::from_code(-1), OperationResult::DataError);
    }

    #[test]
    fn test_prop_value_casts() {
        assert_eq!(PropValue::Str("a".into()).str_or("d"), "a");
        assert_eq!(PropValue::Empty.str_or("d"), "d");
        assert_eq!(PropValue::U32(7).u64_or(0), 7);
        assert_eq!(PropValue::U64(7).u64_or(0), 7);
        assert_eq!(PropValue::Bool(true).u64_or(3), 3);
        assert!(PropValue::Bool(true).bool_or(false));
        assert!(!PropValue::Empty.bool_or(false));
    }
}
