//! Error types for archive operations.

use std::path::PathBuf;
use thiserror::Error;

use crate::engine::OperationResult;
use crate::formats::ArchiveFormat;

/// Result type alias using `ArchiveError`.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Structural errors that abort an archive operation immediately.
///
/// Per-item problems do not appear here: they accumulate on the session and
/// are surfaced through the operation report (see [`ItemFailure`]), so a
/// caller can always inspect what succeeded despite failures.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The native engine library could not be loaded or is invalid.
    #[error("cannot load native engine: {reason}")]
    EngineLoad {
        /// Why loading failed.
        reason: String,
    },

    /// The loaded engine has no handler for the requested format.
    #[error("format {format} is not supported by the loaded engine")]
    UnsupportedFormat {
        /// The format without a handler.
        format: ArchiveFormat,
    },

    /// No known archive signature was found in the input.
    #[error("no known archive signature found")]
    InvalidSignature,

    /// The input is too short or not seekable enough to be sniffed.
    #[error("input cannot be sniffed: {reason}")]
    UnsniffableSource {
        /// Which precondition failed.
        reason: String,
    },

    /// The archive would not open.
    #[error("cannot open archive: {reason}")]
    OpenFailed {
        /// Engine-reported reason.
        reason: String,
    },

    /// The supplied password is wrong.
    #[error("wrong password")]
    WrongPassword,

    /// A compression parameter is invalid for the session.
    #[error("invalid parameter \"{name}\": {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Multi-volume output requested for a format that cannot produce it.
    #[error("multi-volume output is not supported for {format} archives")]
    MultiVolumeUnsupported {
        /// The offending output format.
        format: ArchiveFormat,
    },

    /// In-place archive modification requested but the engine version does
    /// not support it.
    #[error("the loaded engine does not support archive modification")]
    ModifyUnsupported,

    /// The named entry does not exist in the archive file table.
    #[error("entry \"{name}\" was not found in the archive")]
    EntryNotFound {
        /// The entry path looked up.
        name: String,
    },

    /// The engine failed the operation as a whole (as opposed to a
    /// per-item result code).
    #[error("operation failed: {reason}")]
    OperationFailed {
        /// Engine-reported reason.
        reason: String,
    },

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,
}

impl ArchiveError {
    /// Returns `true` when retrying with a different password could succeed.
    #[must_use]
    pub const fn is_password_error(&self) -> bool {
        matches!(self, Self::WrongPassword)
    }

    /// Returns `true` for errors raised before any native work started
    /// (bad parameters, unsupported requests).
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::InvalidParameter { .. }
                | Self::MultiVolumeUnsupported { .. }
                | Self::UnsniffableSource { .. }
                | Self::ModifyUnsupported
                | Self::EntryNotFound { .. }
        )
    }
}

/// Where a non-fatal per-item failure originated.
///
/// Engine-origin results keep the native result code verbatim; failures
/// raised while resolving destinations or inside user callbacks are kept
/// distinguishable from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The engine reported a non-ok result code for the item.
    Engine(OperationResult),
    /// The destination path could not be resolved or created.
    Path(String),
    /// An I/O error occurred while materializing the item.
    Io(String),
    /// A user-supplied callback reported an error.
    Callback(String),
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Engine(result) => {
                let msg = match result {
                    OperationResult::Ok => "no error",
                    OperationResult::UnsupportedMethod => "unsupported compression method",
                    OperationResult::DataError => "data error, file is corrupted",
                    OperationResult::CrcError => "CRC check failed, file is corrupted",
                    OperationResult::Unavailable => "file is unavailable",
                    OperationResult::UnexpectedEnd => "unexpected end of file",
                    OperationResult::DataAfterEnd => "data after end of archive",
                    OperationResult::NotAnArchive => "file is not an archive",
                    OperationResult::HeadersError => "archive headers error",
                    OperationResult::WrongPassword => "wrong password",
                };
                f.write_str(msg)
            }
            Self::Path(reason) => write!(f, "path error: {reason}"),
            Self::Io(reason) => write!(f, "I/O error: {reason}"),
            Self::Callback(reason) => write!(f, "callback error: {reason}"),
        }
    }
}

/// A non-fatal failure tied to one archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Index of the entry in the archive file table.
    pub index: u32,
    /// Entry path, when it was known at the time of the failure.
    pub path: Option<PathBuf>,
    /// What went wrong.
    pub kind: FailureKind,
}

impl std::fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "item {} ({}): {}", self.index, path.display(), self.kind),
            None => write!(f, "item {}: {}", self.index, self.kind),
        }
    }
}
