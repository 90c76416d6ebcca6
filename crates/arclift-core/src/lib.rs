//! Managed front-end for the 7-Zip native engine.
//!
//! `arclift-core` drives a dynamically loaded multi-format archiving
//! engine: it sniffs archive formats from raw bytes, manages the engine's
//! reference-counted lifecycle, presents offset sub-regions and
//! multi-volume file sets as single logical streams, and runs the
//! callback protocols the engine uses to pull and push bytes, report
//! progress and signal per-item outcomes.
//!
//! The API is fully synchronous and cancellable; threading and task
//! composition belong to the caller.
//!
//! # Examples
//!
//! ```no_run
//! use arclift_core::ArchiveReader;
//! use arclift_core::NoopEvents;
//!
//! # fn main() -> Result<(), arclift_core::ArchiveError> {
//! let mut archive = ArchiveReader::open("backup.7z")?;
//! println!("{} entries, format {}", archive.entries().len(), archive.format());
//!
//! let report = archive.extract_to_dir("/tmp/restore", &mut NoopEvents)?;
//! println!("extracted {} files", report.files_extracted);
//! for failure in &report.failures {
//!     eprintln!("failed: {failure}");
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod entry;
pub mod error;
pub mod events;
pub mod extract;
pub mod formats;
pub mod io;
pub mod report;
pub mod update;

// Re-export main API types
pub use engine::registry::EngineRegistry;
pub use entry::ArchiveEntry;
pub use error::ArchiveError;
pub use error::FailureKind;
pub use error::ItemFailure;
pub use error::Result;
pub use events::ExtractEvents;
pub use events::Flow;
pub use events::ItemFlow;
pub use events::NoopEvents;
pub use events::OverwriteDecision;
pub use events::UpdateEvents;
pub use extract::ArchiveReader;
pub use extract::ReaderOptions;
pub use formats::ArchiveFormat;
pub use formats::SniffResult;
pub use formats::sniff_format;
pub use report::ExtractionReport;
pub use report::UpdateReport;
pub use update::ArchiveWriter;
pub use update::CompressionLevel;
pub use update::CompressionMethod;
pub use update::Modifications;
pub use update::ZipEncryptionMethod;
