//! Stream adapters handed to the native engine.
//!
//! The engine sees every archive as a single logical random-access stream.
//! The adapters here make that true for the shapes archives actually come
//! in: a sub-region of a file behind a self-extracting stub
//! ([`OffsetStream`]), an ordered set of fixed-size volume files
//! ([`MultiVolumeReader`], [`MultiVolumeWriter`]), and a no-op sink used to
//! keep progress accounting alive for skipped items ([`OutputSink`]).

pub mod offset;
pub mod sink;
pub mod volume;

pub use offset::OffsetStream;
pub use sink::OutputSink;
pub use sink::StreamTarget;
pub use volume::MultiVolumeReader;
pub use volume::MultiVolumeWriter;
pub use volume::volume_suffix;
