//! Per-item extraction output.

use std::fs::File;
use std::fs::FileTimes;
use std::io::Seek;
use std::io::Write;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::engine::TargetStream;

/// Destination for one extracted item.
///
/// The engine does not care where item bytes go, only that every write is
/// acknowledged with a count — progress accounting depends on it. A real
/// file, a caller-supplied stream and the discard sink therefore share this
/// one surface instead of a class hierarchy: `Discard` accepts and counts
/// bytes without storing them, which is what keeps skipped and failed items
/// moving through the protocol.
pub enum OutputSink<'a> {
    /// A file created on disk for the item.
    File {
        /// Open handle being written.
        file: File,
        /// Path the file was created at.
        path: PathBuf,
        /// Modification time recorded in the archive, restored on finish.
        mtime: Option<SystemTime>,
    },
    /// A caller-supplied stream (extract-to-stream mode).
    Stream(&'a mut dyn Write),
    /// Accepts and counts bytes without storing them.
    Discard,
}

impl OutputSink<'_> {
    /// Whether this sink drops its bytes.
    #[must_use]
    pub const fn is_discard(&self) -> bool {
        matches!(self, Self::Discard)
    }

    /// Accepts `data`, returning the number of bytes consumed (always all
    /// of them).
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying file or stream write fails.
    pub fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::File { file, .. } => file.write_all(data)?,
            Self::Stream(stream) => stream.write_all(data)?,
            Self::Discard => {}
        }
        Ok(data.len())
    }

    /// Completes the item: flushes, and for files restores the archive's
    /// recorded modification time onto the created file.
    ///
    /// # Errors
    ///
    /// Returns an error when flushing fails. A failure to restore the
    /// timestamp is ignored; the extracted bytes are already on disk.
    pub fn finish(self) -> std::io::Result<()> {
        match self {
            Self::File { mut file, mtime, .. } => {
                file.flush()?;
                if let Some(time) = mtime {
                    let times = FileTimes::new().set_modified(time).set_accessed(time);
                    let _ = file.set_times(times);
                }
            }
            Self::Stream(stream) => stream.flush()?,
            Self::Discard => {}
        }
        Ok(())
    }
}

impl TargetStream for File {
    fn set_size(&mut self, size: u64) -> std::io::Result<()> {
        self.set_len(size)
    }
}

/// Adapter presenting any seekable writer as an archive output target.
///
/// The engine's pre-size hint is ignored; growable targets do not need it.
#[derive(Debug)]
pub struct StreamTarget<W>(pub W);

impl<W: Write> Write for StreamTarget<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl<W: Seek> Seek for StreamTarget<W> {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        self.0.seek(pos)
    }
}

impl<W: Write + Seek + Send> TargetStream for StreamTarget<W> {}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_discard_counts_bytes() {
        let mut sink = OutputSink::Discard;
        assert_eq!(sink.write(&[0u8; 1234]).unwrap(), 1234);
        assert!(sink.is_discard());
        sink.finish().unwrap();
    }

    #[test]
    fn test_stream_sink_forwards_bytes() {
        let mut out = Vec::new();
        let mut sink = OutputSink::Stream(&mut out);
        sink.write(b"hello").unwrap();
        sink.finish().unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn test_file_sink_writes_and_restores_mtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("item.txt");
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000);

        let mut sink = OutputSink::File {
            file: File::create(&path).unwrap(),
            path: path.clone(),
            mtime: Some(mtime),
        };
        sink.write(b"payload").unwrap();
        sink.finish().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(modified, mtime);
    }
}
