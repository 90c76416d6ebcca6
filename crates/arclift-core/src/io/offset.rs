//! Offset-shifted stream view.

use std::io::Read;
use std::io::Result;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;

/// A logical stream over the tail of a physical stream.
///
/// Archives appended behind an executable stub start at a nonzero physical
/// offset; the engine still expects logical offset 0 to be the first
/// archive byte. This adapter subtracts the base offset from every position
/// it reports and adds it back on every seek.
#[derive(Debug)]
pub struct OffsetStream<S> {
    inner: S,
    offset: u64,
}

impl<S: Seek> OffsetStream<S> {
    /// Wraps `inner`, placing logical position 0 at physical `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error when the initial seek to `offset` fails.
    pub fn new(mut inner: S, offset: u64) -> Result<Self> {
        inner.seek(SeekFrom::Start(offset))?;
        Ok(Self { inner, offset })
    }

    /// The base offset this view is shifted by.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Consumes the view and returns the physical stream.
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn to_logical(&self, physical: u64) -> Result<u64> {
        physical.checked_sub(self.offset).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek resolved before the logical start of the stream",
            )
        })
    }
}

impl<S: Read> Read for OffsetStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.inner.read(buf)
    }
}

impl<S: Write> Write for OffsetStream<S> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}

impl<S: Seek> Seek for OffsetStream<S> {
    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let physical = match pos {
            SeekFrom::Start(logical) => self.inner.seek(SeekFrom::Start(logical + self.offset))?,
            relative => self.inner.seek(relative)?,
        };
        self.to_logical(physical)
    }
}
