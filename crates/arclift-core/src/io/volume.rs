//! Multi-volume stream adapters.
//!
//! A multi-part archive is a sequence of sibling files sharing a base name
//! with a numeric dotted suffix (`.001`, `.002`, ...). The adapters below
//! present such a sequence as one logical stream: volumes are an ordered
//! vector of `(range, handle)` segments and every seek resolves the owning
//! segment by range lookup.

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use crate::engine::TargetStream;

/// Renders the dotted suffix of volume number `num` (1-based).
///
/// The width is fixed at three digits up to `.999`; larger numbers use the
/// unpadded decimal form.
#[must_use]
pub fn volume_suffix(num: u32) -> String {
    if num <= 999 {
        format!(".{num:03}")
    } else {
        format!(".{num}")
    }
}

/// Strips a numeric volume suffix, returning the base name.
fn volume_base(path: &Path) -> Option<String> {
    let text = path.to_str()?;
    let dot = text.rfind('.')?;
    let suffix = &text[dot + 1..];

    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some(text[..dot].to_string())
}

struct Volume {
    file: File,
    start: u64,
    end: u64,
    path: PathBuf,
}

/// Read view over an ordered set of volume files.
///
/// Volumes are discovered by probing successive suffixes starting from
/// `.001` until a file is missing. Reads that exhaust one volume continue
/// transparently into the next; a read may still return fewer bytes than
/// requested once the final volume is exhausted.
pub struct MultiVolumeReader {
    volumes: Vec<Volume>,
    current: usize,
    position: u64,
    len: u64,
}

impl MultiVolumeReader {
    /// Opens the volume set that `first_volume` belongs to.
    ///
    /// `first_volume` must carry a numeric suffix; discovery always starts
    /// over from volume 1 of the same base name.
    ///
    /// # Errors
    ///
    /// Returns an error when the path has no numeric suffix, when volume 1
    /// does not exist, or when opening any discovered volume fails.
    pub fn open<P: AsRef<Path>>(first_volume: P) -> std::io::Result<Self> {
        let path = first_volume.as_ref();
        let base = volume_base(path).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("\"{}\" has no numeric volume suffix", path.display()),
            )
        })?;

        let mut volumes = Vec::new();
        let mut total = 0u64;

        for number in 1u32.. {
            let candidate = PathBuf::from(format!("{base}{}", volume_suffix(number)));
            if !candidate.exists() {
                break;
            }

            let file = File::open(&candidate)?;
            let len = file.metadata()?.len();
            volumes.push(Volume {
                file,
                start: total,
                end: total + len,
                path: candidate,
            });
            total += len;
        }

        if volumes.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no volumes found for \"{base}\""),
            ));
        }

        Ok(Self {
            volumes,
            current: 0,
            position: 0,
            len: total,
        })
    }

    /// Total logical length, the sum of all volume lengths.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Whether the volume set holds no bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Paths of the discovered volumes, in order.
    #[must_use]
    pub fn volume_paths(&self) -> Vec<PathBuf> {
        self.volumes.iter().map(|v| v.path.clone()).collect()
    }
}

impl Read for MultiVolumeReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut total = 0;

        while total < buf.len() {
            let n = self.volumes[self.current].file.read(&mut buf[total..])?;

            if n == 0 {
                if self.current + 1 >= self.volumes.len() {
                    break;
                }
                self.current += 1;
                self.volumes[self.current].file.seek(SeekFrom::Start(0))?;
                continue;
            }

            total += n;
            self.position += n as u64;
        }

        Ok(total)
    }
}

impl Seek for MultiVolumeReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = resolve_seek(pos, self.position, self.len)?;

        if target > self.len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek past the end of the volume set",
            ));
        }

        // Linear scan is fine: volume counts are small.
        let index = self
            .volumes
            .iter()
            .position(|v| target >= v.start && target < v.end)
            .unwrap_or(self.volumes.len() - 1);

        let start = self.volumes[index].start;
        self.volumes[index].file.seek(SeekFrom::Start(target - start))?;
        self.current = index;
        self.position = target;
        Ok(target)
    }
}

/// Write view producing an ordered set of pre-sized volume files.
///
/// Volumes are created on demand, each pre-allocated to the configured
/// volume size; writes that overflow the current volume spill into a newly
/// created one. [`MultiVolumeWriter::finish`] truncates the final volume to
/// the bytes actually used (all earlier volumes keep their full size).
pub struct MultiVolumeWriter {
    base: PathBuf,
    volume_size: u64,
    volumes: Vec<File>,
    paths: Vec<PathBuf>,
    position: u64,
    high_water: u64,
    finished: bool,
}

impl MultiVolumeWriter {
    /// Starts a volume set named after `base` (the suffix is appended).
    ///
    /// The first volume is created immediately so that an empty archive
    /// still produces `.001`.
    ///
    /// # Errors
    ///
    /// Returns an error when `volume_size` is zero or the first volume
    /// cannot be created.
    pub fn create<P: AsRef<Path>>(base: P, volume_size: u64) -> std::io::Result<Self> {
        if volume_size == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "volume size must be nonzero",
            ));
        }

        let mut writer = Self {
            base: base.as_ref().to_path_buf(),
            volume_size,
            volumes: Vec::new(),
            paths: Vec::new(),
            position: 0,
            high_water: 0,
            finished: false,
        };
        writer.new_volume()?;
        Ok(writer)
    }

    /// Paths of the volumes created so far, in order.
    #[must_use]
    pub fn volume_paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Truncates the final volume to its used length and flushes all
    /// volumes. Idempotent; also invoked on drop, where errors are ignored.
    ///
    /// # Errors
    ///
    /// Returns the first I/O error encountered while truncating or
    /// flushing.
    pub fn finish(&mut self) -> std::io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let earlier: u64 = (self.volumes.len() as u64 - 1) * self.volume_size;
        let used = self.high_water.saturating_sub(earlier);

        if let Some(last) = self.volumes.last() {
            last.set_len(used)?;
        }
        for volume in &mut self.volumes {
            volume.flush()?;
        }
        Ok(())
    }

    fn new_volume(&mut self) -> std::io::Result<()> {
        let number = self.volumes.len() as u32 + 1;
        let path = PathBuf::from(format!(
            "{}{}",
            self.base.display(),
            volume_suffix(number)
        ));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(self.volume_size)?;

        self.volumes.push(file);
        self.paths.push(path);
        Ok(())
    }
}

impl Write for MultiVolumeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut written = 0;

        while written < buf.len() {
            let index = (self.position / self.volume_size) as usize;
            while index >= self.volumes.len() {
                self.new_volume()?;
            }

            let in_volume = self.position % self.volume_size;
            let space = (self.volume_size - in_volume) as usize;
            let take = space.min(buf.len() - written);

            let file = &mut self.volumes[index];
            file.seek(SeekFrom::Start(in_volume))?;
            file.write_all(&buf[written..written + take])?;

            written += take;
            self.position += take as u64;
        }

        self.high_water = self.high_water.max(self.position);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        for volume in &mut self.volumes {
            volume.flush()?;
        }
        Ok(())
    }
}

impl Seek for MultiVolumeWriter {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = resolve_seek(pos, self.position, self.high_water)?;
        self.position = target;
        Ok(target)
    }
}

impl TargetStream for MultiVolumeWriter {
    // Volumes are pre-sized on creation; the engine's size hint is moot.
}

impl Drop for MultiVolumeWriter {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

/// Resolves a `SeekFrom` into an absolute offset, rejecting positions
/// before the start.
fn resolve_seek(pos: SeekFrom, current: u64, end: u64) -> std::io::Result<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => Some(offset),
        SeekFrom::Current(delta) => current.checked_add_signed(delta),
        SeekFrom::End(delta) => end.checked_add_signed(delta),
    };

    target.ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "seek before the start of the stream",
        )
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_split(dir: &TempDir, volume_size: u64, data: &[u8]) -> PathBuf {
        let base = dir.path().join("archive.7z");
        let mut writer = MultiVolumeWriter::create(&base, volume_size).unwrap();
        writer.write_all(data).unwrap();
        writer.finish().unwrap();
        dir.path().join("archive.7z.001")
    }

    #[test]
    fn test_suffix_widths() {
        assert_eq!(volume_suffix(1), ".001");
        assert_eq!(volume_suffix(42), ".042");
        assert_eq!(volume_suffix(999), ".999");
        assert_eq!(volume_suffix(1000), ".1000");
    }

    #[test]
    fn test_roundtrip_across_three_volumes() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
        let first = write_split(&dir, 400, &data);

        assert_eq!(std::fs::metadata(dir.path().join("archive.7z.001")).unwrap().len(), 400);
        assert_eq!(std::fs::metadata(dir.path().join("archive.7z.002")).unwrap().len(), 400);
        assert_eq!(std::fs::metadata(dir.path().join("archive.7z.003")).unwrap().len(), 200);

        let mut reader = MultiVolumeReader::open(&first).unwrap();
        assert_eq!(reader.len(), 1000);

        let mut back = Vec::new();
        reader.read_to_end(&mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_seek_into_middle_volume() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
        let first = write_split(&dir, 400, &data);

        let mut reader = MultiVolumeReader::open(&first).unwrap();
        reader.seek(SeekFrom::Start(450)).unwrap();

        let mut buf = [0u8; 10];
        reader.read_exact(&mut buf).unwrap();
        let expected: Vec<u8> = (450..460u32).map(|i| (i % 256) as u8).collect();
        assert_eq!(buf.as_slice(), expected.as_slice());
    }

    #[test]
    fn test_read_crossing_volume_boundary() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
        let first = write_split(&dir, 400, &data);

        let mut reader = MultiVolumeReader::open(&first).unwrap();
        reader.seek(SeekFrom::Start(395)).unwrap();

        let mut buf = [0u8; 10];
        reader.read_exact(&mut buf).unwrap();
        let expected: Vec<u8> = (395..405u32).map(|i| (i % 256) as u8).collect();
        assert_eq!(buf.as_slice(), expected.as_slice());
    }

    #[test]
    fn test_partial_read_at_final_volume() {
        let dir = TempDir::new().unwrap();
        let first = write_split(&dir, 400, &[7u8; 500]);

        let mut reader = MultiVolumeReader::open(&first).unwrap();
        reader.seek(SeekFrom::Start(490)).unwrap();

        let mut buf = [0u8; 64];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(n, 10);
    }

    #[test]
    fn test_discovery_stops_at_missing_volume() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.bin.001"), [1u8; 100]).unwrap();
        std::fs::write(dir.path().join("a.bin.002"), [2u8; 60]).unwrap();
        // .004 exists but is unreachable without .003.
        std::fs::write(dir.path().join("a.bin.004"), [4u8; 10]).unwrap();

        let reader = MultiVolumeReader::open(dir.path().join("a.bin.001")).unwrap();
        assert_eq!(reader.len(), 160);
        assert_eq!(reader.volume_paths().len(), 2);
    }

    #[test]
    fn test_open_requires_numeric_suffix() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("plain.7z"), [0u8; 10]).unwrap();
        assert!(MultiVolumeReader::open(dir.path().join("plain.7z")).is_err());
    }

    #[test]
    fn test_writer_presizes_volumes() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("out.7z");
        let mut writer = MultiVolumeWriter::create(&base, 400).unwrap();
        writer.write_all(&[9u8; 10]).unwrap();

        // Before finish the volume keeps its pre-allocated size.
        assert_eq!(std::fs::metadata(dir.path().join("out.7z.001")).unwrap().len(), 400);

        writer.finish().unwrap();
        assert_eq!(std::fs::metadata(dir.path().join("out.7z.001")).unwrap().len(), 10);
    }

    #[test]
    fn test_writer_seek_back_for_header_rewrite() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("out.7z");
        let mut writer = MultiVolumeWriter::create(&base, 400).unwrap();
        writer.write_all(&[0xEEu8; 500]).unwrap();

        writer.seek(SeekFrom::Start(0)).unwrap();
        writer.write_all(b"HEAD").unwrap();
        writer.finish().unwrap();

        assert_eq!(std::fs::metadata(dir.path().join("out.7z.002")).unwrap().len(), 100);

        let mut reader = MultiVolumeReader::open(dir.path().join("out.7z.001")).unwrap();
        assert_eq!(reader.len(), 500);

        let mut head = [0u8; 4];
        reader.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"HEAD");
    }

    #[test]
    fn test_writer_rejects_zero_volume_size() {
        let dir = TempDir::new().unwrap();
        assert!(MultiVolumeWriter::create(dir.path().join("x"), 0).is_err());
    }
}
