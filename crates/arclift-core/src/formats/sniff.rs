//! Archive format detection from raw bytes.
//!
//! Formats are identified by signature, never by file extension: a 21-byte
//! window from the start of the source is matched against the known
//! signature table, followed by positional probes for disk-image formats,
//! a trailing-zero-block heuristic for tar, and a bounded scan for archives
//! embedded behind a self-extracting executable stub.

use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;

use crate::error::ArchiveError;
use crate::error::Result;
use crate::formats::ArchiveFormat;

/// Size of the signature window read from the source.
///
/// 21 bytes is the length of the longest known signature (the Debian
/// package magic).
pub const SIGNATURE_WINDOW: usize = 21;

/// How far into the source the embedded-archive scan looks.
const SFX_SCAN_LIMIT: u64 = 256 * 1024;

/// Size of the trailing window inspected by the tar heuristic.
const TAIL_WINDOW: u64 = 1024;

/// Candidate offsets of the ISO-9660 volume descriptor.
const ISO_OFFSETS: [u64; 3] = [0x8001, 0x8801, 0x9001];

/// Offset of the HFS volume header.
const HFS_OFFSET: u64 = 0x400;

/// Legacy compound-document signature. Not an archive by itself, but
/// installer payloads wrapped in it behave like cabinets.
const COMPOUND_SIGNATURE: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Known signatures, longest first so that short prefixes (`MZ`, the
/// one-byte dmg marker) cannot shadow more specific matches.
const SIGNATURES: &[(&[u8], ArchiveFormat)] = &[
    (b"!<arch>\x0adebian-binary", ArchiveFormat::Deb),
    (&[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x01, 0x00], ArchiveFormat::Rar),
    (&[0x4D, 0x53, 0x57, 0x49, 0x4D, 0x00, 0x00, 0x00], ArchiveFormat::Wim),
    (b"conectix", ArchiveFormat::Vhd),
    (&[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00], ArchiveFormat::Rar4),
    (&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C], ArchiveFormat::SevenZip),
    (&[0x5D, 0x00, 0x00, 0x40, 0x00], ArchiveFormat::Lzma),
    (b"CD001", ArchiveFormat::Iso),
    (&[0xFD, 0x37, 0x7A, 0x58, 0x5A], ArchiveFormat::Xz),
    (b"ustar", ArchiveFormat::Tar),
    (&[0x50, 0x4B, 0x03, 0x04], ArchiveFormat::Zip),
    (b"MSCF", ArchiveFormat::Cab),
    (b"ITSF", ArchiveFormat::Chm),
    (&[0xED, 0xAB, 0xEE, 0xDB], ArchiveFormat::Rpm),
    (b"xar!", ArchiveFormat::Xar),
    (&[0x7F, 0x45, 0x4C, 0x46], ArchiveFormat::Elf),
    (&[0x1F, 0x8B, 0x08], ArchiveFormat::GZip),
    (&[0x2D, 0x6C, 0x68], ArchiveFormat::Lzh),
    (&[0x1F, 0x9D, 0x90], ArchiveFormat::Lzw),
    (b"BZh", ArchiveFormat::BZip2),
    (b"FLV", ArchiveFormat::Flv),
    (b"FWS", ArchiveFormat::Swf),
    (&[0x60, 0xEA], ArchiveFormat::Arj),
    (&[0x48, 0x2B], ArchiveFormat::Hfs),
    (b"MZ", ArchiveFormat::Pe),
    (&[0x78], ArchiveFormat::Dmg),
];

/// Signatures searched for behind a self-extracting stub.
const EMBEDDED_SIGNATURES: &[(&[u8], ArchiveFormat)] = &[
    (&[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x01, 0x00], ArchiveFormat::Rar),
    (&[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00], ArchiveFormat::Rar4),
    (&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C], ArchiveFormat::SevenZip),
    (&[0x50, 0x4B, 0x03, 0x04], ArchiveFormat::Zip),
    (b"MSCF", ArchiveFormat::Cab),
    (&[0x60, 0xEA], ArchiveFormat::Arj),
];

/// Outcome of a successful sniff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SniffResult {
    /// The identified format.
    pub format: ArchiveFormat,
    /// Byte offset at which the archive starts. Nonzero only for archives
    /// appended behind an executable stub.
    pub offset: u64,
    /// Whether the archive was found behind a PE executable wrapper.
    pub is_sfx: bool,
}

/// Identifies the archive format of a seekable byte source.
///
/// The source must be at least [`SIGNATURE_WINDOW`] bytes long; shorter
/// sources are rejected before any scanning. On success the source's
/// position is unspecified; the caller is expected to seek before use.
///
/// The trailing-zero tar heuristic can misclassify non-tar files that end
/// in a long zero run. It is attempted only after every signature probe has
/// failed, and is a compatibility behavior, not a guarantee.
///
/// # Errors
///
/// [`ArchiveError::UnsniffableSource`] when the source is too short, an
/// I/O error when reading fails, and [`ArchiveError::InvalidSignature`]
/// when no probe matches.
pub fn sniff_format<R: Read + Seek + ?Sized>(source: &mut R) -> Result<SniffResult> {
    let len = source.seek(SeekFrom::End(0))?;

    if len < SIGNATURE_WINDOW as u64 {
        return Err(ArchiveError::UnsniffableSource {
            reason: format!("source is {len} bytes, need at least {SIGNATURE_WINDOW}"),
        });
    }

    let window = read_window(source, 0)?;
    let mut suspected = None;

    if window.starts_with(COMPOUND_SIGNATURE) {
        suspected = Some(ArchiveFormat::Cab);
    }

    for (signature, format) in SIGNATURES {
        if !window.starts_with(signature) {
            continue;
        }

        if *format == ArchiveFormat::Pe {
            // Self-extracting archives are PE files with the payload
            // appended, so an executable header alone is not an answer yet.
            suspected = Some(ArchiveFormat::Pe);
            break;
        }

        return Ok(SniffResult {
            format: *format,
            offset: 0,
            is_sfx: false,
        });
    }

    if let Some(format) = probe_fixed_offsets(source, len)? {
        return Ok(SniffResult {
            format,
            offset: 0,
            is_sfx: false,
        });
    }

    if suspected.is_none() && is_zero_tail(source, len)? {
        return Ok(SniffResult {
            format: ArchiveFormat::Tar,
            offset: 0,
            is_sfx: false,
        });
    }

    if suspected.is_none() || suspected == Some(ArchiveFormat::Pe) {
        if let Some((format, offset)) = scan_embedded(source, len)? {
            return Ok(SniffResult {
                format,
                offset,
                is_sfx: suspected == Some(ArchiveFormat::Pe),
            });
        }
    }

    suspected.map_or(Err(ArchiveError::InvalidSignature), |format| {
        Ok(SniffResult {
            format,
            offset: 0,
            is_sfx: false,
        })
    })
}

/// Reads a signature window starting at `offset`.
fn read_window<R: Read + Seek + ?Sized>(source: &mut R, offset: u64) -> Result<[u8; SIGNATURE_WINDOW]> {
    let mut window = [0u8; SIGNATURE_WINDOW];
    source.seek(SeekFrom::Start(offset))?;
    source.read_exact(&mut window)?;
    Ok(window)
}

/// Probes disk-image signatures at their fixed candidate offsets.
fn probe_fixed_offsets<R: Read + Seek + ?Sized>(
    source: &mut R,
    len: u64,
) -> Result<Option<ArchiveFormat>> {
    for offset in ISO_OFFSETS {
        if offset + SIGNATURE_WINDOW as u64 > len {
            continue;
        }
        if read_window(source, offset)?.starts_with(b"CD001") {
            return Ok(Some(ArchiveFormat::Iso));
        }
    }

    if HFS_OFFSET + SIGNATURE_WINDOW as u64 <= len
        && read_window(source, HFS_OFFSET)?.starts_with(&[0x48, 0x2B])
    {
        return Ok(Some(ArchiveFormat::Hfs));
    }

    Ok(None)
}

/// Tar archives end in at least two zero blocks; a fully zero trailing
/// kilobyte with no other signature is taken as tar.
fn is_zero_tail<R: Read + Seek + ?Sized>(source: &mut R, len: u64) -> Result<bool> {
    if len < TAIL_WINDOW {
        return Ok(false);
    }

    let mut tail = vec![0u8; TAIL_WINDOW as usize];
    source.seek(SeekFrom::Start(len - TAIL_WINDOW))?;
    source.read_exact(&mut tail)?;
    Ok(tail.iter().all(|&b| b == 0))
}

/// Scans the head of the source for an embedded archive signature and
/// returns the first match with its byte offset.
fn scan_embedded<R: Read + Seek + ?Sized>(
    source: &mut R,
    len: u64,
) -> Result<Option<(ArchiveFormat, u64)>> {
    let scan_len = len.min(SFX_SCAN_LIMIT) as usize;
    let mut head = vec![0u8; scan_len];
    source.seek(SeekFrom::Start(0))?;
    source.read_exact(&mut head)?;

    for position in 0..scan_len {
        let rest = &head[position..];
        for (signature, format) in EMBEDDED_SIGNATURES {
            if rest.starts_with(signature) {
                return Ok(Some((*format, position as u64)));
            }
        }
    }

    Ok(None)
}
