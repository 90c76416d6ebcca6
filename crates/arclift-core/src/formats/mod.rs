//! Archive format identification and capabilities.

pub mod sniff;

pub use sniff::SniffResult;
pub use sniff::sniff_format;

/// Archive formats known to the native engine.
///
/// Every variant carries a stable class identifier (see [`ArchiveFormat::class_id`])
/// used to request the corresponding handler from the native factory, plus a
/// set of capability flags. Formats without a `can_compress` capability are
/// extract-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ArchiveFormat {
    /// 7-zip archive format.
    SevenZip,
    /// Zip archive format.
    Zip,
    /// Gzip compressed stream.
    GZip,
    /// Bzip2 compressed stream.
    BZip2,
    /// Tar archive format.
    Tar,
    /// Xz compressed stream.
    Xz,
    /// Rar archive format, version 5.
    Rar,
    /// Rar archive format, version 4 or older.
    Rar4,
    /// ISO-9660 disk image.
    Iso,
    /// Microsoft cabinet archive.
    Cab,
    /// Arj archive format.
    Arj,
    /// Raw LZMA stream.
    Lzma,
    /// Lzh archive format.
    Lzh,
    /// LZW ("compress", `.Z`) stream.
    Lzw,
    /// Microsoft Compiled HTML Help.
    Chm,
    /// Debian software package.
    Deb,
    /// Rpm software package.
    Rpm,
    /// Windows Imaging disk image.
    Wim,
    /// Xar archive format.
    Xar,
    /// HFS disk image.
    Hfs,
    /// Apple disk image.
    Dmg,
    /// Flash video container.
    Flv,
    /// Shockwave Flash container.
    Swf,
    /// Windows PE executable (self-extracting archives are PE files).
    Pe,
    /// ELF executable.
    Elf,
    /// Microsoft virtual hard disk.
    Vhd,
    /// MSLZ compressed file.
    Mslz,
    /// UDF disk image.
    Udf,
    /// Mub format.
    Mub,
    /// SquashFS file system image.
    SquashFs,
}

impl ArchiveFormat {
    /// The class identifier byte of this format in the native engine's
    /// handler registry.
    ///
    /// The native factory addresses handlers by a 16-byte class id of the
    /// shape `23170f69-40c1-278a-1000-000110XX0000`; this is the `XX` byte.
    /// The values are fixed by the engine ABI and must not be changed.
    #[must_use]
    pub const fn class_id(self) -> u8 {
        match self {
            Self::Zip => 0x01,
            Self::BZip2 => 0x02,
            Self::Rar4 => 0x03,
            Self::Arj => 0x04,
            Self::Lzw => 0x05,
            Self::Lzh => 0x06,
            Self::SevenZip => 0x07,
            Self::Cab => 0x08,
            Self::Lzma => 0x0A,
            Self::Xz => 0x0C,
            Self::Rar => 0xCC,
            Self::SquashFs => 0xD2,
            Self::Mslz => 0xD5,
            Self::Flv => 0xD6,
            Self::Swf => 0xD7,
            Self::Vhd => 0xDC,
            Self::Pe => 0xDD,
            Self::Elf => 0xDE,
            Self::Udf => 0xE0,
            Self::Xar => 0xE1,
            Self::Mub => 0xE2,
            Self::Hfs => 0xE3,
            Self::Dmg => 0xE4,
            Self::Wim => 0xE6,
            Self::Iso => 0xE7,
            Self::Chm => 0xE9,
            Self::Rpm => 0xEB,
            Self::Deb => 0xEC,
            Self::Tar => 0xEE,
            Self::GZip => 0xEF,
        }
    }

    /// Whether the native engine can create archives of this format.
    #[must_use]
    pub const fn can_compress(self) -> bool {
        matches!(
            self,
            Self::SevenZip | Self::Zip | Self::GZip | Self::BZip2 | Self::Tar | Self::Xz
        )
    }

    /// Whether this format supports solid compression blocks.
    #[must_use]
    pub const fn supports_solid(self) -> bool {
        matches!(self, Self::SevenZip)
    }

    /// Whether this format supports encrypted headers.
    #[must_use]
    pub const fn supports_header_encryption(self) -> bool {
        matches!(self, Self::SevenZip)
    }

    /// Whether multi-volume output can be produced for this format.
    ///
    /// Only the primary container format supports splitting the output into
    /// fixed-size volumes; requesting it for any other format is rejected
    /// before the native engine is involved.
    #[must_use]
    pub const fn supports_multivolume_output(self) -> bool {
        matches!(self, Self::SevenZip)
    }

    /// Maps a file name extension (without the leading dot) to a format.
    ///
    /// The comparison is case-insensitive except for `Z` (LZW), which is
    /// conventionally uppercase. Returns `None` for unknown extensions.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        if ext == "Z" {
            return Some(Self::Lzw);
        }

        match ext.to_ascii_lowercase().as_str() {
            "7z" => Some(Self::SevenZip),
            "zip" => Some(Self::Zip),
            "gz" | "tgz" => Some(Self::GZip),
            "bz2" | "tbz" | "tbz2" => Some(Self::BZip2),
            "tar" => Some(Self::Tar),
            "xz" | "txz" => Some(Self::Xz),
            "rar" => Some(Self::Rar),
            "iso" => Some(Self::Iso),
            "cab" => Some(Self::Cab),
            "arj" => Some(Self::Arj),
            "lzma" => Some(Self::Lzma),
            "lzh" => Some(Self::Lzh),
            "chm" => Some(Self::Chm),
            "deb" => Some(Self::Deb),
            "rpm" => Some(Self::Rpm),
            "wim" => Some(Self::Wim),
            "xar" => Some(Self::Xar),
            "hfs" => Some(Self::Hfs),
            "dmg" => Some(Self::Dmg),
            "flv" => Some(Self::Flv),
            "swf" => Some(Self::Swf),
            "exe" | "dll" => Some(Self::Pe),
            "vhd" => Some(Self::Vhd),
            "udf" => Some(Self::Udf),
            "mub" => Some(Self::Mub),
            "squashfs" => Some(Self::SquashFs),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SevenZip => "7z",
            Self::Zip => "zip",
            Self::GZip => "gzip",
            Self::BZip2 => "bzip2",
            Self::Tar => "tar",
            Self::Xz => "xz",
            Self::Rar => "rar",
            Self::Rar4 => "rar4",
            Self::Iso => "iso",
            Self::Cab => "cab",
            Self::Arj => "arj",
            Self::Lzma => "lzma",
            Self::Lzh => "lzh",
            Self::Lzw => "lzw",
            Self::Chm => "chm",
            Self::Deb => "deb",
            Self::Rpm => "rpm",
            Self::Wim => "wim",
            Self::Xar => "xar",
            Self::Hfs => "hfs",
            Self::Dmg => "dmg",
            Self::Flv => "flv",
            Self::Swf => "swf",
            Self::Pe => "pe",
            Self::Elf => "elf",
            Self::Vhd => "vhd",
            Self::Mslz => "mslz",
            Self::Udf => "udf",
            Self::Mub => "mub",
            Self::SquashFs => "squashfs",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_extension_basic() {
        assert_eq!(ArchiveFormat::from_extension("7z"), Some(ArchiveFormat::SevenZip));
        assert_eq!(ArchiveFormat::from_extension("zip"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_extension("tar"), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::from_extension("rar"), Some(ArchiveFormat::Rar));
    }

    #[test]
    fn test_from_extension_case_insensitive() {
        assert_eq!(ArchiveFormat::from_extension("ZIP"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_extension("7Z"), Some(ArchiveFormat::SevenZip));
    }

    #[test]
    fn test_from_extension_lzw_is_case_sensitive() {
        assert_eq!(ArchiveFormat::from_extension("Z"), Some(ArchiveFormat::Lzw));
        assert_eq!(ArchiveFormat::from_extension("z"), None);
    }

    #[test]
    fn test_from_extension_unknown() {
        assert_eq!(ArchiveFormat::from_extension("txt"), None);
        assert_eq!(ArchiveFormat::from_extension(""), None);
    }

    #[test]
    fn test_compress_capability() {
        assert!(ArchiveFormat::SevenZip.can_compress());
        assert!(ArchiveFormat::Zip.can_compress());
        assert!(ArchiveFormat::Tar.can_compress());
        assert!(!ArchiveFormat::Rar.can_compress());
        assert!(!ArchiveFormat::Iso.can_compress());
        assert!(!ArchiveFormat::Pe.can_compress());
    }

    #[test]
    fn test_multivolume_output_is_sevenzip_only() {
        assert!(ArchiveFormat::SevenZip.supports_multivolume_output());
        assert!(!ArchiveFormat::Zip.supports_multivolume_output());
        assert!(!ArchiveFormat::Tar.supports_multivolume_output());
    }

    #[test]
    fn test_class_ids_are_distinct() {
        let all = [
            ArchiveFormat::SevenZip,
            ArchiveFormat::Zip,
            ArchiveFormat::GZip,
            ArchiveFormat::BZip2,
            ArchiveFormat::Tar,
            ArchiveFormat::Xz,
            ArchiveFormat::Rar,
            ArchiveFormat::Rar4,
            ArchiveFormat::Iso,
            ArchiveFormat::Cab,
            ArchiveFormat::Arj,
            ArchiveFormat::Lzma,
            ArchiveFormat::Lzh,
            ArchiveFormat::Lzw,
            ArchiveFormat::Chm,
            ArchiveFormat::Deb,
            ArchiveFormat::Rpm,
            ArchiveFormat::Wim,
            ArchiveFormat::Xar,
            ArchiveFormat::Hfs,
            ArchiveFormat::Dmg,
            ArchiveFormat::Flv,
            ArchiveFormat::Swf,
            ArchiveFormat::Pe,
            ArchiveFormat::Elf,
            ArchiveFormat::Vhd,
            ArchiveFormat::Mslz,
            ArchiveFormat::Udf,
            ArchiveFormat::Mub,
            ArchiveFormat::SquashFs,
        ];
        let mut ids: Vec<u8> = all.iter().map(|f| f.class_id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), all.len());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(ArchiveFormat::SevenZip.to_string(), "7z");
        assert_eq!(ArchiveFormat::Rar4.to_string(), "rar4");
        assert_eq!(ArchiveFormat::GZip.to_string(), "gzip");
    }
}
