//! Archive entry metadata.

use std::time::SystemTime;

use crate::engine::InArchive;
use crate::engine::ItemProp;

/// Placeholder used when the archive metadata carries no entry path.
pub(crate) const NO_NAME: &str = "[no name]";

/// One item of an opened archive.
///
/// Populated once per open by sweeping the native engine's item
/// properties; immutable afterwards and stale once the archive handle
/// closes.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveEntry {
    /// Index in the archive file table.
    pub index: u32,
    /// Entry path as stored in the archive.
    pub path: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Raw attribute bits as stored in the archive.
    pub attributes: u32,
    /// Whether the entry is a directory.
    pub is_directory: bool,
    /// Whether the entry data is encrypted.
    pub is_encrypted: bool,
    /// CRC of the entry data, zero when absent.
    pub crc: u32,
    /// Compression method name reported by the engine.
    pub method: String,
    /// Entry comment, empty when absent.
    pub comment: String,
    /// Last modification time, when recorded.
    pub modified: Option<SystemTime>,
    /// Creation time, when recorded.
    pub created: Option<SystemTime>,
    /// Last access time, when recorded.
    pub accessed: Option<SystemTime>,
}

impl ArchiveEntry {
    /// Reads the entry at `index` from an opened archive.
    pub(crate) fn read(archive: &mut dyn InArchive, index: u32) -> Self {
        Self {
            index,
            path: archive.item_property(index, ItemProp::Path).str_or(NO_NAME),
            size: archive.item_property(index, ItemProp::Size).u64_or(0),
            attributes: archive.item_property(index, ItemProp::Attributes).u32_or(0),
            is_directory: archive
                .item_property(index, ItemProp::IsDirectory)
                .bool_or(false),
            is_encrypted: archive
                .item_property(index, ItemProp::Encrypted)
                .bool_or(false),
            crc: archive.item_property(index, ItemProp::Crc).u32_or(0),
            method: archive.item_property(index, ItemProp::Method).str_or(""),
            comment: archive.item_property(index, ItemProp::Comment).str_or(""),
            modified: archive.item_property(index, ItemProp::LastWriteTime).time(),
            created: archive.item_property(index, ItemProp::CreationTime).time(),
            accessed: archive.item_property(index, ItemProp::LastAccessTime).time(),
        }
    }

    /// Whether the archive stored no usable path for this entry.
    #[must_use]
    pub fn is_nameless(&self) -> bool {
        self.path.is_empty() || self.path == NO_NAME
    }

    /// The last path component, for display.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(self.path.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with_path(path: &str) -> ArchiveEntry {
        ArchiveEntry {
            index: 0,
            path: path.to_string(),
            size: 0,
            attributes: 0,
            is_directory: false,
            is_encrypted: false,
            crc: 0,
            method: String::new(),
            comment: String::new(),
            modified: None,
            created: None,
            accessed: None,
        }
    }

    #[test]
    fn test_file_name_takes_last_component() {
        assert_eq!(entry_with_path("a/b/c.txt").file_name(), "c.txt");
        assert_eq!(entry_with_path("a\\b\\c.txt").file_name(), "c.txt");
        assert_eq!(entry_with_path("plain.txt").file_name(), "plain.txt");
    }

    #[test]
    fn test_nameless_detection() {
        assert!(entry_with_path("").is_nameless());
        assert!(entry_with_path(NO_NAME).is_nameless());
        assert!(!entry_with_path("x").is_nameless());
    }
}
