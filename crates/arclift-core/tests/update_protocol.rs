//! End-to-end update protocol tests against a scripted engine.

#![allow(clippy::unwrap_used)]

mod common;

use std::io::Cursor;

use arclift_core::ArchiveError;
use arclift_core::ArchiveFormat;
use arclift_core::ArchiveWriter;
use arclift_core::CompressionLevel;
use arclift_core::CompressionMethod;
use arclift_core::Modifications;
use arclift_core::NoopEvents;
use arclift_core::engine::ParamValue;
use arclift_core::engine::SourceStream;
use arclift_core::events::Flow;
use arclift_core::events::UpdateEvents;
use arclift_core::io::StreamTarget;
use common::FakeItem;
use common::SEVENZ_SIGNATURE;
use common::Script;
use common::scripted_registry;
use common::write_signature_file;
use tempfile::TempDir;

fn find_prop(props: &[(String, ParamValue)], key: &str) -> Option<ParamValue> {
    props.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
}

#[derive(Default)]
struct CollectingEvents {
    started: Vec<String>,
    finished: usize,
    progress: Vec<(u8, u8)>,
    cancel_at: Option<usize>,
}

impl UpdateEvents for CollectingEvents {
    fn on_item_start(&mut self, name: &str, _percent: u8) -> Flow {
        self.started.push(name.to_string());
        if self.cancel_at == Some(self.started.len()) {
            Flow::Cancel
        } else {
            Flow::Continue
        }
    }

    fn on_item_finished(&mut self) {
        self.finished += 1;
    }

    fn on_progress(&mut self, percent: u8, delta: u8) {
        self.progress.push((percent, delta));
    }
}

#[test]
fn test_compress_files_packs_sources() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("alpha.txt"), b"alpha bytes").unwrap();
    std::fs::write(src.join("beta.txt"), b"beta").unwrap();

    let (registry, record) = scripted_registry(Script::new(Vec::new()));
    let writer = ArchiveWriter::new_in(registry, ArchiveFormat::SevenZip);

    let archive = dir.path().join("out.7z");
    let mut events = CollectingEvents::default();
    let report = writer
        .compress_files(
            &archive,
            &[src.join("alpha.txt"), src.join("beta.txt")],
            &mut events,
        )
        .unwrap();

    assert_eq!(report.files_added, 2);
    assert_eq!(report.bytes_read, 11 + 4);
    assert!(report.is_clean());
    assert!(archive.exists());
    assert!(std::fs::metadata(&archive).unwrap().len() > 0);

    let recorded = record.lock().unwrap();
    assert_eq!(recorded.packed_names, vec!["alpha.txt", "beta.txt"]);
    assert_eq!(recorded.packed_data[0], b"alpha bytes");
    assert_eq!(recorded.packed_data[1], b"beta");

    assert_eq!(events.started, vec!["alpha.txt", "beta.txt"]);
    assert_eq!(events.finished, 2);
}

#[test]
fn test_level_and_method_reach_the_engine() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("f.txt"), b"data").unwrap();

    let (registry, record) = scripted_registry(Script::new(Vec::new()));
    let writer = ArchiveWriter::new_in(registry, ArchiveFormat::SevenZip)
        .level(CompressionLevel::Ultra)
        .method(CompressionMethod::Lzma2);

    writer
        .compress_files(
            dir.path().join("out.7z"),
            &[dir.path().join("f.txt")],
            &mut NoopEvents,
        )
        .unwrap();

    let recorded = record.lock().unwrap();
    assert_eq!(find_prop(&recorded.set_properties, "x"), Some(ParamValue::U32(9)));
    assert_eq!(
        find_prop(&recorded.set_properties, "0"),
        Some(ParamValue::Str("LZMA2".to_string()))
    );
}

#[test]
fn test_reserved_custom_parameter_warns_on_report() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("f.txt"), b"data").unwrap();

    let (registry, _) = scripted_registry(Script::new(Vec::new()));
    let writer =
        ArchiveWriter::new_in(registry, ArchiveFormat::SevenZip).custom_param("x", "9");

    let report = writer
        .compress_files(
            dir.path().join("out.7z"),
            &[dir.path().join("f.txt")],
            &mut NoopEvents,
        )
        .unwrap();

    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("\"x\""));
}

#[test]
fn test_multivolume_output_splits_and_truncates() {
    let dir = TempDir::new().unwrap();
    // 250 bytes of payload turn into 254 container bytes (length prefix).
    std::fs::write(dir.path().join("big.bin"), [0x5Au8; 250]).unwrap();

    let (registry, _) = scripted_registry(Script::new(Vec::new()));
    let writer = ArchiveWriter::new_in(registry, ArchiveFormat::SevenZip).volume_size(100);

    let archive = dir.path().join("big.7z");
    writer
        .compress_files(&archive, &[dir.path().join("big.bin")], &mut NoopEvents)
        .unwrap();

    assert_eq!(std::fs::metadata(dir.path().join("big.7z.001")).unwrap().len(), 100);
    assert_eq!(std::fs::metadata(dir.path().join("big.7z.002")).unwrap().len(), 100);
    assert_eq!(std::fs::metadata(dir.path().join("big.7z.003")).unwrap().len(), 54);
}

#[test]
fn test_multivolume_output_requires_sevenz() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("f.txt"), b"data").unwrap();

    let (registry, _) = scripted_registry(Script::new(Vec::new()));
    let writer = ArchiveWriter::new_in(registry, ArchiveFormat::Zip).volume_size(100);

    let err = writer
        .compress_files(
            dir.path().join("out.zip"),
            &[dir.path().join("f.txt")],
            &mut NoopEvents,
        )
        .unwrap_err();
    assert!(matches!(err, ArchiveError::MultiVolumeUnsupported { .. }));
}

#[test]
fn test_compress_directory_recurses() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("tree");
    std::fs::create_dir_all(root.join("nested")).unwrap();
    std::fs::write(root.join("top.txt"), b"top").unwrap();
    std::fs::write(root.join("nested").join("leaf.txt"), b"leaf").unwrap();

    let (registry, record) = scripted_registry(Script::new(Vec::new()));
    let writer = ArchiveWriter::new_in(registry, ArchiveFormat::SevenZip);

    let report = writer
        .compress_directory(dir.path().join("tree.7z"), root, &mut NoopEvents)
        .unwrap();

    assert_eq!(report.files_added, 2);
    let recorded = record.lock().unwrap();
    assert!(recorded.packed_names.contains(&"nested".to_string()));
    assert!(recorded.packed_names.contains(&"top.txt".to_string()));
    assert!(recorded.packed_names.contains(&"nested/leaf.txt".to_string()));
    assert_eq!(recorded.packed_dirs.iter().filter(|&&d| d).count(), 1);
}

#[test]
fn test_compress_stream_uses_default_item_name() {
    let (registry, record) = scripted_registry(Script::new(Vec::new()));
    let writer = ArchiveWriter::new_in(registry, ArchiveFormat::GZip)
        .default_item_name("report.txt");

    let mut target = StreamTarget(Cursor::new(Vec::new()));
    let report = writer
        .compress_stream(
            Cursor::new(b"stream payload".to_vec()),
            &mut target,
            &mut NoopEvents,
        )
        .unwrap();

    assert_eq!(report.files_added, 1);
    assert_eq!(report.bytes_read, 14);
    assert!(!target.0.get_ref().is_empty());

    let recorded = record.lock().unwrap();
    assert_eq!(recorded.packed_names, vec!["report.txt"]);
    assert_eq!(recorded.packed_data[0], b"stream payload");
}

#[test]
fn test_compress_stream_dict_keeps_order_and_directories() {
    let (registry, record) = scripted_registry(Script::new(Vec::new()));
    let writer = ArchiveWriter::new_in(registry, ArchiveFormat::SevenZip);

    let entries: Vec<(String, Option<Box<dyn SourceStream>>)> = vec![
        ("docs".to_string(), None),
        (
            "docs/a.txt".to_string(),
            Some(Box::new(Cursor::new(b"AAAA".to_vec()))),
        ),
        (
            "docs/b.txt".to_string(),
            Some(Box::new(Cursor::new(b"BB".to_vec()))),
        ),
    ];

    let mut target = StreamTarget(Cursor::new(Vec::new()));
    let report = writer
        .compress_stream_dict(entries, &mut target, &mut NoopEvents)
        .unwrap();

    // The directory entry carries no data and is not a "file added".
    assert_eq!(report.files_added, 2);

    let recorded = record.lock().unwrap();
    assert_eq!(recorded.packed_names, vec!["docs", "docs/a.txt", "docs/b.txt"]);
    assert_eq!(recorded.packed_dirs, vec![true, false, false]);
    assert_eq!(recorded.packed_data, vec![b"AAAA".to_vec(), b"BB".to_vec()]);
}

#[test]
fn test_append_copies_existing_entries() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("existing.7z");
    write_signature_file(&archive, SEVENZ_SIGNATURE);
    std::fs::write(dir.path().join("new.txt"), b"fresh").unwrap();

    let script = Script::new(vec![
        FakeItem::file("old1.txt", b"old1"),
        FakeItem::file("old2.txt", b"old2"),
    ]);
    let (registry, record) = scripted_registry(script);
    let writer = ArchiveWriter::new_in(registry, ArchiveFormat::SevenZip);

    let report = writer
        .append_files(&archive, &[dir.path().join("new.txt")], &mut NoopEvents)
        .unwrap();

    assert_eq!(report.files_added, 1);

    let recorded = record.lock().unwrap();
    assert_eq!(recorded.copied_indexes, vec![0, 1]);
    assert_eq!(recorded.packed_names, vec!["new.txt"]);
    drop(recorded);

    // The archive was rewritten through the temp file.
    assert!(archive.exists());
    assert!(!dir.path().join("existing.7z.~").exists());
    assert!(!registry.is_loaded());
}

#[test]
fn test_modify_renames_and_deletes_without_recompression() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("edit.7z");
    write_signature_file(&archive, SEVENZ_SIGNATURE);

    let script = Script::new(vec![
        FakeItem::file("keep.txt", b"k"),
        FakeItem::file("drop.txt", b"d"),
        FakeItem::file("old-name.txt", b"o"),
    ]);
    let (registry, record) = scripted_registry(script);
    let writer = ArchiveWriter::new_in(registry, ArchiveFormat::SevenZip);

    let changes = Modifications::new()
        .delete(1)
        .rename(2, "new-name.txt");
    let report = writer.modify(&archive, changes, &mut NoopEvents).unwrap();
    assert!(report.is_clean());

    let recorded = record.lock().unwrap();
    // Two surviving entries, copied from source indexes 0 and 2.
    assert_eq!(recorded.copied_indexes, vec![0, 2]);
    // Only the renamed slot supplied new properties.
    assert_eq!(recorded.packed_names, vec!["new-name.txt"]);
}

#[test]
fn test_modify_requires_capable_engine() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("edit.7z");
    write_signature_file(&archive, SEVENZ_SIGNATURE);

    let record = std::sync::Arc::default();
    let registry = Box::leak(Box::new(arclift_core::EngineRegistry::new(Box::new(
        common::FakeProvider {
            script: Script::new(vec![FakeItem::file("x", b"x")]),
            record,
            major: 4,
        },
    ))));

    let writer = ArchiveWriter::new_in(registry, ArchiveFormat::SevenZip);
    let err = writer
        .modify(&archive, Modifications::new().delete(0), &mut NoopEvents)
        .unwrap_err();
    assert!(matches!(err, ArchiveError::ModifyUnsupported));
}

#[test]
fn test_modify_rejects_out_of_range_index() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("edit.7z");
    write_signature_file(&archive, SEVENZ_SIGNATURE);

    let script = Script::new(vec![FakeItem::file("only.txt", b"x")]);
    let (registry, _) = scripted_registry(script);
    let writer = ArchiveWriter::new_in(registry, ArchiveFormat::SevenZip);

    let err = writer
        .modify(&archive, Modifications::new().delete(9), &mut NoopEvents)
        .unwrap_err();
    assert!(matches!(err, ArchiveError::InvalidParameter { .. }));
}

#[test]
fn test_cancel_during_compression() {
    let dir = TempDir::new().unwrap();
    for name in ["a.txt", "b.txt", "c.txt"] {
        std::fs::write(dir.path().join(name), b"data").unwrap();
    }

    let (registry, _) = scripted_registry(Script::new(Vec::new()));
    let writer = ArchiveWriter::new_in(registry, ArchiveFormat::SevenZip);

    let mut events = CollectingEvents {
        cancel_at: Some(2),
        ..CollectingEvents::default()
    };
    let report = writer
        .compress_files(
            dir.path().join("out.7z"),
            &[
                dir.path().join("a.txt"),
                dir.path().join("b.txt"),
                dir.path().join("c.txt"),
            ],
            &mut events,
        )
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.files_added, 1);
}

#[test]
fn test_update_progress_is_monotonic() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("big.bin"), [7u8; 333]).unwrap();

    let (registry, _) = scripted_registry(Script::new(Vec::new()));
    let writer = ArchiveWriter::new_in(registry, ArchiveFormat::SevenZip);

    let mut events = CollectingEvents::default();
    writer
        .compress_files(
            dir.path().join("out.7z"),
            &[dir.path().join("big.bin")],
            &mut events,
        )
        .unwrap();

    let mut last = 0u8;
    for &(percent, delta) in &events.progress {
        assert!(percent >= last);
        assert_eq!(percent - last, delta);
        last = percent;
    }
    assert_eq!(last, 100);
}

#[test]
fn test_missing_source_file_aborts() {
    let dir = TempDir::new().unwrap();

    let (registry, _) = scripted_registry(Script::new(Vec::new()));
    let writer = ArchiveWriter::new_in(registry, ArchiveFormat::SevenZip);

    let err = writer
        .compress_files(
            dir.path().join("out.7z"),
            &[dir.path().join("ghost.txt")],
            &mut NoopEvents,
        )
        .unwrap_err();
    assert!(matches!(err, ArchiveError::Io(_)));
}
