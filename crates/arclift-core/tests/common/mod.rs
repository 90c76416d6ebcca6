//! Scripted engine used by the protocol integration tests.
//!
//! The fake engine drives the extraction and update callbacks exactly the
//! way the native engine does — set-total first, then per item a stream
//! request, the item bytes, and a result code — while recording what the
//! sessions asked of it.

#![allow(dead_code, clippy::unwrap_used)]

use std::io::Read;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::SystemTime;

use arclift_core::ArchiveFormat;
use arclift_core::EngineRegistry;
use arclift_core::engine::CallbackResult;
use arclift_core::engine::Engine;
use arclift_core::engine::EngineError;
use arclift_core::engine::EngineProvider;
use arclift_core::engine::ExtractCallback;
use arclift_core::engine::InArchive;
use arclift_core::engine::ItemProp;
use arclift_core::engine::OperationResult;
use arclift_core::engine::OutArchive;
use arclift_core::engine::ParamValue;
use arclift_core::engine::PropValue;
use arclift_core::engine::SourceStream;
use arclift_core::engine::TargetStream;
use arclift_core::engine::UpdateCallback;
use arclift_core::error::ArchiveError;

/// One scripted archive item.
#[derive(Debug, Clone)]
pub struct FakeItem {
    pub path: String,
    pub data: Vec<u8>,
    pub is_dir: bool,
    pub method: String,
    pub result: OperationResult,
}

impl FakeItem {
    pub fn file(path: &str, data: &[u8]) -> Self {
        Self {
            path: path.to_string(),
            data: data.to_vec(),
            is_dir: false,
            method: "LZMA".to_string(),
            result: OperationResult::Ok,
        }
    }

    pub fn dir(path: &str) -> Self {
        Self {
            path: path.to_string(),
            data: Vec::new(),
            is_dir: true,
            method: String::new(),
            result: OperationResult::Ok,
        }
    }

    pub fn failing(path: &str, data: &[u8], result: OperationResult) -> Self {
        Self {
            result,
            ..Self::file(path, data)
        }
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = method.to_string();
        self
    }
}

pub fn fixed_mtime() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000)
}

/// Everything the fakes observed, shared with the test body.
#[derive(Debug, Default)]
pub struct Recorded {
    /// Index lists handed to `extract`, `None` for "all items".
    pub extract_indexes: Vec<Option<Vec<u32>>>,
    /// Whether test mode was requested.
    pub test_modes: Vec<bool>,
    /// Properties applied to the writer.
    pub set_properties: Vec<(String, ParamValue)>,
    /// Per output index: entry path supplied by the session.
    pub packed_names: Vec<String>,
    /// Per output index: directory flag supplied by the session.
    pub packed_dirs: Vec<bool>,
    /// Per output index: the bytes the session supplied.
    pub packed_data: Vec<Vec<u8>>,
    /// Output indexes that copied existing archive entries.
    pub copied_indexes: Vec<u32>,
}

pub type SharedRecord = Arc<Mutex<Recorded>>;

/// Scripted archive template.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub items: Vec<FakeItem>,
    /// `None` leaves the solid property unreported.
    pub solid: Option<bool>,
    /// Expected password; opening with anything else fails.
    pub password: Option<String>,
    /// Result code for one packed output index, to script update
    /// failures.
    pub failing_pack_index: Option<(u32, OperationResult)>,
    /// Chunk size the engine writes/reads item bytes in.
    pub chunk: usize,
}

impl Script {
    pub fn new(items: Vec<FakeItem>) -> Self {
        Self {
            items,
            solid: None,
            password: None,
            failing_pack_index: None,
            chunk: 4,
        }
    }

    pub fn solid(mut self, solid: bool) -> Self {
        self.solid = Some(solid);
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }
}

pub struct FakeArchive {
    script: Script,
    record: SharedRecord,
    out: FakeOutArchive,
    opened: bool,
}

impl InArchive for FakeArchive {
    fn open(
        &mut self,
        mut stream: Box<dyn SourceStream>,
        password: Option<&str>,
    ) -> Result<(), ArchiveError> {
        // The session must hand the stream positioned at the logical
        // archive start.
        let mut probe = [0u8; 2];
        stream.read(&mut probe).unwrap();

        if let Some(expected) = &self.script.password {
            if password != Some(expected.as_str()) {
                return Err(ArchiveError::WrongPassword);
            }
        }

        self.opened = true;
        Ok(())
    }

    fn item_count(&self) -> u32 {
        self.script.items.len() as u32
    }

    fn item_property(&mut self, index: u32, prop: ItemProp) -> PropValue {
        let Some(item) = self.script.items.get(index as usize) else {
            return PropValue::Empty;
        };

        match prop {
            ItemProp::Path => {
                if item.path.is_empty() {
                    PropValue::Empty
                } else {
                    PropValue::Str(item.path.clone())
                }
            }
            ItemProp::Size => PropValue::U64(item.data.len() as u64),
            ItemProp::IsDirectory => PropValue::Bool(item.is_dir),
            ItemProp::Encrypted => PropValue::Bool(false),
            ItemProp::Crc => PropValue::U32(0xDEAD_BEEF),
            ItemProp::Method => PropValue::Str(item.method.clone()),
            ItemProp::LastWriteTime => PropValue::Time(fixed_mtime()),
            _ => PropValue::Empty,
        }
    }

    fn archive_property(&mut self, prop: ItemProp) -> PropValue {
        match (prop, self.script.solid) {
            (ItemProp::Solid, Some(solid)) => PropValue::Bool(solid),
            _ => PropValue::Empty,
        }
    }

    fn extract(
        &mut self,
        indexes: Option<&[u32]>,
        test_only: bool,
        callback: &mut dyn ExtractCallback,
    ) -> Result<(), EngineError> {
        self.record
            .lock()
            .unwrap()
            .extract_indexes
            .push(indexes.map(<[u32]>::to_vec));
        self.record.lock().unwrap().test_modes.push(test_only);

        let list: Vec<u32> = match indexes {
            Some(indexes) => indexes.to_vec(),
            None => (0..self.item_count()).collect(),
        };

        let total: u64 = list
            .iter()
            .map(|&i| self.script.items[i as usize].data.len() as u64)
            .sum();
        callback.set_total(total);

        let mode = if test_only {
            arclift_core::engine::AskMode::Test
        } else {
            arclift_core::engine::AskMode::Extract
        };

        for &index in &list {
            let item = self.script.items[index as usize].clone();

            if callback.get_stream(index, mode).is_err() {
                return Err(EngineError::Aborted);
            }
            callback.prepare_operation(mode);

            for chunk in item.data.chunks(self.script.chunk.max(1)) {
                if callback.write(chunk).is_err() {
                    return Err(EngineError::Aborted);
                }
            }

            if callback.set_operation_result(item.result).is_err() {
                return Err(EngineError::Aborted);
            }
        }

        Ok(())
    }

    fn writer(&mut self) -> Option<&mut dyn OutArchive> {
        Some(&mut self.out)
    }

    fn close(&mut self) {
        self.opened = false;
    }
}

pub struct FakeOutArchive {
    record: SharedRecord,
    failing_pack_index: Option<(u32, OperationResult)>,
    chunk: usize,
}

impl OutArchive for FakeOutArchive {
    fn set_properties(&mut self, props: &[(String, ParamValue)]) -> Result<(), EngineError> {
        self.record
            .lock()
            .unwrap()
            .set_properties
            .extend(props.iter().cloned());
        Ok(())
    }

    fn update_items(
        &mut self,
        target: &mut dyn TargetStream,
        count: u32,
        callback: &mut dyn UpdateCallback,
    ) -> Result<(), EngineError> {
        let mut total = 0u64;
        for index in 0..count {
            if let PropValue::U64(size) = callback.property(index, ItemProp::Size) {
                total += size;
            }
        }
        callback.set_total(total);

        for index in 0..count {
            let info = callback.update_item_info(index);

            if !info.new_data {
                self.record
                    .lock()
                    .unwrap()
                    .copied_indexes
                    .push(info.index_in_archive.unwrap_or(index));
                if info.new_properties {
                    let name = callback.property(index, ItemProp::Path).str_or("");
                    self.record.lock().unwrap().packed_names.push(name);
                }
                continue;
            }

            let name = callback.property(index, ItemProp::Path).str_or("");
            let is_dir = callback.property(index, ItemProp::IsDirectory).bool_or(false);
            self.record.lock().unwrap().packed_names.push(name.clone());
            self.record.lock().unwrap().packed_dirs.push(is_dir);

            if callback.get_stream(index).is_err() {
                return Err(EngineError::Aborted);
            }

            // Directory entries have no content stream, so a real engine
            // packs no data for them; only files contribute packed data.
            if !is_dir {
                let mut data = Vec::new();
                let mut buf = vec![0u8; self.chunk.max(1)];
                loop {
                    match callback.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => data.extend_from_slice(&buf[..n]),
                        Err(_) => return Err(EngineError::Aborted),
                    }
                }

                // A crude container: length-prefixed entries, enough to give
                // the target real bytes.
                target
                    .write_all(&(data.len() as u32).to_le_bytes())
                    .map_err(|e| EngineError::Failed(e.to_string()))?;
                target
                    .write_all(&data)
                    .map_err(|e| EngineError::Failed(e.to_string()))?;
                self.record.lock().unwrap().packed_data.push(data);
            }

            let result = match self.failing_pack_index {
                Some((bad, code)) if bad == index => code,
                _ => OperationResult::Ok,
            };
            if callback.set_operation_result(result).is_err() {
                return Err(EngineError::Aborted);
            }
        }

        Ok(())
    }
}

pub struct FakeEngine {
    script: Script,
    record: SharedRecord,
    major: u32,
}

impl Engine for FakeEngine {
    fn create_reader(&self, _format: ArchiveFormat) -> Option<Box<dyn InArchive>> {
        Some(Box::new(FakeArchive {
            script: self.script.clone(),
            record: Arc::clone(&self.record),
            out: FakeOutArchive {
                record: Arc::clone(&self.record),
                failing_pack_index: self.script.failing_pack_index,
                chunk: self.script.chunk,
            },
            opened: false,
        }))
    }

    fn create_writer(&self, format: ArchiveFormat) -> Option<Box<dyn OutArchive>> {
        format.can_compress().then(|| {
            Box::new(FakeOutArchive {
                record: Arc::clone(&self.record),
                failing_pack_index: self.script.failing_pack_index,
                chunk: self.script.chunk,
            }) as Box<dyn OutArchive>
        })
    }

    fn major_version(&self) -> u32 {
        self.major
    }
}

pub struct FakeProvider {
    pub script: Script,
    pub record: SharedRecord,
    pub major: u32,
}

impl EngineProvider for FakeProvider {
    fn load(&self) -> Result<Box<dyn Engine>, ArchiveError> {
        Ok(Box::new(FakeEngine {
            script: self.script.clone(),
            record: Arc::clone(&self.record),
            major: self.major,
        }))
    }
}

/// A leaked registry backed by the scripted engine, plus the shared
/// record.
pub fn scripted_registry(script: Script) -> (&'static EngineRegistry, SharedRecord) {
    let record: SharedRecord = Arc::default();
    let registry = Box::leak(Box::new(EngineRegistry::new(Box::new(FakeProvider {
        script,
        record: Arc::clone(&record),
        major: 21,
    }))));
    (registry, record)
}

/// Writes a minimal file carrying `signature` so the sniffer classifies
/// it, padded well past the signature window.
pub fn write_signature_file(path: &std::path::Path, signature: &[u8]) {
    let mut bytes = signature.to_vec();
    bytes.resize(64, 0xA5);
    std::fs::write(path, bytes).unwrap();
}

pub const SEVENZ_SIGNATURE: &[u8] = &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];
pub const ZIP_SIGNATURE: &[u8] = &[0x50, 0x4B, 0x03, 0x04];
