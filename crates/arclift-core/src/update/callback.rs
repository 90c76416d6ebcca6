//! The update protocol state machine.
//!
//! Mirror of the extraction callback: the engine announces the total
//! source size, asks where each output item comes from, pulls properties
//! and source bytes, and reports a per-item result code. The plan decides
//! whether an output index is new data, a verbatim copy from the existing
//! archive, or a re-propertied (renamed) entry.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::engine::Abort;
use crate::engine::CallbackResult;
use crate::engine::ItemProp;
use crate::engine::PropValue;
use crate::engine::UpdateCallback;
use crate::engine::UpdateItemInfo;
use crate::entry::ArchiveEntry;
use crate::error::FailureKind;
use crate::error::ItemFailure;
use crate::events::Flow;
use crate::events::ProgressMeter;
use crate::events::UpdateEvents;
use crate::report::UpdateReport;

/// Windows directory attribute bit, the convention archives store.
pub(crate) const ATTR_DIRECTORY: u32 = 0x10;
/// Windows normal-file attribute bit.
pub(crate) const ATTR_NORMAL: u32 = 0x80;

/// Where one new item's bytes come from.
pub(crate) enum ItemSource {
    /// A file opened lazily when the engine asks for the stream.
    Disk(PathBuf),
    /// A caller-supplied stream, `None` for directory entries.
    Stream(Option<Box<dyn Read + Send>>),
}

/// One item to be packed.
pub(crate) struct UpdateItem {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub attributes: u32,
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
    pub source: ItemSource,
}

/// One surviving entry of an archive being modified in place.
pub(crate) struct ModifySlot {
    /// Index of the entry in the source archive.
    pub source_index: u32,
    /// New path when the entry is being renamed.
    pub new_name: Option<String>,
    /// Captured metadata of the source entry.
    pub entry: ArchiveEntry,
}

/// How output indexes map onto sources.
pub(crate) enum UpdatePlan {
    /// Every output item is new.
    Create { items: Vec<UpdateItem> },
    /// The first `existing` output indexes copy the old archive verbatim;
    /// the rest are new items.
    Append { existing: u32, items: Vec<UpdateItem> },
    /// Every output item copies an existing entry, possibly under a new
    /// name; deleted entries simply have no slot.
    Modify { slots: Vec<ModifySlot> },
}

impl UpdatePlan {
    /// Number of output items the engine will be asked to produce.
    pub(crate) fn output_count(&self) -> u32 {
        match self {
            Self::Create { items } => items.len() as u32,
            Self::Append { existing, items } => existing + items.len() as u32,
            Self::Modify { slots } => slots.len() as u32,
        }
    }

    fn new_item(&self, index: u32) -> Option<&UpdateItem> {
        match self {
            Self::Create { items } => items.get(index as usize),
            Self::Append { existing, items } => {
                index.checked_sub(*existing).and_then(|i| items.get(i as usize))
            }
            Self::Modify { .. } => None,
        }
    }

    fn new_item_mut(&mut self, index: u32) -> Option<&mut UpdateItem> {
        match self {
            Self::Create { items } => items.get_mut(index as usize),
            Self::Append { existing, items } => {
                index.checked_sub(*existing).and_then(|i| items.get_mut(i as usize))
            }
            Self::Modify { .. } => None,
        }
    }
}

pub(crate) struct UpdateSessionCallback<'a> {
    plan: UpdatePlan,
    events: &'a mut dyn UpdateEvents,
    password: Option<String>,
    meter: ProgressMeter,
    report: UpdateReport,
    cancelled: bool,
    planned_items: usize,
    done_items: usize,
    current_index: u32,
    current_is_new_file: bool,
    source: Option<Box<dyn Read + Send>>,
}

impl<'a> UpdateSessionCallback<'a> {
    pub(crate) fn new(
        plan: UpdatePlan,
        events: &'a mut dyn UpdateEvents,
        password: Option<String>,
        warnings: Vec<String>,
    ) -> Self {
        let planned_items = match &plan {
            UpdatePlan::Create { items } | UpdatePlan::Append { items, .. } => items.len(),
            UpdatePlan::Modify { slots } => slots.len(),
        };

        Self {
            plan,
            events,
            password,
            meter: ProgressMeter::new(),
            report: UpdateReport {
                warnings,
                ..UpdateReport::default()
            },
            cancelled: false,
            planned_items: planned_items.max(1),
            done_items: 0,
            current_index: 0,
            current_is_new_file: false,
            source: None,
        }
    }

    pub(crate) fn into_report(mut self) -> UpdateReport {
        self.report.cancelled = self.cancelled;
        self.report
    }

    pub(crate) const fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    fn percent_done(&self) -> u8 {
        ((self.done_items * 100 / self.planned_items).min(100)) as u8
    }

    fn record_failure(&mut self, index: u32, path: Option<PathBuf>, kind: FailureKind) {
        log::warn!("update item {index} failed: {kind}");
        self.report.failures.push(ItemFailure { index, path, kind });
    }
}

impl UpdateCallback for UpdateSessionCallback<'_> {
    fn set_total(&mut self, total: u64) {
        self.meter.set_total(total);
    }

    fn update_item_info(&mut self, index: u32) -> UpdateItemInfo {
        match &self.plan {
            UpdatePlan::Create { .. } => UpdateItemInfo {
                new_data: true,
                new_properties: true,
                index_in_archive: None,
            },
            UpdatePlan::Append { existing, .. } => {
                if index < *existing {
                    UpdateItemInfo {
                        new_data: false,
                        new_properties: false,
                        index_in_archive: Some(index),
                    }
                } else {
                    UpdateItemInfo {
                        new_data: true,
                        new_properties: true,
                        index_in_archive: None,
                    }
                }
            }
            UpdatePlan::Modify { slots } => slots.get(index as usize).map_or(
                UpdateItemInfo {
                    new_data: false,
                    new_properties: false,
                    index_in_archive: Some(index),
                },
                |slot| UpdateItemInfo {
                    new_data: false,
                    new_properties: slot.new_name.is_some(),
                    index_in_archive: Some(slot.source_index),
                },
            ),
        }
    }

    fn property(&mut self, index: u32, prop: ItemProp) -> PropValue {
        if let UpdatePlan::Modify { slots } = &self.plan {
            let Some(slot) = slots.get(index as usize) else {
                return PropValue::Empty;
            };
            let entry = &slot.entry;
            return match prop {
                ItemProp::Path => PropValue::Str(
                    slot.new_name.clone().unwrap_or_else(|| entry.path.clone()),
                ),
                ItemProp::IsDirectory => PropValue::Bool(entry.is_directory),
                ItemProp::Size => PropValue::U64(entry.size),
                ItemProp::Attributes => PropValue::U32(entry.attributes),
                ItemProp::CreationTime => entry.created.map_or(PropValue::Empty, PropValue::Time),
                ItemProp::LastAccessTime => {
                    entry.accessed.map_or(PropValue::Empty, PropValue::Time)
                }
                ItemProp::LastWriteTime => {
                    entry.modified.map_or(PropValue::Empty, PropValue::Time)
                }
                ItemProp::IsAnti => PropValue::Bool(false),
                ItemProp::Extension => PropValue::Str(extension_of(
                    slot.new_name.as_deref().unwrap_or(&entry.path),
                )),
                _ => PropValue::Empty,
            };
        }

        let Some(item) = self.plan.new_item(index) else {
            return PropValue::Empty;
        };

        match prop {
            ItemProp::Path => PropValue::Str(item.name.clone()),
            ItemProp::IsDirectory => PropValue::Bool(item.is_directory),
            ItemProp::Size => PropValue::U64(if item.is_directory { 0 } else { item.size }),
            ItemProp::Attributes => PropValue::U32(item.attributes),
            ItemProp::CreationTime => item.created.map_or(PropValue::Empty, PropValue::Time),
            ItemProp::LastAccessTime => item.accessed.map_or(PropValue::Empty, PropValue::Time),
            ItemProp::LastWriteTime => item.modified.map_or(PropValue::Empty, PropValue::Time),
            ItemProp::IsAnti => PropValue::Bool(false),
            ItemProp::Extension => PropValue::Str(extension_of(&item.name)),
            _ => PropValue::Empty,
        }
    }

    fn get_stream(&mut self, index: u32) -> CallbackResult<()> {
        if self.cancelled {
            return Err(Abort);
        }

        self.current_index = index;
        self.current_is_new_file = false;
        self.source = None;

        let Some(item) = self.plan.new_item_mut(index) else {
            return Ok(());
        };

        let name = item.name.clone();
        let is_directory = item.is_directory;

        let opened = match &mut item.source {
            ItemSource::Disk(path) => match File::open(&*path) {
                Ok(file) => Ok(Some(Box::new(file) as Box<dyn Read + Send>)),
                Err(err) => Err((path.clone(), err.to_string())),
            },
            ItemSource::Stream(stream) => Ok(stream.take()),
        };

        let source = match opened {
            Ok(source) => source,
            Err((path, reason)) => {
                // A vanished source file leaves a hole the engine cannot
                // paper over; the whole run stops.
                self.record_failure(index, Some(path), FailureKind::Io(reason));
                return Err(Abort);
            }
        };

        self.current_is_new_file = !is_directory;
        self.source = source;
        self.done_items += 1;

        let percent = self.percent_done();
        if self.events.on_item_start(&name, percent) == Flow::Cancel {
            self.cancelled = true;
            return Err(Abort);
        }

        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> CallbackResult<usize> {
        let Some(source) = &mut self.source else {
            return Ok(0);
        };

        match source.read(buf) {
            Ok(n) => {
                self.report.bytes_read += n as u64;
                if let Some((percent, delta)) = self.meter.advance(n as u64) {
                    self.events.on_progress(percent, delta);
                }
                Ok(n)
            }
            Err(err) => {
                let index = self.current_index;
                self.record_failure(index, None, FailureKind::Io(err.to_string()));
                Err(Abort)
            }
        }
    }

    fn set_operation_result(
        &mut self,
        result: crate::engine::OperationResult,
    ) -> CallbackResult<()> {
        self.source = None;

        if result == crate::engine::OperationResult::Ok {
            if self.current_is_new_file {
                self.report.files_added += 1;
            }
        } else {
            let index = self.current_index;
            self.record_failure(index, None, FailureKind::Engine(result));
        }

        self.events.on_item_finished();
        Ok(())
    }

    fn password(&mut self) -> (bool, Option<String>) {
        (self.password.is_some(), self.password.clone())
    }
}

fn extension_of(name: &str) -> String {
    name.rsplit(['/', '\\'])
        .next()
        .and_then(|file| file.rfind('.').map(|dot| file[dot + 1..].to_string()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("a/b/c.txt"), "txt");
        assert_eq!(extension_of("noext"), "");
        assert_eq!(extension_of("dir.d/file"), "");
    }

    #[test]
    fn test_plan_output_counts() {
        let create = UpdatePlan::Create { items: Vec::new() };
        assert_eq!(create.output_count(), 0);

        let append = UpdatePlan::Append {
            existing: 3,
            items: Vec::new(),
        };
        assert_eq!(append.output_count(), 3);
    }
}
