//! COM bridge between the loaded engine and the protocol traits.
//!
//! The engine calls back into session code through vtable objects; the
//! shims here wrap the protocol traits of [`crate::engine`] in manually
//! laid out COM objects, and wrap the engine's own objects in the trait
//! implementations the sessions drive. All pointer arithmetic in this file
//! follows the engine's published interface layouts; nothing here may be
//! reordered.

#![allow(unsafe_code)]
#![allow(clippy::cast_possible_truncation)]

use std::ffi::c_void;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::mem::offset_of;
use std::path::Path;
use std::ptr::NonNull;
use std::ptr::null_mut;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;

use libloading::Library;

use crate::engine::AskMode;
use crate::engine::Engine;
use crate::engine::EngineError;
use crate::engine::ExtractCallback;
use crate::engine::InArchive;
use crate::engine::ItemProp;
use crate::engine::OperationResult;
use crate::engine::OutArchive;
use crate::engine::ParamValue;
use crate::engine::PropValue;
use crate::engine::SourceStream;
use crate::engine::TargetStream;
use crate::engine::UpdateCallback;
use crate::engine::ffi;
use crate::engine::ffi::ComPtr;
use crate::engine::ffi::CreateObjectFn;
use crate::engine::ffi::GetHandlerPropertyFn;
use crate::engine::ffi::Guid;
use crate::engine::ffi::Hresult;
use crate::engine::ffi::IUnknownVtbl;
use crate::engine::ffi::S_OK;
use crate::engine::native::FACTORY_SYMBOL;
use crate::engine::native::HANDLER_PROPERTY_SYMBOL;
use crate::error::ArchiveError;
use crate::error::Result;
use crate::formats::ArchiveFormat;

const VT_EMPTY: u16 = 0;
const VT_BSTR: u16 = 8;
const VT_BOOL: u16 = 11;
const VT_UI4: u16 = 19;
const VT_UI8: u16 = 21;
const VT_FILETIME: u16 = 64;

const VARIANT_TRUE: u64 = 0xFFFF;

/// 100-nanosecond intervals between 1601-01-01 and the unix epoch.
const FILETIME_UNIX_DIFF: u64 = 116_444_736_000_000_000;

/// Maximum header scan distance passed to the engine's open call.
const OPEN_CHECK_POSITION: u64 = 1 << 15;

#[link(name = "oleaut32")]
unsafe extern "system" {
    fn SysAllocStringLen(source: *const u16, len: u32) -> *mut u16;
    fn SysFreeString(bstr: *mut u16);
    fn SysStringLen(bstr: *mut u16) -> u32;
}

fn alloc_bstr(text: &str) -> *mut u16 {
    let wide: Vec<u16> = text.encode_utf16().collect();
    // SAFETY: the source buffer is valid for `len` characters.
    unsafe { SysAllocStringLen(wide.as_ptr(), wide.len() as u32) }
}

unsafe fn read_bstr(bstr: *mut u16) -> String {
    if bstr.is_null() {
        return String::new();
    }
    // SAFETY: a non-null BSTR carries its character count.
    unsafe {
        let len = SysStringLen(bstr) as usize;
        let slice = std::slice::from_raw_parts(bstr, len);
        String::from_utf16_lossy(slice)
    }
}

fn filetime_to_system(filetime: u64) -> Option<SystemTime> {
    if filetime == 0 {
        return None;
    }
    if filetime >= FILETIME_UNIX_DIFF {
        Some(SystemTime::UNIX_EPOCH + Duration::from_nanos((filetime - FILETIME_UNIX_DIFF) * 100))
    } else {
        SystemTime::UNIX_EPOCH.checked_sub(Duration::from_nanos((FILETIME_UNIX_DIFF - filetime) * 100))
    }
}

fn system_to_filetime(time: SystemTime) -> u64 {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(after) => FILETIME_UNIX_DIFF + after.as_nanos() as u64 / 100,
        Err(err) => FILETIME_UNIX_DIFF.saturating_sub(err.duration().as_nanos() as u64 / 100),
    }
}

/// The engine's variant record. The payload union is 16 bytes on 64-bit
/// targets and 8 bytes on 32-bit targets.
#[repr(C)]
struct PropVariant {
    vt: u16,
    reserved1: u16,
    reserved2: u16,
    reserved3: u16,
    payload: u64,
    #[cfg(target_pointer_width = "64")]
    payload2: u64,
}

impl PropVariant {
    const fn empty() -> Self {
        Self {
            vt: VT_EMPTY,
            reserved1: 0,
            reserved2: 0,
            reserved3: 0,
            payload: 0,
            #[cfg(target_pointer_width = "64")]
            payload2: 0,
        }
    }

    fn store(&mut self, value: &PropValue) {
        match value {
            PropValue::Empty => self.vt = VT_EMPTY,
            PropValue::Bool(b) => {
                self.vt = VT_BOOL;
                self.payload = if *b { VARIANT_TRUE } else { 0 };
            }
            PropValue::U32(v) => {
                self.vt = VT_UI4;
                self.payload = u64::from(*v);
            }
            PropValue::U64(v) => {
                self.vt = VT_UI8;
                self.payload = *v;
            }
            PropValue::Str(s) => {
                self.vt = VT_BSTR;
                self.payload = alloc_bstr(s) as u64;
            }
            PropValue::Time(t) => {
                self.vt = VT_FILETIME;
                self.payload = system_to_filetime(*t);
            }
        }
    }

    unsafe fn load(&self) -> PropValue {
        match self.vt {
            VT_BOOL => PropValue::Bool(self.payload & 0xFFFF != 0),
            VT_UI4 => PropValue::U32(self.payload as u32),
            VT_UI8 => PropValue::U64(self.payload),
            // SAFETY: a BSTR payload was written by the engine.
            VT_BSTR => PropValue::Str(unsafe { read_bstr(self.payload as *mut u16) }),
            VT_FILETIME => filetime_to_system(self.payload).map_or(PropValue::Empty, PropValue::Time),
            _ => PropValue::Empty,
        }
    }

    unsafe fn clear(&mut self) {
        if self.vt == VT_BSTR && self.payload != 0 {
            // SAFETY: the payload is an engine-allocated BSTR we own now.
            unsafe { SysFreeString(self.payload as *mut u16) };
        }
        self.vt = VT_EMPTY;
        self.payload = 0;
    }
}

const fn ask_mode_from(raw: i32) -> AskMode {
    match raw {
        1 => AskMode::Test,
        2 => AskMode::Skip,
        _ => AskMode::Extract,
    }
}

fn item_prop_from(propid: u32) -> Option<ItemProp> {
    Some(match propid {
        3 => ItemProp::Path,
        5 => ItemProp::Extension,
        6 => ItemProp::IsDirectory,
        7 => ItemProp::Size,
        9 => ItemProp::Attributes,
        10 => ItemProp::CreationTime,
        11 => ItemProp::LastAccessTime,
        12 => ItemProp::LastWriteTime,
        13 => ItemProp::Solid,
        15 => ItemProp::Encrypted,
        19 => ItemProp::Crc,
        21 => ItemProp::IsAnti,
        22 => ItemProp::Method,
        28 => ItemProp::Comment,
        _ => return None,
    })
}

type ErasedExtract = *mut (dyn ExtractCallback + 'static);
type ErasedUpdate = *mut (dyn UpdateCallback + 'static);
type ErasedTarget = *mut (dyn TargetStream + 'static);

/// Widens a borrowed callback to `'static` so it can live inside a COM
/// object handed to the engine.
///
/// # Safety
///
/// The COM object must not outlive the borrow; every bridge call below
/// creates its objects, drives the engine, and drops its reference before
/// returning.
unsafe fn erase_extract<'a>(cb: &'a mut (dyn ExtractCallback + 'a)) -> ErasedExtract {
    // SAFETY: lifetime widening only, layout is identical.
    unsafe { std::mem::transmute(cb as *mut (dyn ExtractCallback + 'a)) }
}

unsafe fn erase_update<'a>(cb: &'a mut (dyn UpdateCallback + 'a)) -> ErasedUpdate {
    // SAFETY: lifetime widening only.
    unsafe { std::mem::transmute(cb as *mut (dyn UpdateCallback + 'a)) }
}

unsafe fn erase_target<'a>(target: &'a mut (dyn TargetStream + 'a)) -> ErasedTarget {
    // SAFETY: lifetime widening only.
    unsafe { std::mem::transmute(target as *mut (dyn TargetStream + 'a)) }
}

// ---------------------------------------------------------------------------
// Foreign vtables (engine objects we call).
// ---------------------------------------------------------------------------

#[repr(C)]
struct InArchiveVtbl {
    base: IUnknownVtbl,
    open: unsafe extern "system" fn(*mut c_void, *mut c_void, *const u64, *mut c_void) -> Hresult,
    close: unsafe extern "system" fn(*mut c_void) -> Hresult,
    get_number_of_items: unsafe extern "system" fn(*mut c_void, *mut u32) -> Hresult,
    get_property: unsafe extern "system" fn(*mut c_void, u32, u32, *mut PropVariant) -> Hresult,
    extract:
        unsafe extern "system" fn(*mut c_void, *const u32, u32, i32, *mut c_void) -> Hresult,
    get_archive_property: unsafe extern "system" fn(*mut c_void, u32, *mut PropVariant) -> Hresult,
    get_number_of_properties: unsafe extern "system" fn(*mut c_void, *mut u32) -> Hresult,
    get_property_info:
        unsafe extern "system" fn(*mut c_void, u32, *mut *mut u16, *mut u32, *mut u16) -> Hresult,
    get_number_of_archive_properties: unsafe extern "system" fn(*mut c_void, *mut u32) -> Hresult,
    get_archive_property_info:
        unsafe extern "system" fn(*mut c_void, u32, *mut *mut u16, *mut u32, *mut u16) -> Hresult,
}

#[repr(C)]
struct OutArchiveVtbl {
    base: IUnknownVtbl,
    update_items: unsafe extern "system" fn(*mut c_void, *mut c_void, u32, *mut c_void) -> Hresult,
    get_file_time_type: unsafe extern "system" fn(*mut c_void, *mut u32) -> Hresult,
}

#[repr(C)]
struct SetPropertiesVtbl {
    base: IUnknownVtbl,
    set_properties: unsafe extern "system" fn(
        *mut c_void,
        *const *const u16,
        *const PropVariant,
        u32,
    ) -> Hresult,
}

unsafe fn vtbl_of<T>(object: *mut c_void) -> *const T {
    // SAFETY: every engine object starts with its vtable pointer.
    unsafe { *object.cast::<*const T>() }
}

unsafe fn query_interface(object: *mut c_void, iid: &Guid) -> Option<ComPtr> {
    let mut out = null_mut();
    // SAFETY: QueryInterface is the first vtable slot of every object.
    let hr = unsafe {
        let vtbl = vtbl_of::<IUnknownVtbl>(object);
        ((*vtbl).query_interface)(object, iid, &mut out)
    };
    if hr == S_OK {
        // SAFETY: a successful query returned one owned reference.
        NonNull::new(out).map(|ptr| unsafe { ComPtr::from_raw(ptr) })
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Local COM objects (session roles the engine calls).
// ---------------------------------------------------------------------------

#[repr(C)]
struct SourceStreamVtbl {
    base: IUnknownVtbl,
    read: unsafe extern "system" fn(*mut c_void, *mut c_void, u32, *mut u32) -> Hresult,
    seek: unsafe extern "system" fn(*mut c_void, i64, u32, *mut u64) -> Hresult,
}

#[repr(C)]
struct SourceStreamObj {
    vtbl: *const SourceStreamVtbl,
    refs: AtomicU32,
    stream: Box<dyn SourceStream>,
}

static SOURCE_STREAM_VTBL: SourceStreamVtbl = SourceStreamVtbl {
    base: IUnknownVtbl {
        query_interface: source_stream_qi,
        add_ref: source_stream_add_ref,
        release: source_stream_release,
    },
    read: source_stream_read,
    seek: source_stream_seek,
};

impl SourceStreamObj {
    fn create(stream: Box<dyn SourceStream>) -> *mut c_void {
        Box::into_raw(Box::new(Self {
            vtbl: &SOURCE_STREAM_VTBL,
            refs: AtomicU32::new(1),
            stream,
        }))
        .cast()
    }
}

unsafe extern "system" fn source_stream_qi(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> Hresult {
    // SAFETY: `this` is a live SourceStreamObj.
    unsafe {
        let supported = *iid == ffi::IID_UNKNOWN
            || *iid == ffi::IID_IN_STREAM
            || *iid == ffi::IID_SEQUENTIAL_IN_STREAM;
        if supported {
            source_stream_add_ref(this);
            *out = this;
            S_OK
        } else {
            *out = null_mut();
            ffi::E_NOINTERFACE
        }
    }
}

unsafe extern "system" fn source_stream_add_ref(this: *mut c_void) -> u32 {
    // SAFETY: `this` is a live SourceStreamObj.
    unsafe { (*this.cast::<SourceStreamObj>()).refs.fetch_add(1, Ordering::Relaxed) + 1 }
}

unsafe extern "system" fn source_stream_release(this: *mut c_void) -> u32 {
    // SAFETY: `this` is a live SourceStreamObj; at zero references the
    // object is reclaimed exactly once.
    unsafe {
        let remaining = (*this.cast::<SourceStreamObj>())
            .refs
            .fetch_sub(1, Ordering::AcqRel)
            - 1;
        if remaining == 0 {
            drop(Box::from_raw(this.cast::<SourceStreamObj>()));
        }
        remaining
    }
}

unsafe extern "system" fn source_stream_read(
    this: *mut c_void,
    data: *mut c_void,
    size: u32,
    processed: *mut u32,
) -> Hresult {
    // SAFETY: the engine hands a buffer of `size` bytes.
    unsafe {
        let obj = &mut *this.cast::<SourceStreamObj>();
        let buf = std::slice::from_raw_parts_mut(data.cast::<u8>(), size as usize);
        match obj.stream.read(buf) {
            Ok(n) => {
                if !processed.is_null() {
                    *processed = n as u32;
                }
                S_OK
            }
            Err(_) => ffi::E_FAIL,
        }
    }
}

unsafe extern "system" fn source_stream_seek(
    this: *mut c_void,
    offset: i64,
    origin: u32,
    new_position: *mut u64,
) -> Hresult {
    // SAFETY: `this` is a live SourceStreamObj.
    unsafe {
        let obj = &mut *this.cast::<SourceStreamObj>();
        let pos = match origin {
            1 => SeekFrom::Current(offset),
            2 => SeekFrom::End(offset),
            _ => SeekFrom::Start(offset as u64),
        };
        match obj.stream.seek(pos) {
            Ok(position) => {
                if !new_position.is_null() {
                    *new_position = position;
                }
                S_OK
            }
            Err(_) => ffi::E_FAIL,
        }
    }
}

#[repr(C)]
struct ItemOutStreamVtbl {
    base: IUnknownVtbl,
    write: unsafe extern "system" fn(*mut c_void, *const c_void, u32, *mut u32) -> Hresult,
}

/// Per-item output stream returned from the extract callback's
/// `GetStream`. Routes every write back into the session callback, which
/// owns the decision between a real destination and the discard sink.
#[repr(C)]
struct ItemOutStreamObj {
    vtbl: *const ItemOutStreamVtbl,
    refs: AtomicU32,
    callback: ErasedExtract,
}

static ITEM_OUT_STREAM_VTBL: ItemOutStreamVtbl = ItemOutStreamVtbl {
    base: IUnknownVtbl {
        query_interface: item_out_qi,
        add_ref: item_out_add_ref,
        release: item_out_release,
    },
    write: item_out_write,
};

unsafe extern "system" fn item_out_qi(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> Hresult {
    // SAFETY: `this` is a live ItemOutStreamObj.
    unsafe {
        if *iid == ffi::IID_UNKNOWN || *iid == ffi::IID_SEQUENTIAL_OUT_STREAM {
            item_out_add_ref(this);
            *out = this;
            S_OK
        } else {
            *out = null_mut();
            ffi::E_NOINTERFACE
        }
    }
}

unsafe extern "system" fn item_out_add_ref(this: *mut c_void) -> u32 {
    // SAFETY: `this` is a live ItemOutStreamObj.
    unsafe { (*this.cast::<ItemOutStreamObj>()).refs.fetch_add(1, Ordering::Relaxed) + 1 }
}

unsafe extern "system" fn item_out_release(this: *mut c_void) -> u32 {
    // SAFETY: see `source_stream_release`.
    unsafe {
        let remaining = (*this.cast::<ItemOutStreamObj>())
            .refs
            .fetch_sub(1, Ordering::AcqRel)
            - 1;
        if remaining == 0 {
            drop(Box::from_raw(this.cast::<ItemOutStreamObj>()));
        }
        remaining
    }
}

unsafe extern "system" fn item_out_write(
    this: *mut c_void,
    data: *const c_void,
    size: u32,
    processed: *mut u32,
) -> Hresult {
    // SAFETY: the engine hands `size` valid bytes; the callback outlives
    // the extract call that created this object.
    unsafe {
        let obj = &mut *this.cast::<ItemOutStreamObj>();
        let buf = std::slice::from_raw_parts(data.cast::<u8>(), size as usize);
        match (*obj.callback).write(buf) {
            Ok(n) => {
                if !processed.is_null() {
                    *processed = n as u32;
                }
                S_OK
            }
            Err(_) => ffi::E_ABORT,
        }
    }
}

#[repr(C)]
struct OpenCallbackVtbl {
    base: IUnknownVtbl,
    set_total: unsafe extern "system" fn(*mut c_void, *const u64, *const u64) -> Hresult,
    set_completed: unsafe extern "system" fn(*mut c_void, *const u64, *const u64) -> Hresult,
}

#[repr(C)]
struct PasswordVtbl {
    base: IUnknownVtbl,
    crypto_get_text_password: unsafe extern "system" fn(*mut c_void, *mut *mut u16) -> Hresult,
}

#[repr(C)]
struct OpenCallbackObj {
    vtbl: *const OpenCallbackVtbl,
    pwd_vtbl: *const PasswordVtbl,
    refs: AtomicU32,
    password: Option<String>,
}

static OPEN_CALLBACK_VTBL: OpenCallbackVtbl = OpenCallbackVtbl {
    base: IUnknownVtbl {
        query_interface: open_cb_qi,
        add_ref: open_cb_add_ref,
        release: open_cb_release,
    },
    set_total: open_cb_set_total,
    set_completed: open_cb_set_completed,
};

static OPEN_PASSWORD_VTBL: PasswordVtbl = PasswordVtbl {
    base: IUnknownVtbl {
        query_interface: open_pwd_qi,
        add_ref: open_pwd_add_ref,
        release: open_pwd_release,
    },
    crypto_get_text_password: open_pwd_get,
};

const OPEN_PWD_OFFSET: usize = offset_of!(OpenCallbackObj, pwd_vtbl);

impl OpenCallbackObj {
    fn create(password: Option<String>) -> *mut c_void {
        Box::into_raw(Box::new(Self {
            vtbl: &OPEN_CALLBACK_VTBL,
            pwd_vtbl: &OPEN_PASSWORD_VTBL,
            refs: AtomicU32::new(1),
            password,
        }))
        .cast()
    }
}

unsafe extern "system" fn open_cb_qi(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> Hresult {
    // SAFETY: `this` is a live OpenCallbackObj; the password interface is
    // served from the adjusted secondary vtable slot.
    unsafe {
        if *iid == ffi::IID_UNKNOWN || *iid == ffi::IID_ARCHIVE_OPEN_CALLBACK {
            open_cb_add_ref(this);
            *out = this;
            S_OK
        } else if *iid == ffi::IID_CRYPTO_GET_TEXT_PASSWORD {
            open_cb_add_ref(this);
            *out = this.cast::<u8>().add(OPEN_PWD_OFFSET).cast();
            S_OK
        } else {
            *out = null_mut();
            ffi::E_NOINTERFACE
        }
    }
}

unsafe extern "system" fn open_cb_add_ref(this: *mut c_void) -> u32 {
    // SAFETY: `this` is a live OpenCallbackObj.
    unsafe { (*this.cast::<OpenCallbackObj>()).refs.fetch_add(1, Ordering::Relaxed) + 1 }
}

unsafe extern "system" fn open_cb_release(this: *mut c_void) -> u32 {
    // SAFETY: see `source_stream_release`.
    unsafe {
        let remaining = (*this.cast::<OpenCallbackObj>())
            .refs
            .fetch_sub(1, Ordering::AcqRel)
            - 1;
        if remaining == 0 {
            drop(Box::from_raw(this.cast::<OpenCallbackObj>()));
        }
        remaining
    }
}

unsafe extern "system" fn open_cb_set_total(
    _this: *mut c_void,
    _files: *const u64,
    _bytes: *const u64,
) -> Hresult {
    S_OK
}

unsafe extern "system" fn open_cb_set_completed(
    _this: *mut c_void,
    _files: *const u64,
    _bytes: *const u64,
) -> Hresult {
    S_OK
}

unsafe extern "system" fn open_pwd_qi(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> Hresult {
    // SAFETY: `this` points at the secondary vtable slot.
    unsafe { open_cb_qi(this.cast::<u8>().sub(OPEN_PWD_OFFSET).cast(), iid, out) }
}

unsafe extern "system" fn open_pwd_add_ref(this: *mut c_void) -> u32 {
    // SAFETY: adjusted back to the primary pointer.
    unsafe { open_cb_add_ref(this.cast::<u8>().sub(OPEN_PWD_OFFSET).cast()) }
}

unsafe extern "system" fn open_pwd_release(this: *mut c_void) -> u32 {
    // SAFETY: adjusted back to the primary pointer.
    unsafe { open_cb_release(this.cast::<u8>().sub(OPEN_PWD_OFFSET).cast()) }
}

unsafe extern "system" fn open_pwd_get(this: *mut c_void, password: *mut *mut u16) -> Hresult {
    // SAFETY: adjusted back to the primary pointer.
    unsafe {
        let obj = &*this.cast::<u8>().sub(OPEN_PWD_OFFSET).cast::<OpenCallbackObj>();
        *password = alloc_bstr(obj.password.as_deref().unwrap_or(""));
        S_OK
    }
}

#[repr(C)]
struct ExtractCallbackVtbl {
    base: IUnknownVtbl,
    set_total: unsafe extern "system" fn(*mut c_void, u64) -> Hresult,
    set_completed: unsafe extern "system" fn(*mut c_void, *const u64) -> Hresult,
    get_stream: unsafe extern "system" fn(*mut c_void, u32, *mut *mut c_void, i32) -> Hresult,
    prepare_operation: unsafe extern "system" fn(*mut c_void, i32) -> Hresult,
    set_operation_result: unsafe extern "system" fn(*mut c_void, i32) -> Hresult,
}

#[repr(C)]
struct ExtractCallbackObj {
    vtbl: *const ExtractCallbackVtbl,
    pwd_vtbl: *const PasswordVtbl,
    refs: AtomicU32,
    callback: ErasedExtract,
}

static EXTRACT_CALLBACK_VTBL: ExtractCallbackVtbl = ExtractCallbackVtbl {
    base: IUnknownVtbl {
        query_interface: extract_cb_qi,
        add_ref: extract_cb_add_ref,
        release: extract_cb_release,
    },
    set_total: extract_cb_set_total,
    set_completed: extract_cb_set_completed,
    get_stream: extract_cb_get_stream,
    prepare_operation: extract_cb_prepare,
    set_operation_result: extract_cb_set_result,
};

static EXTRACT_PASSWORD_VTBL: PasswordVtbl = PasswordVtbl {
    base: IUnknownVtbl {
        query_interface: extract_pwd_qi,
        add_ref: extract_pwd_add_ref,
        release: extract_pwd_release,
    },
    crypto_get_text_password: extract_pwd_get,
};

const EXTRACT_PWD_OFFSET: usize = offset_of!(ExtractCallbackObj, pwd_vtbl);

impl ExtractCallbackObj {
    fn create(callback: ErasedExtract) -> *mut c_void {
        Box::into_raw(Box::new(Self {
            vtbl: &EXTRACT_CALLBACK_VTBL,
            pwd_vtbl: &EXTRACT_PASSWORD_VTBL,
            refs: AtomicU32::new(1),
            callback,
        }))
        .cast()
    }
}

unsafe extern "system" fn extract_cb_qi(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> Hresult {
    // SAFETY: `this` is a live ExtractCallbackObj.
    unsafe {
        if *iid == ffi::IID_UNKNOWN || *iid == ffi::IID_ARCHIVE_EXTRACT_CALLBACK {
            extract_cb_add_ref(this);
            *out = this;
            S_OK
        } else if *iid == ffi::IID_CRYPTO_GET_TEXT_PASSWORD {
            extract_cb_add_ref(this);
            *out = this.cast::<u8>().add(EXTRACT_PWD_OFFSET).cast();
            S_OK
        } else {
            *out = null_mut();
            ffi::E_NOINTERFACE
        }
    }
}

unsafe extern "system" fn extract_cb_add_ref(this: *mut c_void) -> u32 {
    // SAFETY: `this` is a live ExtractCallbackObj.
    unsafe { (*this.cast::<ExtractCallbackObj>()).refs.fetch_add(1, Ordering::Relaxed) + 1 }
}

unsafe extern "system" fn extract_cb_release(this: *mut c_void) -> u32 {
    // SAFETY: see `source_stream_release`.
    unsafe {
        let remaining = (*this.cast::<ExtractCallbackObj>())
            .refs
            .fetch_sub(1, Ordering::AcqRel)
            - 1;
        if remaining == 0 {
            drop(Box::from_raw(this.cast::<ExtractCallbackObj>()));
        }
        remaining
    }
}

unsafe extern "system" fn extract_cb_set_total(this: *mut c_void, total: u64) -> Hresult {
    // SAFETY: the callback outlives the extract call.
    unsafe {
        (*(*this.cast::<ExtractCallbackObj>()).callback).set_total(total);
    }
    S_OK
}

unsafe extern "system" fn extract_cb_set_completed(
    _this: *mut c_void,
    _complete: *const u64,
) -> Hresult {
    S_OK
}

unsafe extern "system" fn extract_cb_get_stream(
    this: *mut c_void,
    index: u32,
    out_stream: *mut *mut c_void,
    ask_mode: i32,
) -> Hresult {
    // SAFETY: the callback outlives the extract call; the returned stream
    // object borrows the same callback and is released by the engine
    // before the call ends.
    unsafe {
        let obj = &mut *this.cast::<ExtractCallbackObj>();
        *out_stream = null_mut();
        match (*obj.callback).get_stream(index, ask_mode_from(ask_mode)) {
            Ok(()) => {
                let stream = Box::into_raw(Box::new(ItemOutStreamObj {
                    vtbl: &ITEM_OUT_STREAM_VTBL,
                    refs: AtomicU32::new(1),
                    callback: obj.callback,
                }));
                *out_stream = stream.cast();
                S_OK
            }
            Err(_) => ffi::E_ABORT,
        }
    }
}

unsafe extern "system" fn extract_cb_prepare(this: *mut c_void, ask_mode: i32) -> Hresult {
    // SAFETY: the callback outlives the extract call.
    unsafe {
        (*(*this.cast::<ExtractCallbackObj>()).callback).prepare_operation(ask_mode_from(ask_mode));
    }
    S_OK
}

unsafe extern "system" fn extract_cb_set_result(this: *mut c_void, result: i32) -> Hresult {
    // SAFETY: the callback outlives the extract call.
    unsafe {
        let obj = &mut *this.cast::<ExtractCallbackObj>();
        match (*obj.callback).set_operation_result(OperationResult::from_code(result)) {
            Ok(()) => S_OK,
            Err(_) => ffi::E_ABORT,
        }
    }
}

unsafe extern "system" fn extract_pwd_qi(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> Hresult {
    // SAFETY: adjusted back to the primary pointer.
    unsafe { extract_cb_qi(this.cast::<u8>().sub(EXTRACT_PWD_OFFSET).cast(), iid, out) }
}

unsafe extern "system" fn extract_pwd_add_ref(this: *mut c_void) -> u32 {
    // SAFETY: adjusted back to the primary pointer.
    unsafe { extract_cb_add_ref(this.cast::<u8>().sub(EXTRACT_PWD_OFFSET).cast()) }
}

unsafe extern "system" fn extract_pwd_release(this: *mut c_void) -> u32 {
    // SAFETY: adjusted back to the primary pointer.
    unsafe { extract_cb_release(this.cast::<u8>().sub(EXTRACT_PWD_OFFSET).cast()) }
}

unsafe extern "system" fn extract_pwd_get(this: *mut c_void, password: *mut *mut u16) -> Hresult {
    // SAFETY: adjusted back to the primary pointer; the callback outlives
    // the extract call.
    unsafe {
        let obj = &mut *this.cast::<u8>().sub(EXTRACT_PWD_OFFSET).cast::<ExtractCallbackObj>();
        let supplied = (*obj.callback).password().unwrap_or_default();
        *password = alloc_bstr(&supplied);
        S_OK
    }
}

#[repr(C)]
struct ItemInStreamVtbl {
    base: IUnknownVtbl,
    read: unsafe extern "system" fn(*mut c_void, *mut c_void, u32, *mut u32) -> Hresult,
}

/// Per-item source stream returned from the update callback's `GetStream`.
#[repr(C)]
struct ItemInStreamObj {
    vtbl: *const ItemInStreamVtbl,
    refs: AtomicU32,
    callback: ErasedUpdate,
}

static ITEM_IN_STREAM_VTBL: ItemInStreamVtbl = ItemInStreamVtbl {
    base: IUnknownVtbl {
        query_interface: item_in_qi,
        add_ref: item_in_add_ref,
        release: item_in_release,
    },
    read: item_in_read,
};

unsafe extern "system" fn item_in_qi(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> Hresult {
    // SAFETY: `this` is a live ItemInStreamObj.
    unsafe {
        if *iid == ffi::IID_UNKNOWN || *iid == ffi::IID_SEQUENTIAL_IN_STREAM {
            item_in_add_ref(this);
            *out = this;
            S_OK
        } else {
            *out = null_mut();
            ffi::E_NOINTERFACE
        }
    }
}

unsafe extern "system" fn item_in_add_ref(this: *mut c_void) -> u32 {
    // SAFETY: `this` is a live ItemInStreamObj.
    unsafe { (*this.cast::<ItemInStreamObj>()).refs.fetch_add(1, Ordering::Relaxed) + 1 }
}

unsafe extern "system" fn item_in_release(this: *mut c_void) -> u32 {
    // SAFETY: see `source_stream_release`.
    unsafe {
        let remaining = (*this.cast::<ItemInStreamObj>())
            .refs
            .fetch_sub(1, Ordering::AcqRel)
            - 1;
        if remaining == 0 {
            drop(Box::from_raw(this.cast::<ItemInStreamObj>()));
        }
        remaining
    }
}

unsafe extern "system" fn item_in_read(
    this: *mut c_void,
    data: *mut c_void,
    size: u32,
    processed: *mut u32,
) -> Hresult {
    // SAFETY: the engine hands a buffer of `size` bytes; the callback
    // outlives the update call.
    unsafe {
        let obj = &mut *this.cast::<ItemInStreamObj>();
        let buf = std::slice::from_raw_parts_mut(data.cast::<u8>(), size as usize);
        match (*obj.callback).read(buf) {
            Ok(n) => {
                if !processed.is_null() {
                    *processed = n as u32;
                }
                S_OK
            }
            Err(_) => ffi::E_ABORT,
        }
    }
}

#[repr(C)]
struct TargetStreamVtbl {
    base: IUnknownVtbl,
    write: unsafe extern "system" fn(*mut c_void, *const c_void, u32, *mut u32) -> Hresult,
    seek: unsafe extern "system" fn(*mut c_void, i64, u32, *mut u64) -> Hresult,
    set_size: unsafe extern "system" fn(*mut c_void, u64) -> Hresult,
}

/// The archive output stream for an update operation.
#[repr(C)]
struct TargetStreamObj {
    vtbl: *const TargetStreamVtbl,
    refs: AtomicU32,
    target: ErasedTarget,
}

static TARGET_STREAM_VTBL: TargetStreamVtbl = TargetStreamVtbl {
    base: IUnknownVtbl {
        query_interface: target_qi,
        add_ref: target_add_ref,
        release: target_release,
    },
    write: target_write,
    seek: target_seek,
    set_size: target_set_size,
};

unsafe extern "system" fn target_qi(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> Hresult {
    // SAFETY: `this` is a live TargetStreamObj.
    unsafe {
        let supported = *iid == ffi::IID_UNKNOWN
            || *iid == ffi::IID_OUT_STREAM
            || *iid == ffi::IID_SEQUENTIAL_OUT_STREAM;
        if supported {
            target_add_ref(this);
            *out = this;
            S_OK
        } else {
            *out = null_mut();
            ffi::E_NOINTERFACE
        }
    }
}

unsafe extern "system" fn target_add_ref(this: *mut c_void) -> u32 {
    // SAFETY: `this` is a live TargetStreamObj.
    unsafe { (*this.cast::<TargetStreamObj>()).refs.fetch_add(1, Ordering::Relaxed) + 1 }
}

unsafe extern "system" fn target_release(this: *mut c_void) -> u32 {
    // SAFETY: see `source_stream_release`.
    unsafe {
        let remaining = (*this.cast::<TargetStreamObj>())
            .refs
            .fetch_sub(1, Ordering::AcqRel)
            - 1;
        if remaining == 0 {
            drop(Box::from_raw(this.cast::<TargetStreamObj>()));
        }
        remaining
    }
}

unsafe extern "system" fn target_write(
    this: *mut c_void,
    data: *const c_void,
    size: u32,
    processed: *mut u32,
) -> Hresult {
    // SAFETY: the engine hands `size` valid bytes; the target outlives the
    // update call.
    unsafe {
        let obj = &mut *this.cast::<TargetStreamObj>();
        let buf = std::slice::from_raw_parts(data.cast::<u8>(), size as usize);
        match (*obj.target).write_all(buf) {
            Ok(()) => {
                if !processed.is_null() {
                    *processed = size;
                }
                S_OK
            }
            Err(_) => ffi::E_FAIL,
        }
    }
}

unsafe extern "system" fn target_seek(
    this: *mut c_void,
    offset: i64,
    origin: u32,
    new_position: *mut u64,
) -> Hresult {
    // SAFETY: the target outlives the update call.
    unsafe {
        let obj = &mut *this.cast::<TargetStreamObj>();
        let pos = match origin {
            1 => SeekFrom::Current(offset),
            2 => SeekFrom::End(offset),
            _ => SeekFrom::Start(offset as u64),
        };
        match (*obj.target).seek(pos) {
            Ok(position) => {
                if !new_position.is_null() {
                    *new_position = position;
                }
                S_OK
            }
            Err(_) => ffi::E_FAIL,
        }
    }
}

unsafe extern "system" fn target_set_size(this: *mut c_void, size: u64) -> Hresult {
    // SAFETY: the target outlives the update call.
    unsafe {
        match (*(*this.cast::<TargetStreamObj>()).target).set_size(size) {
            Ok(()) => S_OK,
            Err(_) => ffi::E_FAIL,
        }
    }
}

#[repr(C)]
struct UpdateCallbackVtbl {
    base: IUnknownVtbl,
    set_total: unsafe extern "system" fn(*mut c_void, u64) -> Hresult,
    set_completed: unsafe extern "system" fn(*mut c_void, *const u64) -> Hresult,
    get_update_item_info:
        unsafe extern "system" fn(*mut c_void, u32, *mut i32, *mut i32, *mut u32) -> Hresult,
    get_property: unsafe extern "system" fn(*mut c_void, u32, u32, *mut PropVariant) -> Hresult,
    get_stream: unsafe extern "system" fn(*mut c_void, u32, *mut *mut c_void) -> Hresult,
    set_operation_result: unsafe extern "system" fn(*mut c_void, i32) -> Hresult,
}

#[repr(C)]
struct Password2Vtbl {
    base: IUnknownVtbl,
    crypto_get_text_password2:
        unsafe extern "system" fn(*mut c_void, *mut i32, *mut *mut u16) -> Hresult,
}

#[repr(C)]
struct UpdateCallbackObj {
    vtbl: *const UpdateCallbackVtbl,
    pwd_vtbl: *const Password2Vtbl,
    refs: AtomicU32,
    callback: ErasedUpdate,
}

static UPDATE_CALLBACK_VTBL: UpdateCallbackVtbl = UpdateCallbackVtbl {
    base: IUnknownVtbl {
        query_interface: update_cb_qi,
        add_ref: update_cb_add_ref,
        release: update_cb_release,
    },
    set_total: update_cb_set_total,
    set_completed: update_cb_set_completed,
    get_update_item_info: update_cb_item_info,
    get_property: update_cb_get_property,
    get_stream: update_cb_get_stream,
    set_operation_result: update_cb_set_result,
};

static UPDATE_PASSWORD_VTBL: Password2Vtbl = Password2Vtbl {
    base: IUnknownVtbl {
        query_interface: update_pwd_qi,
        add_ref: update_pwd_add_ref,
        release: update_pwd_release,
    },
    crypto_get_text_password2: update_pwd_get,
};

const UPDATE_PWD_OFFSET: usize = offset_of!(UpdateCallbackObj, pwd_vtbl);

impl UpdateCallbackObj {
    fn create(callback: ErasedUpdate) -> *mut c_void {
        Box::into_raw(Box::new(Self {
            vtbl: &UPDATE_CALLBACK_VTBL,
            pwd_vtbl: &UPDATE_PASSWORD_VTBL,
            refs: AtomicU32::new(1),
            callback,
        }))
        .cast()
    }
}

unsafe extern "system" fn update_cb_qi(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> Hresult {
    // SAFETY: `this` is a live UpdateCallbackObj.
    unsafe {
        if *iid == ffi::IID_UNKNOWN || *iid == ffi::IID_ARCHIVE_UPDATE_CALLBACK {
            update_cb_add_ref(this);
            *out = this;
            S_OK
        } else if *iid == ffi::IID_CRYPTO_GET_TEXT_PASSWORD2 {
            update_cb_add_ref(this);
            *out = this.cast::<u8>().add(UPDATE_PWD_OFFSET).cast();
            S_OK
        } else {
            *out = null_mut();
            ffi::E_NOINTERFACE
        }
    }
}

unsafe extern "system" fn update_cb_add_ref(this: *mut c_void) -> u32 {
    // SAFETY: `this` is a live UpdateCallbackObj.
    unsafe { (*this.cast::<UpdateCallbackObj>()).refs.fetch_add(1, Ordering::Relaxed) + 1 }
}

unsafe extern "system" fn update_cb_release(this: *mut c_void) -> u32 {
    // SAFETY: see `source_stream_release`.
    unsafe {
        let remaining = (*this.cast::<UpdateCallbackObj>())
            .refs
            .fetch_sub(1, Ordering::AcqRel)
            - 1;
        if remaining == 0 {
            drop(Box::from_raw(this.cast::<UpdateCallbackObj>()));
        }
        remaining
    }
}

unsafe extern "system" fn update_cb_set_total(this: *mut c_void, total: u64) -> Hresult {
    // SAFETY: the callback outlives the update call.
    unsafe {
        (*(*this.cast::<UpdateCallbackObj>()).callback).set_total(total);
    }
    S_OK
}

unsafe extern "system" fn update_cb_set_completed(
    _this: *mut c_void,
    _complete: *const u64,
) -> Hresult {
    S_OK
}

unsafe extern "system" fn update_cb_item_info(
    this: *mut c_void,
    index: u32,
    new_data: *mut i32,
    new_properties: *mut i32,
    index_in_archive: *mut u32,
) -> Hresult {
    // SAFETY: the callback outlives the update call; out pointers may be
    // null per the engine contract.
    unsafe {
        let info = (*(*this.cast::<UpdateCallbackObj>()).callback).update_item_info(index);
        if !new_data.is_null() {
            *new_data = i32::from(info.new_data);
        }
        if !new_properties.is_null() {
            *new_properties = i32::from(info.new_properties);
        }
        if !index_in_archive.is_null() {
            *index_in_archive = info.index_in_archive.unwrap_or(u32::MAX);
        }
        S_OK
    }
}

unsafe extern "system" fn update_cb_get_property(
    this: *mut c_void,
    index: u32,
    prop_id: u32,
    value: *mut PropVariant,
) -> Hresult {
    // SAFETY: the engine hands a variant slot to fill.
    unsafe {
        let slot = &mut *value;
        *slot = PropVariant::empty();
        if let Some(prop) = item_prop_from(prop_id) {
            let supplied = (*(*this.cast::<UpdateCallbackObj>()).callback).property(index, prop);
            slot.store(&supplied);
        }
        S_OK
    }
}

unsafe extern "system" fn update_cb_get_stream(
    this: *mut c_void,
    index: u32,
    in_stream: *mut *mut c_void,
) -> Hresult {
    // SAFETY: the callback outlives the update call; the returned stream
    // object borrows the same callback.
    unsafe {
        let obj = &mut *this.cast::<UpdateCallbackObj>();
        *in_stream = null_mut();
        match (*obj.callback).get_stream(index) {
            Ok(()) => {
                let stream = Box::into_raw(Box::new(ItemInStreamObj {
                    vtbl: &ITEM_IN_STREAM_VTBL,
                    refs: AtomicU32::new(1),
                    callback: obj.callback,
                }));
                *in_stream = stream.cast();
                S_OK
            }
            Err(_) => ffi::E_ABORT,
        }
    }
}

unsafe extern "system" fn update_cb_set_result(this: *mut c_void, result: i32) -> Hresult {
    // SAFETY: the callback outlives the update call.
    unsafe {
        let obj = &mut *this.cast::<UpdateCallbackObj>();
        match (*obj.callback).set_operation_result(OperationResult::from_code(result)) {
            Ok(()) => S_OK,
            Err(_) => ffi::E_ABORT,
        }
    }
}

unsafe extern "system" fn update_pwd_qi(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> Hresult {
    // SAFETY: adjusted back to the primary pointer.
    unsafe { update_cb_qi(this.cast::<u8>().sub(UPDATE_PWD_OFFSET).cast(), iid, out) }
}

unsafe extern "system" fn update_pwd_add_ref(this: *mut c_void) -> u32 {
    // SAFETY: adjusted back to the primary pointer.
    unsafe { update_cb_add_ref(this.cast::<u8>().sub(UPDATE_PWD_OFFSET).cast()) }
}

unsafe extern "system" fn update_pwd_release(this: *mut c_void) -> u32 {
    // SAFETY: adjusted back to the primary pointer.
    unsafe { update_cb_release(this.cast::<u8>().sub(UPDATE_PWD_OFFSET).cast()) }
}

unsafe extern "system" fn update_pwd_get(
    this: *mut c_void,
    password_is_defined: *mut i32,
    password: *mut *mut u16,
) -> Hresult {
    // SAFETY: adjusted back to the primary pointer; the callback outlives
    // the update call.
    unsafe {
        let obj = &mut *this.cast::<u8>().sub(UPDATE_PWD_OFFSET).cast::<UpdateCallbackObj>();
        let (defined, value) = (*obj.callback).password();
        if !password_is_defined.is_null() {
            *password_is_defined = i32::from(defined);
        }
        *password = alloc_bstr(value.as_deref().unwrap_or(""));
        S_OK
    }
}

// ---------------------------------------------------------------------------
// Engine and handler wrappers.
// ---------------------------------------------------------------------------

/// The loaded engine library and its factory.
pub struct NativeEngine {
    _library: Library,
    create: CreateObjectFn,
}

impl NativeEngine {
    /// Loads the library at `path` and verifies the expected exports.
    pub fn load(path: &Path) -> Result<Self> {
        // SAFETY: loading a library runs its initializers; the engine's
        // are safe to run at any time.
        let library = unsafe { Library::new(path) }.map_err(|err| ArchiveError::EngineLoad {
            reason: format!("failed to load \"{}\": {err}", path.display()),
        })?;

        // SAFETY: symbol lookup by the documented export names.
        let create = unsafe {
            if library
                .get::<GetHandlerPropertyFn>(HANDLER_PROPERTY_SYMBOL.as_bytes())
                .is_err()
            {
                return Err(ArchiveError::EngineLoad {
                    reason: format!(
                        "\"{}\" does not export {HANDLER_PROPERTY_SYMBOL}; not an engine library",
                        path.display()
                    ),
                });
            }

            *library
                .get::<CreateObjectFn>(FACTORY_SYMBOL.as_bytes())
                .map_err(|_| ArchiveError::EngineLoad {
                    reason: format!(
                        "\"{}\" does not export the {FACTORY_SYMBOL} factory",
                        path.display()
                    ),
                })?
        };

        Ok(Self {
            _library: library,
            create,
        })
    }

    fn create_object(&self, class_id: &Guid, interface_id: &Guid) -> Option<ComPtr> {
        let mut out = null_mut();
        // SAFETY: the factory fills `out` with one owned reference on
        // success.
        let hr = unsafe { (self.create)(class_id, interface_id, &mut out) };
        if hr == S_OK {
            // SAFETY: a successful create returned one owned reference.
            NonNull::new(out).map(|ptr| unsafe { ComPtr::from_raw(ptr) })
        } else {
            None
        }
    }
}

impl Engine for NativeEngine {
    fn create_reader(&self, format: ArchiveFormat) -> Option<Box<dyn InArchive>> {
        let class_id = ffi::format_class_id(format.class_id());
        self.create_object(&class_id, &ffi::IID_IN_ARCHIVE)
            .map(|ptr| Box::new(NativeInArchive::new(ptr)) as Box<dyn InArchive>)
    }

    fn create_writer(&self, format: ArchiveFormat) -> Option<Box<dyn OutArchive>> {
        let class_id = ffi::format_class_id(format.class_id());
        self.create_object(&class_id, &ffi::IID_OUT_ARCHIVE)
            .map(|ptr| Box::new(NativeOutArchive { ptr }) as Box<dyn OutArchive>)
    }

    fn major_version(&self) -> u32 {
        // The library carries no version export, so the version is sniffed
        // from handler availability: writable 7z arrived with the 9.x
        // engines, the rar5 handler with the 15.x engines.
        let sevenz = ffi::format_class_id(ArchiveFormat::SevenZip.class_id());
        if self.create_object(&sevenz, &ffi::IID_OUT_ARCHIVE).is_none() {
            return 4;
        }

        let rar5 = ffi::format_class_id(ArchiveFormat::Rar.class_id());
        if self.create_object(&rar5, &ffi::IID_IN_ARCHIVE).is_some() {
            15
        } else {
            9
        }
    }
}

/// A native reader handler driven through the trait protocol.
pub struct NativeInArchive {
    ptr: ComPtr,
    writer: Option<NativeOutArchive>,
    opened: bool,
}

impl NativeInArchive {
    const fn new(ptr: ComPtr) -> Self {
        Self {
            ptr,
            writer: None,
            opened: false,
        }
    }

    fn read_property(&self, index: Option<u32>, prop: ItemProp) -> PropValue {
        let mut variant = PropVariant::empty();
        // SAFETY: vtable calls on a live handler with a valid variant slot;
        // the variant is cleared after decoding.
        unsafe {
            let this = self.ptr.as_ptr();
            let vtbl = vtbl_of::<InArchiveVtbl>(this);
            let hr = match index {
                Some(index) => ((*vtbl).get_property)(this, index, prop as u32, &mut variant),
                None => ((*vtbl).get_archive_property)(this, prop as u32, &mut variant),
            };
            if hr != S_OK {
                return PropValue::Empty;
            }
            let value = variant.load();
            variant.clear();
            value
        }
    }
}

impl InArchive for NativeInArchive {
    fn open(
        &mut self,
        stream: Box<dyn SourceStream>,
        password: Option<&str>,
    ) -> Result<()> {
        let stream_obj = SourceStreamObj::create(stream);
        let open_cb = OpenCallbackObj::create(password.map(str::to_owned));
        let check = OPEN_CHECK_POSITION;

        // SAFETY: both objects are live with one owned reference each; the
        // engine takes its own references and we drop ours afterwards.
        let hr = unsafe {
            let this = self.ptr.as_ptr();
            let vtbl = vtbl_of::<InArchiveVtbl>(this);
            let hr = ((*vtbl).open)(this, stream_obj, &check, open_cb);
            source_stream_release(stream_obj);
            open_cb_release(open_cb);
            hr
        };

        if hr == S_OK {
            self.opened = true;
            Ok(())
        } else if password.is_some() {
            Err(ArchiveError::WrongPassword)
        } else {
            Err(ArchiveError::OpenFailed {
                reason: format!("engine returned 0x{:08x}", hr as u32),
            })
        }
    }

    fn item_count(&self) -> u32 {
        let mut count = 0u32;
        // SAFETY: vtable call on a live handler.
        unsafe {
            let this = self.ptr.as_ptr();
            let vtbl = vtbl_of::<InArchiveVtbl>(this);
            if ((*vtbl).get_number_of_items)(this, &mut count) != S_OK {
                return 0;
            }
        }
        count
    }

    fn item_property(&mut self, index: u32, prop: ItemProp) -> PropValue {
        self.read_property(Some(index), prop)
    }

    fn archive_property(&mut self, prop: ItemProp) -> PropValue {
        self.read_property(None, prop)
    }

    fn extract(
        &mut self,
        indexes: Option<&[u32]>,
        test_only: bool,
        callback: &mut dyn ExtractCallback,
    ) -> std::result::Result<(), EngineError> {
        // SAFETY: the callback object is created, driven and released
        // entirely within this call, so the erased borrow never escapes.
        let hr = unsafe {
            let cb_obj = ExtractCallbackObj::create(erase_extract(callback));
            let this = self.ptr.as_ptr();
            let vtbl = vtbl_of::<InArchiveVtbl>(this);
            let (ptr, count) = match indexes {
                Some(indexes) => (indexes.as_ptr(), indexes.len() as u32),
                None => (std::ptr::null(), u32::MAX),
            };
            let hr = ((*vtbl).extract)(this, ptr, count, i32::from(test_only), cb_obj);
            extract_cb_release(cb_obj);
            hr
        };

        match hr {
            S_OK => Ok(()),
            ffi::E_ABORT => Err(EngineError::Aborted),
            other => Err(EngineError::Failed(format!(
                "extract failed with 0x{:08x}",
                other as u32
            ))),
        }
    }

    fn writer(&mut self) -> Option<&mut dyn OutArchive> {
        if self.writer.is_none() {
            // SAFETY: querying the update interface of a live handler.
            let ptr = unsafe { query_interface(self.ptr.as_ptr(), &ffi::IID_OUT_ARCHIVE) }?;
            self.writer = Some(NativeOutArchive { ptr });
        }
        self.writer.as_mut().map(|w| w as &mut dyn OutArchive)
    }

    fn close(&mut self) {
        if !self.opened {
            return;
        }
        self.opened = false;
        // SAFETY: vtable call on a live handler.
        unsafe {
            let this = self.ptr.as_ptr();
            let vtbl = vtbl_of::<InArchiveVtbl>(this);
            let _ = ((*vtbl).close)(this);
        }
    }
}

impl Drop for NativeInArchive {
    fn drop(&mut self) {
        self.close();
    }
}

/// A native writer handler driven through the trait protocol.
pub struct NativeOutArchive {
    ptr: ComPtr,
}

impl OutArchive for NativeOutArchive {
    fn set_properties(
        &mut self,
        props: &[(String, ParamValue)],
    ) -> std::result::Result<(), EngineError> {
        if props.is_empty() {
            return Ok(());
        }

        // Handlers without a parameter surface (tar) simply do not expose
        // the setter interface.
        // SAFETY: querying a live handler.
        let Some(setter) = (unsafe { query_interface(self.ptr.as_ptr(), &ffi::IID_SET_PROPERTIES) })
        else {
            return Ok(());
        };

        let mut names: Vec<*mut u16> = Vec::with_capacity(props.len());
        let mut values: Vec<PropVariant> = Vec::with_capacity(props.len());
        for (name, value) in props {
            names.push(alloc_bstr(name));
            let mut variant = PropVariant::empty();
            match value {
                ParamValue::U32(v) => variant.store(&PropValue::U32(*v)),
                ParamValue::Str(s) => variant.store(&PropValue::Str(s.clone())),
            }
            values.push(variant);
        }

        // SAFETY: the arrays stay alive across the call and are freed
        // right after it.
        let hr = unsafe {
            let this = setter.as_ptr();
            let vtbl = vtbl_of::<SetPropertiesVtbl>(this);
            let hr = ((*vtbl).set_properties)(
                this,
                names.as_ptr().cast::<*const u16>(),
                values.as_ptr(),
                props.len() as u32,
            );
            for name in &names {
                SysFreeString(*name);
            }
            for value in &mut values {
                value.clear();
            }
            hr
        };

        if hr == S_OK {
            Ok(())
        } else {
            Err(EngineError::Failed(format!(
                "SetProperties failed with 0x{:08x}",
                hr as u32
            )))
        }
    }

    fn update_items(
        &mut self,
        target: &mut dyn TargetStream,
        count: u32,
        callback: &mut dyn UpdateCallback,
    ) -> std::result::Result<(), EngineError> {
        // SAFETY: both objects are created, driven and released within
        // this call; neither erased borrow escapes it.
        let hr = unsafe {
            let target_obj = Box::into_raw(Box::new(TargetStreamObj {
                vtbl: &TARGET_STREAM_VTBL,
                refs: AtomicU32::new(1),
                target: erase_target(target),
            }))
            .cast::<c_void>();
            let cb_obj = UpdateCallbackObj::create(erase_update(callback));

            let this = self.ptr.as_ptr();
            let vtbl = vtbl_of::<OutArchiveVtbl>(this);
            let hr = ((*vtbl).update_items)(this, target_obj, count, cb_obj);
            target_release(target_obj);
            update_cb_release(cb_obj);
            hr
        };

        match hr {
            S_OK => Ok(()),
            ffi::E_ABORT => Err(EngineError::Aborted),
            other => Err(EngineError::Failed(format!(
                "UpdateItems failed with 0x{:08x}",
                other as u32
            ))),
        }
    }
}
