//! Vendor shared library bindings.
//!
//! Loads the K720 dispenser library and the M100A/M600 encoder library from
//! the SDK directory and resolves every entry point once at load time. The
//! encoder's entry points are looked up with the model prefix, so the rest of
//! the crate never deals with symbol names.
//!
//! Only compiled with the `vendor-sdk` feature.

use crate::driver::{DeviceHandle, DispenserDriver, EncoderDriver};
use crate::error::{HardwareError, Result};
use keycard_core::EncoderModel;
use libloading::Library;
use std::ffi::{CString, c_char, c_int, c_void};
use std::path::Path;
use tracing::{debug, info};

type RawHandle = *mut c_void;

/// Size of the diagnostic text buffer every encoder call fills.
const RECORD_INFO_LEN: usize = 256;

/// UID buffer large enough for every supported family.
const UID_BUFFER_LEN: usize = 10;

type CommOpenWithBaudFn = unsafe extern "system" fn(*const c_char, u32) -> RawHandle;
type UsbOpenFn = unsafe extern "system" fn(*mut RawHandle) -> c_int;
type CloseFn = unsafe extern "system" fn(RawHandle) -> c_int;
type CheckCardPositionFn = unsafe extern "system" fn(*mut u8, *mut u8, *mut u8, *mut u8) -> c_int;
type MoveCardFn = unsafe extern "system" fn(u8) -> c_int;
type RetainToCardBoxFn = unsafe extern "system" fn(bool, c_int, c_int) -> c_int;

type CommOpenFn = unsafe extern "system" fn(*const c_char) -> RawHandle;
type DetectFn = unsafe extern "system" fn(RawHandle, u8, *mut c_char) -> c_int;
type GetIdFn = unsafe extern "system" fn(RawHandle, u8, *mut u8, *mut c_char) -> c_int;
type LoadKeyFn = unsafe extern "system" fn(RawHandle, u8, u8, u8, *const u8, *mut c_char) -> c_int;
type ClassicWriteFn =
    unsafe extern "system" fn(RawHandle, u8, u8, u8, *const u8, *mut c_char) -> c_int;
type UltralightWriteFn = unsafe extern "system" fn(RawHandle, u8, u8, *const u8, *mut c_char) -> c_int;
type HaltFn = unsafe extern "system" fn(RawHandle, u8, *mut c_char) -> c_int;

/// Dispenser library file name for the current platform.
pub fn dispenser_library_name() -> &'static str {
    if cfg!(windows) { "K720_Dll.dll" } else { "libK720.so" }
}

fn open_library(path: &Path) -> Result<Library> {
    // SAFETY: loading runs the library's initializers; the SDK directory is
    // operator-configured and only holds the vendor libraries.
    unsafe { Library::new(path) }.map_err(|e| {
        HardwareError::initialization_failed(format!("{}: {e}", path.display()))
    })
}

fn resolve<T: Copy>(library: &Library, name: &str) -> Result<T> {
    // SAFETY: `T` matches the vendor's documented prototype for `name`, and
    // the copied pointer never outlives `library`, which its owner keeps.
    unsafe { library.get::<T>(name.as_bytes()) }
        .map(|symbol| *symbol)
        .map_err(|e| HardwareError::initialization_failed(format!("symbol {name}: {e}")))
}

fn raw(handle: DeviceHandle) -> RawHandle {
    handle.as_raw() as RawHandle
}

fn wrap(handle: RawHandle) -> Option<DeviceHandle> {
    (!handle.is_null()).then(|| DeviceHandle::new(handle as usize))
}

fn log_record(call: &str, code: c_int, record: &[c_char; RECORD_INFO_LEN]) {
    if code != 0 {
        let bytes: Vec<u8> = record
            .iter()
            .take_while(|c| **c != 0)
            .map(|c| *c as u8)
            .collect();
        debug!(call, code, record = %String::from_utf8_lossy(&bytes), "Vendor call failed");
    }
}

/// K720 dispenser library.
pub struct K720Library {
    comm_open_with_baud: CommOpenWithBaudFn,
    usb_open: UsbOpenFn,
    comm_close: CloseFn,
    usb_close: CloseFn,
    check_card_position: CheckCardPositionFn,
    move_card: MoveCardFn,
    retain_to_card_box: RetainToCardBoxFn,
    _library: Library,
}

impl std::fmt::Debug for K720Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("K720Library").finish_non_exhaustive()
    }
}

impl K720Library {
    /// Load the dispenser library from `sdk_path`.
    pub fn load(sdk_path: &Path) -> Result<Self> {
        let path = sdk_path.join(dispenser_library_name());
        let library = open_library(&path)?;
        let dispenser = Self {
            comm_open_with_baud: resolve(&library, "K720_CommOpenWithBaud")?,
            usb_open: resolve(&library, "K720_USB_OpenRU")?,
            comm_close: resolve(&library, "K720_CommClose")?,
            usb_close: resolve(&library, "K720_USB_CloseRU")?,
            check_card_position: resolve(&library, "K720_CheckCardPosition")?,
            move_card: resolve(&library, "K720_MoveCard")?,
            retain_to_card_box: resolve(&library, "K720_RetainToCardBox")?,
            _library: library,
        };
        info!(path = %path.display(), "Dispenser library loaded");
        Ok(dispenser)
    }
}

impl DispenserDriver for K720Library {
    fn comm_open_with_baud(&self, port: &str, baud: u32) -> Option<DeviceHandle> {
        let port = CString::new(port).ok()?;
        // SAFETY: `port` is a valid NUL-terminated string for the call's duration.
        wrap(unsafe { (self.comm_open_with_baud)(port.as_ptr(), baud) })
    }

    fn usb_open(&self) -> std::result::Result<DeviceHandle, i32> {
        let mut handle: RawHandle = std::ptr::null_mut();
        // SAFETY: the library writes one handle through the out-pointer.
        let code = unsafe { (self.usb_open)(&mut handle) };
        if code != 0 {
            return Err(code);
        }
        wrap(handle).ok_or(code)
    }

    fn comm_close(&self, handle: DeviceHandle) -> i32 {
        // SAFETY: `handle` was returned by the matching open call.
        unsafe { (self.comm_close)(raw(handle)) }
    }

    fn usb_close(&self, handle: DeviceHandle) -> i32 {
        // SAFETY: `handle` was returned by the matching open call.
        unsafe { (self.usb_close)(raw(handle)) }
    }

    fn check_card_position(&self, _handle: DeviceHandle, status: &mut [u8; 4]) -> i32 {
        let [device, transport, card_box, retain_box] = status;
        // SAFETY: each pointer refers to one writable byte.
        unsafe { (self.check_card_position)(device, transport, card_box, retain_box) }
    }

    fn move_card(&self, _handle: DeviceHandle, mode: u8) -> i32 {
        // SAFETY: scalar-only call.
        unsafe { (self.move_card)(mode) }
    }

    fn retain_to_card_box(
        &self,
        _handle: DeviceHandle,
        enter_timeout_ms: u32,
        move_timeout_ms: u32,
    ) -> i32 {
        let enter = c_int::try_from(enter_timeout_ms).unwrap_or(c_int::MAX);
        let movement = c_int::try_from(move_timeout_ms).unwrap_or(c_int::MAX);
        // SAFETY: scalar-only call.
        unsafe { (self.retain_to_card_box)(true, enter, movement) }
    }
}

#[derive(Clone, Copy)]
struct ClassicEntryPoints {
    detect: DetectFn,
    get_id: GetIdFn,
    load_key: LoadKeyFn,
    write: ClassicWriteFn,
    halt: HaltFn,
}

impl ClassicEntryPoints {
    fn resolve(library: &Library, prefix: &str, family: &str) -> Result<Self> {
        Ok(Self {
            detect: resolve(library, &format!("{prefix}_{family}DetectCard"))?,
            get_id: resolve(library, &format!("{prefix}_{family}GetCardID"))?,
            load_key: resolve(library, &format!("{prefix}_{family}LoadSecKey"))?,
            write: resolve(library, &format!("{prefix}_{family}WriteBlock"))?,
            halt: resolve(library, &format!("{prefix}_{family}Halt"))?,
        })
    }

    fn detect(&self, handle: DeviceHandle, mac: u8) -> i32 {
        let mut record = [0 as c_char; RECORD_INFO_LEN];
        // SAFETY: `record` is a writable buffer of the size the library expects.
        let code = unsafe { (self.detect)(raw(handle), mac, record.as_mut_ptr()) };
        log_record("DetectCard", code, &record);
        code
    }

    fn get_id(&self, handle: DeviceHandle, mac: u8, len: usize, uid: &mut Vec<u8>) -> i32 {
        get_id(self.get_id, handle, mac, len, uid)
    }

    fn load_key(&self, handle: DeviceHandle, mac: u8, sector: u8, key_type: u8, key: &[u8; 6]) -> i32 {
        let mut record = [0 as c_char; RECORD_INFO_LEN];
        // SAFETY: `key` holds the six bytes the library reads.
        let code = unsafe {
            (self.load_key)(raw(handle), mac, sector, key_type, key.as_ptr(), record.as_mut_ptr())
        };
        log_record("LoadSecKey", code, &record);
        code
    }

    fn write(&self, handle: DeviceHandle, mac: u8, sector: u8, block: u8, data: &[u8; 16]) -> i32 {
        let mut record = [0 as c_char; RECORD_INFO_LEN];
        // SAFETY: `data` holds the sixteen bytes the library reads.
        let code = unsafe {
            (self.write)(raw(handle), mac, sector, block, data.as_ptr(), record.as_mut_ptr())
        };
        log_record("WriteBlock", code, &record);
        code
    }

    fn halt(&self, handle: DeviceHandle, mac: u8) -> i32 {
        halt(self.halt, handle, mac)
    }
}

#[derive(Clone, Copy)]
struct UltralightEntryPoints {
    detect: DetectFn,
    get_id: GetIdFn,
    write: UltralightWriteFn,
    halt: HaltFn,
}

fn get_id(func: GetIdFn, handle: DeviceHandle, mac: u8, len: usize, uid: &mut Vec<u8>) -> i32 {
    let mut buffer = [0u8; UID_BUFFER_LEN];
    let mut record = [0 as c_char; RECORD_INFO_LEN];
    // SAFETY: `buffer` is larger than any UID the library writes.
    let code = unsafe { func(raw(handle), mac, buffer.as_mut_ptr(), record.as_mut_ptr()) };
    log_record("GetCardID", code, &record);
    if code == 0 {
        uid.clear();
        uid.extend_from_slice(&buffer[..len.min(UID_BUFFER_LEN)]);
    }
    code
}

fn halt(func: HaltFn, handle: DeviceHandle, mac: u8) -> i32 {
    let mut record = [0 as c_char; RECORD_INFO_LEN];
    // SAFETY: `record` is a writable buffer of the size the library expects.
    let code = unsafe { func(raw(handle), mac, record.as_mut_ptr()) };
    log_record("Halt", code, &record);
    code
}

/// M100A/M600 encoder library.
pub struct EncoderLibrary {
    model: EncoderModel,
    comm_open: CommOpenFn,
    comm_close: CloseFn,
    s50: ClassicEntryPoints,
    s70: ClassicEntryPoints,
    ul: UltralightEntryPoints,
    _library: Library,
}

impl std::fmt::Debug for EncoderLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderLibrary")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl EncoderLibrary {
    /// Load the encoder library for `model` from `sdk_path`.
    pub fn load(sdk_path: &Path, model: EncoderModel) -> Result<Self> {
        let path = sdk_path.join(model.library_name());
        let library = open_library(&path)?;
        let prefix = model.symbol_prefix();
        let encoder = Self {
            model,
            comm_open: resolve(&library, &format!("{prefix}_CommOpen"))?,
            comm_close: resolve(&library, &format!("{prefix}_CommClose"))?,
            s50: ClassicEntryPoints::resolve(&library, prefix, "S50")?,
            s70: ClassicEntryPoints::resolve(&library, prefix, "S70")?,
            ul: UltralightEntryPoints {
                detect: resolve(&library, &format!("{prefix}_ULDetectCard"))?,
                get_id: resolve(&library, &format!("{prefix}_ULGetCardID"))?,
                write: resolve(&library, &format!("{prefix}_ULWriteBlock"))?,
                halt: resolve(&library, &format!("{prefix}_ULHalt"))?,
            },
            _library: library,
        };
        info!(path = %path.display(), model = %model, "Encoder library loaded");
        Ok(encoder)
    }
}

impl EncoderDriver for EncoderLibrary {
    fn comm_open(&self, port: &str) -> Option<DeviceHandle> {
        let port = CString::new(port).ok()?;
        // SAFETY: `port` is a valid NUL-terminated string for the call's duration.
        wrap(unsafe { (self.comm_open)(port.as_ptr()) })
    }

    fn comm_close(&self, handle: DeviceHandle) -> i32 {
        // SAFETY: `handle` was returned by the matching open call.
        unsafe { (self.comm_close)(raw(handle)) }
    }

    fn s50_detect_card(&self, handle: DeviceHandle, mac: u8) -> i32 {
        self.s50.detect(handle, mac)
    }

    fn s50_get_card_id(&self, handle: DeviceHandle, mac: u8, uid: &mut Vec<u8>) -> i32 {
        self.s50
            .get_id(handle, mac, keycard_core::ChipFamily::S50.uid_len(), uid)
    }

    fn s50_load_sec_key(&self, handle: DeviceHandle, mac: u8, sector: u8, key_type: u8, key: &[u8; 6]) -> i32 {
        self.s50.load_key(handle, mac, sector, key_type, key)
    }

    fn s50_write_block(&self, handle: DeviceHandle, mac: u8, sector: u8, block: u8, data: &[u8; 16]) -> i32 {
        self.s50.write(handle, mac, sector, block, data)
    }

    fn s50_halt(&self, handle: DeviceHandle, mac: u8) -> i32 {
        self.s50.halt(handle, mac)
    }

    fn s70_detect_card(&self, handle: DeviceHandle, mac: u8) -> i32 {
        self.s70.detect(handle, mac)
    }

    fn s70_get_card_id(&self, handle: DeviceHandle, mac: u8, uid: &mut Vec<u8>) -> i32 {
        self.s70
            .get_id(handle, mac, keycard_core::ChipFamily::S70.uid_len(), uid)
    }

    fn s70_load_sec_key(&self, handle: DeviceHandle, mac: u8, sector: u8, key_type: u8, key: &[u8; 6]) -> i32 {
        self.s70.load_key(handle, mac, sector, key_type, key)
    }

    fn s70_write_block(&self, handle: DeviceHandle, mac: u8, sector: u8, block: u8, data: &[u8; 16]) -> i32 {
        self.s70.write(handle, mac, sector, block, data)
    }

    fn s70_halt(&self, handle: DeviceHandle, mac: u8) -> i32 {
        self.s70.halt(handle, mac)
    }

    fn ul_detect_card(&self, handle: DeviceHandle, mac: u8) -> i32 {
        let mut record = [0 as c_char; RECORD_INFO_LEN];
        // SAFETY: `record` is a writable buffer of the size the library expects.
        let code = unsafe { (self.ul.detect)(raw(handle), mac, record.as_mut_ptr()) };
        log_record("ULDetectCard", code, &record);
        code
    }

    fn ul_get_card_id(&self, handle: DeviceHandle, mac: u8, uid: &mut Vec<u8>) -> i32 {
        get_id(
            self.ul.get_id,
            handle,
            mac,
            keycard_core::ChipFamily::Ultralight.uid_len(),
            uid,
        )
    }

    fn ul_write_block(&self, handle: DeviceHandle, mac: u8, block: u8, data: &[u8; 16]) -> i32 {
        let mut record = [0 as c_char; RECORD_INFO_LEN];
        // SAFETY: `data` holds the sixteen bytes the library reads.
        let code =
            unsafe { (self.ul.write)(raw(handle), mac, block, data.as_ptr(), record.as_mut_ptr()) };
        log_record("ULWriteBlock", code, &record);
        code
    }

    fn ul_halt(&self, handle: DeviceHandle, mac: u8) -> i32 {
        halt(self.ul.halt, handle, mac)
    }
}
