//! C ABI between the host and a hypervisor plugin module.
//!
//! Every operation is exported as a `#[no_mangle]` static [`OperationExport`]
//! named after [`Operation::symbol`](crate::hypervisor::Operation::symbol).
//! The export carries the ABI version and a signature descriptor next to the
//! entry point, so the host can check the shape of an entry point before
//! calling it.
//!
//! Payloads (pod descriptor, pod config, device info) cross the boundary as
//! JSON bytes. Strings coming back (error causes, console path) are written
//! into caller-owned [`HvBuf`]s, so no allocation ever changes hands.

use core::ffi::c_void;

use crate::hypervisor::Capabilities;

/// Bumped whenever the layout of anything in this module changes.
pub const HV_PLUGIN_ABI_VERSION: u32 = 1;

/// Status code for success. Any other value is a backend failure.
pub const HV_OK: i32 = 0;
/// Generic failure code used by the export helpers.
pub const HV_ERR: i32 = 1;

/// Immutable bytes. Not NUL-terminated.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HvStr {
    pub ptr: *const u8,
    pub len: usize,
}

impl HvStr {
    pub const fn empty() -> Self {
        Self {
            ptr: core::ptr::null(),
            len: 0,
        }
    }

    pub const fn from_static(s: &'static str) -> Self {
        Self {
            ptr: s.as_ptr(),
            len: s.len(),
        }
    }

    /// Borrow `bytes` for the duration of a call.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            ptr: bytes.as_ptr(),
            len: bytes.len(),
        }
    }

    /// # Safety
    ///
    /// `ptr` must be null or valid for `len` bytes for the returned lifetime.
    pub unsafe fn as_bytes<'a>(&self) -> &'a [u8] {
        if self.ptr.is_null() || self.len == 0 {
            &[]
        } else {
            core::slice::from_raw_parts(self.ptr, self.len)
        }
    }
}

// Read-only view; the owner guarantees the lifetime.
unsafe impl Send for HvStr {}
unsafe impl Sync for HvStr {}

/// Caller-owned output buffer. The callee writes at most `cap` bytes to `ptr`
/// and stores the count in `len`.
#[repr(C)]
#[derive(Debug)]
pub struct HvBuf {
    pub ptr: *mut u8,
    pub cap: usize,
    pub len: usize,
}

/// Opaque backend instance, produced by `Init` and threaded through every call.
pub type HvInstance = *mut c_void;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HvCapabilities {
    pub flags: u32,
    pub reserved: u32,
}

impl From<HvCapabilities> for Capabilities {
    fn from(raw: HvCapabilities) -> Self {
        Capabilities { flags: raw.flags }
    }
}

impl From<Capabilities> for HvCapabilities {
    fn from(caps: Capabilities) -> Self {
        HvCapabilities {
            flags: caps.flags,
            reserved: 0,
        }
    }
}

/// `Init(pod_json, &mut instance, err) -> status`
pub type InitFn = unsafe extern "C" fn(HvStr, *mut HvInstance, *mut HvBuf) -> i32;
/// `CreatePod(instance, config_json, err) -> status`
pub type PodConfigFn = unsafe extern "C" fn(HvInstance, HvStr, *mut HvBuf) -> i32;
/// `StartPod` / `StopPod` / `PausePod` / `ResumePod` `(instance, err) -> status`
pub type PodFn = unsafe extern "C" fn(HvInstance, *mut HvBuf) -> i32;
/// `WaitPod(instance, timeout, err) -> status`
pub type WaitFn = unsafe extern "C" fn(HvInstance, i64, *mut HvBuf) -> i32;
/// `AddDevice` / `HotplugAddDevice` / `HotplugRemoveDevice`
/// `(instance, device_json, kind, err) -> status`
pub type DeviceFn = unsafe extern "C" fn(HvInstance, HvStr, u32, *mut HvBuf) -> i32;
/// `GetPodConsole(instance, pod_id, out)`
pub type ConsoleFn = unsafe extern "C" fn(HvInstance, HvStr, *mut HvBuf);
/// `Capabilities(instance) -> capabilities`
pub type CapabilitiesFn = unsafe extern "C" fn(HvInstance) -> HvCapabilities;

/// Signature descriptors carried by [`OperationExport::signature`].
pub mod signatures {
    pub const INIT: &str = "fn(str, *mut instance, *mut buf) -> i32";
    pub const POD_CONFIG: &str = "fn(instance, str, *mut buf) -> i32";
    pub const POD: &str = "fn(instance, *mut buf) -> i32";
    pub const WAIT: &str = "fn(instance, i64, *mut buf) -> i32";
    pub const DEVICE: &str = "fn(instance, str, u32, *mut buf) -> i32";
    pub const CONSOLE: &str = "fn(instance, str, *mut buf)";
    pub const CAPABILITIES: &str = "fn(instance) -> capabilities";
}

/// An entry point type of the contract.
pub trait EntryPoint: Copy {
    /// Descriptor an export must carry to be called as `Self`.
    const SIGNATURE: &'static str;

    /// # Safety
    ///
    /// `entry` must point to a function with exactly this signature.
    unsafe fn from_raw(entry: *const c_void) -> Self;
}

macro_rules! entry_point {
    ($ty:ty, $sig:expr) => {
        impl EntryPoint for $ty {
            const SIGNATURE: &'static str = $sig;

            unsafe fn from_raw(entry: *const c_void) -> Self {
                core::mem::transmute::<*const c_void, $ty>(entry)
            }
        }
    };
}

entry_point!(InitFn, signatures::INIT);
entry_point!(PodConfigFn, signatures::POD_CONFIG);
entry_point!(PodFn, signatures::POD);
entry_point!(WaitFn, signatures::WAIT);
entry_point!(DeviceFn, signatures::DEVICE);
entry_point!(ConsoleFn, signatures::CONSOLE);
entry_point!(CapabilitiesFn, signatures::CAPABILITIES);

/// One exported operation.
#[repr(C)]
#[derive(Debug)]
pub struct OperationExport {
    pub abi_version: u32,
    pub signature: HvStr,
    pub entry: *const c_void,
}

// Exports are immutable statics pointing at code.
unsafe impl Send for OperationExport {}
unsafe impl Sync for OperationExport {}
