//! Backend-side helpers for implementing the plugin ABI in Rust.
//!
//! A backend crate built as a `cdylib` declares its operations with
//! [`export_operation!`](crate::export_operation):
//!
//! ```ignore
//! use hv_plugin::plugin::abi::{HvBuf, HvInstance, HvStr};
//! use hv_plugin::plugin::export;
//!
//! struct Vm { running: bool }
//!
//! unsafe extern "C" fn init(_pod: HvStr, out: *mut HvInstance, _err: *mut HvBuf) -> i32 {
//!     *out = export::into_instance(Vm { running: false });
//!     hv_plugin::plugin::abi::HV_OK
//! }
//!
//! unsafe extern "C" fn start(instance: HvInstance, err: *mut HvBuf) -> i32 {
//!     export::guard(err, || {
//!         export::instance_mut::<Vm>(instance).running = true;
//!         Ok(())
//!     })
//! }
//!
//! hv_plugin::export_operation!(Init, init);
//! hv_plugin::export_operation!(StartPod, start);
//! ```

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use super::abi::{HvBuf, HvInstance, HvStr, OperationExport, HV_ERR, HV_OK};
use super::loader::SymbolTable;
use crate::hypervisor::Operation;

/// Build an [`OperationExport`] value for `operation` from `function`.
///
/// `function` is checked at compile time against the entry point type of the
/// operation. Usable in `static` initializers.
#[macro_export]
macro_rules! operation_export {
    (@entry $ty:ident, $f:expr) => {
        $crate::plugin::abi::OperationExport {
            abi_version: $crate::plugin::abi::HV_PLUGIN_ABI_VERSION,
            signature: $crate::plugin::abi::HvStr::from_static(
                <$crate::plugin::abi::$ty as $crate::plugin::abi::EntryPoint>::SIGNATURE,
            ),
            entry: {
                const ENTRY: $crate::plugin::abi::$ty = $f;
                ENTRY as *const ::core::ffi::c_void
            },
        }
    };
    (Init, $f:expr) => { $crate::operation_export!(@entry InitFn, $f) };
    (CreatePod, $f:expr) => { $crate::operation_export!(@entry PodConfigFn, $f) };
    (StartPod, $f:expr) => { $crate::operation_export!(@entry PodFn, $f) };
    (WaitPod, $f:expr) => { $crate::operation_export!(@entry WaitFn, $f) };
    (StopPod, $f:expr) => { $crate::operation_export!(@entry PodFn, $f) };
    (PausePod, $f:expr) => { $crate::operation_export!(@entry PodFn, $f) };
    (ResumePod, $f:expr) => { $crate::operation_export!(@entry PodFn, $f) };
    (AddDevice, $f:expr) => { $crate::operation_export!(@entry DeviceFn, $f) };
    (HotplugAddDevice, $f:expr) => { $crate::operation_export!(@entry DeviceFn, $f) };
    (HotplugRemoveDevice, $f:expr) => { $crate::operation_export!(@entry DeviceFn, $f) };
    (GetPodConsole, $f:expr) => { $crate::operation_export!(@entry ConsoleFn, $f) };
    (Capabilities, $f:expr) => { $crate::operation_export!(@entry CapabilitiesFn, $f) };
}

/// Export `function` from a plugin module under the operation's symbol name.
#[macro_export]
macro_rules! export_operation {
    ($op:ident, $f:expr) => {
        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static $op: $crate::plugin::abi::OperationExport = $crate::operation_export!($op, $f);
    };
}

/// In-process table of operation exports.
///
/// Implements [`SymbolTable`] the same way a loaded module does, minus the
/// dynamic linker.
#[derive(Debug, Clone)]
pub struct ExportTable {
    path: PathBuf,
    exports: HashMap<String, &'static OperationExport>,
}

impl Default for ExportTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportTable {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from("<static>"),
            exports: HashMap::new(),
        }
    }

    /// Export `export` under the symbol of `op`.
    pub fn with(self, op: Operation, export: &'static OperationExport) -> Self {
        self.with_symbol(op.symbol(), export)
    }

    /// Export `export` under an arbitrary symbol name.
    pub fn with_symbol(mut self, symbol: &str, export: &'static OperationExport) -> Self {
        self.exports.insert(symbol.to_string(), export);
        self
    }

    /// Remove the export of `op`, if any.
    pub fn without(mut self, op: Operation) -> Self {
        self.exports.remove(op.symbol());
        self
    }

    pub(crate) fn located_at(mut self, path: &Path) -> Self {
        self.path = path.to_path_buf();
        self
    }
}

impl SymbolTable for ExportTable {
    fn path(&self) -> &Path {
        &self.path
    }

    fn lookup(&self, symbol: &str) -> std::result::Result<&OperationExport, String> {
        self.exports
            .get(symbol)
            .copied()
            .ok_or_else(|| format!("symbol {} not found in {}", symbol, self.path.display()))
    }
}

/// Box `value` into an opaque instance handle.
///
/// The instance is never handed back for destruction; it lives as long as
/// the module.
pub fn into_instance<T>(value: T) -> HvInstance {
    Box::into_raw(Box::new(value)).cast()
}

/// # Safety
///
/// `instance` must come from [`into_instance::<T>`] and must not be aliased
/// for the returned lifetime.
pub unsafe fn instance_mut<'a, T>(instance: HvInstance) -> &'a mut T {
    &mut *instance.cast::<T>()
}

/// # Safety
///
/// `instance` must come from [`into_instance::<T>`].
pub unsafe fn instance_ref<'a, T>(instance: HvInstance) -> &'a T {
    &*instance.cast::<T>()
}

/// Decode a JSON payload passed by the host.
///
/// # Safety
///
/// `payload` must be valid for the duration of the call.
pub unsafe fn read_json<T: DeserializeOwned>(payload: HvStr) -> std::result::Result<T, String> {
    serde_json::from_slice(payload.as_bytes()).map_err(|e| e.to_string())
}

/// Decode a UTF-8 string passed by the host, replacing invalid sequences.
///
/// # Safety
///
/// `s` must be valid for the duration of the call.
pub unsafe fn read_str(s: HvStr) -> String {
    String::from_utf8_lossy(s.as_bytes()).into_owned()
}

/// Copy `s` into a host buffer, truncating at the buffer capacity.
///
/// Truncation never splits a UTF-8 sequence.
///
/// # Safety
///
/// `buf` must be null or point to a valid [`HvBuf`] whose `ptr` is writable
/// for `cap` bytes.
pub unsafe fn write_str(buf: *mut HvBuf, s: &str) {
    let Some(buf) = buf.as_mut() else {
        return;
    };
    let mut n = s.len().min(buf.cap);
    while !s.is_char_boundary(n) {
        n -= 1;
    }
    if n > 0 && !buf.ptr.is_null() {
        core::ptr::copy_nonoverlapping(s.as_ptr(), buf.ptr, n);
    }
    buf.len = n;
}

/// Report `message` as the failure cause and return [`HV_ERR`].
///
/// # Safety
///
/// Same as [`write_str`].
pub unsafe fn fail(err: *mut HvBuf, message: &str) -> i32 {
    write_str(err, message);
    HV_ERR
}

/// Run an operation body, turning `Err` and panics into a status code.
///
/// Unwinding across `extern "C"` aborts the host, so every entry point should
/// run its body through this.
///
/// # Safety
///
/// Same as [`write_str`].
pub unsafe fn guard<F>(err: *mut HvBuf, body: F) -> i32
where
    F: FnOnce() -> std::result::Result<(), String>,
{
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => HV_OK,
        Ok(Err(message)) => fail(err, &message),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "backend panicked".to_string());
            fail(err, &format!("panic: {}", message))
        }
    }
}
