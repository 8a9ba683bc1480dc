//! Resolve, check and call a plugin entry point.
//!
//! Resolution is repeated on every call: a module that stops exporting an
//! operation is noticed at the next call site, not when it was loaded.

use tracing::debug;

use super::abi::{EntryPoint, HvBuf, OperationExport, HV_OK, HV_PLUGIN_ABI_VERSION};
use super::loader::SymbolTable;
use crate::hypervisor::Operation;
use crate::{Error, Result};

/// Capacity of the buffer a backend writes its failure cause into.
pub const ERROR_BUFFER_LEN: usize = 4096;
/// Capacity of the buffer a backend writes the console path into.
pub const CONSOLE_BUFFER_LEN: usize = 4096;

/// Look up `op` and return its entry point as `F`.
pub fn resolve<F: EntryPoint>(table: &dyn SymbolTable, op: Operation) -> Result<F> {
    debug_assert_eq!(op.signature(), F::SIGNATURE);

    let export = table
        .lookup(op.symbol())
        .map_err(|cause| Error::SymbolNotFound {
            operation: op,
            cause,
        })?;
    check_export(op, export, F::SIGNATURE)?;
    debug!("resolved {} in {}", op, table.path().display());

    // SAFETY: ABI version and signature descriptor both match `F`.
    Ok(unsafe { F::from_raw(export.entry) })
}

/// Check that `export` can be called with the `expected` signature.
pub fn check_export(op: Operation, export: &OperationExport, expected: &str) -> Result<()> {
    if export.abi_version != HV_PLUGIN_ABI_VERSION {
        return Err(Error::SignatureMismatch {
            operation: op,
            expected: format!("abi v{} {}", HV_PLUGIN_ABI_VERSION, expected),
            found: format!("abi v{}", export.abi_version),
        });
    }

    // SAFETY: The descriptor of a same-version export is a static string.
    let found = unsafe { export.signature.as_bytes() };
    if found != expected.as_bytes() {
        return Err(Error::SignatureMismatch {
            operation: op,
            expected: expected.to_string(),
            found: String::from_utf8_lossy(found).into_owned(),
        });
    }

    if export.entry.is_null() {
        return Err(Error::SignatureMismatch {
            operation: op,
            expected: expected.to_string(),
            found: "null entry point".to_string(),
        });
    }

    Ok(())
}

/// Host-owned buffer lent to the backend for one call.
pub struct CallBuffer {
    data: Vec<u8>,
    raw: HvBuf,
}

impl CallBuffer {
    pub fn new(capacity: usize) -> Self {
        let mut data = vec![0u8; capacity];
        let raw = HvBuf {
            ptr: data.as_mut_ptr(),
            cap: data.len(),
            len: 0,
        };
        Self { data, raw }
    }

    pub fn for_errors() -> Self {
        Self::new(ERROR_BUFFER_LEN)
    }

    pub fn for_console() -> Self {
        Self::new(CONSOLE_BUFFER_LEN)
    }

    /// Pointer handed to the backend. Valid while `self` is alive.
    pub fn as_raw(&mut self) -> *mut HvBuf {
        &mut self.raw
    }

    /// What the backend wrote, lossily decoded.
    pub fn contents(&self) -> String {
        let len = self.raw.len.min(self.data.len());
        String::from_utf8_lossy(&self.data[..len]).into_owned()
    }
}

/// Map a backend status code to a result.
pub fn check_status(op: Operation, status: i32, err: &CallBuffer) -> Result<()> {
    if status == HV_OK {
        return Ok(());
    }

    let mut cause = err.contents();
    if cause.is_empty() {
        cause = format!("status {}", status);
    }
    Err(Error::OperationFailed {
        operation: op,
        cause,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::abi::{HvInstance, HvStr, PodConfigFn, PodFn};
    use crate::plugin::export::{self, ExportTable};

    unsafe extern "C" fn start(_instance: HvInstance, _err: *mut HvBuf) -> i32 {
        HV_OK
    }

    static START: OperationExport = crate::operation_export!(StartPod, start);

    static OLD_ABI: OperationExport = OperationExport {
        abi_version: HV_PLUGIN_ABI_VERSION + 1,
        signature: HvStr::from_static(crate::plugin::abi::signatures::POD),
        entry: core::ptr::null(),
    };

    static NULL_ENTRY: OperationExport = OperationExport {
        abi_version: HV_PLUGIN_ABI_VERSION,
        signature: HvStr::from_static(crate::plugin::abi::signatures::POD),
        entry: core::ptr::null(),
    };

    #[test]
    fn test_resolve_ok() {
        let table = ExportTable::new().with(Operation::StartPod, &START);
        let entry: PodFn = resolve(&table, Operation::StartPod).unwrap();
        let mut err = CallBuffer::for_errors();
        assert_eq!(unsafe { entry(core::ptr::null_mut(), err.as_raw()) }, HV_OK);
    }

    #[test]
    fn test_resolve_missing() {
        let table = ExportTable::new();
        let err = resolve::<PodFn>(&table, Operation::StopPod).unwrap_err();
        assert!(matches!(
            err,
            Error::SymbolNotFound {
                operation: Operation::StopPod,
                ..
            }
        ));
    }

    #[test]
    fn test_resolve_wrong_shape() {
        // A StartPod-shaped function exported under CreatePod.
        let table = ExportTable::new().with(Operation::CreatePod, &START);
        let err = resolve::<PodConfigFn>(&table, Operation::CreatePod).unwrap_err();
        match err {
            Error::SignatureMismatch {
                operation,
                expected,
                found,
            } => {
                assert_eq!(operation, Operation::CreatePod);
                assert_eq!(expected, Operation::CreatePod.signature());
                assert_eq!(found, Operation::StartPod.signature());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_abi_and_null_entry() {
        let table = ExportTable::new()
            .with(Operation::StartPod, &OLD_ABI)
            .with(Operation::StopPod, &NULL_ENTRY);
        assert!(matches!(
            resolve::<PodFn>(&table, Operation::StartPod),
            Err(Error::SignatureMismatch { .. })
        ));
        assert!(matches!(
            resolve::<PodFn>(&table, Operation::StopPod),
            Err(Error::SignatureMismatch { .. })
        ));
    }

    #[test]
    fn test_check_status() {
        let mut err = CallBuffer::for_errors();
        assert!(check_status(Operation::PausePod, HV_OK, &err).is_ok());

        let e = check_status(Operation::PausePod, 7, &err).unwrap_err();
        assert_eq!(e.to_string(), "PausePod() failed: status 7");

        unsafe { export::write_str(err.as_raw(), "already paused") };
        let e = check_status(Operation::PausePod, 1, &err).unwrap_err();
        assert_eq!(e.to_string(), "PausePod() failed: already paused");
    }
}
