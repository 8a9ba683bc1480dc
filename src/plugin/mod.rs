//! Hypervisor backends loaded from a module at run time.
//!
//! [`PluginHypervisor`] implements [`Hypervisor`] by forwarding every call to
//! a backend module that was not linked into the host:
//!
//! - **Load**: `init` opens the module at `hypervisor.plugin_path` once
//! - **Resolve**: every call looks its operation up again by symbol name
//! - **Check**: the export's ABI version and signature must match the contract
//! - **Invoke**: the backend instance returned by `Init` is passed first
//!
//! The adapter enforces no lifecycle order and keeps no lock. Callers drive
//! one pod from one thread at a time.

pub mod abi;
pub mod export;
pub mod loader;
pub mod report;
pub mod shim;

use std::path::Path;
use std::ptr;

use tracing::{debug, info, warn};

use self::abi::{
    CapabilitiesFn, ConsoleFn, DeviceFn, HvInstance, HvStr, InitFn, PodConfigFn, PodFn, WaitFn,
};
use self::loader::{ModuleLoader, NativeLoader, SymbolTable};
use self::shim::{check_status, resolve, CallBuffer};
use crate::hypervisor::{
    Capabilities, DeviceInfo, DeviceType, Hypervisor, Operation, PodConfig, PodDescriptor,
};
use crate::{Error, Result};

pub use self::loader::{LoadedModule, StaticLoader};
pub use self::report::ExportReport;

/// Backend instance returned by the module's `Init`. Never dereferenced here.
struct BackendInstance(HvInstance);

// SAFETY: The token is only passed back into the module that produced it,
// from whichever single thread currently owns the adapter.
unsafe impl Send for BackendInstance {}

/// A [`Hypervisor`] backed by a dynamically loaded module.
pub struct PluginHypervisor {
    loader: Box<dyn ModuleLoader>,
    module: Option<Box<dyn SymbolTable>>,
    instance: Option<BackendInstance>,
    report: Option<ExportReport>,
}

impl Default for PluginHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginHypervisor {
    /// Adapter that loads modules through the platform dynamic linker.
    pub fn new() -> Self {
        Self::with_loader(NativeLoader)
    }

    /// Adapter that loads modules through `loader`.
    pub fn with_loader<L: ModuleLoader + 'static>(loader: L) -> Self {
        Self {
            loader: Box::new(loader),
            module: None,
            instance: None,
            report: None,
        }
    }

    /// Whether a module has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.module.is_some()
    }

    /// Whether `Init` produced a backend instance.
    pub fn is_initialized(&self) -> bool {
        self.instance.is_some()
    }

    pub fn module_path(&self) -> Option<&Path> {
        self.module.as_deref().map(|m| m.path())
    }

    /// Export audit taken when the module was loaded.
    pub fn export_report(&self) -> Option<&ExportReport> {
        self.report.as_ref()
    }

    fn load(&self, path: &Path) -> Result<Box<dyn SymbolTable>> {
        let module = self.loader.load(path)?;
        info!("loaded hypervisor plugin {}", path.display());
        Ok(module)
    }

    fn ready(&self, op: Operation) -> Result<(&dyn SymbolTable, HvInstance)> {
        match (self.module.as_deref(), self.instance.as_ref()) {
            (Some(module), Some(instance)) => Ok((module, instance.0)),
            _ => Err(Error::NotInitialized(op)),
        }
    }

    fn call_init(module: &dyn SymbolTable, pod: &PodDescriptor) -> Result<HvInstance> {
        let entry: InitFn = resolve(module, Operation::Init)?;
        let payload = serde_json::to_vec(pod)?;
        let mut instance: HvInstance = ptr::null_mut();
        let mut err = CallBuffer::for_errors();

        debug!("calling Init for pod {}", pod.id);
        // SAFETY: Entry checked against `InitFn`; buffers outlive the call.
        let status = unsafe { entry(HvStr::from_bytes(&payload), &mut instance, err.as_raw()) };
        check_status(Operation::Init, status, &err)?;
        Ok(instance)
    }

    fn call_pod(&mut self, op: Operation) -> Result<()> {
        let (module, instance) = self.ready(op)?;
        let entry: PodFn = resolve(module, op)?;
        let mut err = CallBuffer::for_errors();

        debug!("calling {}", op);
        // SAFETY: Entry checked against `PodFn`; buffer outlives the call.
        let status = unsafe { entry(instance, err.as_raw()) };
        check_status(op, status, &err)
    }

    fn call_device(&mut self, op: Operation, device: &DeviceInfo, kind: DeviceType) -> Result<()> {
        let (module, instance) = self.ready(op)?;
        let entry: DeviceFn = resolve(module, op)?;
        let payload = serde_json::to_vec(device)?;
        let mut err = CallBuffer::for_errors();

        debug!("calling {} ({:?})", op, kind);
        // SAFETY: Entry checked against `DeviceFn`; buffers outlive the call.
        let status = unsafe {
            entry(
                instance,
                HvStr::from_bytes(&payload),
                kind.as_raw(),
                err.as_raw(),
            )
        };
        check_status(op, status, &err)
    }

    fn try_console(&self, pod_id: &str) -> Result<String> {
        let (module, instance) = self.ready(Operation::GetPodConsole)?;
        let entry: ConsoleFn = resolve(module, Operation::GetPodConsole)?;
        let mut out = CallBuffer::for_console();

        // SAFETY: Entry checked against `ConsoleFn`; buffers outlive the call.
        unsafe { entry(instance, HvStr::from_bytes(pod_id.as_bytes()), out.as_raw()) };
        Ok(out.contents())
    }

    fn try_capabilities(&self) -> Result<Capabilities> {
        let (module, instance) = self.ready(Operation::Capabilities)?;
        let entry: CapabilitiesFn = resolve(module, Operation::Capabilities)?;

        // SAFETY: Entry checked against `CapabilitiesFn`.
        let raw = unsafe { entry(instance) };
        Ok(raw.into())
    }
}

impl Hypervisor for PluginHypervisor {
    /// Load the module (first call only) and create the backend instance.
    ///
    /// The module stays loaded even if the backend's `Init` fails, and a
    /// later `init` reuses it. No instance is kept on failure.
    fn init(&mut self, pod: &PodDescriptor) -> Result<()> {
        if self.instance.is_some() {
            return Err(Error::AlreadyInitialized);
        }

        let module = match self.module.take() {
            Some(module) => module,
            None => {
                let path = pod
                    .config
                    .hypervisor
                    .plugin_path
                    .as_deref()
                    .filter(|p| !p.as_os_str().is_empty())
                    .ok_or_else(|| {
                        Error::Config("plugin hypervisor requires 'plugin_path'".into())
                    })?;
                let module = self.load(path)?;
                let report = ExportReport::verify(module.as_ref());
                report.log();
                self.report = Some(report);
                module
            }
        };

        let result = Self::call_init(module.as_ref(), pod);
        self.module = Some(module);

        self.instance = Some(BackendInstance(result?));
        info!("hypervisor plugin initialized for pod {}", pod.id);
        Ok(())
    }

    fn create_pod(&mut self, config: &PodConfig) -> Result<()> {
        let op = Operation::CreatePod;
        let (module, instance) = self.ready(op)?;
        let entry: PodConfigFn = resolve(module, op)?;
        let payload = serde_json::to_vec(config)?;
        let mut err = CallBuffer::for_errors();

        debug!("calling {}", op);
        // SAFETY: Entry checked against `PodConfigFn`; buffers outlive the call.
        let status = unsafe { entry(instance, HvStr::from_bytes(&payload), err.as_raw()) };
        check_status(op, status, &err)
    }

    fn start_pod(&mut self) -> Result<()> {
        self.call_pod(Operation::StartPod)
    }

    fn wait_pod(&mut self, timeout: i64) -> Result<()> {
        let op = Operation::WaitPod;
        let (module, instance) = self.ready(op)?;
        let entry: WaitFn = resolve(module, op)?;
        let mut err = CallBuffer::for_errors();

        debug!("calling {} (timeout {})", op, timeout);
        // SAFETY: Entry checked against `WaitFn`; buffer outlives the call.
        let status = unsafe { entry(instance, timeout, err.as_raw()) };
        check_status(op, status, &err)
    }

    fn stop_pod(&mut self) -> Result<()> {
        self.call_pod(Operation::StopPod)
    }

    fn pause_pod(&mut self) -> Result<()> {
        self.call_pod(Operation::PausePod)
    }

    fn resume_pod(&mut self) -> Result<()> {
        self.call_pod(Operation::ResumePod)
    }

    fn add_device(&mut self, device: &DeviceInfo, kind: DeviceType) -> Result<()> {
        self.call_device(Operation::AddDevice, device, kind)
    }

    fn hotplug_add_device(&mut self, device: &DeviceInfo, kind: DeviceType) -> Result<()> {
        self.call_device(Operation::HotplugAddDevice, device, kind)
    }

    fn hotplug_remove_device(&mut self, device: &DeviceInfo, kind: DeviceType) -> Result<()> {
        self.call_device(Operation::HotplugRemoveDevice, device, kind)
    }

    /// Any failure to reach the backend's `GetPodConsole` (not initialized,
    /// not exported, wrong signature) yields an empty string.
    fn get_pod_console(&self, pod_id: &str) -> String {
        match self.try_console(pod_id) {
            Ok(path) => path,
            Err(e) => {
                warn!("pod console unavailable: {}", e);
                String::new()
            }
        }
    }

    /// Any failure to reach the backend's `Capabilities` yields the zero
    /// record, meaning "no optional features".
    fn capabilities(&self) -> Capabilities {
        match self.try_capabilities() {
            Ok(caps) => caps,
            Err(e) => {
                warn!("capabilities unavailable: {}", e);
                Capabilities::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HypervisorConfig;

    fn pod_at(path: &str) -> PodDescriptor {
        PodDescriptor::new(PodConfig {
            id: "unit".into(),
            hypervisor: HypervisorConfig::new().plugin_path(path),
            ..Default::default()
        })
    }

    #[test]
    fn test_calls_before_init() {
        let mut hv = PluginHypervisor::with_loader(StaticLoader::new());
        assert!(!hv.is_loaded());
        assert!(matches!(
            hv.start_pod(),
            Err(Error::NotInitialized(Operation::StartPod))
        ));
        assert_eq!(hv.get_pod_console("unit"), "");
        assert_eq!(hv.capabilities(), Capabilities::default());
    }

    #[test]
    fn test_init_requires_plugin_path() {
        let mut hv = PluginHypervisor::with_loader(StaticLoader::new());
        let pod = PodDescriptor::new(PodConfig::default());
        assert!(matches!(hv.init(&pod), Err(Error::Config(_))));
        assert!(!hv.is_loaded());
    }

    #[test]
    fn test_init_missing_symbol_keeps_module() {
        let loader = StaticLoader::new().register("/static/empty", export::ExportTable::new());
        let mut hv = PluginHypervisor::with_loader(loader);

        let err = hv.init(&pod_at("/static/empty")).unwrap_err();
        assert!(matches!(
            err,
            Error::SymbolNotFound {
                operation: Operation::Init,
                ..
            }
        ));
        assert!(hv.is_loaded());
        assert!(!hv.is_initialized());
        assert_eq!(hv.module_path(), Some(Path::new("/static/empty")));

        let report = hv.export_report().unwrap();
        assert_eq!(report.missing.len(), Operation::ALL.len());
    }
}
