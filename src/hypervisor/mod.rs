//! Hypervisor abstraction for pod execution.
//!
//! This module defines the [`Hypervisor`] trait that every backend must
//! implement. The trait captures the full pod lifecycle (init, create, start,
//! wait, pause/resume, stop), device attachment, and two advisory queries.
//!
//! Backends:
//! - **Plugin**: [`PluginHypervisor`](crate::plugin::PluginHypervisor): a
//!   backend module loaded from disk at run time
//! - **Mock**: [`MockHypervisor`](mock::MockHypervisor): in-process, for tests
//!   and dry runs

pub mod mock;
pub mod state;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{HypervisorConfig, HypervisorType};
use crate::error::Result;

pub use state::PodState;

/// Operations of the capability contract.
///
/// The symbol names are fixed: a plugin module must export each operation
/// under exactly [`Operation::symbol`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Init,
    CreatePod,
    StartPod,
    WaitPod,
    StopPod,
    PausePod,
    ResumePod,
    AddDevice,
    HotplugAddDevice,
    HotplugRemoveDevice,
    GetPodConsole,
    Capabilities,
}

impl Operation {
    /// Every operation, in contract order.
    pub const ALL: [Operation; 12] = [
        Operation::Init,
        Operation::CreatePod,
        Operation::StartPod,
        Operation::WaitPod,
        Operation::StopPod,
        Operation::PausePod,
        Operation::ResumePod,
        Operation::AddDevice,
        Operation::HotplugAddDevice,
        Operation::HotplugRemoveDevice,
        Operation::GetPodConsole,
        Operation::Capabilities,
    ];

    /// Exported symbol name.
    pub const fn symbol(self) -> &'static str {
        match self {
            Operation::Init => "Init",
            Operation::CreatePod => "CreatePod",
            Operation::StartPod => "StartPod",
            Operation::WaitPod => "WaitPod",
            Operation::StopPod => "StopPod",
            Operation::PausePod => "PausePod",
            Operation::ResumePod => "ResumePod",
            Operation::AddDevice => "AddDevice",
            Operation::HotplugAddDevice => "HotplugAddDevice",
            Operation::HotplugRemoveDevice => "HotplugRemoveDevice",
            Operation::GetPodConsole => "GetPodConsole",
            Operation::Capabilities => "Capabilities",
        }
    }

    /// Signature descriptor the export must carry for this operation.
    pub const fn signature(self) -> &'static str {
        use crate::plugin::abi::signatures;
        match self {
            Operation::Init => signatures::INIT,
            Operation::CreatePod => signatures::POD_CONFIG,
            Operation::StartPod
            | Operation::StopPod
            | Operation::PausePod
            | Operation::ResumePod => signatures::POD,
            Operation::WaitPod => signatures::WAIT,
            Operation::AddDevice
            | Operation::HotplugAddDevice
            | Operation::HotplugRemoveDevice => signatures::DEVICE,
            Operation::GetPodConsole => signatures::CONSOLE,
            Operation::Capabilities => signatures::CAPABILITIES,
        }
    }

    /// Look an operation up by its exported symbol name.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.symbol() == symbol)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Configuration of the workload a backend creates.
///
/// Opaque to the plugin adapter, which forwards it verbatim. Only
/// `hypervisor.plugin_path` is read, to locate the module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodConfig {
    /// Pod identifier (generated if empty)
    #[serde(default)]
    pub id: String,
    /// Guest hostname
    #[serde(default)]
    pub hostname: String,
    /// Hypervisor selection and sizing
    #[serde(default)]
    pub hypervisor: HypervisorConfig,
    /// Free-form annotations passed through to the backend
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// The pod handed to a backend's `Init`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodDescriptor {
    pub id: String,
    pub config: PodConfig,
}

impl PodDescriptor {
    /// Build a descriptor, taking the id from the config or generating one.
    pub fn new(config: PodConfig) -> Self {
        let id = if config.id.is_empty() {
            uuid::Uuid::now_v7().to_string()
        } else {
            config.id.clone()
        };
        Self { id, config }
    }
}

/// Opaque device payload forwarded to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceInfo(serde_json::Value);

impl DeviceInfo {
    /// Serialize any device description into an opaque payload.
    pub fn new<T: Serialize>(device: &T) -> Result<Self> {
        Ok(Self(serde_json::to_value(device)?))
    }

    pub fn from_value(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Kind of device being attached or detached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum DeviceType {
    Image = 0,
    Fs = 1,
    Net = 2,
    Block = 3,
    SerialPort = 4,
    VsockPci = 5,
    Vfio = 6,
    VhostUser = 7,
}

impl DeviceType {
    /// Decode the wire tag; `None` for values outside the closed set.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => DeviceType::Image,
            1 => DeviceType::Fs,
            2 => DeviceType::Net,
            3 => DeviceType::Block,
            4 => DeviceType::SerialPort,
            5 => DeviceType::VsockPci,
            6 => DeviceType::Vfio,
            7 => DeviceType::VhostUser,
            _ => return None,
        })
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

const BLOCK_DEVICE_SUPPORT: u32 = 1 << 0;
const BLOCK_DEVICE_HOTPLUG_SUPPORT: u32 = 1 << 1;

/// Optional features a backend supports.
///
/// The zero value means "nothing supported", which is also what callers get
/// when a plugin does not answer the query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub flags: u32,
}

impl Capabilities {
    pub fn is_block_device_supported(&self) -> bool {
        self.flags & BLOCK_DEVICE_SUPPORT != 0
    }

    pub fn set_block_device_support(&mut self) {
        self.flags |= BLOCK_DEVICE_SUPPORT;
    }

    pub fn is_block_device_hotplug_supported(&self) -> bool {
        self.flags & BLOCK_DEVICE_HOTPLUG_SUPPORT != 0
    }

    pub fn set_block_device_hotplug_support(&mut self) {
        self.flags |= BLOCK_DEVICE_HOTPLUG_SUPPORT;
    }
}

/// Trait that all hypervisor backends must implement.
///
/// Calls are synchronous: `wait_pod` blocks the calling thread until the
/// backend observes termination or the timeout elapses. Lifecycle and device
/// calls take `&mut self`, so a single pod is driven by one caller at a time.
///
/// No transition order is enforced at this level. A backend that rejects a
/// call reports [`Error::OperationFailed`](crate::Error::OperationFailed).
pub trait Hypervisor: Send {
    /// Prepare the backend for `pod`. Must precede every other call.
    fn init(&mut self, pod: &PodDescriptor) -> Result<()>;

    /// Allocate resources for the workload without starting it.
    fn create_pod(&mut self, config: &PodConfig) -> Result<()>;

    /// Start the created pod.
    fn start_pod(&mut self) -> Result<()>;

    /// Block until the pod terminates or `timeout` elapses.
    ///
    /// The unit of `timeout` is backend-defined; it is passed through unchanged.
    fn wait_pod(&mut self, timeout: i64) -> Result<()>;

    /// Stop the pod. Terminal.
    fn stop_pod(&mut self) -> Result<()>;

    fn pause_pod(&mut self) -> Result<()>;

    fn resume_pod(&mut self) -> Result<()>;

    /// Attach a device before the pod starts.
    fn add_device(&mut self, device: &DeviceInfo, kind: DeviceType) -> Result<()>;

    fn hotplug_add_device(&mut self, device: &DeviceInfo, kind: DeviceType) -> Result<()>;

    fn hotplug_remove_device(&mut self, device: &DeviceInfo, kind: DeviceType) -> Result<()>;

    /// Path of the pod console.
    ///
    /// Best-effort: an empty string means "console unavailable", never an
    /// indeterminate error.
    fn get_pod_console(&self, pod_id: &str) -> String;

    /// Features supported by the backend.
    ///
    /// Best-effort: the zero record means "no optional features", never an
    /// indeterminate error.
    fn capabilities(&self) -> Capabilities;
}

/// Create an (uninitialized) hypervisor of the requested kind.
pub fn create_hypervisor(kind: HypervisorType) -> Box<dyn Hypervisor> {
    match kind {
        HypervisorType::Plugin => Box::new(crate::plugin::PluginHypervisor::new()),
        HypervisorType::Mock => Box::new(mock::MockHypervisor::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_symbols_round_trip() {
        for op in Operation::ALL {
            assert_eq!(Operation::from_symbol(op.symbol()), Some(op));
        }
        assert_eq!(Operation::from_symbol("Destroy"), None);
        assert_eq!(Operation::HotplugRemoveDevice.to_string(), "HotplugRemoveDevice");
    }

    #[test]
    fn test_device_type_raw() {
        assert_eq!(DeviceType::from_raw(DeviceType::Vfio.as_raw()), Some(DeviceType::Vfio));
        assert_eq!(DeviceType::from_raw(99), None);
    }

    #[test]
    fn test_capabilities_flags() {
        let mut caps = Capabilities::default();
        assert!(!caps.is_block_device_supported());
        assert!(!caps.is_block_device_hotplug_supported());

        caps.set_block_device_hotplug_support();
        assert!(caps.is_block_device_hotplug_supported());
        assert!(!caps.is_block_device_supported());
        assert_eq!(caps.flags, 0b10);
    }

    #[test]
    fn test_pod_descriptor_id() {
        let config = PodConfig {
            id: "pod-1".into(),
            ..Default::default()
        };
        assert_eq!(PodDescriptor::new(config).id, "pod-1");

        let generated = PodDescriptor::new(PodConfig::default());
        assert!(!generated.id.is_empty());
    }

    #[test]
    fn test_create_hypervisor_mock() {
        let hv = create_hypervisor(HypervisorType::Mock);
        assert_eq!(hv.capabilities(), Capabilities::default());
    }
}
