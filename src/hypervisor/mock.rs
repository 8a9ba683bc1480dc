//! In-process mock hypervisor.
//!
//! Follows the [`PodState`] machine and rejects out-of-order calls the way a
//! real backend would, so orchestration code can be exercised without a
//! plugin module on disk.

use tracing::debug;

use super::{
    Capabilities, DeviceInfo, DeviceType, Hypervisor, Operation, PodConfig, PodDescriptor,
    PodState,
};
use crate::{Error, Result};

/// Directory under which mock console sockets are reported.
const CONSOLE_DIR: &str = "/run/hv-plugin";

/// A device call recorded by the mock, in call order.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCall {
    pub operation: Operation,
    pub device: DeviceInfo,
    pub kind: DeviceType,
}

/// Mock hypervisor for testing
pub struct MockHypervisor {
    state: PodState,
    pod_id: Option<String>,
    capabilities: Capabilities,
    devices: Vec<DeviceCall>,
}

impl Default for MockHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHypervisor {
    /// Create a new mock hypervisor that reports no capabilities
    pub fn new() -> Self {
        Self {
            state: PodState::Unloaded,
            pod_id: None,
            capabilities: Capabilities::default(),
            devices: Vec::new(),
        }
    }

    /// Report `capabilities` from [`Hypervisor::capabilities`]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn state(&self) -> PodState {
        self.state
    }

    /// Device calls accepted so far
    pub fn devices(&self) -> &[DeviceCall] {
        &self.devices
    }

    fn transition(&mut self, op: Operation) -> Result<()> {
        let next = self.state.next(op).ok_or_else(|| {
            Error::operation_failed(op, format!("not allowed while pod is {:?}", self.state))
        })?;
        debug!("mock hypervisor: {} {:?} -> {:?}", op, self.state, next);
        self.state = next;
        Ok(())
    }

    fn record(&mut self, op: Operation, device: &DeviceInfo, kind: DeviceType) -> Result<()> {
        self.transition(op)?;
        self.devices.push(DeviceCall {
            operation: op,
            device: device.clone(),
            kind,
        });
        Ok(())
    }
}

impl Hypervisor for MockHypervisor {
    fn init(&mut self, pod: &PodDescriptor) -> Result<()> {
        if self.pod_id.is_some() {
            return Err(Error::AlreadyInitialized);
        }
        self.transition(Operation::Init)?;
        self.pod_id = Some(pod.id.clone());
        Ok(())
    }

    fn create_pod(&mut self, _config: &PodConfig) -> Result<()> {
        self.transition(Operation::CreatePod)
    }

    fn start_pod(&mut self) -> Result<()> {
        self.transition(Operation::StartPod)
    }

    fn wait_pod(&mut self, _timeout: i64) -> Result<()> {
        // Nothing runs inside the mock, so a started pod has already "exited".
        self.transition(Operation::WaitPod)
    }

    fn stop_pod(&mut self) -> Result<()> {
        self.transition(Operation::StopPod)
    }

    fn pause_pod(&mut self) -> Result<()> {
        self.transition(Operation::PausePod)
    }

    fn resume_pod(&mut self) -> Result<()> {
        self.transition(Operation::ResumePod)
    }

    fn add_device(&mut self, device: &DeviceInfo, kind: DeviceType) -> Result<()> {
        self.record(Operation::AddDevice, device, kind)
    }

    fn hotplug_add_device(&mut self, device: &DeviceInfo, kind: DeviceType) -> Result<()> {
        self.record(Operation::HotplugAddDevice, device, kind)
    }

    fn hotplug_remove_device(&mut self, device: &DeviceInfo, kind: DeviceType) -> Result<()> {
        self.record(Operation::HotplugRemoveDevice, device, kind)
    }

    fn get_pod_console(&self, pod_id: &str) -> String {
        if self.pod_id.is_none() {
            return String::new();
        }
        format!("{}/{}/console.sock", CONSOLE_DIR, pod_id)
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}
