//! hv-plugin: Hypervisor Backends Loaded at Run Time
//!
//! A pod lifecycle manager drives every virtualization backend through the
//! [`Hypervisor`] trait. This crate provides that trait, an in-process mock,
//! and [`PluginHypervisor`], an adapter that drives a backend module the
//! host was never linked against.
//!
//! # Key Features
//!
//! - **Drop-in backends**: a plugin is indistinguishable from a native backend
//!   to callers, except in how it fails
//! - **Checked entry points**: ABI version and signature are verified before
//!   each call, with distinct errors for missing and mis-shaped exports
//! - **Uniform failures**: every error names the failing operation or module path
//!
//! # Example
//!
//! ```no_run
//! use hv_plugin::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let config = PodConfig {
//!         id: "web".into(),
//!         hypervisor: HypervisorConfig::new().plugin_path("/usr/lib/hv/libfirecracker_hv.so"),
//!         ..Default::default()
//!     };
//!
//!     let mut hv = PluginHypervisor::new();
//!     hv.init(&PodDescriptor::new(config.clone()))?;
//!     hv.create_pod(&config)?;
//!     hv.start_pod()?;
//!
//!     println!("console: {}", hv.get_pod_console("web"));
//!     hv.wait_pod(30)?;
//!     hv.stop_pod()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod hypervisor;
pub mod plugin;

// Re-exports for convenience
pub use config::{HypervisorConfig, HypervisorType};
pub use error::{Error, Result};
pub use hypervisor::{
    create_hypervisor, Capabilities, DeviceInfo, DeviceType, Hypervisor, Operation, PodConfig,
    PodDescriptor,
};
pub use plugin::PluginHypervisor;

// Prelude for common imports
pub mod prelude {
    pub use crate::config::{load_pod_config, HypervisorConfig, HypervisorType};
    pub use crate::error::{Error, Result};
    pub use crate::hypervisor::mock::MockHypervisor;
    pub use crate::hypervisor::{
        create_hypervisor, Capabilities, DeviceInfo, DeviceType, Hypervisor, Operation,
        PodConfig, PodDescriptor, PodState,
    };
    pub use crate::plugin::{ExportReport, PluginHypervisor};
}
