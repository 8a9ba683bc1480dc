//! Configuration for hypervisor backends and pods

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::hypervisor::PodConfig;
use crate::{Error, Result};

/// Which [`Hypervisor`](crate::hypervisor::Hypervisor) variant drives a pod
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HypervisorType {
    /// Backend module loaded from `plugin_path` at run time
    #[default]
    Plugin,
    /// In-process mock
    Mock,
}

impl FromStr for HypervisorType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "plugin" => Ok(HypervisorType::Plugin),
            "mock" => Ok(HypervisorType::Mock),
            other => Err(Error::Config(format!("unknown hypervisor type '{}'", other))),
        }
    }
}

/// Hypervisor section of a pod configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypervisorConfig {
    /// Backend variant (default: plugin)
    #[serde(default, rename = "type")]
    pub hypervisor_type: HypervisorType,
    /// Path to the backend module (required for the plugin variant)
    #[serde(default)]
    pub plugin_path: Option<PathBuf>,
    /// Number of vCPUs (default: 1)
    #[serde(default = "default_vcpus")]
    pub vcpus: u32,
    /// Memory size in megabytes (default: 128)
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
}

fn default_vcpus() -> u32 {
    1
}

fn default_memory_mb() -> u32 {
    128
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self {
            hypervisor_type: HypervisorType::default(),
            plugin_path: None,
            vcpus: default_vcpus(),
            memory_mb: default_memory_mb(),
        }
    }
}

impl HypervisorConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend variant
    pub fn hypervisor_type(mut self, kind: HypervisorType) -> Self {
        self.hypervisor_type = kind;
        self
    }

    /// Set the backend module path
    pub fn plugin_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.plugin_path = Some(path.into());
        self
    }

    /// Set the number of vCPUs
    pub fn vcpus(mut self, count: u32) -> Self {
        self.vcpus = count;
        self
    }

    /// Set the memory size in megabytes
    pub fn memory_mb(mut self, mb: u32) -> Self {
        self.memory_mb = mb;
        self
    }

    /// Validate the configuration
    ///
    /// The plugin path is only checked for presence. Whether it names a
    /// loadable module is discovered when the hypervisor is initialized.
    pub fn validate(&self) -> Result<()> {
        if self.hypervisor_type == HypervisorType::Plugin {
            match self.plugin_path {
                Some(ref path) if !path.as_os_str().is_empty() => {}
                _ => {
                    return Err(Error::Config(
                        "plugin hypervisor requires 'plugin_path'".into(),
                    ))
                }
            }
        }

        // Validate memory size (minimum 16MB, maximum 16GB)
        if self.memory_mb < 16 {
            return Err(Error::Config("Memory must be at least 16MB".into()));
        }
        if self.memory_mb > 16 * 1024 {
            return Err(Error::Config("Memory must be at most 16GB".into()));
        }

        if self.vcpus == 0 {
            return Err(Error::Config("Must have at least 1 vCPU".into()));
        }
        if self.vcpus > 256 {
            return Err(Error::Config("Maximum 256 vCPUs supported".into()));
        }

        Ok(())
    }
}

/// Load a pod configuration from a YAML (`.yaml`/`.yml`) or JSON file.
pub fn load_pod_config(path: &Path) -> Result<PodConfig> {
    let raw = fs::read_to_string(path)?;

    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);

    let config: PodConfig = if is_yaml {
        serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid YAML config {}: {}", path.display(), e)))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid JSON config {}: {}", path.display(), e)))?
    };

    config.hypervisor.validate()?;
    Ok(config)
}
