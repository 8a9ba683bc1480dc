use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use hv_plugin::config::load_pod_config;
use hv_plugin::hypervisor::{create_hypervisor, Hypervisor, PodDescriptor};
use hv_plugin::plugin::{ExportReport, LoadedModule};
use hv_plugin::{HypervisorType, PodConfig};

#[derive(Parser)]
#[command(name = "hvplugin", version, about = "Drive pods through a hypervisor plugin")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a plugin module and list which operations it exports
    Probe {
        #[arg(long, env = "HVPLUGIN_PATH")]
        plugin: PathBuf,
    },
    /// Create, start and wait for a pod, then stop it
    Run {
        #[command(flatten)]
        pod: PodArgs,
        /// How long to wait for the pod (e.g. "30s", "5m")
        #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
        timeout: Duration,
    },
    /// Print the pod console path (empty if the backend has none)
    Console {
        #[command(flatten)]
        pod: PodArgs,
    },
    /// Print the backend's capabilities as JSON
    Capabilities {
        #[command(flatten)]
        pod: PodArgs,
    },
}

#[derive(Args)]
struct PodArgs {
    /// Pod configuration (YAML or JSON)
    #[arg(long)]
    config: PathBuf,
    /// Override `hypervisor.plugin_path` from the config
    #[arg(long, env = "HVPLUGIN_PATH")]
    plugin: Option<PathBuf>,
}

impl PodArgs {
    fn load(&self) -> Result<PodConfig, Box<dyn std::error::Error>> {
        let mut config = load_pod_config(&self.config)?;
        if let Some(ref plugin) = self.plugin {
            config.hypervisor.plugin_path = Some(plugin.clone());
            config.hypervisor.hypervisor_type = HypervisorType::Plugin;
        }
        Ok(config)
    }

    fn init(&self) -> Result<(Box<dyn Hypervisor>, PodDescriptor), Box<dyn std::error::Error>> {
        let config = self.load()?;
        let pod = PodDescriptor::new(config);
        let mut hv = create_hypervisor(pod.config.hypervisor.hypervisor_type);
        hv.init(&pod)?;
        Ok((hv, pod))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Probe { plugin } => {
            if !cmd_probe(&plugin)? {
                return Ok(ExitCode::from(2));
            }
        }
        Command::Run { pod, timeout } => cmd_run(&pod, timeout).await?,
        Command::Console { pod } => {
            let (hv, desc) = pod.init()?;
            println!("{}", hv.get_pod_console(&desc.id));
        }
        Command::Capabilities { pod } => {
            let (hv, _) = pod.init()?;
            let caps = hv.capabilities();
            println!("{}", serde_json::to_string_pretty(&caps)?);
            println!("block devices: {}", caps.is_block_device_supported());
            println!("block hotplug: {}", caps.is_block_device_hotplug_supported());
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Print the export report. Returns whether the module is complete.
fn cmd_probe(plugin: &Path) -> Result<bool, Box<dyn std::error::Error>> {
    let module = LoadedModule::open(plugin)?;
    let report = ExportReport::verify(&module);
    print!("{}", report);
    Ok(report.is_complete())
}

async fn cmd_run(args: &PodArgs, timeout: Duration) -> Result<(), Box<dyn std::error::Error>> {
    let (mut hv, pod) = args.init()?;
    hv.create_pod(&pod.config)?;
    hv.start_pod()?;
    info!("pod {} started", pod.id);

    let console = hv.get_pod_console(&pod.id);
    if !console.is_empty() {
        println!("console: {}", console);
    }

    let timeout_secs = i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX);
    let mut wait = tokio::task::spawn_blocking(move || {
        let result = hv.wait_pod(timeout_secs);
        (hv, result)
    });

    // WaitPod has no cancel signal; an interrupt only skips ahead to StopPod
    // once the backend returns.
    let (mut hv, waited) = tokio::select! {
        joined = &mut wait => joined?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, stopping pod {} after WaitPod returns", pod.id);
            wait.await?
        }
    };
    if let Err(e) = waited {
        warn!("wait for pod {} failed: {}", pod.id, e);
    }

    hv.stop_pod()?;
    println!("pod {} stopped", pod.id);
    Ok(())
}
