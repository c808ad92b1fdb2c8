//! Metal CLI - validate bare metal cluster specs and render Cluster API objects.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use metal_provisioner::{ClusterSpec, HardwareInventory, KubeObjectLookup, MetalProvider};

/// Metal CLI - bare metal cluster provisioning.
#[derive(Parser)]
#[command(name = "metal")]
#[command(about = "Validate bare metal cluster specs and render Cluster API objects")]
struct Cli {
    /// Enable verbose logging (overridden by `RUST_LOG`).
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Emit logs as JSON.
    #[arg(long, default_value = "false")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Inputs {
    /// Cluster spec YAML (or set `METAL_CLUSTER_CONFIG` env var).
    #[arg(long, env = "METAL_CLUSTER_CONFIG")]
    config: PathBuf,

    /// Hardware inventory YAML (or set `METAL_HARDWARE_INVENTORY` env var).
    #[arg(long, env = "METAL_HARDWARE_INVENTORY")]
    hardware: PathBuf,

    /// Skip probing the control plane endpoint and management IPs.
    #[arg(long, env = "METAL_SKIP_IP_CHECK", default_value = "false")]
    skip_ip_check: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a cluster spec against the hardware inventory.
    Validate {
        #[command(flatten)]
        inputs: Inputs,
    },

    /// Validate, then render the objects for a new cluster.
    Generate {
        #[command(flatten)]
        inputs: Inputs,

        /// Reuse or supersede templates already present in the cluster
        /// reachable through the current kubeconfig.
        #[arg(long, default_value = "false")]
        reconcile: bool,

        /// Write the YAML stream here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decide which templates an upgrade replaces.
    PlanUpgrade {
        #[command(flatten)]
        inputs: Inputs,

        /// Cluster spec currently deployed.
        #[arg(long, env = "METAL_CURRENT_CLUSTER_CONFIG")]
        current: PathBuf,

        /// Also render the upgrade objects, resolving kept templates through
        /// the current kubeconfig.
        #[arg(long, default_value = "false")]
        render: bool,

        /// Write the YAML stream here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_spec(path: &Path) -> Result<ClusterSpec> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read cluster spec {}", path.display()))?;
    ClusterSpec::from_yaml(&text)
        .with_context(|| format!("Failed to parse cluster spec {}", path.display()))
}

fn load_provider(inputs: &Inputs) -> Result<MetalProvider> {
    let text = std::fs::read_to_string(&inputs.hardware).with_context(|| {
        format!("Failed to read hardware inventory {}", inputs.hardware.display())
    })?;
    let catalogue = HardwareInventory::from_yaml(&text)
        .and_then(HardwareInventory::into_catalogue)
        .with_context(|| {
            format!("Invalid hardware inventory {}", inputs.hardware.display())
        })?;
    info!("Loaded {} hardware records", catalogue.total_hardware());
    Ok(MetalProvider::new(catalogue).skip_ip_check(inputs.skip_ip_check))
}

fn write_output(yaml: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, yaml)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => print!("{yaml}"),
    }
    Ok(())
}

async fn kube_lookup() -> Result<Arc<KubeObjectLookup>> {
    let lookup = KubeObjectLookup::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    Ok(Arc::new(lookup))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json);

    match cli.command {
        Commands::Validate { inputs } => {
            let spec = load_spec(&inputs.config)?;
            let provider = load_provider(&inputs)?;
            provider
                .validate_create(&spec)
                .context("Cluster spec validation failed")?;
            info!("Cluster spec {} is valid", spec.name());
        }

        Commands::Generate {
            inputs,
            reconcile,
            output,
        } => {
            let spec = load_spec(&inputs.config)?;
            let provider = load_provider(&inputs)?;
            provider
                .validate_create(&spec)
                .context("Cluster spec validation failed")?;

            let objects = if reconcile {
                provider
                    .reconcile_create(&spec, kube_lookup().await?)
                    .await
                    .context("Failed to reconcile templates")?
            } else {
                provider
                    .generate_create(&spec)
                    .context("Failed to generate templates")?
            };
            write_output(&objects.to_yaml()?, output.as_deref())?;
        }

        Commands::PlanUpgrade {
            inputs,
            current,
            render,
            output,
        } => {
            let current = load_spec(&current)?;
            let new = load_spec(&inputs.config)?;
            let provider = load_provider(&inputs)?;
            provider
                .validate_upgrade(&current, &new)
                .context("Upgrade validation failed")?;

            // Printed as YAML comments so the plan can precede the rendered stream.
            let plan = provider.upgrade_engine().plan(&current, &new)?;
            println!("# control-plane: new template = {}", plan.control_plane);
            println!("# etcd: new template = {}", plan.etcd);
            for (group, decision) in &plan.workers {
                println!(
                    "# {group}: new machine template = {}, new kubeadm config template = {}",
                    decision.machine_template, decision.kubeadm_config_template
                );
            }

            if render {
                let objects = provider
                    .generate_upgrade(&current, &new, kube_lookup().await?)
                    .await
                    .context("Failed to generate upgrade templates")?;
                write_output(&objects.to_yaml()?, output.as_deref())?;
            }
        }
    }

    Ok(())
}
