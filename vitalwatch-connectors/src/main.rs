//! `vitalwatch` - simulated bedside vital-signs monitor
//!
//! ```text
//! vitalwatch --config monitor.toml --binding mqtt --collector fd00::1
//! ```
//!
//! Type a patient id on stdin to bind a patient, `reset 5` / `reset 10` to
//! press the reset button, `quit` to stop.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vitalwatch_connectors::runtime::{self, RuntimeOptions};
use vitalwatch_connectors::settings;
use vitalwatch_core::constants::session::DEFAULT_COAP_PORT;
use vitalwatch_core::{Binding, MonitorConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BindingArg {
    /// Register over CoAP, then serve resources
    Coap,
    /// Publish to an MQTT broker
    Mqtt,
}

impl From<BindingArg> for Binding {
    fn from(arg: BindingArg) -> Self {
        match arg {
            BindingArg::Coap => Binding::Coap,
            BindingArg::Mqtt => Binding::Mqtt,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "vitalwatch", version)]
#[command(about = "Simulated bedside vital-signs monitor reporting to a central collector")]
struct Args {
    /// Configuration file (TOML, JSON or YAML)
    #[arg(short, long, env = "VITALWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Collector binding, overrides the configuration
    #[arg(short, long, value_enum)]
    binding: Option<BindingArg>,

    /// Collector host or address
    #[arg(long)]
    collector: Option<String>,

    /// Seed for the sample generators (reproducible runs)
    #[arg(long)]
    seed: Option<u64>,

    /// Generate a patient id on every unbind instead of waiting for input
    #[arg(long)]
    auto_patient_id: bool,

    /// Address reported as the monitor id, instead of the routed one
    #[arg(long)]
    address: Option<IpAddr>,

    /// Port of the CoAP resource server
    #[arg(long, default_value_t = DEFAULT_COAP_PORT)]
    resource_port: u16,

    /// Do not read commands from stdin
    #[arg(long)]
    no_console: bool,
}

impl Args {
    fn apply(&self, config: &mut MonitorConfig) {
        if let Some(binding) = self.binding {
            config.binding = binding.into();
        }
        if let Some(host) = &self.collector {
            config.collector.host.clone_from(host);
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.auto_patient_id {
            config.automatic_patient_id = true;
        }
    }
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or_default()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Also forwards the `log` records of both crates
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
    let args = Args::parse();

    let mut config = settings::load(args.config.as_deref()).context("loading configuration")?;
    args.apply(&mut config);
    if config.seed.is_none() {
        config.seed = Some(clock_seed());
    }
    config.validate().context("invalid configuration")?;
    log::info!(
        "vitalwatch {} starting, {:?} binding, collector {}",
        vitalwatch_core::VERSION,
        config.binding,
        config.collector.host
    );

    let options = RuntimeOptions {
        address: args.address,
        resource_port: args.resource_port,
        console: !args.no_console,
    };
    runtime::run(config, options).await.context("monitor terminated")?;
    log::info!("monitor stopped");
    Ok(())
}
