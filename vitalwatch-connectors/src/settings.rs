//! Configuration loading
//!
//! Layers, later wins:
//!
//! 1. Built-in defaults (`MonitorConfig::default()`)
//! 2. Optional file (TOML, JSON or YAML, by extension)
//! 3. `VITALWATCH_*` environment variables, `__` between nested keys:
//!    `VITALWATCH_BINDING=mqtt`, `VITALWATCH_COLLECTOR__HOST=fd00::1`,
//!    `VITALWATCH_CHANNELS__HEART_RATE__THRESHOLDS__MAX=130`
//!
//! Command line flags are applied by the binary on top of the result.

use std::path::Path;

use config::{Config, Environment, File};
use vitalwatch_core::MonitorConfig;

use crate::ConnectorResult;

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "VITALWATCH";

/// Load and validate the monitor configuration
pub fn load(path: Option<&Path>) -> ConnectorResult<MonitorConfig> {
    load_with(path, environment())
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn load_with(path: Option<&Path>, env: Environment) -> ConnectorResult<MonitorConfig> {
    let mut builder = Config::builder().add_source(Config::try_from(&MonitorConfig::default())?);
    if let Some(path) = path {
        log::info!("loading configuration from {}", path.display());
        builder = builder.add_source(File::from(path));
    }

    let config: MonitorConfig = builder.add_source(env).build()?.try_deserialize()?;
    config.validate()?;
    Ok(config)
}
