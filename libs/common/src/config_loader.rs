//! Configuration loading helpers
//!
//! Layers, lowest priority first:
//! 1. `T::default()`
//! 2. `config/{service_name}.yaml` (optional)
//! 3. an explicit file passed on the command line (yaml, toml or json)
//! 4. environment variables `{SERVICE_NAME}_*`, nested keys split on `__`

use crate::{Error, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tracing::info;

/// Environment prefix derived from a service name: `alarm-notifier` -> `ALARM_NOTIFIER_`
pub fn env_prefix(service_name: &str) -> String {
    format!("{}_", service_name.to_uppercase().replace('-', "_"))
}

/// Build the layered figment for a service
pub fn figment_for<T>(service_name: &str, explicit_file: Option<&Path>) -> Result<Figment>
where
    T: Serialize + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()))
        .merge(Yaml::file(format!("config/{}.yaml", service_name)));

    if let Some(path) = explicit_file {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        figment = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
            Some("toml") => figment.merge(Toml::file(path)),
            Some("json") => figment.merge(Json::file(path)),
            other => {
                return Err(Error::Config(format!(
                    "Unsupported config file format: {:?}",
                    other
                )))
            },
        };
        info!("Using config file {}", path.display());
    }

    Ok(figment.merge(Env::prefixed(&env_prefix(service_name)).split("__")))
}

/// Load a service configuration from all layers
pub fn load_config<T>(service_name: &str, explicit_file: Option<&Path>) -> Result<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    figment_for::<T>(service_name, explicit_file)?
        .extract()
        .map_err(|e| Error::Config(format!("Failed to load configuration: {}", e)))
}
