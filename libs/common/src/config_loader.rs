//! Layered configuration loading
//!
//! Priority (highest to lowest):
//! 1. Environment variables prefixed with `<SERVICE>_`
//! 2. Explicit config file (`--config`), or `config/<service>.{yaml,yml,toml,json}`
//! 3. Built-in defaults of the config struct

use std::path::{Path, PathBuf};

use errors::{OmnitorError, OmnitorResult};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default directory searched for `<service>.yaml` and friends
pub const DEFAULT_CONFIG_DIR: &str = "config";

/// Build the figment for a service without extracting it
///
/// Exposed so callers (and tests) can add providers before extraction.
pub fn config_figment<T>(service_name: &str, path: Option<&Path>) -> OmnitorResult<Figment>
where
    T: Serialize + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    match path {
        Some(path) => {
            debug!("Config file: {}", path.display());
            figment = merge_file(figment, path)?;
        },
        None => {
            let base = PathBuf::from(DEFAULT_CONFIG_DIR);
            figment = figment
                .merge(Toml::file(base.join(format!("{}.toml", service_name))))
                .merge(Yaml::file(base.join(format!("{}.yml", service_name))))
                .merge(Yaml::file(base.join(format!("{}.yaml", service_name))))
                .merge(Json::file(base.join(format!("{}.json", service_name))));
        },
    }

    Ok(figment.merge(Env::prefixed(&env_prefix(service_name))))
}

/// Load a service configuration
///
/// A missing default file is not an error; a missing explicit file is.
pub fn load_config<T>(service_name: &str, path: Option<&Path>) -> OmnitorResult<T>
where
    T: Serialize + for<'de> Deserialize<'de> + Default,
{
    if let Some(path) = path {
        if !path.exists() {
            return Err(OmnitorError::Configuration(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
    }

    let config = config_figment::<T>(service_name, path)?
        .extract()
        .map_err(|e| OmnitorError::Configuration(format!("Failed to load configuration: {}", e)))?;
    Ok(config)
}

/// Environment variable prefix for a service, e.g. `LINKSRV_`
pub fn env_prefix(service_name: &str) -> String {
    format!("{}_", service_name.to_uppercase())
}

fn merge_file(figment: Figment, path: &Path) -> OmnitorResult<Figment> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| OmnitorError::Configuration("Config file must have an extension".into()))?;

    let figment = match extension {
        "toml" => figment.merge(Toml::file(path)),
        "yaml" | "yml" => figment.merge(Yaml::file(path)),
        "json" => figment.merge(Json::file(path)),
        _ => {
            return Err(OmnitorError::Configuration(format!(
                "Unsupported config file format: {}",
                extension
            )))
        },
    };
    Ok(figment)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    #[serde(default)]
    struct TestConfig {
        port_hint: String,
        baud_rate: u32,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            Self {
                port_hint: "ttyACM".into(),
                baud_rate: 9600,
            }
        }
    }

    #[test]
    fn test_defaults_when_nothing_present() {
        let cfg: TestConfig = load_config("cfgtestnone", None).unwrap();
        assert_eq!(cfg, TestConfig::default());
    }

    #[test]
    fn test_yaml_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("svc.yaml");
        std::fs::write(&path, "baud_rate: 115200\n").unwrap();

        let cfg: TestConfig = load_config("cfgtestyaml", Some(&path)).unwrap();
        assert_eq!(cfg.baud_rate, 115200);
        assert_eq!(cfg.port_hint, "ttyACM");
    }

    #[test]
    fn test_toml_and_json_files() {
        let dir = TempDir::new().unwrap();
        let toml = dir.path().join("svc.toml");
        std::fs::write(&toml, "port_hint = \"usbserial\"\n").unwrap();
        let json = dir.path().join("svc.json");
        std::fs::write(&json, r#"{"baud_rate": 19200}"#).unwrap();

        let cfg: TestConfig = load_config("cfgtesttoml", Some(&toml)).unwrap();
        assert_eq!(cfg.port_hint, "usbserial");
        let cfg: TestConfig = load_config("cfgtestjson", Some(&json)).unwrap();
        assert_eq!(cfg.baud_rate, 19200);
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("svc.yaml", "baud_rate: 115200\n")?;
            jail.set_env("CFGTESTENV_BAUD_RATE", "57600");

            let cfg: TestConfig =
                load_config("cfgtestenv", Some(Path::new("svc.yaml"))).map_err(|e| e.to_string())?;
            assert_eq!(cfg.baud_rate, 57600);
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let err = load_config::<TestConfig>("cfgtest", Some(Path::new("/nonexistent/x.yaml")))
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("svc.ini");
        std::fs::write(&path, "x=1").unwrap();
        let err = load_config::<TestConfig>("cfgtest", Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Unsupported"));
    }

    #[test]
    fn test_env_prefix() {
        assert_eq!(env_prefix("linksrv"), "LINKSRV_");
    }
}
