use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Fixed identity of the managed instance. At most one container with this
/// name exists at a time; starting a new one replaces any prior instance.
pub const CONTAINER_NAME: &str = "medrax";

/// Image tag produced by `build` and launched by `start`.
pub const IMAGE_TAG: &str = "medrax:latest";

/// Host port the agent's web UI is published on.
pub const HOST_PORT: u16 = 11180;

/// Port the agent listens on inside the container.
pub const CONTAINER_PORT: u16 = 8585;

/// Credential file consulted when a variable is not in the process environment.
pub const ENV_FILE: &str = ".env";

/// Inference device requested for the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cuda,
    Cpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::Cpu => "cpu",
        }
    }
}

impl std::str::FromStr for Device {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cuda" => Ok(Device::Cuda),
            "cpu" => Ok(Device::Cpu),
            other => Err(ConfigError::InvalidDevice(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid DEVICE '{0}': expected 'cuda' or 'cpu'")]
    InvalidDevice(String),

    #[error("invalid {name} '{value}': expected a number")]
    InvalidNumber { name: &'static str, value: String },
}

/// Environment-derived configuration, resolved once per invocation and
/// immutable afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfig {
    pub device: Device,
    pub model: String,
    pub temp_dir: String,
    pub temperature: f64,
    pub top_p: f64,
    pub model_weights_path: String,
    pub model_cache_dir: String,
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
}

impl RuntimeConfig {
    /// Resolve from the process environment, falling back to the `.env`
    /// credential file in the working directory, then to defaults.
    pub fn resolve() -> Result<Self, ConfigError> {
        let file_vars = crate::config::env_file::load(Path::new(ENV_FILE)).unwrap_or_default();
        Self::resolve_with(|key| {
            std::env::var(key)
                .ok()
                .or_else(|| file_vars.get(key).cloned())
        })
    }

    /// Resolve from an arbitrary lookup function. Pure, so it can be tested
    /// without touching process-global state.
    pub fn resolve_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let device = match lookup("DEVICE") {
            Some(value) => value.parse()?,
            None => Device::Cuda,
        };

        Ok(Self {
            device,
            model: lookup("MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
            temp_dir: lookup("TEMP_DIR").unwrap_or_else(|| "temp".to_string()),
            temperature: parse_number("TEMPERATURE", lookup("TEMPERATURE"), 0.7)?,
            top_p: parse_number("TOP_P", lookup("TOP_P"), 0.95)?,
            model_weights_path: lookup("MODEL_WEIGHTS_PATH")
                .unwrap_or_else(|| "./model-weights".to_string()),
            model_cache_dir: lookup("MODEL_CACHE_DIR")
                .unwrap_or_else(|| "./model-cache".to_string()),
            openai_api_key: lookup("OPENAI_API_KEY").filter(|v| !v.is_empty()),
            openai_base_url: lookup("OPENAI_BASE_URL").filter(|v| !v.is_empty()),
        })
    }

    /// Whether the required external-service credential is available.
    pub fn has_credential(&self) -> bool {
        self.openai_api_key.is_some()
    }

    /// Environment variables forwarded into the container.
    pub fn container_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("MODEL".to_string(), self.model.clone()),
            ("DEVICE".to_string(), self.device.as_str().to_string()),
            ("TEMP_DIR".to_string(), self.temp_dir.clone()),
            ("TEMPERATURE".to_string(), self.temperature.to_string()),
            ("TOP_P".to_string(), self.top_p.to_string()),
        ];
        if let Some(key) = &self.openai_api_key {
            env.push(("OPENAI_API_KEY".to_string(), key.clone()));
        }
        if let Some(url) = &self.openai_base_url {
            env.push(("OPENAI_BASE_URL".to_string(), url.clone()));
        }
        env
    }
}

fn parse_number(
    name: &'static str,
    value: Option<String>,
    default: f64,
) -> Result<f64, ConfigError> {
    match value {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidNumber {
            name,
            value: raw.clone(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(vars: &[(&str, &str)]) -> Result<RuntimeConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RuntimeConfig::resolve_with(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = resolve(&[]).unwrap();
        assert_eq!(config.device, Device::Cuda);
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.temp_dir, "temp");
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.top_p, 0.95);
        assert_eq!(config.model_weights_path, "./model-weights");
        assert_eq!(config.model_cache_dir, "./model-cache");
        assert!(!config.has_credential());
        assert!(config.openai_base_url.is_none());
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = resolve(&[
            ("DEVICE", "cpu"),
            ("MODEL", "gpt-4o-mini"),
            ("TEMPERATURE", "0.2"),
            ("OPENAI_API_KEY", "sk-test"),
        ])
        .unwrap();
        assert_eq!(config.device, Device::Cpu);
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.temperature, 0.2);
        assert!(config.has_credential());
    }

    #[test]
    fn invalid_device_is_rejected() {
        let err = resolve(&[("DEVICE", "tpu")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDevice(v) if v == "tpu"));
    }

    #[test]
    fn invalid_temperature_is_rejected() {
        let err = resolve(&[("TEMPERATURE", "warm")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { name: "TEMPERATURE", .. }));
    }

    #[test]
    fn empty_credential_counts_as_absent() {
        let config = resolve(&[("OPENAI_API_KEY", "")]).unwrap();
        assert!(!config.has_credential());
    }

    #[test]
    fn serialized_config_reports_settings_but_never_the_credential() {
        let config = resolve(&[("DEVICE", "cpu"), ("OPENAI_API_KEY", "sk-secret")]).unwrap();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["device"], "cpu");
        assert_eq!(json["model"], "gpt-4o");
        assert!(json.get("openai_api_key").is_none());
        assert!(!json.to_string().contains("sk-secret"));
    }

    #[test]
    fn container_env_forwards_resolved_values() {
        let config = resolve(&[("DEVICE", "cpu"), ("OPENAI_API_KEY", "sk-test")]).unwrap();
        let env = config.container_env();
        assert!(env.contains(&("DEVICE".to_string(), "cpu".to_string())));
        assert!(env.contains(&("MODEL".to_string(), "gpt-4o".to_string())));
        assert!(env.contains(&("OPENAI_API_KEY".to_string(), "sk-test".to_string())));
        // Unset optionals are not forwarded
        assert!(!env.iter().any(|(k, _)| k == "OPENAI_BASE_URL"));
    }
}
