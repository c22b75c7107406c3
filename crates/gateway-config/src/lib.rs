//! Configuration module for the payment gateway service.
//!
//! This module provides the configuration structures of the gateway and the
//! utilities to load them from TOML files. Secrets are never given defaults:
//! they are injected through `${VAR}` placeholders that fail loading when the
//! variable is unset.

use gateway_types::SecretString;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

/// Minimum accepted length of the webhook secret.
pub const MIN_WEBHOOK_SECRET_LEN: usize = 16;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep only the message, the error display repeats the input
		let message = err.message().to_string();
		ConfigError::Parse(message)
	}
}

/// Main configuration structure for the payment gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Identity, secrets and timing of this gateway instance.
	pub gateway: GatewayConfig,
	/// Configuration for the storage backend.
	pub storage: StorageConfig,
	/// Payment provider implementations.
	pub providers: ProvidersConfig,
	/// Configuration for the HTTP API server.
	pub api: Option<ApiConfig>,
}

/// Configuration specific to the gateway instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
	/// Identifier of this gateway instance, used in logs.
	pub id: String,
	/// Shared secret used to derive and verify callback tokens.
	pub webhook_secret: SecretString,
	/// Interval between two expiry sweeps.
	#[serde(default = "default_sweep_interval")]
	pub expiry_sweep_interval_seconds: u64,
	/// Upper bound of background tasks running at once.
	#[serde(default = "default_max_concurrent_tasks")]
	pub max_concurrent_tasks: usize,
	/// Age after which an order whose payment session never opened is failed
	/// by the expiry sweep. Must exceed the slowest provider's timeouts.
	#[serde(default = "default_session_open_timeout")]
	pub session_open_timeout_seconds: u64,
}

fn default_sweep_interval() -> u64 {
	60
}

fn default_max_concurrent_tasks() -> usize {
	100
}

fn default_session_open_timeout() -> u64 {
	120
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for payment providers.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvidersConfig {
	/// Map of provider implementation names (`coingate`, `paypal`) to their
	/// configurations. Each implementation validates its own table.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	/// Whether the API server is enabled.
	#[serde(default)]
	pub enabled: bool,
	/// Host address to bind the server to.
	#[serde(default = "default_api_host")]
	pub host: String,
	/// Port to bind the server to.
	#[serde(default = "default_api_port")]
	pub port: u16,
	/// Request timeout in seconds.
	#[serde(default = "default_api_timeout")]
	pub timeout_seconds: u64,
	/// Maximum request size in bytes.
	#[serde(default = "default_max_request_size")]
	pub max_request_size: usize,
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	1313
}

fn default_api_timeout() -> u64 {
	30
}

fn default_max_request_size() -> usize {
	64 * 1024
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB to prevent ReDoS attacks.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut replacements = Vec::new();
	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let default_value = cap.get(2).map(|m| m.as_str());

		let value = match std::env::var(var_name.as_str()) {
			Ok(v) => v,
			Err(_) => match default_value {
				Some(default) => default.to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name.as_str()
					)))
				},
			},
		};

		replacements.push((full_match.start(), full_match.end(), value));
	}

	// Apply in reverse so earlier offsets stay valid
	let mut result = input.to_string();
	for (start, end, value) in replacements.iter().rev() {
		result.replace_range(start..end, value);
	}

	Ok(result)
}

impl Config {
	/// Loads configuration from a file, resolving environment variables.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let content = tokio::fs::read_to_string(path).await?;
		content.parse()
	}

	/// Validates cross-field constraints that serde cannot express.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.gateway.id.trim().is_empty() {
			return Err(ConfigError::Validation("Gateway ID cannot be empty".into()));
		}

		if self.gateway.webhook_secret.len() < MIN_WEBHOOK_SECRET_LEN
			|| self.gateway.webhook_secret.is_blank()
		{
			return Err(ConfigError::Validation(format!(
				"webhook_secret must be at least {} characters",
				MIN_WEBHOOK_SECRET_LEN
			)));
		}

		if !(1..=86_400).contains(&self.gateway.expiry_sweep_interval_seconds) {
			return Err(ConfigError::Validation(
				"expiry_sweep_interval_seconds must be between 1 and 86400".into(),
			));
		}

		if self.gateway.session_open_timeout_seconds == 0 {
			return Err(ConfigError::Validation(
				"session_open_timeout_seconds must be greater than 0".into(),
			));
		}

		if self.gateway.max_concurrent_tasks == 0 {
			return Err(ConfigError::Validation(
				"max_concurrent_tasks must be greater than 0".into(),
			));
		}

		if self.storage.primary.is_empty() {
			return Err(ConfigError::Validation(
				"Storage primary implementation cannot be empty".into(),
			));
		}

		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' has no entry in [storage.implementations]",
				self.storage.primary
			)));
		}


		if self.providers.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one provider implementation must be configured".into(),
			));
		}

		if let Some(api) = &self.api {
			if api.enabled && api.port == 0 {
				return Err(ConfigError::Validation("API port cannot be 0".into()));
			}
		}

		Ok(())
	}
}

/// Parses a TOML string, resolving environment variables and validating the
/// result.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	fn base_config(gateway_section: &str) -> String {
		format!(
			r#"
{gateway_section}

[storage]
primary = "memory"
[storage.implementations.memory]

[providers.implementations.coingate]
environment = "sandbox"
api_token = "token"
"#
		)
	}

	#[tokio::test]
	async fn test_from_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		let content = base_config(
			r#"
[gateway]
id = "from-file"
webhook_secret = "0123456789abcdef"
"#,
		);
		write!(file, "{}", content).unwrap();

		let config = Config::from_file(&file.path().to_string_lossy())
			.await
			.unwrap();
		assert_eq!(config.gateway.id, "from-file");
		assert_eq!(config.providers.implementations.len(), 1);
	}

	#[tokio::test]
	async fn test_from_missing_file() {
		let dir = tempfile::tempdir().unwrap();
		let missing = dir.path().join("absent.toml");
		let result = Config::from_file(&missing.to_string_lossy()).await;
		assert!(matches!(result, Err(ConfigError::Io(_))));
	}

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("GW_TEST_HOST", "localhost");
		std::env::set_var("GW_TEST_PORT", "1313");

		let input = "host = \"${GW_TEST_HOST}:${GW_TEST_PORT}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "host = \"localhost:1313\"");

		std::env::remove_var("GW_TEST_HOST");
		std::env::remove_var("GW_TEST_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let input = "value = \"${GW_MISSING_VAR:-sandbox}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "value = \"sandbox\"");
	}

	#[test]
	fn test_missing_secret_fails_loading() {
		let config = base_config(
			r#"
[gateway]
id = "checkout"
webhook_secret = "${GW_UNSET_WEBHOOK_SECRET}"
"#,
		);
		let err = config.parse::<Config>().unwrap_err();
		assert!(err.to_string().contains("GW_UNSET_WEBHOOK_SECRET"));
	}

	#[test]
	fn test_config_with_env_secret() {
		std::env::set_var("GW_TEST_WEBHOOK_SECRET", "0123456789abcdef0123");

		let config: Config = base_config(
			r#"
[gateway]
id = "checkout"
webhook_secret = "${GW_TEST_WEBHOOK_SECRET}"
"#,
		)
		.parse()
		.unwrap();

		assert_eq!(
			config.gateway.webhook_secret.expose_secret(),
			"0123456789abcdef0123"
		);
		assert_eq!(config.gateway.expiry_sweep_interval_seconds, 60);
		assert_eq!(config.gateway.max_concurrent_tasks, 100);
		assert!(config.providers.implementations.contains_key("coingate"));
		assert!(config.api.is_none());

		std::env::remove_var("GW_TEST_WEBHOOK_SECRET");
	}

	#[test]
	fn test_short_webhook_secret_rejected() {
		let result = base_config(
			r#"
[gateway]
id = "checkout"
webhook_secret = "short"
"#,
		)
		.parse::<Config>();
		assert!(matches!(result, Err(ConfigError::Validation(_))));
	}

	#[test]
	fn test_sweep_interval_bounds() {
		let result = base_config(
			r#"
[gateway]
id = "checkout"
webhook_secret = "0123456789abcdef"
expiry_sweep_interval_seconds = 0
"#,
		)
		.parse::<Config>();
		assert!(result.is_err());
	}

	#[test]
	fn test_session_open_timeout() {
		let config: Config = base_config(
			r#"
[gateway]
id = "checkout"
webhook_secret = "0123456789abcdef"
"#,
		)
		.parse()
		.unwrap();
		assert_eq!(config.gateway.session_open_timeout_seconds, 120);

		let result = base_config(
			r#"
[gateway]
id = "checkout"
webhook_secret = "0123456789abcdef"
session_open_timeout_seconds = 0
"#,
		)
		.parse::<Config>();
		assert!(result.is_err());
	}

	#[test]
	fn test_providers_required() {
		let config = r#"
[gateway]
id = "checkout"
webhook_secret = "0123456789abcdef"

[storage]
primary = "memory"
[storage.implementations.memory]

[providers.implementations]
"#;
		let err = config.parse::<Config>().unwrap_err();
		assert!(err.to_string().contains("provider"));
	}

	#[test]
	fn test_api_defaults() {
		let mut config = base_config(
			r#"
[gateway]
id = "checkout"
webhook_secret = "0123456789abcdef"
"#,
		);
		config.push_str("\n[api]\nenabled = true\n");
		let config: Config = config.parse().unwrap();
		let api = config.api.unwrap();
		assert_eq!(api.host, "127.0.0.1");
		assert_eq!(api.port, 1313);
		assert_eq!(api.timeout_seconds, 30);
	}

	#[test]
	fn test_secret_redacted_when_config_is_printed() {
		let config: Config = base_config(
			r#"
[gateway]
id = "checkout"
webhook_secret = "0123456789abcdef"
"#,
		)
		.parse()
		.unwrap();
		assert!(!format!("{:?}", config).contains("0123456789abcdef"));
	}
}
