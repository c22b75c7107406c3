//! Builder pattern for constructing gateway engines.
//!
//! Composes a [`GatewayEngine`] from the storage and provider implementations
//! named in the configuration, using factory functions keyed by those names.

use crate::auth::VerificationTokens;
use crate::coordinator::OrderCoordinator;
use crate::engine::GatewayEngine;
use crate::state::OrderStore;
use gateway_config::Config;
use gateway_provider::{GatewayError, PaymentGatewayInterface, ProviderService};
use gateway_storage::{StorageError, StorageInterface, StorageService};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during gateway engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Container for the factory functions needed to build a GatewayEngine.
///
/// Each factory takes the TOML table of its implementation and returns the
/// corresponding implementation.
pub struct GatewayFactories<SF, PF> {
	pub storage_factories: HashMap<String, SF>,
	pub provider_factories: HashMap<String, PF>,
}

/// Builder for constructing a GatewayEngine with pluggable implementations.
pub struct GatewayBuilder {
	config: Config,
}

impl GatewayBuilder {
	/// Creates a new GatewayBuilder with the given configuration.
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Builds the GatewayEngine using factories for each component type.
	pub fn build<SF, PF>(
		self,
		factories: GatewayFactories<SF, PF>,
	) -> Result<GatewayEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		PF: Fn(&toml::Value) -> Result<Box<dyn PaymentGatewayInterface>, GatewayError>,
	{
		// Create storage implementations
		let mut storage_impls = HashMap::new();
		for (name, config) in &self.config.storage.implementations {
			if let Some(factory) = factories.storage_factories.get(name) {
				match factory(config) {
					Ok(implementation) => {
						// Validation already happened in the factory
						storage_impls.insert(name.clone(), implementation);
						let is_primary = &self.config.storage.primary == name;
						tracing::info!(component = "storage", implementation = %name, enabled = %is_primary, "Loaded");
					},
					Err(e) => {
						tracing::error!(
							component = "storage",
							implementation = %name,
							error = %e,
							"Failed to create storage implementation"
						);
						return Err(BuilderError::Config(format!(
							"Failed to create storage implementation '{}': {}",
							name, e
						)));
					},
				}
			} else {
				tracing::warn!(component = "storage", implementation = %name, "Unknown implementation, skipped");
			}
		}

		// Get the primary storage implementation
		let primary_storage = &self.config.storage.primary;
		let storage_backend = storage_impls.remove(primary_storage).ok_or_else(|| {
			BuilderError::MissingComponent(format!(
				"Primary storage '{}' failed to load or has invalid configuration",
				primary_storage
			))
		})?;
		let storage = Arc::new(StorageService::new(storage_backend));

		// Create provider implementations
		let mut gateways: Vec<Arc<dyn PaymentGatewayInterface>> = Vec::new();
		for (name, config) in &self.config.providers.implementations {
			let Some(factory) = factories.provider_factories.get(name) else {
				return Err(BuilderError::Config(format!(
					"Unknown provider implementation '{}'",
					name
				)));
			};
			match factory(config) {
				Ok(implementation) => {
					tracing::info!(
						component = "provider",
						implementation = %name,
						provider = %implementation.provider(),
						"Loaded"
					);
					gateways.push(implementation.into());
				},
				Err(e) => {
					tracing::error!(
						component = "provider",
						implementation = %name,
						error = %e,
						"Failed to create provider implementation"
					);
					return Err(BuilderError::Config(format!(
						"Failed to create provider implementation '{}': {}",
						name, e
					)));
				},
			}
		}

		if gateways.is_empty() {
			return Err(BuilderError::MissingComponent(
				"No provider implementations available".to_string(),
			));
		}
		let providers = Arc::new(
			ProviderService::new(gateways).map_err(|e| BuilderError::Config(e.to_string()))?,
		);

		let tokens = VerificationTokens::new(&self.config.gateway.webhook_secret)
			.map_err(|e| BuilderError::Config(e.to_string()))?;
		let store = Arc::new(OrderStore::new(storage));
		let coordinator = Arc::new(
			OrderCoordinator::new(store, providers.clone(), tokens).with_session_open_timeout(
				Duration::from_secs(self.config.gateway.session_open_timeout_seconds),
			),
		);

		Ok(GatewayEngine::new(self.config, providers, coordinator))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use gateway_provider::ProviderFactory;
	use gateway_storage::StorageFactory;
	use gateway_types::Provider;

	fn config(providers: &str) -> Config {
		format!(
			r#"
			[gateway]
			id = "builder-test"
			webhook_secret = "builder-test-secret-0123"

			[storage]
			primary = "memory"
			[storage.implementations.memory]

			{}
			"#,
			providers
		)
		.parse()
		.unwrap()
	}

	fn factories() -> GatewayFactories<StorageFactory, ProviderFactory> {
		GatewayFactories {
			storage_factories: gateway_storage::get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect(),
			provider_factories: gateway_provider::get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect(),
		}
	}

	#[test]
	fn test_build_with_both_providers() {
		let engine = GatewayBuilder::new(config(
			r#"
			[providers.implementations.coingate]
			api_token = "sandbox-token"

			[providers.implementations.paypal]
			client_id = "client"
			client_secret = "secret"
			"#,
		))
		.build(factories())
		.unwrap();

		assert_eq!(
			engine.providers().providers(),
			vec![Provider::CryptoGateway, Provider::CardGateway]
		);
	}

	#[test]
	fn test_unknown_provider_is_rejected() {
		let result = GatewayBuilder::new(config(
			r#"
			[providers.implementations.stripe]
			api_key = "sk"
			"#,
		))
		.build(factories());
		assert!(matches!(result, Err(BuilderError::Config(_))));
	}

	#[test]
	fn test_invalid_provider_config_is_rejected() {
		let result = GatewayBuilder::new(config(
			r#"
			[providers.implementations.paypal]
			client_id = "client"
			"#,
		))
		.build(factories());
		assert!(matches!(result, Err(BuilderError::Config(_))));
	}
}
