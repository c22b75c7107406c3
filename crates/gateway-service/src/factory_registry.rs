//! Dynamic factory registry for gateway implementations.
//!
//! Collects every storage backend and provider gateway the crates offer, so
//! the engine can be built from the implementation names in configuration.

use gateway_config::Config;
use gateway_core::{GatewayBuilder, GatewayEngine, GatewayFactories};
use gateway_provider::ProviderFactory;
use gateway_storage::StorageFactory;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Global registry for all implementation factories
pub struct FactoryRegistry {
	pub storage: HashMap<String, StorageFactory>,
	pub providers: HashMap<String, ProviderFactory>,
}

impl FactoryRegistry {
	/// Create a new empty registry
	pub fn new() -> Self {
		Self {
			storage: HashMap::new(),
			providers: HashMap::new(),
		}
	}

	/// Register a storage implementation
	pub fn register_storage(&mut self, name: impl Into<String>, factory: StorageFactory) {
		self.storage.insert(name.into(), factory);
	}

	/// Register a provider implementation
	pub fn register_provider(&mut self, name: impl Into<String>, factory: ProviderFactory) {
		self.providers.insert(name.into(), factory);
	}
}

// Global registry instance
static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

/// Get the global factory registry, initializing it on first use
pub fn get_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(|| {
		let mut registry = FactoryRegistry::new();

		for (name, factory) in gateway_storage::get_all_implementations() {
			tracing::debug!("Registering storage implementation: {}", name);
			registry.register_storage(name, factory);
		}

		for (name, factory) in gateway_provider::get_all_implementations() {
			tracing::debug!("Registering provider implementation: {}", name);
			registry.register_provider(name, factory);
		}

		registry
	})
}

/// Macro to build factories from config implementations
macro_rules! build_factories {
	($registry:expr, $config_impls:expr, $registry_field:ident, $type_name:literal) => {{
		let mut factories = HashMap::new();
		for name in $config_impls.keys() {
			if let Some(factory) = $registry.$registry_field.get(name) {
				factories.insert(name.clone(), *factory);
			} else {
				let mut available: Vec<_> = $registry.$registry_field.keys().cloned().collect();
				available.sort();
				return Err(format!(
					"Unknown {} implementation '{}'. Available: [{}]",
					$type_name,
					name,
					available.join(", ")
				)
				.into());
			}
		}
		factories
	}};
}

/// Build the gateway engine using the registry and config
pub fn build_gateway_from_config(
	config: Config,
) -> Result<GatewayEngine, Box<dyn std::error::Error>> {
	let registry = get_registry();

	let storage_factories =
		build_factories!(registry, config.storage.implementations, storage, "storage");
	let provider_factories = build_factories!(
		registry,
		config.providers.implementations,
		providers,
		"provider"
	);

	let factories = GatewayFactories {
		storage_factories,
		provider_factories,
	};

	Ok(GatewayBuilder::new(config).build(factories)?)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_registry_knows_all_implementations() {
		let registry = get_registry();
		assert!(registry.storage.contains_key("memory"));
		assert!(registry.storage.contains_key("file"));
		assert!(registry.providers.contains_key("coingate"));
		assert!(registry.providers.contains_key("paypal"));
	}

	#[test]
	fn test_unknown_storage_lists_available() {
		let config: Config = r#"
			[gateway]
			id = "registry-test"
			webhook_secret = "registry-test-secret-01"

			[storage]
			primary = "redis"
			[storage.implementations.redis]
			url = "redis://localhost"

			[providers.implementations.coingate]
			api_token = "token"
		"#
		.parse()
		.unwrap();

		let err = build_gateway_from_config(config).err().unwrap().to_string();
		assert!(err.contains("Unknown storage implementation 'redis'"));
		assert!(err.contains("file, memory"));
	}
}
