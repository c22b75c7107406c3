//! Registry trait for self-registering implementations.
//!
//! Storage backends and payment provider gateways each expose a `Registry`
//! struct implementing this trait, so the service can wire them up by the
//! name used in configuration.

/// Base trait for implementation registries.
pub trait ImplementationRegistry {
	/// The name used in configuration files to reference this implementation.
	///
	/// For example "memory" for `storage.implementations.memory` or
	/// "coingate" for `providers.implementations.coingate`.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Get the factory function for this implementation.
	fn factory() -> Self::Factory;
}
