//! Lifecycle management for the gateway engine.

use super::{EngineError, GatewayEngine};

impl GatewayEngine {
	/// Checks every provider before serving traffic.
	///
	/// An unreachable provider is logged but does not stop startup; its
	/// orders fail with a transport error until it comes back.
	pub async fn initialize(&self) -> Result<(), EngineError> {
		tracing::info!(gateway_id = %self.config.gateway.id, "Initializing gateway engine");

		for (provider, result) in self.providers.health_check_all().await {
			match result {
				Ok(()) => tracing::info!(%provider, "Provider reachable"),
				Err(e) => tracing::warn!(%provider, error = %e, "Provider health check failed"),
			}
		}
		Ok(())
	}

	/// Runs a last expiry sweep before the process exits.
	pub async fn shutdown(&self) -> Result<(), EngineError> {
		tracing::info!("Shutting down gateway engine");
		self.sweep_once().await?;
		Ok(())
	}
}
