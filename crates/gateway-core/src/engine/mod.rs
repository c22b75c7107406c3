//! Background engine of the payment gateway.
//!
//! Callbacks and order creation arrive through the API and call the
//! coordinator directly. The engine owns the periodic work, the expiry sweep,
//! and exits on Ctrl+C.

pub mod lifecycle;

use crate::coordinator::OrderCoordinator;
use gateway_config::Config;
use gateway_provider::ProviderService;
use gateway_types::current_timestamp;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Service error: {0}")]
	Service(String),
	#[error("Handler error: {0}")]
	Handler(String),
}

/// Gateway engine holding the coordinator and its services.
#[derive(Clone)]
pub struct GatewayEngine {
	/// Gateway configuration.
	pub(crate) config: Config,
	/// Provider gateways.
	pub(crate) providers: Arc<ProviderService>,
	/// Order lifecycle coordinator.
	pub(crate) coordinator: Arc<OrderCoordinator>,
}

impl GatewayEngine {
	pub fn new(
		config: Config,
		providers: Arc<ProviderService>,
		coordinator: Arc<OrderCoordinator>,
	) -> Self {
		Self {
			config,
			providers,
			coordinator,
		}
	}

	/// Main loop, runs until Ctrl+C.
	pub async fn run(&self) -> Result<(), EngineError> {
		self.run_until(async {
			if let Err(e) = tokio::signal::ctrl_c().await {
				tracing::error!("Failed to listen for shutdown signal: {}", e);
			}
		})
		.await
	}

	/// Main loop, runs until `shutdown` completes.
	pub async fn run_until<S>(&self, shutdown: S) -> Result<(), EngineError>
	where
		S: Future<Output = ()>,
	{
		if self.config.gateway.max_concurrent_tasks == 0 {
			return Err(EngineError::Config(
				"max_concurrent_tasks must be greater than 0".to_string(),
			));
		}

		let semaphore = Arc::new(Semaphore::new(self.config.gateway.max_concurrent_tasks));
		let mut sweep_interval = tokio::time::interval(Duration::from_secs(
			self.config.gateway.expiry_sweep_interval_seconds,
		));
		// A slow sweep should not cause a burst of catch-up ticks
		sweep_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		tokio::pin!(shutdown);
		loop {
			tokio::select! {
				_ = sweep_interval.tick() => {
					self.spawn_handler(&semaphore, |engine| async move {
						engine.sweep_once().await.map(|_| ())
					})
					.await;
				}

				_ = &mut shutdown => {
					break;
				}
			}
		}

		Ok(())
	}

	/// Runs one expiry sweep at the current time.
	pub async fn sweep_once(&self) -> Result<usize, EngineError> {
		let expired = self
			.coordinator
			.expire_stale(current_timestamp())
			.await
			.map_err(|e| EngineError::Handler(format!("Expiry sweep failed: {}", e)))?;
		if expired > 0 {
			tracing::info!(expired, "Expiry sweep finished");
		}
		Ok(expired)
	}

	/// Returns a reference to the configuration.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Returns a reference to the provider service.
	pub fn providers(&self) -> &Arc<ProviderService> {
		&self.providers
	}

	/// Returns a reference to the order coordinator.
	pub fn coordinator(&self) -> &Arc<OrderCoordinator> {
		&self.coordinator
	}

	/// Spawns a handler task once a semaphore permit is available.
	async fn spawn_handler<F, Fut>(&self, semaphore: &Arc<Semaphore>, handler: F)
	where
		F: FnOnce(GatewayEngine) -> Fut + Send + 'static,
		Fut: Future<Output = Result<(), EngineError>> + Send,
	{
		let engine = self.clone();
		match semaphore.clone().acquire_owned().await {
			Ok(permit) => {
				tokio::spawn(async move {
					let _permit = permit; // Keep permit alive for duration of task
					if let Err(e) = handler(engine).await {
						tracing::error!("Handler error: {}", e);
					}
				});
			},
			Err(e) => {
				tracing::error!("Failed to acquire semaphore permit: {}", e);
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::auth::VerificationTokens;
	use crate::state::OrderStore;
	use async_trait::async_trait;
	use gateway_provider::{GatewayError, PaymentGatewayInterface};
	use gateway_storage::{implementations::memory::MemoryStorage, StorageService};
	use gateway_types::{
		ConfigSchema, NewOrder, Order, OrderState, PaymentSession, Provider, ProviderStatus,
		RedirectUrls, Schema, ValidationError,
	};
	use rust_decimal_macros::dec;

	struct EmptySchema;

	impl ConfigSchema for EmptySchema {
		fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
			Schema::new(vec![], vec![]).validate(config)
		}
	}

	/// Gateway whose sessions are already past their expiry.
	struct ExpiredSessions;

	#[async_trait]
	impl PaymentGatewayInterface for ExpiredSessions {
		fn provider(&self) -> Provider {
			Provider::CryptoGateway
		}

		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(EmptySchema)
		}

		async fn open_session(&self, order: &Order) -> Result<PaymentSession, GatewayError> {
			Ok(PaymentSession {
				external_ref: format!("ext-{}", order.id),
				payment_url: None,
				expires_at: Some(1),
				status: ProviderStatus::New,
			})
		}

		async fn poll(&self, _external_ref: &str) -> Result<ProviderStatus, GatewayError> {
			Ok(ProviderStatus::Pending)
		}
	}

	fn engine() -> GatewayEngine {
		let config: Config = r#"
			[gateway]
			id = "engine-test"
			webhook_secret = "engine-test-secret-0123"
			expiry_sweep_interval_seconds = 5

			[storage]
			primary = "memory"
			[storage.implementations.memory]

			[providers.implementations.coingate]
			api_token = "unused"
		"#
		.parse()
		.unwrap();

		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let gateway: Arc<dyn PaymentGatewayInterface> = Arc::new(ExpiredSessions);
		let providers = Arc::new(ProviderService::new(vec![gateway]).unwrap());
		let tokens = VerificationTokens::new(&config.gateway.webhook_secret).unwrap();
		let coordinator = Arc::new(OrderCoordinator::new(
			Arc::new(OrderStore::new(storage)),
			providers.clone(),
			tokens,
		));
		GatewayEngine::new(config, providers, coordinator)
	}

	fn new_order() -> NewOrder {
		NewOrder {
			provider: Provider::CryptoGateway,
			amount: dec!(10),
			price_currency: "EUR".to_string(),
			receive_currency: "BTC".to_string(),
			title: "Order".to_string(),
			description: None,
			redirect_urls: RedirectUrls::default(),
		}
	}

	#[tokio::test]
	async fn test_sweep_once_expires_stale_orders() {
		let engine = engine();
		let order = engine.coordinator().create_order(new_order()).await.unwrap();

		assert_eq!(engine.sweep_once().await.unwrap(), 1);
		assert_eq!(engine.sweep_once().await.unwrap(), 0);
		assert_eq!(
			engine.coordinator().get_order(&order.id).await.unwrap().state,
			OrderState::Expired
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_run_until_sweeps_then_stops() {
		let engine = engine();
		let order = engine.coordinator().create_order(new_order()).await.unwrap();

		engine
			.run_until(tokio::time::sleep(Duration::from_secs(12)))
			.await
			.unwrap();
		// Let the last spawned sweep finish
		tokio::task::yield_now().await;

		assert_eq!(
			engine.coordinator().get_order(&order.id).await.unwrap().state,
			OrderState::Expired
		);
	}
}
