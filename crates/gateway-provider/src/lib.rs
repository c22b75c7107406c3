//! Payment provider gateways.
//!
//! Each provider (crypto processor, card/PayPal processor) is implemented
//! behind [`PaymentGatewayInterface`]. Implementations translate between the
//! local order model and the provider's wire protocol; they never touch the
//! order store. The coordinator picks the gateway of an order through
//! [`ProviderService`].

use async_trait::async_trait;
use gateway_http::{GatewayClient, HttpError};
use gateway_types::{
	ConfigSchema, Environment, ImplementationRegistry, NewOrder, Order, PaymentSession, Provider,
	ProviderStatus,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod credentials;

pub use credentials::{AccessToken, CredentialProvider};

/// Re-export implementations
pub mod implementations {
	pub mod coingate;
	pub mod paypal;
}

/// Default bound on a single provider exchange.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Errors that can occur while talking to a payment provider.
#[derive(Debug, Error)]
pub enum GatewayError {
	/// Network failure, timeout or provider-side 5xx. Safe to retry.
	#[error("Transport error: {0}")]
	Transport(String),
	/// The provider refused the request.
	#[error("Rejected by provider ({status}): {message}")]
	Rejected { status: u16, message: String },
	/// The provider answered 2xx with a body of unexpected shape.
	#[error("Decode error: {0}")]
	Decode(String),
	/// Client credentials were refused.
	#[error("Credentials error: {0}")]
	Credentials(String),
	/// Operation not offered by this provider.
	#[error("Unsupported: {0}")]
	Unsupported(String),
	/// Error that occurs when configuration is invalid.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

impl GatewayError {
	/// Whether a later attempt may succeed without any change on our side.
	pub fn is_retryable(&self) -> bool {
		matches!(self, GatewayError::Transport(_))
	}
}

impl From<HttpError> for GatewayError {
	fn from(err: HttpError) -> Self {
		match err {
			HttpError::Transport(msg) => GatewayError::Transport(msg),
			HttpError::Timeout(msg) => GatewayError::Transport(format!("timeout: {}", msg)),
			HttpError::Status { status, body } if status >= 500 => {
				GatewayError::Transport(format!("provider returned {}: {}", status, body))
			},
			HttpError::Status { status, body } => GatewayError::Rejected {
				status,
				message: body,
			},
			HttpError::Decode(msg) => GatewayError::Decode(msg),
			HttpError::InvalidRequest(msg) => GatewayError::Configuration(msg),
		}
	}
}

/// Trait defining the interface for payment provider gateways.
#[async_trait]
pub trait PaymentGatewayInterface: Send + Sync {
	/// Provider this gateway serves.
	fn provider(&self) -> Provider;

	/// Returns the configuration schema for this implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Provider-specific acceptance rules for a new order, checked before
	/// anything is persisted. Returns a human-readable reason on rejection.
	fn validate_order(&self, _order: &NewOrder) -> Result<(), String> {
		Ok(())
	}

	/// Opens a provider-side payment session for a persisted order.
	async fn open_session(&self, order: &Order) -> Result<PaymentSession, GatewayError>;

	/// Queries the provider for the current status of a session.
	async fn poll(&self, external_ref: &str) -> Result<ProviderStatus, GatewayError>;

	/// Executes a payment the payer approved on the provider's page.
	///
	/// Only providers with an explicit execution step support this.
	async fn execute(&self, external_ref: &str, _payer_id: &str) -> Result<(), GatewayError> {
		Err(GatewayError::Unsupported(format!(
			"{} has no execution step (payment {})",
			self.provider(),
			external_ref
		)))
	}

	/// Checks that the provider is reachable and accepts our credentials.
	async fn health_check(&self) -> Result<(), GatewayError> {
		Ok(())
	}
}

/// Type alias for provider factory functions.
pub type ProviderFactory =
	fn(&toml::Value) -> Result<Box<dyn PaymentGatewayInterface>, GatewayError>;

/// Registry trait for provider implementations.
pub trait ProviderRegistry: ImplementationRegistry<Factory = ProviderFactory> {}

/// Get all registered provider implementations.
///
/// Returns a vector of (name, factory) tuples, keyed by the names used under
/// `[providers.implementations]`.
pub fn get_all_implementations() -> Vec<(&'static str, ProviderFactory)> {
	use implementations::{coingate, paypal};

	vec![
		(coingate::Registry::NAME, coingate::Registry::factory()),
		(paypal::Registry::NAME, paypal::Registry::factory()),
	]
}

/// Picks the base URL: an explicit override wins over the environment.
pub(crate) fn resolve_base_url(
	environment: Environment,
	override_url: Option<&str>,
	sandbox: &str,
	live: &str,
) -> String {
	match override_url {
		Some(url) => url.trim_end_matches('/').to_string(),
		None => match environment {
			Environment::Sandbox => sandbox.to_string(),
			Environment::Live => live.to_string(),
		},
	}
}

/// Builds the HTTP client of one provider with its exchange timeout.
pub(crate) fn build_client(name: &str, timeout_seconds: u64) -> Result<GatewayClient, GatewayError> {
	let transport =
		gateway_http::implementations::reqwest::ReqwestExchange::new(Duration::from_secs(
			timeout_seconds,
		))
		.map_err(|e| GatewayError::Configuration(e.to_string()))?;
	Ok(GatewayClient::new(name, Arc::new(transport)))
}

/// Service routing each provider to its configured gateway.
pub struct ProviderService {
	gateways: HashMap<Provider, Arc<dyn PaymentGatewayInterface>>,
}

impl ProviderService {
	/// Creates the service from built gateways, keyed by the provider each
	/// one serves. Two gateways serving the same provider are rejected.
	pub fn new(gateways: Vec<Arc<dyn PaymentGatewayInterface>>) -> Result<Self, GatewayError> {
		let mut map = HashMap::new();
		for gateway in gateways {
			let provider = gateway.provider();
			if map.insert(provider, gateway).is_some() {
				return Err(GatewayError::Configuration(format!(
					"More than one implementation configured for {}",
					provider
				)));
			}
		}
		Ok(Self { gateways: map })
	}

	/// Returns the gateway serving `provider`.
	pub fn get(
		&self,
		provider: Provider,
	) -> Result<&Arc<dyn PaymentGatewayInterface>, GatewayError> {
		self.gateways.get(&provider).ok_or_else(|| {
			GatewayError::Unsupported(format!("No gateway configured for {}", provider))
		})
	}

	/// Providers that have a gateway.
	pub fn providers(&self) -> Vec<Provider> {
		Provider::all()
			.filter(|p| self.gateways.contains_key(p))
			.collect()
	}

	/// Runs every gateway's health check.
	pub async fn health_check_all(&self) -> Vec<(Provider, Result<(), GatewayError>)> {
		let mut results = Vec::with_capacity(self.gateways.len());
		for provider in self.providers() {
			if let Some(gateway) = self.gateways.get(&provider) {
				results.push((provider, gateway.health_check().await));
			}
		}
		results
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use gateway_types::{Schema, ValidationError};

	struct StubGateway(Provider);

	struct EmptySchema;

	impl ConfigSchema for EmptySchema {
		fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
			Schema::new(vec![], vec![]).validate(config)
		}
	}

	#[async_trait]
	impl PaymentGatewayInterface for StubGateway {
		fn provider(&self) -> Provider {
			self.0
		}

		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(EmptySchema)
		}

		async fn open_session(&self, order: &Order) -> Result<PaymentSession, GatewayError> {
			Err(GatewayError::Unsupported(order.id.clone()))
		}

		async fn poll(&self, _external_ref: &str) -> Result<ProviderStatus, GatewayError> {
			Ok(ProviderStatus::Pending)
		}
	}

	#[test]
	fn test_http_errors_map_to_retryability() {
		let transient: GatewayError = HttpError::Status {
			status: 503,
			body: "busy".to_string(),
		}
		.into();
		assert!(transient.is_retryable());

		let rejected: GatewayError = HttpError::Status {
			status: 422,
			body: "{\"message\":\"bad currency\"}".to_string(),
		}
		.into();
		assert!(matches!(rejected, GatewayError::Rejected { status: 422, .. }));
		assert!(!rejected.is_retryable());

		let timeout: GatewayError = HttpError::Timeout("30s".to_string()).into();
		assert!(timeout.is_retryable());

		let decode: GatewayError = HttpError::Decode("html".to_string()).into();
		assert!(!decode.is_retryable());
	}

	#[tokio::test]
	async fn test_service_routing_and_default_execute() {
		let crypto: Arc<dyn PaymentGatewayInterface> =
			Arc::new(StubGateway(Provider::CryptoGateway));
		let service = ProviderService::new(vec![crypto]).unwrap();

		let gateway = service.get(Provider::CryptoGateway).unwrap();
		assert!(matches!(
			gateway.execute("84752", "payer").await,
			Err(GatewayError::Unsupported(_))
		));
		assert!(matches!(
			service.get(Provider::CardGateway),
			Err(GatewayError::Unsupported(_))
		));
		assert_eq!(service.providers(), vec![Provider::CryptoGateway]);
	}

	#[test]
	fn test_duplicate_provider_rejected() {
		let first: Arc<dyn PaymentGatewayInterface> = Arc::new(StubGateway(Provider::CardGateway));
		let second: Arc<dyn PaymentGatewayInterface> = Arc::new(StubGateway(Provider::CardGateway));
		let result = ProviderService::new(vec![first, second]);
		assert!(matches!(result, Err(GatewayError::Configuration(_))));
	}

	#[test]
	fn test_base_url_override() {
		assert_eq!(
			resolve_base_url(Environment::Live, None, "https://sandbox", "https://live"),
			"https://live"
		);
		assert_eq!(
			resolve_base_url(
				Environment::Live,
				Some("http://127.0.0.1:9000/"),
				"https://sandbox",
				"https://live"
			),
			"http://127.0.0.1:9000"
		);
	}
}
