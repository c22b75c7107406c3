//! CoinGate crypto payment processor.
//!
//! Orders are created with a form-encoded `POST /orders` authenticated by
//! `Authorization: Token {api_token}`. CoinGate echoes our verification token
//! back in every status callback, which is what authenticates the callback.

use crate::{
	build_client, resolve_base_url, GatewayError, PaymentGatewayInterface, ProviderFactory,
	DEFAULT_TIMEOUT_SECONDS,
};
use async_trait::async_trait;
use gateway_http::{join_url, Decoded, ExchangeRequest, GatewayClient};
use gateway_types::{
	current_timestamp, truncate_id, ConfigSchema, Environment, Field, FieldType,
	ImplementationRegistry, Order, PaymentSession, Provider, ProviderStatus, Schema, SecretString,
	ValidationError,
};
use serde::Deserialize;

const SANDBOX_URL: &str = "https://api-sandbox.coingate.com/v2";
const LIVE_URL: &str = "https://api.coingate.com/v2";

/// Settings under `[providers.implementations.coingate]`.
#[derive(Debug, Clone, Deserialize)]
pub struct CoinGateConfig {
	#[serde(default)]
	pub environment: Environment,
	pub api_token: SecretString,
	#[serde(default)]
	pub base_url: Option<String>,
	#[serde(default = "default_timeout")]
	pub timeout_seconds: u64,
	/// Expiry applied when CoinGate does not report `expire_at`.
	#[serde(default)]
	pub session_ttl_seconds: Option<u64>,
}

fn default_timeout() -> u64 {
	DEFAULT_TIMEOUT_SECONDS
}

/// Order as returned by `POST /orders` and `GET /orders/{id}`.
#[derive(Debug, Deserialize)]
struct CoinGateOrder {
	/// Numeric in practice, accepted as a string too.
	id: serde_json::Value,
	status: String,
	#[serde(default)]
	payment_url: Option<String>,
	#[serde(default)]
	expire_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PingResponse {
	ping: String,
}

fn id_string(id: &serde_json::Value) -> Option<String> {
	match id {
		serde_json::Value::Number(n) => Some(n.to_string()),
		serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
		_ => None,
	}
}

fn parse_timestamp(raw: &str) -> Option<u64> {
	chrono::DateTime::parse_from_rfc3339(raw)
		.ok()
		.and_then(|dt| u64::try_from(dt.timestamp()).ok())
}

/// CoinGate gateway.
pub struct CoinGateGateway {
	client: GatewayClient,
	base_url: String,
	api_token: SecretString,
	session_ttl_seconds: Option<u64>,
}

impl CoinGateGateway {
	pub fn new(config: CoinGateConfig) -> Result<Self, GatewayError> {
		let base_url = resolve_base_url(
			config.environment,
			config.base_url.as_deref(),
			SANDBOX_URL,
			LIVE_URL,
		);
		Ok(Self {
			client: build_client(Registry::NAME, config.timeout_seconds)?,
			base_url,
			api_token: config.api_token,
			session_ttl_seconds: config.session_ttl_seconds,
		})
	}

	fn request(&self, request: ExchangeRequest) -> ExchangeRequest {
		request
			.header(
				"Authorization",
				format!("Token {}", self.api_token.expose_secret()),
			)
			.header("Accept", "application/json")
	}
}

#[async_trait]
impl PaymentGatewayInterface for CoinGateGateway {
	fn provider(&self) -> Provider {
		Provider::CryptoGateway
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(CoinGateSchema)
	}

	async fn open_session(&self, order: &Order) -> Result<PaymentSession, GatewayError> {
		let urls = &order.redirect_urls;
		let request = self.request(
			ExchangeRequest::post(join_url(&self.base_url, "orders")).form([
				("order_id", order.id.clone()),
				("price_amount", order.amount.to_string()),
				("price_currency", order.price_currency.clone()),
				("receive_currency", order.receive_currency.clone()),
				("title", order.title.clone()),
				("description", order.description.clone().unwrap_or_default()),
				("callback_url", urls.callback_url.clone().unwrap_or_default()),
				("cancel_url", urls.cancel_url.clone().unwrap_or_default()),
				("success_url", urls.success_url.clone().unwrap_or_default()),
				("token", order.verification_token.expose().to_string()),
			]),
		);

		let created: CoinGateOrder = self.client.submit(request).await?.into_typed()?;
		let external_ref = id_string(&created.id)
			.ok_or_else(|| GatewayError::Decode("order response without id".to_string()))?;

		let expires_at = created
			.expire_at
			.as_deref()
			.and_then(parse_timestamp)
			.or_else(|| {
				self.session_ttl_seconds
					.map(|ttl| current_timestamp().saturating_add(ttl))
			});

		tracing::info!(
			order_id = %truncate_id(&order.id),
			external_ref = %external_ref,
			status = %created.status,
			"CoinGate order created"
		);

		Ok(PaymentSession {
			external_ref,
			payment_url: created.payment_url,
			expires_at,
			status: ProviderStatus::parse(&created.status),
		})
	}

	async fn poll(&self, external_ref: &str) -> Result<ProviderStatus, GatewayError> {
		let request = self.request(ExchangeRequest::get(join_url(
			&self.base_url,
			&format!("orders/{}", external_ref),
		)));
		let current: CoinGateOrder = self.client.submit(request).await?.into_typed()?;
		Ok(ProviderStatus::parse(&current.status))
	}

	async fn health_check(&self) -> Result<(), GatewayError> {
		let request = ExchangeRequest::get(join_url(&self.base_url, "ping"));
		let pong = match self.client.submit::<PingResponse>(request).await? {
			Decoded::Typed(body) => body.ping,
			Decoded::Raw(body) => body.trim().to_string(),
		};
		if pong == "pong" {
			Ok(())
		} else {
			Err(GatewayError::Decode(format!(
				"unexpected ping answer '{}'",
				pong
			)))
		}
	}
}

/// Configuration schema for the CoinGate gateway.
pub struct CoinGateSchema;

impl ConfigSchema for CoinGateSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("api_token", FieldType::String)
				.with_validator(gateway_types::non_empty_string)],
			vec![
				Field::new("environment", FieldType::String).with_validator(|value| {
					value
						.as_str()
						.unwrap_or_default()
						.parse::<Environment>()
						.map(|_| ())
				}),
				Field::new("base_url", FieldType::String).with_validator(gateway_types::http_url),
				Field::new(
					"timeout_seconds",
					FieldType::Integer {
						min: Some(1),
						max: Some(300),
					},
				),
				Field::new(
					"session_ttl_seconds",
					FieldType::Integer {
						min: Some(60),
						max: None,
					},
				),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create a CoinGate gateway from configuration.
pub fn create_gateway(
	config: &toml::Value,
) -> Result<Box<dyn PaymentGatewayInterface>, GatewayError> {
	CoinGateSchema
		.validate(config)
		.map_err(|e| GatewayError::Configuration(format!("coingate: {}", e)))?;
	let config: CoinGateConfig = config
		.clone()
		.try_into()
		.map_err(|e| GatewayError::Configuration(format!("Invalid coingate config: {}", e)))?;
	Ok(Box::new(CoinGateGateway::new(config)?))
}

/// Registry for the CoinGate implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "coingate";
	type Factory = ProviderFactory;

	fn factory() -> Self::Factory {
		create_gateway
	}
}

impl crate::ProviderRegistry for Registry {}
