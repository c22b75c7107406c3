//! PayPal REST (v1 payments) card and wallet processor.
//!
//! A payment is created with intent `sale` and a set of redirect URLs. The
//! payer approves it on PayPal's page and is sent back to our return URL with
//! `paymentId` and `PayerID`; the payment is only charged once we execute it
//! with our own credentials. Every call carries a bearer token obtained from
//! the [`CredentialProvider`].

use crate::{
	build_client, resolve_base_url, CredentialProvider, GatewayError, PaymentGatewayInterface,
	ProviderFactory, DEFAULT_TIMEOUT_SECONDS,
};
use async_trait::async_trait;
use gateway_http::{join_url, ExchangeRequest, GatewayClient, HttpError};
use gateway_types::{
	current_timestamp, truncate_id, ConfigSchema, Environment, Field, FieldType,
	ImplementationRegistry, NewOrder, Order, PaymentSession, Provider, ProviderStatus, Schema,
	SecretString, ValidationError,
};
use serde::Deserialize;
use serde_json::json;

const SANDBOX_URL: &str = "https://api.sandbox.paypal.com";
const LIVE_URL: &str = "https://api.paypal.com";

/// Approval window PayPal gives the payer.
const DEFAULT_SESSION_TTL_SECONDS: u64 = 3 * 60 * 60;

/// Settings under `[providers.implementations.paypal]`.
#[derive(Debug, Clone, Deserialize)]
pub struct PaypalConfig {
	#[serde(default)]
	pub environment: Environment,
	pub client_id: String,
	pub client_secret: SecretString,
	#[serde(default)]
	pub base_url: Option<String>,
	#[serde(default = "default_timeout")]
	pub timeout_seconds: u64,
	#[serde(default = "default_session_ttl")]
	pub session_ttl_seconds: u64,
}

fn default_timeout() -> u64 {
	DEFAULT_TIMEOUT_SECONDS
}

fn default_session_ttl() -> u64 {
	DEFAULT_SESSION_TTL_SECONDS
}

#[derive(Debug, Deserialize)]
struct Payment {
	id: String,
	state: String,
	#[serde(default)]
	links: Vec<Link>,
	#[serde(default)]
	transactions: Vec<Transaction>,
}

#[derive(Debug, Deserialize)]
struct Link {
	href: String,
	rel: String,
}

#[derive(Debug, Default, Deserialize)]
struct Transaction {
	#[serde(default)]
	related_resources: Vec<RelatedResource>,
}

#[derive(Debug, Default, Deserialize)]
struct RelatedResource {
	#[serde(default)]
	sale: Option<Sale>,
}

#[derive(Debug, Deserialize)]
struct Sale {
	state: String,
}

/// Error body PayPal sends with 4xx answers.
#[derive(Debug, Deserialize)]
struct ErrorBody {
	name: String,
}

impl Payment {
	fn approval_url(&self) -> Option<String> {
		self.links
			.iter()
			.find(|link| link.rel == "approval_url")
			.map(|link| link.href.clone())
	}

	/// Normalized status: the sale outcome once one exists, the payment
	/// state otherwise.
	fn status(&self) -> ProviderStatus {
		let sale_state = self
			.transactions
			.iter()
			.flat_map(|t| t.related_resources.iter())
			.find_map(|r| r.sale.as_ref())
			.map(|sale| sale.state.as_str());

		match sale_state {
			Some("completed") => ProviderStatus::Paid,
			Some("pending") => ProviderStatus::Pending,
			Some("denied") => ProviderStatus::Invalid,
			Some("refunded") | Some("partially_refunded") => ProviderStatus::Refunded,
			Some(other) => ProviderStatus::Unknown(other.to_string()),
			None => match self.state.as_str() {
				"created" => ProviderStatus::New,
				// Approved but not executed yet
				"approved" => ProviderStatus::Pending,
				"failed" => ProviderStatus::Invalid,
				"canceled" | "cancelled" => ProviderStatus::Canceled,
				"expired" => ProviderStatus::Expired,
				other => ProviderStatus::parse(other),
			},
		}
	}
}

/// PayPal gateway.
pub struct PaypalGateway {
	client: GatewayClient,
	base_url: String,
	credentials: CredentialProvider,
	session_ttl_seconds: u64,
}

impl PaypalGateway {
	pub fn new(config: PaypalConfig) -> Result<Self, GatewayError> {
		let base_url = resolve_base_url(
			config.environment,
			config.base_url.as_deref(),
			SANDBOX_URL,
			LIVE_URL,
		);
		let client = build_client(Registry::NAME, config.timeout_seconds)?;
		let credentials = CredentialProvider::new(
			client.clone(),
			join_url(&base_url, "v1/oauth2/token"),
			config.client_id,
			config.client_secret,
		);
		Ok(Self {
			client,
			base_url,
			credentials,
			session_ttl_seconds: config.session_ttl_seconds,
		})
	}

	/// Sends an authorized request, refreshing the token once if PayPal
	/// answers 401.
	async fn authorized(
		&self,
		build: impl Fn() -> ExchangeRequest + Send + Sync,
	) -> Result<Payment, GatewayError> {
		let mut retried = false;
		loop {
			let token = self.credentials.get_token().await?;
			match self.client.submit::<Payment>(build().bearer(token.value)).await {
				Err(HttpError::Status { status: 401, .. }) if !retried => {
					tracing::debug!("PayPal rejected bearer token, refreshing");
					self.credentials.invalidate().await;
					retried = true;
				},
				other => {
					return other
						.and_then(|decoded| decoded.into_typed())
						.map_err(GatewayError::from)
				},
			}
		}
	}

	fn payment_url(&self, id: &str) -> String {
		join_url(&self.base_url, &format!("v1/payments/payment/{}", id))
	}
}

#[async_trait]
impl PaymentGatewayInterface for PaypalGateway {
	fn provider(&self) -> Provider {
		Provider::CardGateway
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(PaypalSchema)
	}

	fn validate_order(&self, order: &NewOrder) -> Result<(), String> {
		if order.redirect_urls.success_url.is_none() || order.redirect_urls.cancel_url.is_none() {
			return Err("successUrl and cancelUrl are required for card payments".to_string());
		}
		if order.amount.normalize().scale() > 2 {
			return Err("card payments support at most 2 decimal places".to_string());
		}
		Ok(())
	}

	async fn open_session(&self, order: &Order) -> Result<PaymentSession, GatewayError> {
		let urls = &order.redirect_urls;
		let (Some(return_url), Some(cancel_url)) = (&urls.success_url, &urls.cancel_url) else {
			return Err(GatewayError::Unsupported(
				"card payments need success and cancel URLs".to_string(),
			));
		};

		let body = json!({
			"intent": "sale",
			"redirect_urls": {
				"return_url": return_url,
				"cancel_url": cancel_url,
			},
			"payer": { "payment_method": "paypal" },
			"transactions": [{
				"amount": {
					"total": format!("{:.2}", order.amount),
					"currency": order.price_currency,
				},
				"description": order.description.as_deref().unwrap_or(&order.title),
				"custom": order.id,
			}],
		});

		let url = join_url(&self.base_url, "v1/payments/payment");
		let payment = self
			.authorized(|| ExchangeRequest::post(url.clone()).json(body.clone()))
			.await?;

		tracing::info!(
			order_id = %truncate_id(&order.id),
			external_ref = %payment.id,
			state = %payment.state,
			"PayPal payment created"
		);

		Ok(PaymentSession {
			payment_url: payment.approval_url(),
			expires_at: Some(current_timestamp().saturating_add(self.session_ttl_seconds)),
			status: payment.status(),
			external_ref: payment.id,
		})
	}

	async fn poll(&self, external_ref: &str) -> Result<ProviderStatus, GatewayError> {
		let url = self.payment_url(external_ref);
		let payment = self.authorized(|| ExchangeRequest::get(url.clone())).await?;
		Ok(payment.status())
	}

	async fn execute(&self, external_ref: &str, payer_id: &str) -> Result<(), GatewayError> {
		let url = join_url(&self.payment_url(external_ref), "execute");
		let body = json!({ "payer_id": payer_id });

		match self
			.authorized(|| ExchangeRequest::post(url.clone()).json(body.clone()))
			.await
		{
			Ok(payment) => {
				tracing::info!(
					external_ref = %truncate_id(external_ref),
					state = %payment.state,
					"PayPal payment executed"
				);
				Ok(())
			},
			// A repeated execution of the same payment
			Err(GatewayError::Rejected { status: 400, message })
				if serde_json::from_str::<ErrorBody>(&message)
					.is_ok_and(|e| e.name == "PAYMENT_ALREADY_DONE") =>
			{
				tracing::debug!(
					external_ref = %truncate_id(external_ref),
					"PayPal payment already executed"
				);
				Ok(())
			},
			Err(e) => Err(e),
		}
	}

	async fn health_check(&self) -> Result<(), GatewayError> {
		self.credentials.get_token().await.map(|_| ())
	}
}

/// Configuration schema for the PayPal gateway.
pub struct PaypalSchema;

impl ConfigSchema for PaypalSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![
				Field::new("client_id", FieldType::String)
					.with_validator(gateway_types::non_empty_string),
				Field::new("client_secret", FieldType::String)
					.with_validator(gateway_types::non_empty_string),
			],
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

/// Factory function to create a PayPal gateway from configuration.
pub fn create_gateway(
	config: &toml::Value,
) -> Result<Box<dyn PaymentGatewayInterface>, GatewayError> {
	PaypalSchema
		.validate(config)
		.map_err(|e| GatewayError::Configuration(format!("paypal: {}", e)))?;
	let config: PaypalConfig = config
		.clone()
		.try_into()
		.map_err(|e| GatewayError::Configuration(format!("Invalid paypal config: {}", e)))?;
	Ok(Box::new(PaypalGateway::new(config)?))
}

/// Registry for the PayPal implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "paypal";
	type Factory = ProviderFactory;

	fn factory() -> Self::Factory {
		create_gateway
	}
}

impl crate::ProviderRegistry for Registry {}
