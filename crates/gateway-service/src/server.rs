//! HTTP server for the payment gateway API.
//!
//! Serves the merchant-facing order endpoints under `/api` and the provider
//! callback endpoints under `/payments`.

use axum::{
	extract::{DefaultBodyLimit, Form, Path, Query, State},
	response::Json,
	routing::{get, post},
	Router,
};
use gateway_config::ApiConfig;
use gateway_core::GatewayEngine;
use gateway_types::{APIError, CallbackAck, CreateOrderRequest, CryptoCallback, OrderResponse};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::apis::callback::{ExecuteForm, WebhookEvent};
use crate::apis::order::ListOrdersQuery;

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	/// Reference to the gateway engine for processing requests.
	pub engine: Arc<GatewayEngine>,
}

/// Starts the HTTP server for the API.
pub async fn start_server(
	api_config: ApiConfig,
	engine: Arc<GatewayEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
	let app = router(&api_config, AppState { engine });

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Payment gateway API server starting on {}", bind_address);

	axum::serve(listener, app).await?;

	Ok(())
}

/// Builds the router with all endpoints and middleware.
pub fn router(api_config: &ApiConfig, state: AppState) -> Router {
	Router::new()
		.nest(
			"/api",
			Router::new()
				.route("/orders", post(handle_create_order).get(handle_list_orders))
				.route("/orders/{id}", get(handle_get_order_by_id)),
		)
		.nest(
			"/payments",
			Router::new()
				.route("/coingate/callback", post(handle_crypto_callback))
				.route("/paypal/checkout/execute", post(handle_card_execution))
				.route("/paypal/webhook", post(handle_card_notification)),
		)
		.route("/health", get(handle_health))
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(TimeoutLayer::new(Duration::from_secs(
					api_config.timeout_seconds,
				)))
				.layer(DefaultBodyLimit::max(api_config.max_request_size))
				.layer(CorsLayer::permissive()),
		)
		.with_state(state)
}

/// Handles POST /api/orders requests.
async fn handle_create_order(
	State(state): State<AppState>,
	Json(request): Json<CreateOrderRequest>,
) -> Result<Json<OrderResponse>, APIError> {
	crate::apis::order::create_order(request, &state.engine)
		.await
		.map(Json)
}

/// Handles GET /api/orders requests.
async fn handle_list_orders(
	State(state): State<AppState>,
	Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<OrderResponse>>, APIError> {
	crate::apis::order::list_orders(query, &state.engine)
		.await
		.map(Json)
}

/// Handles GET /api/orders/{id} requests.
async fn handle_get_order_by_id(
	Path(id): Path<String>,
	State(state): State<AppState>,
) -> Result<Json<OrderResponse>, APIError> {
	crate::apis::order::get_order_by_id(&id, &state.engine)
		.await
		.map(Json)
}

/// Handles POST /payments/coingate/callback requests.
async fn handle_crypto_callback(
	State(state): State<AppState>,
	Form(callback): Form<CryptoCallback>,
) -> Result<Json<CallbackAck>, APIError> {
	crate::apis::callback::crypto_callback(callback, &state.engine)
		.await
		.map(Json)
}

/// Handles POST /payments/paypal/checkout/execute requests.
async fn handle_card_execution(
	State(state): State<AppState>,
	Form(form): Form<ExecuteForm>,
) -> Result<Json<CallbackAck>, APIError> {
	crate::apis::callback::card_execution(form, &state.engine)
		.await
		.map(Json)
}

/// Handles POST /payments/paypal/webhook requests.
async fn handle_card_notification(
	State(state): State<AppState>,
	Json(event): Json<WebhookEvent>,
) -> Result<Json<CallbackAck>, APIError> {
	crate::apis::callback::card_notification(event, &state.engine)
		.await
		.map(Json)
}

/// Handles GET /health requests.
async fn handle_health(State(state): State<AppState>) -> Json<serde_json::Value> {
	let providers: Vec<String> = state
		.engine
		.providers()
		.providers()
		.iter()
		.map(|p| p.to_string())
		.collect();
	Json(serde_json::json!({
		"status": "ok",
		"gateway": state.engine.config().gateway.id,
		"providers": providers,
	}))
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use axum::body::{to_bytes, Body};
	use axum::http::{header, Request, StatusCode};
	use gateway_config::Config;
	use gateway_core::{OrderCoordinator, OrderStore, VerificationTokens};
	use gateway_provider::{GatewayError, PaymentGatewayInterface, ProviderService};
	use gateway_storage::{implementations::memory::MemoryStorage, StorageService};
	use gateway_types::{
		ConfigSchema, Order, PaymentSession, Provider, ProviderStatus, Schema,
		ValidationError,
	};
	use std::sync::atomic::{AtomicBool, Ordering};
	use tower::ServiceExt;

	struct EmptySchema;

	impl ConfigSchema for EmptySchema {
		fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
			Schema::new(vec![], vec![]).validate(config)
		}
	}

	/// Provider fake; card payments count as paid once executed.
	struct FakeProvider {
		provider: Provider,
		executed: AtomicBool,
	}

	#[async_trait]
	impl PaymentGatewayInterface for FakeProvider {
		fn provider(&self) -> Provider {
			self.provider
		}

		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(EmptySchema)
		}

		async fn open_session(&self, order: &Order) -> Result<PaymentSession, GatewayError> {
			Ok(PaymentSession {
				external_ref: format!("{}-{}", self.provider, &order.id[..8]),
				payment_url: Some("https://pay.example/checkout".to_string()),
				expires_at: None,
				status: ProviderStatus::New,
			})
		}

		async fn poll(&self, _external_ref: &str) -> Result<ProviderStatus, GatewayError> {
			if self.executed.load(Ordering::SeqCst) {
				Ok(ProviderStatus::Paid)
			} else {
				Ok(ProviderStatus::New)
			}
		}

		async fn execute(&self, _external_ref: &str, _payer_id: &str) -> Result<(), GatewayError> {
			self.executed.store(true, Ordering::SeqCst);
			Ok(())
		}
	}

	fn app() -> (Router, Arc<GatewayEngine>) {
		let config: Config = r#"
			[gateway]
			id = "api-test"
			webhook_secret = "api-test-webhook-secret"

			[storage]
			primary = "memory"
			[storage.implementations.memory]

			[providers.implementations.coingate]
			api_token = "unused"

			[api]
			enabled = true
		"#
		.parse()
		.unwrap();

		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let crypto: Arc<dyn PaymentGatewayInterface> = Arc::new(FakeProvider {
			provider: Provider::CryptoGateway,
			executed: AtomicBool::new(false),
		});
		let card: Arc<dyn PaymentGatewayInterface> = Arc::new(FakeProvider {
			provider: Provider::CardGateway,
			executed: AtomicBool::new(false),
		});
		let providers = Arc::new(ProviderService::new(vec![crypto, card]).unwrap());
		let tokens = VerificationTokens::new(&config.gateway.webhook_secret).unwrap();
		let coordinator = Arc::new(OrderCoordinator::new(
			Arc::new(OrderStore::new(storage)),
			providers.clone(),
			tokens,
		));
		let api_config = config.api.clone().unwrap();
		let engine = Arc::new(GatewayEngine::new(config, providers, coordinator));
		let app = router(
			&api_config,
			AppState {
				engine: engine.clone(),
			},
		);
		(app, engine)
	}

	async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
		let response = app.clone().oneshot(request).await.unwrap();
		let status = response.status();
		let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
		let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
		(status, json)
	}

	fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
		Request::post(uri)
			.header(header::CONTENT_TYPE, "application/json")
			.body(Body::from(body.to_string()))
			.unwrap()
	}

	fn form_request(uri: &str, body: String) -> Request<Body> {
		Request::post(uri)
			.header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
			.body(Body::from(body))
			.unwrap()
	}

	async fn create(app: &Router, provider: &str) -> serde_json::Value {
		let (status, body) = send(
			app,
			json_request(
				"/api/orders",
				serde_json::json!({
					"provider": provider,
					"amount": "100.00",
					"priceCurrency": "USD",
					"receiveCurrency": "ETH",
					"title": "Order #1011",
					"successUrl": "https://shop.example/success",
					"cancelUrl": "https://shop.example/cancel"
				}),
			),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		body
	}

	#[tokio::test]
	async fn test_create_and_get_order() {
		let (app, _) = app();
		let created = create(&app, "crypto_gateway").await;
		assert_eq!(created["state"], "awaitingPayment");
		assert!(created.get("verificationToken").is_none());
		assert!(created.get("verification_token").is_none());

		let id = created["id"].as_str().unwrap();
		let (status, fetched) = send(
			&app,
			Request::get(format!("/api/orders/{}", id))
				.body(Body::empty())
				.unwrap(),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(fetched["externalRef"], created["externalRef"]);
	}

	#[tokio::test]
	async fn test_invalid_requests() {
		let (app, _) = app();
		let (status, body) = send(
			&app,
			json_request(
				"/api/orders",
				serde_json::json!({
					"provider": "crypto_gateway",
					"amount": "-1",
					"priceCurrency": "USD",
					"receiveCurrency": "ETH",
					"title": "Order"
				}),
			),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(body["error"], "VALIDATION_ERROR");

		let (status, _) = send(
			&app,
			Request::get("/api/orders/not-a-uuid")
				.body(Body::empty())
				.unwrap(),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);

		let (status, body) = send(
			&app,
			Request::get("/api/orders/2f1f2b1e-8a52-4d55-9d3c-0e1f3c5a7b90")
				.body(Body::empty())
				.unwrap(),
		)
		.await;
		assert_eq!(status, StatusCode::NOT_FOUND);
		assert_eq!(body["error"], "ORDER_NOT_FOUND");
	}

	#[tokio::test]
	async fn test_crypto_callback_with_token() {
		let (app, engine) = app();
		let created = create(&app, "crypto_gateway").await;
		let order = engine
			.coordinator()
			.get_order(created["id"].as_str().unwrap())
			.await
			.unwrap();
		let external_ref = order.external_ref.clone().unwrap();

		let forged = format!(
			"id={}&order_id={}&status=paid&token=forged",
			external_ref, order.id
		);
		let (status, body) = send(
			&app,
			form_request("/payments/coingate/callback", forged),
		)
		.await;
		assert_eq!(status, StatusCode::UNAUTHORIZED);
		assert_eq!(body["error"], "UNAUTHENTICATED");

		let genuine = format!(
			"id={}&order_id={}&status=paid&price_amount=100.00&price_currency=USD&token={}",
			external_ref,
			order.id,
			order.verification_token.expose()
		);
		let (status, body) = send(
			&app,
			form_request("/payments/coingate/callback", genuine),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["state"], "confirmed");
		assert_eq!(body["applied"], true);
	}

	#[tokio::test]
	async fn test_card_execution_and_webhook() {
		let (app, _) = app();
		let created = create(&app, "card_gateway").await;
		let payment_id = created["externalRef"].as_str().unwrap().to_string();

		let (status, body) = send(
			&app,
			json_request(
				"/payments/paypal/webhook",
				serde_json::json!({
					"event_type": "PAYMENTS.PAYMENT.CREATED",
					"resource": { "id": payment_id }
				}),
			),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["state"], "awaitingPayment");
		assert_eq!(body["applied"], false);

		let (status, body) = send(
			&app,
			form_request(
				"/payments/paypal/checkout/execute",
				format!("paymentID={}&payerID=PAYER-1", payment_id),
			),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["state"], "confirmed");
		assert_eq!(body["applied"], true);

		// Claims on a finished order are acknowledged without its state
		let (status, body) = send(
			&app,
			json_request(
				"/payments/paypal/webhook",
				serde_json::json!({
					"event_type": "PAYMENT.SALE.COMPLETED",
					"resource": { "id": "SALE-1", "parent_payment": payment_id }
				}),
			),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["success"], true);
		assert_eq!(body["applied"], false);
		assert!(body.get("state").is_none());

		let (status, body) = send(
			&app,
			form_request(
				"/payments/paypal/checkout/execute",
				format!("paymentID={}&payerID=PAYER-2", payment_id),
			),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		assert!(body.get("state").is_none());
	}

	#[tokio::test]
	async fn test_list_orders_filters_by_state() {
		let (app, engine) = app();
		let crypto = create(&app, "crypto_gateway").await;
		let card = create(&app, "card_gateway").await;

		let order = engine
			.coordinator()
			.get_order(crypto["id"].as_str().unwrap())
			.await
			.unwrap();
		let paid = format!(
			"id={}&order_id={}&status=paid&token={}",
			order.external_ref.clone().unwrap(),
			order.id,
			order.verification_token.expose()
		);
		let (status, _) = send(&app, form_request("/payments/coingate/callback", paid)).await;
		assert_eq!(status, StatusCode::OK);

		let (status, body) = send(
			&app,
			Request::get("/api/orders?state=awaitingPayment")
				.body(Body::empty())
				.unwrap(),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		let listed = body.as_array().unwrap();
		assert_eq!(listed.len(), 1);
		assert_eq!(listed[0]["id"], card["id"]);
		assert!(listed[0].get("verificationToken").is_none());

		let (status, body) = send(&app, Request::get("/api/orders").body(Body::empty()).unwrap()).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body.as_array().unwrap().len(), 2);

		let (status, _) = send(
			&app,
			Request::get("/api/orders?state=refunded")
				.body(Body::empty())
				.unwrap(),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn test_unknown_callback_and_health() {
		let (app, _) = app();
		let (status, _) = send(
			&app,
			form_request(
				"/payments/paypal/checkout/execute",
				"paymentID=PAY-404&payerID=PAYER-1".to_string(),
			),
		)
		.await;
		assert_eq!(status, StatusCode::NOT_FOUND);

		let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["providers"], serde_json::json!(["crypto_gateway", "card_gateway"]));
	}
}
