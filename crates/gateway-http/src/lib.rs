//! Outbound HTTP exchange for payment provider APIs.
//!
//! Provider gateways describe a call as an [`ExchangeRequest`] and hand it to
//! a [`GatewayClient`], which performs it through an injected
//! [`HttpExchange`] transport and classifies the outcome: transport failure,
//! non-2xx status, typed body or raw body. A body that fails to decode is
//! never mistaken for a typed success, and a non-2xx status is an error even
//! when its body is well-formed JSON.

use async_trait::async_trait;
use gateway_types::SecretString;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod reqwest;
}

/// Longest body excerpt carried in logs and decode errors.
const BODY_EXCERPT_LEN: usize = 256;

/// Errors that can occur during an HTTP exchange.
#[derive(Debug, Error)]
pub enum HttpError {
	/// Connection, TLS or I/O failure before a response was received.
	#[error("Transport error: {0}")]
	Transport(String),
	/// The exchange did not complete within its timeout.
	#[error("Timeout: {0}")]
	Timeout(String),
	/// The provider answered with a non-2xx status.
	#[error("Unexpected status {status}: {body}")]
	Status { status: u16, body: String },
	/// A 2xx body did not have the shape the caller required.
	#[error("Decode error: {0}")]
	Decode(String),
	/// The request could not be built.
	#[error("Invalid request: {0}")]
	InvalidRequest(String),
}

/// HTTP method of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
	Get,
	Post,
}

impl fmt::Display for Method {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Method::Get => write!(f, "GET"),
			Method::Post => write!(f, "POST"),
		}
	}
}

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
	/// `application/x-www-form-urlencoded` pairs, in order.
	Form(Vec<(String, String)>),
	/// JSON document.
	Json(serde_json::Value),
}

/// Description of one outbound call.
#[derive(Debug, Clone)]
pub struct ExchangeRequest {
	pub method: Method,
	pub url: String,
	pub headers: Vec<(String, String)>,
	/// HTTP Basic credentials (user, password).
	pub basic_auth: Option<(String, SecretString)>,
	/// Bearer token sent as `Authorization: Bearer ...`.
	pub bearer: Option<SecretString>,
	pub body: Option<RequestBody>,
}

impl ExchangeRequest {
	pub fn new(method: Method, url: impl Into<String>) -> Self {
		Self {
			method,
			url: url.into(),
			headers: Vec::new(),
			basic_auth: None,
			bearer: None,
			body: None,
		}
	}

	pub fn get(url: impl Into<String>) -> Self {
		Self::new(Method::Get, url)
	}

	pub fn post(url: impl Into<String>) -> Self {
		Self::new(Method::Post, url)
	}

	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));
		self
	}

	pub fn basic_auth(mut self, user: impl Into<String>, password: SecretString) -> Self {
		self.basic_auth = Some((user.into(), password));
		self
	}

	pub fn bearer(mut self, token: SecretString) -> Self {
		self.bearer = Some(token);
		self
	}

	/// Sets a form body. Pairs with an empty value are dropped.
	pub fn form<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
	where
		K: Into<String>,
		V: Into<String>,
	{
		let pairs = pairs
			.into_iter()
			.map(|(k, v)| (k.into(), v.into()))
			.filter(|(_, v)| !v.is_empty())
			.collect();
		self.body = Some(RequestBody::Form(pairs));
		self
	}

	pub fn json(mut self, value: serde_json::Value) -> Self {
		self.body = Some(RequestBody::Json(value));
		self
	}

	/// URL without its query string, for logging.
	pub fn target(&self) -> &str {
		self.url.split('?').next().unwrap_or(&self.url)
	}
}

/// Joins a base URL and a path with exactly one slash between them.
pub fn join_url(base: &str, path: &str) -> String {
	format!(
		"{}/{}",
		base.trim_end_matches('/'),
		path.trim_start_matches('/')
	)
}

/// Status and full body of a completed exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeResponse {
	pub status: u16,
	pub body: String,
}

impl ExchangeResponse {
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}
}

/// Transport performing a single HTTP exchange.
///
/// Implementations must not interpret the status code; that is the job of
/// [`GatewayClient`].
#[async_trait]
pub trait HttpExchange: Send + Sync {
	async fn execute(&self, request: ExchangeRequest) -> Result<ExchangeResponse, HttpError>;
}

/// Result of a successful exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
	/// Body decoded into the requested type.
	Typed(T),
	/// 2xx response whose body did not decode; kept verbatim.
	Raw(String),
}

impl<T> Decoded<T> {
	/// Requires the typed shape.
	pub fn into_typed(self) -> Result<T, HttpError> {
		match self {
			Decoded::Typed(value) => Ok(value),
			Decoded::Raw(body) => Err(HttpError::Decode(format!(
				"unexpected response body: {}",
				excerpt(&body)
			))),
		}
	}
}

fn excerpt(body: &str) -> &str {
	match body.char_indices().nth(BODY_EXCERPT_LEN) {
		Some((idx, _)) => &body[..idx],
		None => body,
	}
}

/// Client shared by every call to one provider.
#[derive(Clone)]
pub struct GatewayClient {
	/// Provider name used in log fields.
	name: String,
	transport: Arc<dyn HttpExchange>,
}

impl GatewayClient {
	pub fn new(name: impl Into<String>, transport: Arc<dyn HttpExchange>) -> Self {
		Self {
			name: name.into(),
			transport,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Performs the exchange and decodes a 2xx body into `T`.
	pub async fn submit<T: DeserializeOwned>(
		&self,
		request: ExchangeRequest,
	) -> Result<Decoded<T>, HttpError> {
		let method = request.method;
		let target = request.target().to_string();

		let response = match self.transport.execute(request).await {
			Ok(response) => response,
			Err(e) => {
				tracing::warn!(
					provider = %self.name,
					%method,
					target = %target,
					error = %e,
					"Provider exchange failed"
				);
				return Err(e);
			},
		};

		tracing::debug!(
			provider = %self.name,
			%method,
			target = %target,
			status = response.status,
			"Provider exchange completed"
		);

		if !response.is_success() {
			tracing::warn!(
				provider = %self.name,
				%method,
				target = %target,
				status = response.status,
				body = %excerpt(&response.body),
				"Provider returned error status"
			);
			return Err(HttpError::Status {
				status: response.status,
				body: response.body,
			});
		}

		match serde_json::from_str::<T>(&response.body) {
			Ok(value) => Ok(Decoded::Typed(value)),
			Err(e) => {
				tracing::debug!(
					provider = %self.name,
					target = %target,
					error = %e,
					"Response body did not decode, keeping raw body"
				);
				Ok(Decoded::Raw(response.body))
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde::Deserialize;
	use std::sync::Mutex;

	/// Transport answering from a fixed response and recording requests.
	struct CannedExchange {
		response: Result<ExchangeResponse, String>,
		seen: Mutex<Vec<ExchangeRequest>>,
	}

	impl CannedExchange {
		fn answering(status: u16, body: &str) -> Arc<Self> {
			Arc::new(Self {
				response: Ok(ExchangeResponse {
					status,
					body: body.to_string(),
				}),
				seen: Mutex::new(Vec::new()),
			})
		}
	}

	#[async_trait]
	impl HttpExchange for CannedExchange {
		async fn execute(&self, request: ExchangeRequest) -> Result<ExchangeResponse, HttpError> {
			self.seen.lock().unwrap().push(request);
			self.response.clone().map_err(HttpError::Transport)
		}
	}

	#[derive(Debug, Deserialize, PartialEq)]
	struct Ping {
		ping: String,
	}

	#[tokio::test]
	async fn test_typed_decode() {
		let client = GatewayClient::new("test", CannedExchange::answering(200, r#"{"ping":"pong"}"#));
		let decoded = client
			.submit::<Ping>(ExchangeRequest::get("http://provider/ping"))
			.await
			.unwrap();
		assert_eq!(
			decoded,
			Decoded::Typed(Ping {
				ping: "pong".to_string()
			})
		);
	}

	#[tokio::test]
	async fn test_non_json_success_is_raw() {
		let client = GatewayClient::new("test", CannedExchange::answering(200, "pong"));
		let decoded = client
			.submit::<Ping>(ExchangeRequest::get("http://provider/ping"))
			.await
			.unwrap();
		assert_eq!(decoded, Decoded::Raw("pong".to_string()));
		assert!(matches!(decoded.into_typed(), Err(HttpError::Decode(_))));
	}

	#[tokio::test]
	async fn test_error_status_even_with_valid_body() {
		let client = GatewayClient::new("test", CannedExchange::answering(422, r#"{"ping":"pong"}"#));
		let result = client
			.submit::<Ping>(ExchangeRequest::get("http://provider/ping"))
			.await;
		assert!(matches!(result, Err(HttpError::Status { status: 422, .. })));
	}

	#[tokio::test]
	async fn test_transport_error_propagates() {
		let transport = Arc::new(CannedExchange {
			response: Err("connection reset".to_string()),
			seen: Mutex::new(Vec::new()),
		});
		let client = GatewayClient::new("test", transport);
		let result = client
			.submit::<Ping>(ExchangeRequest::get("http://provider/ping"))
			.await;
		assert!(matches!(result, Err(HttpError::Transport(_))));
	}

	#[test]
	fn test_request_builder() {
		let request = ExchangeRequest::post("https://api.example/v2/orders?x=1")
			.header("Authorization", "Token abc")
			.form([("order_id", "1"), ("description", ""), ("title", "Order")]);
		assert_eq!(request.target(), "https://api.example/v2/orders");
		assert_eq!(
			request.body,
			Some(RequestBody::Form(vec![
				("order_id".to_string(), "1".to_string()),
				("title".to_string(), "Order".to_string()),
			]))
		);
		assert_eq!(
			join_url("https://api.example/v2/", "/orders"),
			"https://api.example/v2/orders"
		);
	}

	#[test]
	fn test_excerpt_respects_char_boundaries() {
		let body = "é".repeat(BODY_EXCERPT_LEN + 10);
		assert_eq!(excerpt(&body).chars().count(), BODY_EXCERPT_LEN);
	}
}
