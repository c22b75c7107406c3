//! `reqwest`-backed transport.

use crate::{ExchangeRequest, ExchangeResponse, HttpError, HttpExchange, Method, RequestBody};
use async_trait::async_trait;
use std::time::Duration;

/// Production transport with connection pooling and a per-request timeout.
pub struct ReqwestExchange {
	client: reqwest::Client,
}

impl ReqwestExchange {
	/// Creates a transport whose every exchange is bounded by `timeout`.
	pub fn new(timeout: Duration) -> Result<Self, HttpError> {
		let client = reqwest::Client::builder()
			.pool_idle_timeout(Duration::from_secs(90))
			.pool_max_idle_per_host(10)
			.timeout(timeout)
			.build()
			.map_err(|e| HttpError::InvalidRequest(format!("Failed to build client: {}", e)))?;
		Ok(Self { client })
	}
}

fn classify(err: reqwest::Error) -> HttpError {
	if err.is_timeout() {
		HttpError::Timeout(err.to_string())
	} else if err.is_builder() {
		HttpError::InvalidRequest(err.to_string())
	} else {
		HttpError::Transport(err.to_string())
	}
}

#[async_trait]
impl HttpExchange for ReqwestExchange {
	async fn execute(&self, request: ExchangeRequest) -> Result<ExchangeResponse, HttpError> {
		let mut builder = match request.method {
			Method::Get => self.client.get(&request.url),
			Method::Post => self.client.post(&request.url),
		};

		for (name, value) in &request.headers {
			builder = builder.header(name.as_str(), value.as_str());
		}
		if let Some((user, password)) = &request.basic_auth {
			builder = builder.basic_auth(user, Some(password.expose_secret()));
		}
		if let Some(token) = &request.bearer {
			builder = builder.bearer_auth(token.expose_secret());
		}
		builder = match &request.body {
			Some(RequestBody::Form(pairs)) => builder.form(pairs),
			Some(RequestBody::Json(value)) => builder.json(value),
			None => builder,
		};

		let response = builder.send().await.map_err(classify)?;
		let status = response.status().as_u16();
		let body = response.text().await.map_err(classify)?;

		Ok(ExchangeResponse { status, body })
	}
}
