//! Short-lived bearer credentials for OAuth client-credentials providers.
//!
//! The card provider authenticates every API call with a bearer token minted
//! from the merchant's client id and secret. Tokens are cached until shortly
//! before they expire. Refreshes are single-flight: callers arriving while a
//! refresh is in progress wait for it and reuse its token instead of minting
//! their own.

use crate::GatewayError;
use gateway_http::{ExchangeRequest, GatewayClient, HttpError};
use gateway_types::SecretString;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

/// Default safety margin before expiry at which a token is refreshed.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// A bearer token and the instant it stops being valid.
#[derive(Debug, Clone)]
pub struct AccessToken {
	pub value: SecretString,
	pub expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
	access_token: String,
	#[serde(default)]
	token_type: Option<String>,
	expires_in: u64,
}

/// Caching, single-flight token source for one set of client credentials.
pub struct CredentialProvider {
	client: GatewayClient,
	token_url: String,
	client_id: String,
	client_secret: SecretString,
	margin: Duration,
	cached: RwLock<Option<AccessToken>>,
	refresh: Mutex<()>,
}

impl CredentialProvider {
	pub fn new(
		client: GatewayClient,
		token_url: impl Into<String>,
		client_id: impl Into<String>,
		client_secret: SecretString,
	) -> Self {
		Self {
			client,
			token_url: token_url.into(),
			client_id: client_id.into(),
			client_secret,
			margin: DEFAULT_REFRESH_MARGIN,
			cached: RwLock::new(None),
			refresh: Mutex::new(()),
		}
	}

	/// Overrides the refresh margin.
	pub fn with_margin(mut self, margin: Duration) -> Self {
		self.margin = margin;
		self
	}

	/// Returns a token valid for at least the refresh margin.
	pub async fn get_token(&self) -> Result<AccessToken, GatewayError> {
		if let Some(token) = self.fresh_token().await {
			return Ok(token);
		}

		let _guard = self.refresh.lock().await;
		// Another caller may have refreshed while we waited for the lock
		if let Some(token) = self.fresh_token().await {
			return Ok(token);
		}

		let token = self.request_token().await?;
		*self.cached.write().await = Some(token.clone());
		Ok(token)
	}

	/// Drops the cached token so the next call refreshes.
	pub async fn invalidate(&self) {
		*self.cached.write().await = None;
	}

	async fn fresh_token(&self) -> Option<AccessToken> {
		let cached = self.cached.read().await;
		cached
			.as_ref()
			.filter(|token| Instant::now() + self.margin < token.expires_at)
			.cloned()
	}

	async fn request_token(&self) -> Result<AccessToken, GatewayError> {
		let request = ExchangeRequest::post(&self.token_url)
			.header("Accept", "application/json")
			.header("Accept-Language", "en_US")
			.basic_auth(&self.client_id, self.client_secret.clone())
			.form([("grant_type", "client_credentials")]);

		let requested_at = Instant::now();
		let response: TokenResponse = self
			.client
			.submit(request)
			.await
			.and_then(|decoded| decoded.into_typed())
			.map_err(|e| match e {
				HttpError::Status { status, .. } if status == 400 || status == 401 => {
					GatewayError::Credentials(format!(
						"token endpoint refused client credentials ({})",
						status
					))
				},
				other => other.into(),
			})?;

		if let Some(token_type) = &response.token_type {
			if !token_type.eq_ignore_ascii_case("bearer") {
				return Err(GatewayError::Decode(format!(
					"unexpected token type '{}'",
					token_type
				)));
			}
		}

		tracing::debug!(
			provider = %self.client.name(),
			expires_in = response.expires_in,
			"Obtained access token"
		);

		Ok(AccessToken {
			value: SecretString::new(response.access_token),
			expires_at: requested_at + Duration::from_secs(response.expires_in),
		})
	}
}
