//! Callback authentication.
//!
//! The crypto provider echoes back the verification token we handed it when
//! the session was opened, so its callbacks are checked by comparing that
//! token with the one stored on the order. The card provider's callbacks
//! carry nothing we can verify locally; instead we execute the payment with
//! our own credentials and ask the provider for its status, and only that
//! answer is trusted.

use gateway_provider::{GatewayError, PaymentGatewayInterface};
use gateway_types::{
	truncate_id, CallbackClaim, Order, ProviderStatus, SecretString, VerificationToken,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Errors that can occur while authenticating a callback.
#[derive(Debug, Error)]
pub enum AuthError {
	#[error("Callback carries no verification token")]
	MissingToken,
	#[error("Verification token mismatch")]
	TokenMismatch,
	#[error("Invalid webhook secret: {0}")]
	InvalidSecret(String),
	/// The provider could not confirm the claim.
	#[error("Provider error: {0}")]
	Provider(#[from] GatewayError),
}

/// Issues and checks per-order verification tokens.
///
/// Tokens are hex HMAC-SHA256 tags keyed by the webhook secret over the order
/// id and a random nonce. Checking compares HMAC tags of both values, which
/// keeps the comparison constant-time regardless of where they differ.
#[derive(Clone)]
pub struct VerificationTokens {
	mac: HmacSha256,
}

impl VerificationTokens {
	pub fn new(webhook_secret: &SecretString) -> Result<Self, AuthError> {
		let mac = HmacSha256::new_from_slice(webhook_secret.expose_secret().as_bytes())
			.map_err(|e| AuthError::InvalidSecret(e.to_string()))?;
		Ok(Self { mac })
	}

	/// Issues a fresh token for `order_id`.
	pub fn issue(&self, order_id: &str) -> VerificationToken {
		let nonce = uuid::Uuid::new_v4();
		let mut mac = self.mac.clone();
		mac.update(order_id.as_bytes());
		mac.update(nonce.as_bytes());
		VerificationToken::new(hex::encode(mac.finalize().into_bytes()))
	}

	/// Checks a presented token against the stored one.
	pub fn verify(&self, stored: &VerificationToken, presented: &str) -> Result<(), AuthError> {
		if presented.is_empty() || stored.is_empty() {
			return Err(AuthError::MissingToken);
		}
		let mut expected = self.mac.clone();
		expected.update(stored.expose().as_bytes());
		let expected = expected.finalize().into_bytes();

		let mut candidate = self.mac.clone();
		candidate.update(presented.as_bytes());
		candidate
			.verify_slice(&expected)
			.map_err(|_| AuthError::TokenMismatch)
	}
}

/// Verifies that an inbound callback comes from the provider it claims.
pub struct CallbackAuthenticator {
	tokens: VerificationTokens,
}

impl CallbackAuthenticator {
	pub fn new(tokens: VerificationTokens) -> Self {
		Self { tokens }
	}

	/// Shared-secret check for callbacks that echo the order's token.
	pub fn verify_token(&self, order: &Order, presented: &str) -> Result<(), AuthError> {
		self.tokens
			.verify(&order.verification_token, presented)
			.inspect_err(|e| {
				tracing::warn!(
					order_id = %truncate_id(&order.id),
					provider = %order.provider,
					error = %e,
					"Rejected callback, possible forgery"
				);
			})
	}

	/// Execution-step confirmation.
	///
	/// A payer returning from the approval page gets the payment executed
	/// first. The status is then read back from the provider; nothing the
	/// claim itself says about the outcome is used.
	pub async fn confirm_with_provider(
		&self,
		order: &Order,
		claim: &CallbackClaim,
		gateway: &dyn PaymentGatewayInterface,
	) -> Result<ProviderStatus, AuthError> {
		let external_ref = claim.external_ref();

		if let CallbackClaim::CardExecution { payer_id, .. } = claim {
			match gateway.execute(external_ref, payer_id).await {
				Ok(()) => {},
				Err(e) if e.is_retryable() => return Err(e.into()),
				Err(e) => {
					// The status read below decides what happens to the order
					tracing::warn!(
						order_id = %truncate_id(&order.id),
						external_ref = %truncate_id(external_ref),
						error = %e,
						"Payment execution refused"
					);
				},
			}
		}

		let status = gateway.poll(external_ref).await?;
		tracing::debug!(
			order_id = %truncate_id(&order.id),
			provider = %order.provider,
			status = %status,
			"Provider confirmed status"
		);
		Ok(status)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn tokens(secret: &str) -> VerificationTokens {
		VerificationTokens::new(&SecretString::from(secret)).unwrap()
	}

	#[test]
	fn test_issued_tokens_are_unique_hex() {
		let tokens = tokens("a-webhook-secret-of-some-length");
		let first = tokens.issue("order-1");
		let second = tokens.issue("order-1");
		assert_ne!(first, second);
		assert_eq!(first.expose().len(), 64);
		assert!(first.expose().chars().all(|c| c.is_ascii_hexdigit()));
	}

	#[test]
	fn test_verify() {
		let tokens = tokens("a-webhook-secret-of-some-length");
		let stored = tokens.issue("order-1");

		assert!(tokens.verify(&stored, stored.expose()).is_ok());
		assert!(matches!(
			tokens.verify(&stored, "forged"),
			Err(AuthError::TokenMismatch)
		));
		assert!(matches!(
			tokens.verify(&stored, ""),
			Err(AuthError::MissingToken)
		));

		// Tokens issued under another secret still verify by equality
		let other = tokens_from_other_secret();
		assert!(tokens.verify(&other, other.expose()).is_ok());
	}

	fn tokens_from_other_secret() -> VerificationToken {
		tokens("another-webhook-secret-value").issue("order-1")
	}
}
