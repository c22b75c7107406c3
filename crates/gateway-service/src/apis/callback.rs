//! Provider callback endpoints.
//!
//! Each provider reaches us in its own shape: the crypto provider posts a
//! form with the order status and our verification token, the card
//! provider's approval page sends the payer back with the payment and payer
//! ids, and the card provider's webhooks post JSON events. All of them are
//! turned into a [`CallbackClaim`] and handed to the coordinator.

use super::api_error;
use gateway_core::{CallbackOutcome, GatewayEngine};
use gateway_types::{APIError, CallbackAck, CallbackClaim, CryptoCallback};
use serde::Deserialize;
use tracing::{debug, warn};

/// Form posted when the payer returns from the card provider's approval
/// page.
#[derive(Debug, Deserialize)]
pub struct ExecuteForm {
	#[serde(rename = "paymentID", alias = "paymentId")]
	pub payment_id: String,
	#[serde(rename = "payerID", alias = "PayerID")]
	pub payer_id: String,
}

/// Webhook event of the card provider. Only the resource ids are read; the
/// event itself is not trusted.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
	#[serde(default)]
	pub event_type: Option<String>,
	pub resource: WebhookResource,
}

#[derive(Debug, Deserialize)]
pub struct WebhookResource {
	#[serde(default)]
	pub id: Option<String>,
	/// Set on sale resources; points at the payment.
	#[serde(default)]
	pub parent_payment: Option<String>,
}

/// Handles POST /payments/coingate/callback.
pub async fn crypto_callback(
	callback: CryptoCallback,
	engine: &GatewayEngine,
) -> Result<CallbackAck, APIError> {
	debug!(external_ref = %callback.id, status = %callback.status, "Crypto callback received");
	apply(CallbackClaim::Crypto(callback), engine).await
}

/// Handles POST /payments/paypal/checkout/execute.
pub async fn card_execution(
	form: ExecuteForm,
	engine: &GatewayEngine,
) -> Result<CallbackAck, APIError> {
	if form.payment_id.is_empty() || form.payer_id.is_empty() {
		return Err(APIError::BadRequest {
			error_type: "INVALID_CALLBACK".to_string(),
			message: "paymentID and payerID are required".to_string(),
		});
	}
	apply(
		CallbackClaim::CardExecution {
			payment_id: form.payment_id,
			payer_id: form.payer_id,
		},
		engine,
	)
	.await
}

/// Handles POST /payments/paypal/webhook.
pub async fn card_notification(
	event: WebhookEvent,
	engine: &GatewayEngine,
) -> Result<CallbackAck, APIError> {
	let payment_id = event
		.resource
		.parent_payment
		.or(event.resource.id)
		.filter(|id| !id.is_empty())
		.ok_or_else(|| APIError::BadRequest {
			error_type: "INVALID_CALLBACK".to_string(),
			message: "webhook resource carries no payment id".to_string(),
		})?;
	debug!(
		event_type = event.event_type.as_deref().unwrap_or("unknown"),
		payment_id = %payment_id,
		"Card webhook received"
	);
	apply(CallbackClaim::CardNotification { payment_id }, engine).await
}

async fn apply(claim: CallbackClaim, engine: &GatewayEngine) -> Result<CallbackAck, APIError> {
	let outcome = engine
		.coordinator()
		.apply_callback(claim)
		.await
		.map_err(|e| {
			warn!("Callback rejected: {}", e);
			api_error(e)
		})?;

	let state = match &outcome {
		CallbackOutcome::Unverified(_) => None,
		outcome => Some(outcome.order().state),
	};
	Ok(CallbackAck {
		success: true,
		state,
		applied: outcome.is_applied(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_webhook_prefers_parent_payment() {
		let event: WebhookEvent = serde_json::from_value(serde_json::json!({
			"event_type": "PAYMENT.SALE.COMPLETED",
			"resource": { "id": "SALE-1", "parent_payment": "PAY-1" }
		}))
		.unwrap();
		assert_eq!(event.resource.parent_payment.as_deref(), Some("PAY-1"));
	}
}
