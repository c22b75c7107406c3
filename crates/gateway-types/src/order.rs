//! Order types for the payment gateway.
//!
//! This module defines the locally tracked order record, its lifecycle states,
//! the normalized provider payment status and the callback claims providers
//! send back once the payer has acted.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Provider;

/// A locally tracked checkout attempt.
///
/// The order is created in [`OrderState::Created`], bound to a provider-side
/// payment session and then driven to a terminal state by callbacks or by the
/// expiry sweep. Only the order store mutates persisted orders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
	/// Unique identifier for this order.
	pub id: String,
	/// Reference assigned by the provider once the session is open.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub external_ref: Option<String>,
	/// Provider this order is routed to.
	pub provider: Provider,
	/// Price amount in `price_currency`.
	pub amount: Decimal,
	/// Currency the price is expressed in (e.g. "USD").
	pub price_currency: String,
	/// Currency the merchant wants to receive (e.g. "ETH").
	pub receive_currency: String,
	/// Current lifecycle state.
	pub state: OrderState,
	/// Timestamp when this order was created.
	pub created_at: u64,
	/// Timestamp when this order was last updated.
	pub updated_at: u64,
	/// Timestamp after which an unpaid order is considered expired.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expires_at: Option<u64>,
	/// Secret bound to the order, echoed back by providers in callbacks.
	pub verification_token: VerificationToken,
	/// Short label shown to the payer by the provider.
	pub title: String,
	/// Optional longer description forwarded to the provider.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	/// URLs the provider redirects to or notifies.
	#[serde(default)]
	pub redirect_urls: RedirectUrls,
	/// Checkout URL returned by the provider.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub payment_url: Option<String>,
	/// Last raw status string reported by the provider.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub provider_status: Option<String>,
	/// Reason recorded when the order ends up failed.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub failure_reason: Option<String>,
}

impl Order {
	/// Returns true when the order is waiting for payment and its expiry
	/// timestamp lies strictly before `now`.
	pub fn is_stale(&self, now: u64) -> bool {
		self.state == OrderState::AwaitingPayment && self.expires_at.is_some_and(|at| at < now)
	}
}

/// Lifecycle state of an order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum OrderState {
	/// Persisted locally, provider session not yet acknowledged.
	Created,
	/// Provider session open, waiting for the payer.
	AwaitingPayment,
	/// Payment confirmed by the provider.
	Confirmed,
	/// Payment rejected, canceled, or the session could not be opened.
	Failed,
	/// Payment window elapsed without confirmation.
	Expired,
}

impl OrderState {
	/// Every state, in lifecycle order.
	pub const ALL: [OrderState; 5] = [
		OrderState::Created,
		OrderState::AwaitingPayment,
		OrderState::Confirmed,
		OrderState::Failed,
		OrderState::Expired,
	];

	/// Terminal states are absorbing.
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			OrderState::Confirmed | OrderState::Failed | OrderState::Expired
		)
	}
}

impl fmt::Display for OrderState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			OrderState::Created => write!(f, "Created"),
			OrderState::AwaitingPayment => write!(f, "AwaitingPayment"),
			OrderState::Confirmed => write!(f, "Confirmed"),
			OrderState::Failed => write!(f, "Failed"),
			OrderState::Expired => write!(f, "Expired"),
		}
	}
}

/// Opaque secret used to authenticate callbacks for one order.
///
/// Unlike [`crate::SecretString`] this value is persisted with the order, so
/// it serializes transparently; it is still redacted from debug output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerificationToken(String);

impl VerificationToken {
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Exposes the raw token. Only the callback authenticator and the
	/// provider request builders should need this.
	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl fmt::Debug for VerificationToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "VerificationToken(***)")
	}
}

/// URLs handed to the provider when a session is opened.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RedirectUrls {
	/// Where the provider posts asynchronous status callbacks.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub callback_url: Option<String>,
	/// Where the payer lands after canceling.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cancel_url: Option<String>,
	/// Where the payer lands after paying.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub success_url: Option<String>,
}

impl RedirectUrls {
	/// Iterates over the URLs that are set, paired with their field names.
	pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
		[
			("callback_url", self.callback_url.as_deref()),
			("cancel_url", self.cancel_url.as_deref()),
			("success_url", self.success_url.as_deref()),
		]
		.into_iter()
		.filter_map(|(name, url)| url.map(|u| (name, u)))
	}
}

/// Caller-supplied description of an order to create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
	pub provider: Provider,
	pub amount: Decimal,
	pub price_currency: String,
	pub receive_currency: String,
	pub title: String,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub redirect_urls: RedirectUrls,
}

/// Provider-side payment session returned when an order is submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentSession {
	/// Provider reference for the session.
	pub external_ref: String,
	/// Where the payer should be sent to pay.
	pub payment_url: Option<String>,
	/// Expiry reported by the provider or derived from configuration.
	pub expires_at: Option<u64>,
	/// Status the provider reported at creation.
	pub status: ProviderStatus,
}

/// Payment status normalized across providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
	New,
	Pending,
	Confirming,
	Paid,
	Invalid,
	Canceled,
	Expired,
	Refunded,
	Unknown(String),
}

impl ProviderStatus {
	/// Parses the status vocabulary shared by both providers.
	pub fn parse(raw: &str) -> Self {
		match raw.trim().to_ascii_lowercase().as_str() {
			"new" | "created" => Self::New,
			"pending" => Self::Pending,
			"confirming" => Self::Confirming,
			"paid" | "completed" => Self::Paid,
			"invalid" | "failed" | "denied" => Self::Invalid,
			"canceled" | "cancelled" | "voided" => Self::Canceled,
			"expired" => Self::Expired,
			"refunded" => Self::Refunded,
			other => Self::Unknown(other.to_string()),
		}
	}

	/// Order state this status drives an awaiting order to, if any.
	///
	/// Non-final statuses return `None` and leave the order untouched.
	pub fn target_state(&self) -> Option<OrderState> {
		match self {
			Self::Paid => Some(OrderState::Confirmed),
			Self::Invalid | Self::Canceled => Some(OrderState::Failed),
			Self::Expired => Some(OrderState::Expired),
			Self::New | Self::Pending | Self::Confirming | Self::Refunded | Self::Unknown(_) => None,
		}
	}
}

impl fmt::Display for ProviderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::New => write!(f, "new"),
			Self::Pending => write!(f, "pending"),
			Self::Confirming => write!(f, "confirming"),
			Self::Paid => write!(f, "paid"),
			Self::Invalid => write!(f, "invalid"),
			Self::Canceled => write!(f, "canceled"),
			Self::Expired => write!(f, "expired"),
			Self::Refunded => write!(f, "refunded"),
			Self::Unknown(raw) => write!(f, "{}", raw),
		}
	}
}

/// Callback posted by the crypto provider to the order's callback URL.
///
/// Field names follow the provider's form encoding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CryptoCallback {
	/// Provider order id (our external reference).
	#[serde(default)]
	pub id: String,
	/// Our local order id, round-tripped by the provider.
	#[serde(default)]
	pub order_id: String,
	#[serde(default)]
	pub status: String,
	#[serde(default)]
	pub price_amount: Option<String>,
	#[serde(default)]
	pub price_currency: Option<String>,
	#[serde(default)]
	pub receive_currency: Option<String>,
	#[serde(default)]
	pub receive_amount: Option<String>,
	#[serde(default)]
	pub pay_amount: Option<String>,
	#[serde(default)]
	pub pay_currency: Option<String>,
	#[serde(default)]
	pub created_at: Option<String>,
	/// Verification token echoed back by the provider.
	#[serde(default)]
	pub token: String,
}

/// Inbound confirmation claim, shaped per provider.
#[derive(Debug, Clone)]
pub enum CallbackClaim {
	/// Status callback from the crypto provider.
	Crypto(CryptoCallback),
	/// Payer returned from the card provider's approval page and asks us to
	/// execute the payment.
	CardExecution { payment_id: String, payer_id: String },
	/// Card provider notified us that something happened to a payment.
	CardNotification { payment_id: String },
}

impl CallbackClaim {
	/// Provider the claim says it comes from.
	pub fn provider(&self) -> Provider {
		match self {
			CallbackClaim::Crypto(_) => Provider::CryptoGateway,
			CallbackClaim::CardExecution { .. } | CallbackClaim::CardNotification { .. } => {
				Provider::CardGateway
			},
		}
	}

	/// Provider reference the claim points at.
	pub fn external_ref(&self) -> &str {
		match self {
			CallbackClaim::Crypto(cb) => &cb.id,
			CallbackClaim::CardExecution { payment_id, .. } => payment_id,
			CallbackClaim::CardNotification { payment_id } => payment_id,
		}
	}
}
