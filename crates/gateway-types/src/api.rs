//! API types for the payment gateway HTTP API.
//!
//! This module defines the request and response bodies of the checkout API
//! and the structured error type every handler returns.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{NewOrder, Order, OrderState, Provider, RedirectUrls};

/// Request for creating a checkout order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
	/// Provider to collect the payment with
	pub provider: Provider,
	/// Price amount, decimal string or number
	pub amount: Decimal,
	/// Currency the price is expressed in
	pub price_currency: String,
	/// Currency the merchant receives
	pub receive_currency: String,
	/// Label shown to the payer
	pub title: String,
	/// Optional description
	#[serde(default)]
	pub description: Option<String>,
	/// Callback URL for provider notifications
	#[serde(default)]
	pub callback_url: Option<String>,
	/// Redirect after cancel
	#[serde(default)]
	pub cancel_url: Option<String>,
	/// Redirect after payment
	#[serde(default)]
	pub success_url: Option<String>,
}

impl From<CreateOrderRequest> for NewOrder {
	fn from(req: CreateOrderRequest) -> Self {
		NewOrder {
			provider: req.provider,
			amount: req.amount,
			price_currency: req.price_currency,
			receive_currency: req.receive_currency,
			title: req.title,
			description: req.description,
			redirect_urls: RedirectUrls {
				callback_url: req.callback_url,
				cancel_url: req.cancel_url,
				success_url: req.success_url,
			},
		}
	}
}

/// Public view of an order. Never carries the verification token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
	pub id: String,
	pub provider: Provider,
	pub state: OrderState,
	pub amount: Decimal,
	pub price_currency: String,
	pub receive_currency: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub external_ref: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub payment_url: Option<String>,
	pub created_at: u64,
	pub updated_at: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub expires_at: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub failure_reason: Option<String>,
}

impl From<&Order> for OrderResponse {
	fn from(order: &Order) -> Self {
		OrderResponse {
			id: order.id.clone(),
			provider: order.provider,
			state: order.state,
			amount: order.amount,
			price_currency: order.price_currency.clone(),
			receive_currency: order.receive_currency.clone(),
			external_ref: order.external_ref.clone(),
			payment_url: order.payment_url.clone(),
			created_at: order.created_at,
			updated_at: order.updated_at,
			expires_at: order.expires_at,
			failure_reason: order.failure_reason.clone(),
		}
	}
}

/// Acknowledgement returned to providers after a callback was processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackAck {
	pub success: bool,
	/// State of the order after processing, withheld for claims that were
	/// not checked
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub state: Option<OrderState>,
	/// Whether this delivery changed the order
	pub applied: bool,
}

/// API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Error type/code
	pub error: String,
	/// Human-readable description
	pub message: String,
	/// Suggested retry delay in seconds
	#[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
	pub retry_after: Option<u64>,
}

/// Structured API error type with appropriate HTTP status mapping.
#[derive(Debug)]
pub enum APIError {
	/// Bad request with validation errors (400)
	BadRequest { error_type: String, message: String },
	/// Callback failed its authenticity check (401)
	Unauthorized { error_type: String, message: String },
	/// Referenced order does not exist (404)
	NotFound { error_type: String, message: String },
	/// Service unavailable with optional retry information (503)
	ServiceUnavailable {
		error_type: String,
		message: String,
		retry_after: Option<u64>,
	},
	/// Internal server error (500)
	InternalServerError { error_type: String, message: String },
}

impl APIError {
	/// Get the HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self {
			APIError::BadRequest { .. } => 400,
			APIError::Unauthorized { .. } => 401,
			APIError::NotFound { .. } => 404,
			APIError::ServiceUnavailable { .. } => 503,
			APIError::InternalServerError { .. } => 500,
		}
	}

	/// Convert to ErrorResponse for JSON serialization.
	pub fn to_error_response(&self) -> ErrorResponse {
		match self {
			APIError::BadRequest { error_type, message }
			| APIError::Unauthorized { error_type, message }
			| APIError::NotFound { error_type, message }
			| APIError::InternalServerError { error_type, message } => ErrorResponse {
				error: error_type.clone(),
				message: message.clone(),
				retry_after: None,
			},
			APIError::ServiceUnavailable {
				error_type,
				message,
				retry_after,
			} => ErrorResponse {
				error: error_type.clone(),
				message: message.clone(),
				retry_after: *retry_after,
			},
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			APIError::BadRequest { message, .. } => write!(f, "Bad Request: {}", message),
			APIError::Unauthorized { message, .. } => write!(f, "Unauthorized: {}", message),
			APIError::NotFound { message, .. } => write!(f, "Not Found: {}", message),
			APIError::ServiceUnavailable { message, .. } => {
				write!(f, "Service Unavailable: {}", message)
			},
			APIError::InternalServerError { message, .. } => {
				write!(f, "Internal Server Error: {}", message)
			},
		}
	}
}

impl std::error::Error for APIError {}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for APIError {
	fn into_response(self) -> axum::response::Response {
		use axum::{http::StatusCode, response::Json};

		let status = StatusCode::from_u16(self.status_code())
			.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

		let error_response = self.to_error_response();
		(status, Json(error_response)).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_create_request_accepts_string_amount() {
		let req: CreateOrderRequest = serde_json::from_value(serde_json::json!({
			"provider": "crypto_gateway",
			"amount": "100.00",
			"priceCurrency": "USD",
			"receiveCurrency": "ETH",
			"title": "Order #1011",
			"successUrl": "https://shop.example/success"
		}))
		.unwrap();

		let new_order: NewOrder = req.into();
		assert_eq!(new_order.amount.to_string(), "100.00");
		assert_eq!(
			new_order.redirect_urls.success_url.as_deref(),
			Some("https://shop.example/success")
		);
		assert!(new_order.redirect_urls.callback_url.is_none());
	}

	#[test]
	fn test_error_status_codes() {
		let err = APIError::ServiceUnavailable {
			error_type: "PROVIDER_UNAVAILABLE".to_string(),
			message: "timeout".to_string(),
			retry_after: Some(5),
		};
		assert_eq!(err.status_code(), 503);
		assert_eq!(err.to_error_response().retry_after, Some(5));
		assert_eq!(
			APIError::Unauthorized {
				error_type: "UNAUTHENTICATED".to_string(),
				message: "bad token".to_string(),
			}
			.status_code(),
			401
		);
	}
}
