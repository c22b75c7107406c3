//! Checkout order endpoints.
//!
//! Merchants create an order for one provider and get back the provider's
//! payment URL; they can then poll the order until it reaches a final state.
//! Responses never include the order's verification token.

use super::api_error;
use gateway_core::GatewayEngine;
use gateway_types::{APIError, CreateOrderRequest, OrderResponse, OrderState};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

/// Handles POST /api/orders requests.
pub async fn create_order(
	request: CreateOrderRequest,
	engine: &GatewayEngine,
) -> Result<OrderResponse, APIError> {
	let order = engine
		.coordinator()
		.create_order(request.into())
		.await
		.map_err(|e| {
			warn!("Order creation failed: {}", e);
			api_error(e)
		})?;
	info!(order_id = %order.id, state = %order.state, "Order submitted");
	Ok(OrderResponse::from(&order))
}

/// Handles GET /api/orders/{id} requests.
pub async fn get_order_by_id(id: &str, engine: &GatewayEngine) -> Result<OrderResponse, APIError> {
	validate_order_id(id)?;
	let order = engine.coordinator().get_order(id).await.map_err(api_error)?;
	Ok(OrderResponse::from(&order))
}

/// Query of GET /api/orders.
#[derive(Debug, Default, Deserialize)]
pub struct ListOrdersQuery {
	#[serde(default)]
	pub state: Option<OrderState>,
}

/// Handles GET /api/orders requests.
pub async fn list_orders(
	query: ListOrdersQuery,
	engine: &GatewayEngine,
) -> Result<Vec<OrderResponse>, APIError> {
	let orders = engine
		.coordinator()
		.list_orders(query.state)
		.await
		.map_err(api_error)?;
	Ok(orders.iter().map(OrderResponse::from).collect())
}

/// Validates the order ID format.
fn validate_order_id(order_id: &str) -> Result<(), APIError> {
	if Uuid::parse_str(order_id).is_err() {
		return Err(APIError::BadRequest {
			error_type: "INVALID_ORDER_ID".to_string(),
			message: format!("Order ID must be a valid UUID: {}", order_id),
		});
	}
	Ok(())
}
