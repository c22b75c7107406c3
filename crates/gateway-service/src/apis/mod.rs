//! API endpoint implementations.

pub mod callback;
pub mod order;

use gateway_core::CoordinatorError;
use gateway_types::APIError;

/// Seconds a client should wait before retrying a transient failure.
const RETRY_AFTER_SECONDS: u64 = 5;

/// Maps a coordinator error to its HTTP representation.
pub fn api_error(err: CoordinatorError) -> APIError {
	let message = err.to_string();
	match err {
		CoordinatorError::Validation(_) => APIError::BadRequest {
			error_type: "VALIDATION_ERROR".to_string(),
			message,
		},
		CoordinatorError::Transport(_) => APIError::ServiceUnavailable {
			error_type: "PROVIDER_UNAVAILABLE".to_string(),
			message,
			retry_after: Some(RETRY_AFTER_SECONDS),
		},
		CoordinatorError::OrderNotReady(_) => APIError::ServiceUnavailable {
			error_type: "ORDER_NOT_READY".to_string(),
			message,
			retry_after: Some(RETRY_AFTER_SECONDS),
		},
		CoordinatorError::UnknownOrder(_) => APIError::NotFound {
			error_type: "ORDER_NOT_FOUND".to_string(),
			message,
		},
		CoordinatorError::Unauthenticated(_) => APIError::Unauthorized {
			error_type: "UNAUTHENTICATED".to_string(),
			message,
		},
		CoordinatorError::Store(_) => APIError::InternalServerError {
			error_type: "STORE_ERROR".to_string(),
			message,
		},
	}
}
