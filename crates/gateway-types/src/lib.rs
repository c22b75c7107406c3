//! Common types module for the payment gateway.
//!
//! This module defines the core data types shared by every gateway crate:
//! orders and their lifecycle states, provider identifiers, callback claims,
//! API request/response shapes and configuration validation primitives.

/// API types for HTTP endpoints and request/response structures.
pub mod api;
/// Order types including lifecycle states and callback claims.
pub mod order;
/// Payment provider identifiers and environments.
pub mod provider;
/// Registry trait for self-registering implementations.
pub mod registry;
/// Redacting string type for credentials and shared secrets.
pub mod secret_string;
/// Storage types for managing persistent data.
pub mod storage;
/// Utility functions for formatting and timestamps.
pub mod utils;
/// Configuration validation types for ensuring type-safe configurations.
pub mod validation;

// Re-export all types for convenient access
pub use api::*;
pub use order::*;
pub use provider::*;
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use storage::*;
pub use utils::{current_timestamp, truncate_id};
pub use validation::*;
