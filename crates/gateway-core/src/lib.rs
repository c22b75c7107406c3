//! Core of the payment gateway.
//!
//! This crate holds the order lifecycle: the [`state::OrderStore`] that owns
//! persisted orders, the [`coordinator::OrderCoordinator`] that opens provider
//! sessions and applies callbacks, the [`auth::CallbackAuthenticator`] that
//! decides which callbacks to trust, and the [`engine::GatewayEngine`] that
//! runs periodic work. [`builder::GatewayBuilder`] assembles all of it from
//! configuration.

pub mod auth;
pub mod builder;
pub mod coordinator;
pub mod engine;
pub mod state;

pub use auth::{AuthError, CallbackAuthenticator, VerificationTokens};
pub use builder::{BuilderError, GatewayBuilder, GatewayFactories};
pub use coordinator::{CallbackOutcome, CoordinatorError, OrderCoordinator};
pub use engine::{EngineError, GatewayEngine};
pub use state::{OrderStore, OrderStoreError};
