//! Order store and state machine.
//!
//! Orders move through `Created -> AwaitingPayment -> {Confirmed | Failed |
//! Expired}`, or straight from `Created` to `Failed` when no provider session
//! could be opened. Terminal states are absorbing and the provider reference
//! of an order never changes once set.

use gateway_storage::{StorageError, StorageService};
use gateway_types::{truncate_id, Order, OrderState, Provider, StorageKey};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during order state management.
#[derive(Debug, Error)]
pub enum OrderStoreError {
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Order already exists: {0}")]
	AlreadyExists(String),
	#[error("Order not found: {0}")]
	OrderNotFound(String),
	#[error("Invalid state transition from {from} to {to}")]
	InvalidTransition { from: OrderState, to: OrderState },
	#[error("Field '{field}' of order {order_id} cannot change")]
	ImmutableField {
		order_id: String,
		field: &'static str,
	},
}

impl From<StorageError> for OrderStoreError {
	fn from(err: StorageError) -> Self {
		OrderStoreError::Storage(err.to_string())
	}
}

/// Static transition table - each state maps to allowed next states.
static TRANSITIONS: Lazy<HashMap<OrderState, HashSet<OrderState>>> = Lazy::new(|| {
	let mut m = HashMap::new();
	m.insert(
		OrderState::Created,
		HashSet::from([OrderState::AwaitingPayment, OrderState::Failed]),
	);
	m.insert(
		OrderState::AwaitingPayment,
		HashSet::from([
			OrderState::Confirmed,
			OrderState::Failed,
			OrderState::Expired,
		]),
	);
	m.insert(OrderState::Confirmed, HashSet::new()); // terminal
	m.insert(OrderState::Failed, HashSet::new()); // terminal
	m.insert(OrderState::Expired, HashSet::new()); // terminal
	m
});

/// Keyed storage of order records.
pub struct OrderStore {
	storage: Arc<StorageService>,
}

impl OrderStore {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	/// Checks if a state transition is valid.
	///
	/// Staying in a non-terminal state is allowed so that fields can be
	/// recorded without moving the order forward.
	pub fn is_valid_transition(from: OrderState, to: OrderState) -> bool {
		if from == to {
			return !from.is_terminal();
		}
		TRANSITIONS.get(&from).is_some_and(|set| set.contains(&to))
	}

	/// Persists a new order. Fails if the id is already taken.
	pub async fn create(&self, order: &Order) -> Result<(), OrderStoreError> {
		let inserted = self
			.storage
			.insert_new(StorageKey::Orders.as_str(), &order.id, order)
			.await?;
		if !inserted {
			return Err(OrderStoreError::AlreadyExists(order.id.clone()));
		}
		tracing::debug!(order_id = %truncate_id(&order.id), "Order stored");
		Ok(())
	}

	/// Gets an order by id.
	pub async fn get(&self, order_id: &str) -> Result<Order, OrderStoreError> {
		self.storage
			.retrieve(StorageKey::Orders.as_str(), order_id)
			.await
			.map_err(|e| match e {
				StorageError::NotFound => OrderStoreError::OrderNotFound(order_id.to_string()),
				other => other.into(),
			})
	}

	/// Gets an order through the provider reference index.
	pub async fn get_by_external_ref(
		&self,
		provider: Provider,
		external_ref: &str,
	) -> Result<Order, OrderStoreError> {
		let order_id: String = self
			.storage
			.retrieve(
				StorageKey::OrderByExternalRef.as_str(),
				&index_id(provider, external_ref),
			)
			.await
			.map_err(|e| match e {
				StorageError::NotFound => {
					OrderStoreError::OrderNotFound(format!("{}:{}", provider, external_ref))
				},
				other => other.into(),
			})?;
		self.get(&order_id).await
	}

	/// Records the index entry `{provider}:{external_ref} -> id`.
	///
	/// Binding the same reference to the same order again is a no-op; binding
	/// it to a different order is rejected.
	pub async fn bind_external_ref(&self, order: &Order) -> Result<(), OrderStoreError> {
		let Some(external_ref) = order.external_ref.as_deref() else {
			return Err(OrderStoreError::Storage(format!(
				"Order {} has no external reference to bind",
				order.id
			)));
		};
		let key = index_id(order.provider, external_ref);
		let namespace = StorageKey::OrderByExternalRef.as_str();

		if self.storage.insert_new(namespace, &key, &order.id).await? {
			return Ok(());
		}
		let bound: String = self.storage.retrieve(namespace, &key).await?;
		if bound == order.id {
			Ok(())
		} else {
			Err(OrderStoreError::AlreadyExists(format!(
				"{} is bound to order {}",
				key, bound
			)))
		}
	}

	/// Lists every order currently in `state`.
	pub async fn list_by_state(&self, state: OrderState) -> Result<Vec<Order>, OrderStoreError> {
		let orders = self
			.storage
			.retrieve_all::<Order>(StorageKey::Orders.as_str())
			.await?;
		Ok(orders
			.into_iter()
			.map(|(_, order)| order)
			.filter(|order| order.state == state)
			.collect())
	}

	/// Replaces the stored order with `new_order` if its state still equals
	/// `expected`.
	///
	/// Returns `Ok(false)` when the stored state moved on. Invalid transitions
	/// and rewrites of immutable fields are errors. A concurrent write that
	/// left the state unchanged is retried against the fresh record.
	pub async fn compare_and_set(
		&self,
		order_id: &str,
		expected: OrderState,
		new_order: &Order,
	) -> Result<bool, OrderStoreError> {
		if new_order.id != order_id {
			return Err(OrderStoreError::ImmutableField {
				order_id: order_id.to_string(),
				field: "id",
			});
		}
		if !Self::is_valid_transition(expected, new_order.state) {
			return Err(OrderStoreError::InvalidTransition {
				from: expected,
				to: new_order.state,
			});
		}

		let namespace = StorageKey::Orders.as_str();
		loop {
			let raw = self
				.storage
				.retrieve_raw(namespace, order_id)
				.await
				.map_err(|e| match e {
					StorageError::NotFound => OrderStoreError::OrderNotFound(order_id.to_string()),
					other => other.into(),
				})?;
			let current: Order = serde_json::from_slice(&raw)
				.map_err(|e| OrderStoreError::Storage(e.to_string()))?;

			if current.state != expected {
				tracing::debug!(
					order_id = %truncate_id(order_id),
					expected = %expected,
					actual = %current.state,
					"Compare-and-set lost, state moved on"
				);
				return Ok(false);
			}
			check_immutable(&current, new_order)?;

			if self
				.storage
				.compare_and_swap(namespace, order_id, &raw, new_order)
				.await?
			{
				tracing::debug!(
					order_id = %truncate_id(order_id),
					from = %expected,
					to = %new_order.state,
					"Order updated"
				);
				return Ok(true);
			}
		}
	}
}

fn index_id(provider: Provider, external_ref: &str) -> String {
	format!("{}:{}", provider, external_ref)
}

fn check_immutable(current: &Order, new_order: &Order) -> Result<(), OrderStoreError> {
	let field = if current.external_ref.is_some() && current.external_ref != new_order.external_ref
	{
		Some("external_ref")
	} else if current.provider != new_order.provider {
		Some("provider")
	} else if current.amount != new_order.amount {
		Some("amount")
	} else if current.price_currency != new_order.price_currency {
		Some("price_currency")
	} else if current.receive_currency != new_order.receive_currency {
		Some("receive_currency")
	} else if current.verification_token != new_order.verification_token {
		Some("verification_token")
	} else if current.created_at != new_order.created_at {
		Some("created_at")
	} else {
		None
	};

	match field {
		Some(field) => Err(OrderStoreError::ImmutableField {
			order_id: current.id.clone(),
			field,
		}),
		None => Ok(()),
	}
}
