//! Order lifecycle coordinator.
//!
//! Opens provider payment sessions for new orders, applies authenticated
//! callbacks and expires orders whose payment window elapsed. All writes go
//! through [`OrderStore::compare_and_set`], so concurrent callbacks and sweeps
//! for the same order settle on exactly one final state.

use crate::auth::{AuthError, CallbackAuthenticator, VerificationTokens};
use crate::state::{OrderStore, OrderStoreError};
use gateway_provider::{GatewayError, PaymentGatewayInterface, ProviderService};
use gateway_types::{
	current_timestamp, truncate_id, CallbackClaim, NewOrder, Order, OrderState, ProviderStatus,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{instrument, Instrument};

/// Largest number of decimal places accepted in an amount.
const MAX_AMOUNT_SCALE: u32 = 8;

/// Age after which the sweep fails an order whose session never opened.
pub const DEFAULT_SESSION_OPEN_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors that can occur while coordinating orders.
#[derive(Debug, Error)]
pub enum CoordinatorError {
	/// The request is malformed; nothing was stored.
	#[error("Validation error: {0}")]
	Validation(String),
	/// The provider could not be reached. Safe to retry.
	#[error("Transport error: {0}")]
	Transport(String),
	#[error("Unknown order: {0}")]
	UnknownOrder(String),
	#[error("Unauthenticated callback: {0}")]
	Unauthenticated(String),
	/// The order has no open provider session yet. Safe to retry.
	#[error("Order not ready: {0}")]
	OrderNotReady(String),
	#[error("Store error: {0}")]
	Store(String),
}

impl CoordinatorError {
	/// Whether the caller may retry the same request later.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			CoordinatorError::Transport(_) | CoordinatorError::OrderNotReady(_)
		)
	}
}

impl From<OrderStoreError> for CoordinatorError {
	fn from(err: OrderStoreError) -> Self {
		match err {
			OrderStoreError::OrderNotFound(id) => CoordinatorError::UnknownOrder(id),
			other => CoordinatorError::Store(other.to_string()),
		}
	}
}

impl From<AuthError> for CoordinatorError {
	fn from(err: AuthError) -> Self {
		match err {
			AuthError::Provider(e) if e.is_retryable() => CoordinatorError::Transport(e.to_string()),
			other => CoordinatorError::Unauthenticated(other.to_string()),
		}
	}
}

/// What a callback did to its order.
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
	/// The order moved to the terminal state carried by the callback.
	Applied(Order),
	/// The reported status is not final; the order is unchanged.
	Ignored(Order),
	/// The order already reached a terminal state, possibly through a
	/// concurrent callback or sweep. Nothing was written.
	Duplicate(Order),
	/// The order is finished and the claim was not checked with the provider.
	/// Its state must not be echoed to the caller.
	Unverified(Order),
}

impl CallbackOutcome {
	pub fn order(&self) -> &Order {
		match self {
			CallbackOutcome::Applied(order)
			| CallbackOutcome::Ignored(order)
			| CallbackOutcome::Duplicate(order)
			| CallbackOutcome::Unverified(order) => order,
		}
	}

	pub fn is_applied(&self) -> bool {
		matches!(self, CallbackOutcome::Applied(_))
	}
}

/// State-machine core driving orders through their lifecycle.
pub struct OrderCoordinator {
	store: Arc<OrderStore>,
	providers: Arc<ProviderService>,
	tokens: VerificationTokens,
	authenticator: CallbackAuthenticator,
	session_open_timeout: Duration,
}

impl OrderCoordinator {
	pub fn new(
		store: Arc<OrderStore>,
		providers: Arc<ProviderService>,
		tokens: VerificationTokens,
	) -> Self {
		Self {
			store,
			providers,
			authenticator: CallbackAuthenticator::new(tokens.clone()),
			tokens,
			session_open_timeout: DEFAULT_SESSION_OPEN_TIMEOUT,
		}
	}

	/// Sets how long an order may stay in `Created` before the sweep fails it.
	pub fn with_session_open_timeout(mut self, timeout: Duration) -> Self {
		self.session_open_timeout = timeout;
		self
	}

	/// Creates an order and opens its provider payment session.
	///
	/// The returned order is either `AwaitingPayment` or `Failed` with the
	/// provider error recorded as failure reason.
	#[instrument(skip_all, fields(provider = %request.provider))]
	pub async fn create_order(&self, request: NewOrder) -> Result<Order, CoordinatorError> {
		validate_new_order(&request)?;
		let gateway = self.gateway(&request)?;
		gateway
			.validate_order(&request)
			.map_err(CoordinatorError::Validation)?;

		let id = uuid::Uuid::new_v4().to_string();
		let now = current_timestamp();
		let order = Order {
			verification_token: self.tokens.issue(&id),
			id,
			external_ref: None,
			provider: request.provider,
			amount: request.amount,
			price_currency: request.price_currency,
			receive_currency: request.receive_currency,
			state: OrderState::Created,
			created_at: now,
			updated_at: now,
			expires_at: None,
			title: request.title,
			description: request.description,
			redirect_urls: request.redirect_urls,
			payment_url: None,
			provider_status: None,
			failure_reason: None,
		};
		self.store.create(&order).await?;
		tracing::info!(order_id = %truncate_id(&order.id), "Order created");

		// Detached so a dropped request cannot strand the order in Created
		let session = tokio::spawn(
			open_session(self.store.clone(), Arc::clone(gateway), order).in_current_span(),
		);
		session
			.await
			.map_err(|e| CoordinatorError::Store(format!("Session task failed: {}", e)))?
	}

	/// Applies an inbound provider callback.
	#[instrument(skip_all, fields(provider = %claim.provider(), external_ref = %truncate_id(claim.external_ref())))]
	pub async fn apply_callback(
		&self,
		claim: CallbackClaim,
	) -> Result<CallbackOutcome, CoordinatorError> {
		let order = self.find_order(&claim).await?;
		let gateway = self
			.providers
			.get(order.provider)
			.map_err(|e| CoordinatorError::Store(e.to_string()))?;

		// Token checks need no I/O and run before anything reveals the state
		let reported = match &claim {
			CallbackClaim::Crypto(callback) => {
				self.authenticator.verify_token(&order, &callback.token)?;
				Some(ProviderStatus::parse(&callback.status))
			},
			CallbackClaim::CardExecution { .. } | CallbackClaim::CardNotification { .. } => None,
		};

		if order.state.is_terminal() {
			tracing::debug!(
				order_id = %truncate_id(&order.id),
				state = %order.state,
				"Callback for finished order"
			);
			return Ok(match reported {
				Some(_) => CallbackOutcome::Duplicate(order),
				None => CallbackOutcome::Unverified(order),
			});
		}
		if order.state == OrderState::Created {
			return Err(CoordinatorError::OrderNotReady(order.id));
		}

		let status = match reported {
			Some(status) => status,
			None => {
				self.authenticator
					.confirm_with_provider(&order, &claim, gateway.as_ref())
					.await?
			},
		};

		let Some(target) = status.target_state() else {
			tracing::debug!(
				order_id = %truncate_id(&order.id),
				status = %status,
				"Non-final status, order unchanged"
			);
			return Ok(CallbackOutcome::Ignored(order));
		};

		let mut next = order.clone();
		next.state = target;
		next.provider_status = Some(status.to_string());
		next.updated_at = current_timestamp();
		if target == OrderState::Failed {
			next.failure_reason = Some(format!("provider reported {}", status));
		}
		self.transition(order, next).await
	}

	/// Expires every awaiting order whose expiry lies before `now`, and fails
	/// orders left in `Created` longer than the session open timeout.
	///
	/// Returns the number of orders this call finished.
	#[instrument(skip(self))]
	pub async fn expire_stale(&self, now: u64) -> Result<usize, CoordinatorError> {
		let mut finished = 0;
		for order in self.store.list_by_state(OrderState::AwaitingPayment).await? {
			if !order.is_stale(now) {
				continue;
			}
			let mut next = order.clone();
			next.state = OrderState::Expired;
			next.updated_at = now;
			if self.settle(&order, next).await {
				tracing::info!(order_id = %truncate_id(&order.id), "Order expired");
				finished += 1;
			}
		}

		let open_timeout = self.session_open_timeout.as_secs();
		for order in self.store.list_by_state(OrderState::Created).await? {
			if order.created_at.saturating_add(open_timeout) >= now {
				continue;
			}
			let mut next = order.clone();
			next.state = OrderState::Failed;
			next.failure_reason = Some(format!(
				"payment session not opened within {}s",
				open_timeout
			));
			next.updated_at = now;
			if self.settle(&order, next).await {
				tracing::warn!(order_id = %truncate_id(&order.id), "Abandoned order failed");
				finished += 1;
			}
		}
		Ok(finished)
	}

	/// Sweep write; losing to a concurrent writer is not an error.
	async fn settle(&self, order: &Order, next: Order) -> bool {
		match self
			.store
			.compare_and_set(&order.id, order.state, &next)
			.await
		{
			Ok(applied) => applied,
			Err(e) => {
				tracing::warn!(
					order_id = %truncate_id(&order.id),
					error = %e,
					"Failed to settle order"
				);
				false
			},
		}
	}

	/// Read-only lookup.
	pub async fn get_order(&self, order_id: &str) -> Result<Order, CoordinatorError> {
		Ok(self.store.get(order_id).await?)
	}

	/// Lists orders in `state`, or in every state when none is given.
	///
	/// Orders come back oldest first.
	pub async fn list_orders(
		&self,
		state: Option<OrderState>,
	) -> Result<Vec<Order>, CoordinatorError> {
		let states = match state {
			Some(state) => vec![state],
			None => OrderState::ALL.to_vec(),
		};
		let mut orders = Vec::new();
		for state in states {
			orders.extend(self.store.list_by_state(state).await?);
		}
		orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
		Ok(orders)
	}

	fn gateway(
		&self,
		request: &NewOrder,
	) -> Result<&Arc<dyn PaymentGatewayInterface>, CoordinatorError> {
		self.providers.get(request.provider).map_err(|e| match e {
			GatewayError::Unsupported(msg) => CoordinatorError::Validation(msg),
			other => CoordinatorError::Store(other.to_string()),
		})
	}

	/// Finds the order a claim points at. Crypto callbacks also carry our own
	/// order id, which is used when the provider reference is not indexed yet.
	async fn find_order(&self, claim: &CallbackClaim) -> Result<Order, CoordinatorError> {
		let provider = claim.provider();
		let external_ref = claim.external_ref();

		let by_ref = if external_ref.is_empty() {
			Err(OrderStoreError::OrderNotFound(String::new()))
		} else {
			self.store.get_by_external_ref(provider, external_ref).await
		};

		let order = match (by_ref, claim) {
			(Ok(order), _) => order,
			(Err(OrderStoreError::OrderNotFound(_)), CallbackClaim::Crypto(callback))
				if !callback.order_id.is_empty() =>
			{
				self.store.get(&callback.order_id).await?
			},
			(Err(e), _) => return Err(e.into()),
		};

		if order.provider != provider {
			return Err(CoordinatorError::UnknownOrder(format!(
				"{} has no order {}",
				provider, external_ref
			)));
		}
		Ok(order)
	}

	async fn transition(
		&self,
		current: Order,
		next: Order,
	) -> Result<CallbackOutcome, CoordinatorError> {
		if self
			.store
			.compare_and_set(&current.id, current.state, &next)
			.await?
		{
			tracing::info!(
				order_id = %truncate_id(&next.id),
				from = %current.state,
				to = %next.state,
				"Callback applied"
			);
			return Ok(CallbackOutcome::Applied(next));
		}

		// Someone else finished the order first
		let latest = self.store.get(&current.id).await?;
		tracing::debug!(
			order_id = %truncate_id(&latest.id),
			state = %latest.state,
			"Callback lost race"
		);
		Ok(CallbackOutcome::Duplicate(latest))
	}
}

/// Opens the payment session of a freshly stored order and moves it out of
/// `Created`: to `AwaitingPayment` once the provider reference is indexed,
/// to `Failed` on any provider or indexing error.
async fn open_session(
	store: Arc<OrderStore>,
	gateway: Arc<dyn PaymentGatewayInterface>,
	order: Order,
) -> Result<Order, CoordinatorError> {
	let mut next = order.clone();
	let failure = match gateway.open_session(&order).await {
		Ok(session) => {
			next.external_ref = Some(session.external_ref);
			next.payment_url = session.payment_url;
			next.expires_at = session.expires_at;
			next.provider_status = Some(session.status.to_string());
			next.state = OrderState::AwaitingPayment;
			store.bind_external_ref(&next).await.err().map(|e| {
				tracing::error!(
					order_id = %truncate_id(&order.id),
					error = %e,
					"Could not index payment session"
				);
				format!("payment session could not be indexed: {}", e)
			})
		},
		Err(e) => {
			tracing::warn!(
				order_id = %truncate_id(&order.id),
				error = %e,
				retryable = e.is_retryable(),
				"Provider refused payment session"
			);
			Some(e.to_string())
		},
	};

	if let Some(reason) = failure {
		next = into_failed(next, reason);
	}
	next.updated_at = current_timestamp();

	let applied = match store
		.compare_and_set(&order.id, OrderState::Created, &next)
		.await
	{
		Ok(applied) => applied,
		Err(e) if next.state != OrderState::Failed => {
			tracing::error!(
				order_id = %truncate_id(&order.id),
				error = %e,
				"Could not record payment session"
			);
			next = into_failed(next, format!("payment session could not be recorded: {}", e));
			store
				.compare_and_set(&order.id, OrderState::Created, &next)
				.await?
		},
		Err(e) => return Err(e.into()),
	};
	if !applied {
		// The sweep gave up on the order first
		let latest = store.get(&order.id).await?;
		tracing::warn!(
			order_id = %truncate_id(&order.id),
			state = %latest.state,
			"Order settled before its session opened"
		);
		return Ok(latest);
	}

	tracing::info!(
		order_id = %truncate_id(&next.id),
		state = %next.state,
		external_ref = next.external_ref.as_deref().unwrap_or_default(),
		"Payment session handled"
	);
	Ok(next)
}

/// Drops the session fields: the payer must not be sent to a session we
/// cannot track.
fn into_failed(mut order: Order, reason: String) -> Order {
	order.external_ref = None;
	order.payment_url = None;
	order.expires_at = None;
	order.state = OrderState::Failed;
	order.failure_reason = Some(reason);
	order
}

fn validate_new_order(order: &NewOrder) -> Result<(), CoordinatorError> {
	if order.amount <= Decimal::ZERO {
		return Err(CoordinatorError::Validation(
			"amount must be positive".to_string(),
		));
	}
	if order.amount.normalize().scale() > MAX_AMOUNT_SCALE {
		return Err(CoordinatorError::Validation(format!(
			"amount supports at most {} decimal places",
			MAX_AMOUNT_SCALE
		)));
	}
	for (field, code) in [
		("priceCurrency", &order.price_currency),
		("receiveCurrency", &order.receive_currency),
	] {
		if !is_currency_code(code) {
			return Err(CoordinatorError::Validation(format!(
				"{} '{}' is not a currency code",
				field, code
			)));
		}
	}
	if order.title.trim().is_empty() {
		return Err(CoordinatorError::Validation(
			"title must not be empty".to_string(),
		));
	}
	for (field, url) in order.redirect_urls.iter() {
		if !is_absolute_http_url(url) {
			return Err(CoordinatorError::Validation(format!(
				"{} must be an absolute http(s) URL",
				field
			)));
		}
	}
	Ok(())
}

fn is_currency_code(code: &str) -> bool {
	(2..=10).contains(&code.len())
		&& code
			.chars()
			.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

fn is_absolute_http_url(url: &str) -> bool {
	["http://", "https://"].iter().any(|scheme| {
		url.strip_prefix(scheme)
			.is_some_and(|rest| !rest.is_empty() && !rest.starts_with('/'))
	})
}
