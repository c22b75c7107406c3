//! Payment provider identifiers.
//!
//! The gateway talks to exactly two kinds of provider: a cryptocurrency
//! processor and a card/PayPal processor. Each order is bound to one of them
//! at creation time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The payment provider an order is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
	/// Cryptocurrency processor (CoinGate-style API).
	CryptoGateway,
	/// Card and PayPal processor (PayPal REST-style API).
	CardGateway,
}

impl Provider {
	/// Returns the string representation used in storage keys and logs.
	pub fn as_str(&self) -> &'static str {
		match self {
			Provider::CryptoGateway => "crypto_gateway",
			Provider::CardGateway => "card_gateway",
		}
	}

	/// Returns an iterator over all providers.
	pub fn all() -> impl Iterator<Item = Self> {
		[Self::CryptoGateway, Self::CardGateway].into_iter()
	}
}

impl fmt::Display for Provider {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Provider {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"crypto_gateway" | "crypto" => Ok(Self::CryptoGateway),
			"card_gateway" | "card" => Ok(Self::CardGateway),
			other => Err(format!("Unknown provider: {}", other)),
		}
	}
}

/// Provider environment selecting between sandbox and live endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
	#[default]
	Sandbox,
	Live,
}

impl FromStr for Environment {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"sandbox" => Ok(Self::Sandbox),
			"live" => Ok(Self::Live),
			other => Err(format!(
				"Unknown environment '{}', expected 'sandbox' or 'live'",
				other
			)),
		}
	}
}
