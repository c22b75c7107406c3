//! Redacting string type for provider credentials and shared secrets.
//!
//! API tokens, OAuth client secrets, bearer tokens and the webhook secret all
//! travel through configuration and request builders. `SecretString` zeroes
//! its memory on drop and never shows its content in logs or debug output.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroizing;

/// A string that is zeroed on drop and redacted everywhere it could leak.
#[derive(Clone)]
pub struct SecretString(Zeroizing<String>);

impl SecretString {
	/// Creates a new SecretString from a regular string.
	pub fn new(s: String) -> Self {
		Self(Zeroizing::new(s))
	}

	/// Exposes the secret string as a string slice.
	///
	/// Only request builders that have to put the value on the wire should
	/// call this. Never log the result.
	pub fn expose_secret(&self) -> &str {
		&self.0
	}

	/// Returns the length of the secret string.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns true if the secret is empty or whitespace only.
	pub fn is_blank(&self) -> bool {
		self.0.trim().is_empty()
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "SecretString(***REDACTED***)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "***REDACTED***")
	}
}

impl From<String> for SecretString {
	fn from(s: String) -> Self {
		Self::new(s)
	}
}

impl From<&str> for SecretString {
	fn from(s: &str) -> Self {
		Self::new(s.to_string())
	}
}

impl PartialEq for SecretString {
	fn eq(&self, other: &Self) -> bool {
		self.0.as_str() == other.0.as_str()
	}
}

impl Eq for SecretString {}

// Serializing always redacts, so a dumped config never carries credentials
impl Serialize for SecretString {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str("***REDACTED***")
	}
}

impl<'de> Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(SecretString::new(s))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_api_token_never_printed() {
		let token = SecretString::from("shT1zpsLRjaD63VsLEGz");
		assert_eq!(format!("{:?}", token), "SecretString(***REDACTED***)");
		assert_eq!(format!("{}", token), "***REDACTED***");
		assert_eq!(token.expose_secret(), "shT1zpsLRjaD63VsLEGz");
	}

	#[test]
	fn test_serialize_redacts_but_deserialize_keeps_value() {
		let secret: SecretString = serde_json::from_str("\"client-secret\"").unwrap();
		assert_eq!(secret.expose_secret(), "client-secret");
		assert_eq!(
			serde_json::to_string(&secret).unwrap(),
			"\"***REDACTED***\""
		);
	}

	#[test]
	fn test_blank_detection() {
		assert!(SecretString::from("   ").is_blank());
		assert!(!SecretString::from("x").is_blank());
		assert_eq!(SecretString::from("abcd").len(), 4);
	}
}
