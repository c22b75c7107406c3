//! Storage module for the payment gateway.
//!
//! This module provides the key-value abstraction the order store is built
//! on. Backends only deal in bytes; [`StorageService`] adds namespacing and
//! JSON serialization on top. Every conditional write goes through
//! [`StorageInterface::compare_and_swap`], which backends must perform
//! atomically.

use async_trait::async_trait;
use gateway_types::{ConfigSchema, ImplementationRegistry};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait defining the low-level interface for storage backends.
///
/// Keys have the form `{namespace}:{id}`. Backends provide reads, an atomic
/// compare-and-swap as the only write, and listing of the keys of one
/// namespace. Entries never expire; records are owned by the order store.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Atomically replaces the value at `key` if it currently equals
	/// `expected`.
	///
	/// `expected = None` means "insert only if the key is absent". Returns
	/// `Ok(false)` when the current value did not match; nothing is written
	/// in that case.
	async fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		value: Vec<u8>,
	) -> Result<bool, StorageError>;

	/// Lists the ids (key without the `{namespace}:` prefix) stored in a
	/// namespace.
	async fn list_keys(&self, namespace: &str) -> Result<Vec<String>, StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations.
///
/// Returns a vector of (name, factory) tuples for all available storage implementations.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

fn storage_key(namespace: &str, id: &str) -> String {
	format!("{}:{}", namespace, id)
}

/// High-level storage service that provides typed operations.
///
/// The StorageService wraps a low-level storage backend and provides
/// convenient methods for storing and retrieving typed data with
/// automatic serialization/deserialization.
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Retrieves and deserializes a value from storage.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.retrieve_raw(namespace, id).await?;
		decode(&bytes)
	}

	/// Retrieves the stored bytes unchanged.
	///
	/// Callers that want to [`compare_and_swap`](Self::compare_and_swap)
	/// later pass these bytes back as the expected value.
	pub async fn retrieve_raw(&self, namespace: &str, id: &str) -> Result<Vec<u8>, StorageError> {
		self.backend.get_bytes(&storage_key(namespace, id)).await
	}

	/// Inserts a value only if nothing is stored under the id yet.
	///
	/// Returns `Ok(false)` if the id is taken.
	pub async fn insert_new<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<bool, StorageError> {
		let bytes = encode(data)?;
		self.backend
			.compare_and_swap(&storage_key(namespace, id), None, bytes)
			.await
	}

	/// Replaces the value only if the stored bytes still equal `expected`.
	pub async fn compare_and_swap<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		expected: &[u8],
		data: &T,
	) -> Result<bool, StorageError> {
		let bytes = encode(data)?;
		self.backend
			.compare_and_swap(&storage_key(namespace, id), Some(expected), bytes)
			.await
	}

	/// Retrieves every value of a namespace.
	///
	/// Keys listed before their first write landed are skipped.
	pub async fn retrieve_all<T: DeserializeOwned>(
		&self,
		namespace: &str,
	) -> Result<Vec<(String, T)>, StorageError> {
		let ids = self.backend.list_keys(namespace).await?;
		let mut values = Vec::with_capacity(ids.len());
		for id in ids {
			match self.retrieve(namespace, &id).await {
				Ok(value) => values.push((id, value)),
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e),
			}
		}
		Ok(values)
	}
}

fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
	serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
	serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use implementations::memory::MemoryStorage;
	use serde::Deserialize;

	#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
	struct Record {
		state: String,
	}

	fn record(state: &str) -> Record {
		Record {
			state: state.to_string(),
		}
	}

	#[tokio::test]
	async fn test_insert_new_rejects_taken_id() {
		let service = StorageService::new(Box::new(MemoryStorage::new()));

		assert!(service.insert_new("orders", "a", &record("created")).await.unwrap());
		assert!(!service.insert_new("orders", "a", &record("other")).await.unwrap());

		let stored: Record = service.retrieve("orders", "a").await.unwrap();
		assert_eq!(stored, record("created"));
	}

	#[tokio::test]
	async fn test_compare_and_swap_against_raw_bytes() {
		let service = StorageService::new(Box::new(MemoryStorage::new()));
		service.insert_new("orders", "a", &record("created")).await.unwrap();

		let observed = service.retrieve_raw("orders", "a").await.unwrap();
		assert!(service
			.compare_and_swap("orders", "a", &observed, &record("awaiting"))
			.await
			.unwrap());

		// Second writer still holds the stale bytes
		assert!(!service
			.compare_and_swap("orders", "a", &observed, &record("failed"))
			.await
			.unwrap());

		let stored: Record = service.retrieve("orders", "a").await.unwrap();
		assert_eq!(stored.state, "awaiting");
	}

	#[tokio::test]
	async fn test_retrieve_all_is_namespace_scoped() {
		let service = StorageService::new(Box::new(MemoryStorage::new()));
		service.insert_new("orders", "a", &record("x")).await.unwrap();
		service.insert_new("orders", "b", &record("y")).await.unwrap();
		service
			.insert_new("order_by_external_ref", "crypto_gateway:1", &"a")
			.await
			.unwrap();

		let mut all: Vec<(String, Record)> = service.retrieve_all("orders").await.unwrap();
		all.sort_by(|l, r| l.0.cmp(&r.0));
		assert_eq!(all.len(), 2);
		assert_eq!(all[0].0, "a");
		assert_eq!(all[1].1, record("y"));
	}
}
