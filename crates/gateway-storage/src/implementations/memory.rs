//! In-memory storage backend.
//!
//! Useful for tests and single-process deployments where orders do not need
//! to survive a restart.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use gateway_types::{ConfigSchema, Schema, ValidationError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory storage implementation.
///
/// All operations take the map lock, so compare-and-swap is atomic with
/// respect to every other write.
pub struct MemoryStorage {
	store: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
	/// Creates a new MemoryStorage instance.
	pub fn new() -> Self {
		Self {
			store: Arc::new(RwLock::new(HashMap::new())),
		}
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let store = self.store.read().await;
		store.get(key).cloned().ok_or(StorageError::NotFound)
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		value: Vec<u8>,
	) -> Result<bool, StorageError> {
		let mut store = self.store.write().await;
		let matches = match (store.get(key), expected) {
			(None, None) => true,
			(Some(current), Some(expected)) => current.as_slice() == expected,
			_ => false,
		};
		if matches {
			store.insert(key.to_string(), value);
		}
		Ok(matches)
	}

	async fn list_keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
		let prefix = format!("{}:", namespace);
		let store = self.store.read().await;
		Ok(store
			.keys()
			.filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
			.collect())
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStorageSchema)
	}
}

/// Configuration schema for MemoryStorage.
pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		// No settings, but the entry must still be a table
		Schema::new(vec![], vec![]).validate(config)
	}
}

/// Factory function to create a memory storage backend from configuration.
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	MemoryStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;
	Ok(Box::new(MemoryStorage::new()))
}

/// Registry for the memory storage implementation.
pub struct Registry;

impl gateway_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = crate::StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl crate::StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_missing_key_is_not_found() {
		let storage = MemoryStorage::new();
		assert!(matches!(
			storage.get_bytes("orders:1").await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test]
	async fn test_compare_and_swap() {
		let storage = MemoryStorage::new();
		let key = "orders:1";

		// Insert-if-absent
		assert!(storage.compare_and_swap(key, None, b"v1".to_vec()).await.unwrap());
		assert!(!storage.compare_and_swap(key, None, b"v2".to_vec()).await.unwrap());

		// Swap against current value
		assert!(storage
			.compare_and_swap(key, Some(&b"v1"[..]), b"v2".to_vec())
			.await
			.unwrap());
		assert!(!storage
			.compare_and_swap(key, Some(&b"v1"[..]), b"v3".to_vec())
			.await
			.unwrap());
		assert_eq!(storage.get_bytes(key).await.unwrap(), b"v2".to_vec());

		// Swap on a missing key never creates it
		assert!(!storage
			.compare_and_swap("orders:2", Some(&b"v1"[..]), b"v1".to_vec())
			.await
			.unwrap());
		assert!(storage.get_bytes("orders:2").await.is_err());
	}

	#[tokio::test]
	async fn test_concurrent_insert_has_one_winner() {
		let storage = Arc::new(MemoryStorage::new());
		let mut handles = Vec::new();
		for i in 0..16u8 {
			let storage = storage.clone();
			handles.push(tokio::spawn(async move {
				storage
					.compare_and_swap("orders:race", None, vec![i])
					.await
					.unwrap()
			}));
		}

		let mut winners = 0;
		for handle in handles {
			if handle.await.unwrap() {
				winners += 1;
			}
		}
		assert_eq!(winners, 1);
	}

	#[tokio::test]
	async fn test_list_keys_strips_namespace() {
		let storage = MemoryStorage::new();
		storage.compare_and_swap("orders:a", None, vec![1]).await.unwrap();
		storage
			.compare_and_swap("order_by_external_ref:card_gateway:PAY-1", None, vec![2])
			.await
			.unwrap();

		assert_eq!(storage.list_keys("orders").await.unwrap(), vec!["a"]);
		assert_eq!(
			storage.list_keys("order_by_external_ref").await.unwrap(),
			vec!["card_gateway:PAY-1"]
		);
	}
}
