//! File-based storage backend.
//!
//! Each key is stored as one file under `{storage_path}/{namespace}/`, named
//! by the hex encoding of the id so any id (including the `provider:ref`
//! index ids) maps to a safe, reversible file name. Writes go to a temporary
//! file and are renamed into place. All writes of one instance are
//! serialized, and the storage directory is locked for the lifetime of the
//! instance so a second process cannot interleave its own writes.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use fs2::FileExt;
use gateway_types::{ConfigSchema, Field, FieldType, Schema, ValidationError};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// File-based storage implementation.
pub struct FileStorage {
	base_path: PathBuf,
	/// Serializes writes so compare-and-swap observes no interleaving.
	write_lock: Mutex<()>,
	/// Held open for the lifetime of the instance; the OS lock is released
	/// when it is dropped.
	_dir_lock: std::fs::File,
}

impl FileStorage {
	/// Opens (creating if needed) the storage directory and takes its lock.
	///
	/// Fails if another instance already holds the directory.
	pub fn open(base_path: PathBuf) -> Result<Self, StorageError> {
		std::fs::create_dir_all(&base_path).map_err(|e| {
			StorageError::Backend(format!(
				"Cannot create storage directory {}: {}",
				base_path.display(),
				e
			))
		})?;

		let lock_path = base_path.join(".lock");
		let dir_lock = std::fs::OpenOptions::new()
			.create(true)
			.truncate(false)
			.write(true)
			.open(&lock_path)
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		dir_lock.try_lock_exclusive().map_err(|_| {
			StorageError::Backend(format!(
				"Storage directory {} is in use by another process",
				base_path.display()
			))
		})?;

		Ok(Self {
			base_path,
			write_lock: Mutex::new(()),
			_dir_lock: dir_lock,
		})
	}

	/// Maps `namespace:id` to `{base}/{namespace}/{hex(id)}.bin`.
	fn get_file_path(&self, key: &str) -> PathBuf {
		let (namespace, id) = split_key(key);
		self.base_path
			.join(namespace)
			.join(format!("{}.bin", hex::encode(id.as_bytes())))
	}

	/// Reads an entry, `None` if missing.
	async fn read_entry(&self, path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
		match fs::read(path).await {
			Ok(data) => Ok(Some(data)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	/// Writes the payload through a temp file and renames it into place.
	///
	/// Callers must hold `write_lock`.
	async fn write_entry(&self, path: &Path, value: &[u8]) -> Result<(), StorageError> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}

		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, value)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&temp_path, path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}
}

fn split_key(key: &str) -> (&str, &str) {
	key.split_once(':').unwrap_or(("default", key))
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.read_entry(&self.get_file_path(key))
			.await?
			.ok_or(StorageError::NotFound)
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		value: Vec<u8>,
	) -> Result<bool, StorageError> {
		let path = self.get_file_path(key);

		let _guard = self.write_lock.lock().await;
		let current = self.read_entry(&path).await?;
		let matches = match (current.as_deref(), expected) {
			(None, None) => true,
			(Some(current), Some(expected)) => current == expected,
			_ => false,
		};
		if matches {
			self.write_entry(&path, &value).await?;
		}
		Ok(matches)
	}

	async fn list_keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
		let dir = self.base_path.join(namespace);
		let mut entries = match fs::read_dir(&dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let mut ids = Vec::new();
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let path = entry.path();
			if path.extension() != Some(std::ffi::OsStr::new("bin")) {
				continue;
			}
			let decoded = path
				.file_stem()
				.and_then(|stem| stem.to_str())
				.and_then(|stem| hex::decode(stem).ok())
				.and_then(|bytes| String::from_utf8(bytes).ok());
			match decoded {
				Some(id) => ids.push(id),
				None => tracing::debug!("Skipping foreign file {:?}", path),
			}
		}
		Ok(ids)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}

}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let optional_fields = vec![Field::new("storage_path", FieldType::String)
			.with_validator(gateway_types::non_empty_string)];

		Schema::new(vec![], optional_fields).validate(config)
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for file storage (default: "./data/orders")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/orders");

	Ok(Box::new(FileStorage::open(PathBuf::from(storage_path))?))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl gateway_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = crate::StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl crate::StorageRegistry for Registry {}
