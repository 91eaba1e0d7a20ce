//! File-backed [`TokenCache`] shared by every process pointing at the same directory.

// std
use std::{
	env,
	fs::{self, File},
	io::{ErrorKind, Write},
	path::{Path, PathBuf},
};
// crates.io
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	cache::{CacheError, CacheFuture, CacheLookup, TokenCache},
};

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
	value: String,
	#[serde(with = "time::serde::timestamp")]
	expires_at: OffsetDateTime,
}

/// Stores one JSON document per key under a directory (the OS temp dir by default).
///
/// File names are the hex SHA-256 of the key, so any key is filename-safe. Expiry uses wall
/// clock time so entries survive process restarts.
#[derive(Clone, Debug)]
pub struct FileCache {
	dir: PathBuf,
}
impl FileCache {
	/// Uses `dir` as the cache directory; it is created on first save.
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	/// Uses `tpp-broker` under the OS temp directory.
	pub fn in_temp_dir() -> Self {
		Self::new(env::temp_dir().join("tpp-broker"))
	}

	/// Directory holding the cache files.
	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn entry_path(&self, key: &str) -> PathBuf {
		self.dir.join(format!("{}.json", hex::encode(Sha256::digest(key.as_bytes()))))
	}

	fn fetch_now(&self, key: &str) -> Option<String> {
		let path = self.entry_path(key);
		let bytes = match fs::read(&path) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == ErrorKind::NotFound => return None,
			Err(e) => {
				tracing::warn!(path = %path.display(), error = %e, "Failed to read cache entry.");

				return None;
			},
		};
		let entry = match serde_json::from_slice::<StoredEntry>(&bytes) {
			Ok(entry) => entry,
			Err(e) => {
				tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt cache entry.");

				return None;
			},
		};

		(entry.expires_at > OffsetDateTime::now_utc()).then_some(entry.value)
	}

	fn save_now(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
		if !ttl.is_positive() {
			return Ok(());
		}

		let expires_at =
			OffsetDateTime::now_utc().checked_add(ttl).ok_or_else(|| CacheError::Backend {
				message: format!("TTL of {}s exceeds the supported range", ttl.whole_seconds()),
			})?;
		let serialized = serde_json::to_vec(&StoredEntry { value: value.to_owned(), expires_at })
			.map_err(|e| CacheError::Serialization {
				message: format!("Failed to serialize cache entry: {e}"),
			})?;

		fs::create_dir_all(&self.dir).map_err(|e| CacheError::Backend {
			message: format!("Failed to create cache directory {}: {e}", self.dir.display()),
		})?;

		let path = self.entry_path(key);
		let suffix =
			rand::rng().sample_iter(&Alphanumeric).take(8).map(char::from).collect::<String>();
		let tmp_path = path.with_extension(format!("{suffix}.tmp"));

		{
			let mut file = File::create(&tmp_path).map_err(|e| CacheError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| CacheError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| CacheError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &path).map_err(|e| {
			let _ = fs::remove_file(&tmp_path);

			CacheError::Backend { message: format!("Failed to replace {}: {e}", path.display()) }
		})
	}

	fn remove_now(&self, key: &str) -> Result<(), CacheError> {
		let path = self.entry_path(key);

		match fs::remove_file(&path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(CacheError::Backend {
				message: format!("Failed to remove {}: {e}", path.display()),
			}),
		}
	}
}
impl Default for FileCache {
	fn default() -> Self {
		Self::in_temp_dir()
	}
}
impl TokenCache for FileCache {
	fn fetch<'a>(&'a self, key: &'a str) -> CacheLookup<'a> {
		Box::pin(async move { self.fetch_now(key) })
	}

	fn save<'a>(&'a self, key: &'a str, value: &'a str, ttl: Duration) -> CacheFuture<'a, ()> {
		Box::pin(async move { self.save_now(key, value, ttl) })
	}

	fn remove<'a>(&'a self, key: &'a str) -> CacheFuture<'a, ()> {
		Box::pin(async move { self.remove_now(key) })
	}
}
