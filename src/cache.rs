//! Key/value credential caches with per-entry expiry.
//!
//! Readers never observe an expired entry: both backends treat it as absent. Saves replace
//! the whole entry at once, so a concurrent reader sees either the previous value or the new
//! one.

pub mod file;
pub mod memory;

pub use file::FileCache;
pub use memory::MemoryCache;

// self
use crate::_prelude::*;

/// Boxed future returned by fallible [`TokenCache`] operations.
pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CacheError>> + 'a + Send>>;
/// Boxed future returned by [`TokenCache::fetch`], which cannot fail.
pub type CacheLookup<'a> = Pin<Box<dyn Future<Output = Option<String>> + 'a + Send>>;

/// Storage contract for credential caches.
///
/// Implementations may share storage across processes; last writer wins.
pub trait TokenCache
where
	Self: Send + Sync,
{
	/// Returns the live value stored under `key`, if any.
	fn fetch<'a>(&'a self, key: &'a str) -> CacheLookup<'a>;

	/// Stores `value` under `key` for `ttl`. A non-positive `ttl` stores nothing.
	fn save<'a>(&'a self, key: &'a str, value: &'a str, ttl: Duration) -> CacheFuture<'a, ()>;

	/// Evicts the entry stored under `key`.
	fn remove<'a>(&'a self, key: &'a str) -> CacheFuture<'a, ()>;
}

/// Error type produced by [`TokenCache`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum CacheError {
	/// Entry could not be encoded or decoded.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Builds the cache key `<prefix>:<identity>`.
pub fn cache_key(prefix: &str, identity: &str) -> String {
	format!("{prefix}:{identity}")
}
