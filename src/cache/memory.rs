//! Process-local [`TokenCache`] keyed on the monotonic clock.

// std
use std::time::{Duration as StdDuration, Instant};
// self
use crate::{
	_prelude::*,
	cache::{CacheError, CacheFuture, CacheLookup, TokenCache},
};

type CacheMap = Arc<RwLock<HashMap<String, Entry>>>;

#[derive(Clone, Debug)]
struct Entry {
	value: String,
	expires_at: Instant,
}
impl Entry {
	fn is_live_at(&self, now: Instant) -> bool {
		self.expires_at > now
	}
}

/// Thread-safe in-memory cache; entries expire against [`Instant`], so wall-clock jumps never
/// resurrect or prematurely evict them.
#[derive(Clone, Debug, Default)]
pub struct MemoryCache(CacheMap);
impl MemoryCache {
	/// Remaining lifetime of the entry stored under `key`, if it is still live.
	pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
		let now = Instant::now();
		let map = self.0.read();
		let entry = map.get(key).filter(|entry| entry.is_live_at(now))?;

		Duration::try_from(entry.expires_at.saturating_duration_since(now)).ok()
	}

	/// Number of live entries.
	pub fn len(&self) -> usize {
		let now = Instant::now();

		self.0.read().values().filter(|entry| entry.is_live_at(now)).count()
	}

	/// Returns `true` when no live entry exists.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn fetch_now(map: &CacheMap, key: &str) -> Option<String> {
		let now = Instant::now();

		map.read().get(key).filter(|entry| entry.is_live_at(now)).map(|entry| entry.value.clone())
	}

	fn save_now(map: &CacheMap, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
		let Ok(ttl) = StdDuration::try_from(ttl) else {
			return Ok(());
		};

		if ttl.is_zero() {
			return Ok(());
		}

		let now = Instant::now();
		let expires_at = now.checked_add(ttl).ok_or_else(|| CacheError::Backend {
			message: format!("TTL of {}s exceeds the supported range", ttl.as_secs()),
		})?;
		let mut guard = map.write();

		guard.retain(|_, entry| entry.is_live_at(now));
		guard.insert(key.to_owned(), Entry { value: value.to_owned(), expires_at });

		Ok(())
	}
}
impl TokenCache for MemoryCache {
	fn fetch<'a>(&'a self, key: &'a str) -> CacheLookup<'a> {
		Box::pin(async move { Self::fetch_now(&self.0, key) })
	}

	fn save<'a>(&'a self, key: &'a str, value: &'a str, ttl: Duration) -> CacheFuture<'a, ()> {
		Box::pin(async move { Self::save_now(&self.0, key, value, ttl) })
	}

	fn remove<'a>(&'a self, key: &'a str) -> CacheFuture<'a, ()> {
		Box::pin(async move {
			self.0.write().remove(key);

			Ok(())
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn save_then_fetch_returns_value() {
		let cache = MemoryCache::default();

		cache
			.save("access_token:AS", "TOK", Duration::seconds(7_200))
			.await
			.expect("Saving into the memory cache should succeed.");

		assert_eq!(cache.fetch("access_token:AS").await.as_deref(), Some("TOK"));
		assert!(cache.fetch("access_token:other").await.is_none());

		let remaining = cache.remaining_ttl("access_token:AS").expect("Entry should be live.");

		assert!(remaining > Duration::seconds(7_190) && remaining <= Duration::seconds(7_200));
	}

	#[tokio::test]
	async fn non_positive_ttl_stores_nothing() {
		let cache = MemoryCache::default();

		cache.save("k", "zero", Duration::ZERO).await.expect("Zero TTL save should be a no-op.");
		cache
			.save("k", "negative", Duration::seconds(-5))
			.await
			.expect("Negative TTL save should be a no-op.");

		assert!(cache.fetch("k").await.is_none());
		assert!(cache.is_empty());
	}

	#[tokio::test]
	async fn expired_entries_are_absent() {
		let cache = MemoryCache::default();

		cache
			.save("ticket:AS", "T", Duration::milliseconds(20))
			.await
			.expect("Short-lived save should succeed.");
		std::thread::sleep(StdDuration::from_millis(40));

		assert!(cache.fetch("ticket:AS").await.is_none());
		assert!(cache.remaining_ttl("ticket:AS").is_none());
	}

	#[tokio::test]
	async fn remove_evicts_and_overwrite_replaces() {
		let cache = MemoryCache::default();

		cache.save("k", "v1", Duration::minutes(1)).await.expect("First save should succeed.");
		cache.save("k", "v2", Duration::minutes(1)).await.expect("Overwrite should succeed.");

		assert_eq!(cache.fetch("k").await.as_deref(), Some("v2"));

		cache.remove("k").await.expect("Remove should succeed.");

		assert!(cache.fetch("k").await.is_none());
	}
}
