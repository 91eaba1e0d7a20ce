//! Multi-tenant credential broker for third-party platform APIs: cached self-refreshing tokens,
//! request envelopes, throttle-aware traversal, and callback crypto in one crate.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod cache;
pub mod credential;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod http;
pub mod obs;
pub mod traverse;
pub mod vendor;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use crate::{
		cache::{MemoryCache, TokenCache},
		credential::{GuardRegistry, RefreshFuture, RefreshSource},
		http::HttpClient,
		vendor::ClientOptions,
	};

	/// Refresh source that replays scripted bodies and counts invocations.
	///
	/// Once the script is exhausted every further call yields an empty body, which is how a
	/// failed transport looks to the credential manager.
	#[derive(Debug, Default)]
	pub struct ScriptedRefresh {
		bodies: Mutex<Vec<Vec<u8>>>,
		calls: AtomicUsize,
	}
	impl ScriptedRefresh {
		/// Creates a source that returns `bodies` in order.
		pub fn new<I, B>(bodies: I) -> Self
		where
			I: IntoIterator<Item = B>,
			B: Into<Vec<u8>>,
		{
			let mut bodies = bodies.into_iter().map(Into::into).collect::<Vec<_>>();

			bodies.reverse();

			Self { bodies: Mutex::new(bodies), calls: AtomicUsize::new(0) }
		}

		/// Number of times the source has been invoked.
		pub fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}
	}
	impl RefreshSource for ScriptedRefresh {
		fn refresh(&self) -> RefreshFuture<'_> {
			self.calls.fetch_add(1, Ordering::SeqCst);

			let body = self.bodies.lock().pop().unwrap_or_default();

			Box::pin(async move { body })
		}
	}

	/// Builds client options backed by an isolated in-memory cache, a private guard registry,
	/// and both vendor hosts pointed at `base_url` (typically an `httpmock` server).
	pub fn mock_client_options(base_url: &str) -> (ClientOptions, Arc<MemoryCache>) {
		let cache = Arc::new(MemoryCache::default());
		let shared: Arc<dyn TokenCache> = cache.clone();
		let base = Url::parse(base_url).expect("Mock server base URL should parse.");
		let http = HttpClient::new().expect("Default HTTP client should build for tests.");
		let options = ClientOptions::default()
			.with_cache(shared)
			.with_http_client(http)
			.with_guards(Arc::new(GuardRegistry::default()))
			.with_base_url(base.clone())
			.with_secondary_base_url(base);

		(options, cache)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use serde_json::{Map as JsonMap, Value};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
