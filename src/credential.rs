//! Access credential manager: per-identity guarded fetch-or-refresh over a [`TokenCache`].
//!
//! [`CredentialManager::get`] serializes lookups for one cache key behind an async guard,
//! answers from the cache when a live entry exists, and otherwise invokes the tenant's
//! [`RefreshSource`]. Refresh bodies are decoded leniently: the token is the first non-empty
//! field of the kind's field list and the TTL the first positive one, looked up at the top
//! level and then inside `data`.

mod metrics;

pub use metrics::RefreshMetrics;

// std
use std::sync::OnceLock;
// self
use crate::{
	_prelude::*,
	cache::{TokenCache, cache_key},
	error::TransientError,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

/// Boxed future returned by [`RefreshSource::refresh`].
pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = Vec<u8>> + 'a + Send>>;

/// Produces the raw body of a credential refresh call.
///
/// Sources never fail: a transport failure yields an empty body, which the manager reports
/// as a missing credential.
pub trait RefreshSource
where
	Self: Send + Sync,
{
	/// Performs one refresh call and returns the response body.
	fn refresh(&self) -> RefreshFuture<'_>;
}
impl<F, Fut> RefreshSource for F
where
	F: Send + Sync + Fn() -> Fut,
	Fut: 'static + Send + Future<Output = Vec<u8>>,
{
	fn refresh(&self) -> RefreshFuture<'_> {
		Box::pin(self())
	}
}

/// Credential families cached by the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CredentialKind {
	/// Tenant/authorizer/component access token.
	AccessToken,
	/// JS-API (or card) ticket.
	Ticket,
	/// Lark app access token.
	AppAccessToken,
}
impl CredentialKind {
	/// Cache key prefix.
	pub const fn prefix(self) -> &'static str {
		match self {
			Self::AccessToken => "access_token",
			Self::Ticket => "ticket",
			Self::AppAccessToken => "app_access_token",
		}
	}

	/// Token fields in lookup order.
	pub const fn token_fields(self) -> &'static [&'static str] {
		match self {
			Self::AccessToken => &[
				"access_token",
				"component_access_token",
				"authorizer_access_token",
				"tenant_access_token",
				"accessToken",
			],
			Self::Ticket => &["ticket", "jsapiTicket"],
			Self::AppAccessToken => &["app_access_token"],
		}
	}

	/// TTL fields (seconds) in lookup order.
	pub const fn ttl_fields(self) -> &'static [&'static str] {
		match self {
			Self::AccessToken => &["expires_in", "expire", "expireIn"],
			Self::Ticket => &["expires_in", "expireIn", "expire_in"],
			Self::AppAccessToken => &["expire", "expires_in"],
		}
	}

	const fn flow(self) -> FlowKind {
		match self {
			Self::Ticket => FlowKind::Ticket,
			Self::AccessToken | Self::AppAccessToken => FlowKind::Refresh,
		}
	}
}

/// Extracts `(token, ttl)` from a refresh body; the TTL is zero when no positive TTL field
/// exists.
pub fn decode_credential(body: &[u8], kind: CredentialKind) -> Option<(String, Duration)> {
	let Ok(Value::Object(root)) = serde_json::from_slice::<Value>(body) else {
		return None;
	};
	let scopes = [Some(&root), root.get("data").and_then(Value::as_object)];
	let token = kind.token_fields().iter().find_map(|field| {
		scopes
			.iter()
			.flatten()
			.find_map(|scope| scope.get(*field)?.as_str().filter(|token| !token.is_empty()))
	})?;
	let ttl = kind
		.ttl_fields()
		.iter()
		.find_map(|field| {
			scopes.iter().flatten().find_map(|scope| positive_seconds(scope.get(*field)?))
		})
		.unwrap_or(0);

	Some((token.to_owned(), Duration::seconds(ttl)))
}

fn positive_seconds(value: &Value) -> Option<i64> {
	let seconds = match value {
		Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
		Value::String(s) => s.trim().parse().ok(),
		_ => None,
	}?;

	(seconds > 0).then_some(seconds)
}

/// Async guards keyed by cache key, inserted under a short synchronous lock.
#[derive(Debug, Default)]
pub struct GuardRegistry(Mutex<HashMap<String, Arc<AsyncMutex<()>>>>);
impl GuardRegistry {
	/// Process-wide registry used when no explicit registry is supplied.
	pub fn shared() -> Arc<Self> {
		static SHARED: OnceLock<Arc<GuardRegistry>> = OnceLock::new();

		SHARED.get_or_init(Default::default).clone()
	}

	/// Guard serializing refreshes for `key`.
	///
	/// Inserting a new key prunes guards nobody holds, so rotated identities do not pile up.
	pub fn guard(&self, key: &str) -> Arc<AsyncMutex<()>> {
		let mut guards = self.0.lock();

		if let Some(guard) = guards.get(key) {
			return guard.clone();
		}

		guards.retain(|_, guard| Arc::strong_count(guard) > 1);

		guards.entry(key.to_owned()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}

	/// Number of keys whose guard is tracked.
	pub fn len(&self) -> usize {
		self.0.lock().len()
	}

	/// Returns `true` before the first guard is handed out.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Fetch-or-refresh coordinator for one identity and credential kind.
#[derive(Clone)]
pub struct CredentialManager {
	identity: String,
	label: Option<String>,
	kind: CredentialKind,
	cache: Arc<dyn TokenCache>,
	source: Arc<dyn RefreshSource>,
	guards: Arc<GuardRegistry>,
	safety_margin: Duration,
	metrics: Arc<RefreshMetrics>,
}
impl CredentialManager {
	/// Default margin subtracted from vendor TTLs before caching.
	pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::seconds(60);

	/// Creates a manager for `identity` (tenant id followed by its secret).
	pub fn new(
		identity: impl Into<String>,
		kind: CredentialKind,
		cache: Arc<dyn TokenCache>,
		source: Arc<dyn RefreshSource>,
	) -> Self {
		Self {
			identity: identity.into(),
			label: None,
			kind,
			cache,
			source,
			guards: GuardRegistry::shared(),
			safety_margin: Self::DEFAULT_SAFETY_MARGIN,
			metrics: Default::default(),
		}
	}

	/// Non-secret name used in logs (the identity embeds the secret and is never logged).
	pub fn with_label(mut self, label: impl Into<String>) -> Self {
		self.label = Some(label.into());

		self
	}

	/// Uses `guards` instead of the process-wide registry.
	pub fn with_guards(mut self, guards: Arc<GuardRegistry>) -> Self {
		self.guards = guards;

		self
	}

	/// Overrides the safety margin; negative values clamp to zero.
	pub fn with_safety_margin(mut self, margin: Duration) -> Self {
		self.safety_margin = if margin.is_negative() { Duration::ZERO } else { margin };

		self
	}

	/// Shares `metrics` with other managers.
	pub fn with_metrics(mut self, metrics: Arc<RefreshMetrics>) -> Self {
		self.metrics = metrics;

		self
	}

	/// Credential kind managed here.
	pub fn kind(&self) -> CredentialKind {
		self.kind
	}

	/// Cache key `<prefix>:<identity>`.
	pub fn key(&self) -> String {
		cache_key(self.kind.prefix(), &self.identity)
	}

	/// Lookup counters.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.metrics
	}

	/// Returns a live credential, refreshing it when the cache has none.
	pub async fn get(&self) -> Result<String> {
		let flow = self.kind.flow();
		let span =
			FlowSpan::new(flow, "CredentialManager::get").with_tenant(self.label.as_deref());

		obs::record_flow_outcome(flow, FlowOutcome::Attempt);

		let result = span.instrument(self.fetch_or_refresh()).await;

		obs::observe(flow, result)
	}

	/// Evicts the cached credential so the next [`CredentialManager::get`] refreshes.
	pub async fn invalidate(&self) -> Result<()> {
		let key = self.key();
		let guard = self.guards.guard(&key);
		let _singleflight = guard.lock().await;

		self.cache.remove(&key).await?;

		Ok(())
	}

	async fn fetch_or_refresh(&self) -> Result<String> {
		self.metrics.record_attempt();

		let key = self.key();
		let guard = self.guards.guard(&key);
		let _singleflight = guard.lock().await;

		if let Some(token) = self.cache.fetch(&key).await {
			self.metrics.record_cache_hit();

			return Ok(token);
		}

		self.metrics.record_refresh();

		let body = self.source.refresh().await;
		let Some((token, ttl)) = decode_credential(&body, self.kind) else {
			self.metrics.record_failure();
			tracing::warn!(
				tenant = self.label.as_deref().unwrap_or("-"),
				kind = self.kind.prefix(),
				body_len = body.len(),
				"Refresh response carried no recognized credential."
			);

			return Err(TransientError::MissingCredential { kind: self.kind.prefix() }.into());
		};

		if ttl.is_positive() {
			self.cache.save(&key, &token, self.cache_ttl(ttl)).await.inspect_err(|_| {
				self.metrics.record_failure();
			})?;
		}

		Ok(token)
	}

	fn cache_ttl(&self, ttl: Duration) -> Duration {
		if ttl > self.safety_margin * 2 { ttl - self.safety_margin } else { ttl }
	}
}
impl Debug for CredentialManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialManager")
			.field("label", &self.label)
			.field("kind", &self.kind)
			.field("safety_margin", &self.safety_margin)
			.finish_non_exhaustive()
	}
}
