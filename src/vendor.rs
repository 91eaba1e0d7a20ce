//! Per-vendor tenant clients.
//!
//! Every facade is built from a serde configuration record carrying the vendor's wire field
//! names plus a shared [`ClientOptions`]. Facades own one [`CredentialManager`] per credential
//! kind and route every call through a [`Dispatcher`], which joins endpoint paths onto the
//! configured base URL, attaches the credential, and decodes the vendor reply.

pub mod dingtalk;
pub mod lark;
pub mod mini_program;
pub mod official_account;
pub mod open_platform;
pub mod wecard;
pub mod work_wechat;

mod wechat;

pub use dingtalk::*;
pub use lark::*;
pub use mini_program::*;
pub use official_account::*;
pub use open_platform::*;
pub use wecard::*;
pub use work_wechat::*;

// crates.io
use reqwest::{Method, RequestBuilder};
// self
use crate::{
	_prelude::*,
	auth::TenantConfig,
	cache::{FileCache, TokenCache},
	credential::{
		CredentialKind, CredentialManager, GuardRegistry, RefreshFuture, RefreshSource,
	},
	envelope::CredentialPlacement,
	error::{ConfigError, TransportError},
	http::{HttpClient, HttpRefresh, Record, ThrottleRule, fetch_body},
	traverse::TraversalPolicy,
};

/// Boxed future returned by [`TenantClient::token`].
pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + 'a + Send>>;

/// Surface shared by every vendor facade.
pub trait TenantClient
where
	Self: Send + Sync,
{
	/// Vendor-issued tenant identifier.
	fn id(&self) -> &str;

	/// Live access credential, refreshed on demand.
	fn token(&self) -> TokenFuture<'_>;
}

/// Shared construction inputs for vendor facades.
#[derive(Clone)]
pub struct ClientOptions {
	cache: Arc<dyn TokenCache>,
	http: HttpClient,
	guards: Arc<GuardRegistry>,
	base_url: Option<Url>,
	secondary_base_url: Option<Url>,
	policy: TraversalPolicy,
	safety_margin: Duration,
}
impl ClientOptions {
	/// Uses `cache` for every credential.
	pub fn with_cache(mut self, cache: Arc<dyn TokenCache>) -> Self {
		self.cache = cache;

		self
	}

	/// Uses `http` for every outbound call.
	pub fn with_http_client(mut self, http: HttpClient) -> Self {
		self.http = http;

		self
	}

	/// Uses `guards` instead of the process-wide registry.
	pub fn with_guards(mut self, guards: Arc<GuardRegistry>) -> Self {
		self.guards = guards;

		self
	}

	/// Overrides the vendor's primary API host. A path on `url` (a proxy prefix) is kept in
	/// front of every endpoint path.
	pub fn with_base_url(mut self, url: Url) -> Self {
		self.base_url = Some(url);

		self
	}

	/// Overrides the vendor's secondary API host (DingTalk's `api.dingtalk.com`).
	pub fn with_secondary_base_url(mut self, url: Url) -> Self {
		self.secondary_base_url = Some(url);

		self
	}

	/// Overrides retry and paging limits.
	pub fn with_policy(mut self, policy: TraversalPolicy) -> Self {
		self.policy = policy;

		self
	}

	/// Overrides the margin subtracted from vendor TTLs.
	pub fn with_safety_margin(mut self, margin: Duration) -> Self {
		self.safety_margin = margin;

		self
	}

	/// Credential cache.
	pub fn cache(&self) -> &Arc<dyn TokenCache> {
		&self.cache
	}

	/// HTTP client.
	pub fn http(&self) -> &HttpClient {
		&self.http
	}

	/// Traversal limits.
	pub fn policy(&self) -> &TraversalPolicy {
		&self.policy
	}

	pub(crate) fn manager(
		&self,
		tenant: &TenantConfig,
		kind: CredentialKind,
		source: Arc<dyn RefreshSource>,
	) -> CredentialManager {
		self.manager_for(tenant.identity(), tenant, kind, source)
	}

	pub(crate) fn manager_for(
		&self,
		identity: String,
		tenant: &TenantConfig,
		kind: CredentialKind,
		source: Arc<dyn RefreshSource>,
	) -> CredentialManager {
		CredentialManager::new(identity, kind, self.cache.clone(), source)
			.with_label(tenant.id.as_str())
			.with_guards(self.guards.clone())
			.with_safety_margin(self.safety_margin)
	}

	pub(crate) fn dispatcher(&self, default_base: &str) -> Result<Dispatcher, ConfigError> {
		Ok(Dispatcher::new(self.http.clone(), resolve(self.base_url.as_ref(), default_base)?))
	}

	pub(crate) fn secondary_dispatcher(
		&self,
		default_base: &str,
	) -> Result<Dispatcher, ConfigError> {
		Ok(Dispatcher::new(
			self.http.clone(),
			resolve(self.secondary_base_url.as_ref(), default_base)?,
		))
	}
}
impl Default for ClientOptions {
	fn default() -> Self {
		Self {
			cache: Arc::new(FileCache::in_temp_dir()),
			http: HttpClient::default(),
			guards: GuardRegistry::shared(),
			base_url: None,
			secondary_base_url: None,
			policy: TraversalPolicy::default(),
			safety_margin: CredentialManager::DEFAULT_SAFETY_MARGIN,
		}
	}
}
impl Debug for ClientOptions {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ClientOptions")
			.field("base_url", &self.base_url.as_ref().map(Url::as_str))
			.field("secondary_base_url", &self.secondary_base_url.as_ref().map(Url::as_str))
			.field("policy", &self.policy)
			.field("safety_margin", &self.safety_margin)
			.finish_non_exhaustive()
	}
}

fn resolve(configured: Option<&Url>, default_base: &str) -> Result<Url, ConfigError> {
	match configured {
		Some(url) => Ok(url.clone()),
		None => Url::parse(default_base)
			.map_err(|source| ConfigError::InvalidEndpoint { path: default_base.into(), source }),
	}
}

/// Builds, authorizes, and decodes calls against one vendor host.
#[derive(Clone, Debug)]
pub(crate) struct Dispatcher {
	http: HttpClient,
	base: Url,
	placement: CredentialPlacement,
	throttle: Option<ThrottleRule>,
}
impl Dispatcher {
	fn new(http: HttpClient, mut base: Url) -> Self {
		// Endpoint paths join below the base path, which therefore needs a trailing slash.
		if !base.path().ends_with('/') {
			let path = format!("{}/", base.path());

			base.set_path(&path);
		}

		Self { http, base, placement: CredentialPlacement::default(), throttle: None }
	}

	pub(crate) fn with_placement(mut self, placement: CredentialPlacement) -> Self {
		self.placement = placement;

		self
	}

	pub(crate) fn with_throttle(mut self, rule: ThrottleRule) -> Self {
		self.throttle = Some(rule);

		self
	}

	pub(crate) fn url(&self, path: &str) -> Result<Url, ConfigError> {
		self.base
			.join(path.trim_start_matches('/'))
			.map_err(|source| ConfigError::InvalidEndpoint { path: path.into(), source })
	}

	pub(crate) fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
		Ok(self.http.inner().request(method, self.url(path)?))
	}

	/// Request carrying the credential from `access` in this host's placement.
	pub(crate) async fn authorized(
		&self,
		access: &CredentialManager,
		method: Method,
		path: &str,
	) -> Result<RequestBuilder> {
		let request = self.request(method, path)?;
		let token = access.get().await?;

		Ok(self.placement.apply(request, &token))
	}

	pub(crate) async fn json(&self, request: RequestBuilder) -> Result<Record> {
		self.http.send_json(request, self.throttle.as_ref()).await
	}

	/// Parses the reply without rejecting a non-zero status, for endpoints whose error
	/// replies still carry usable data.
	pub(crate) async fn record(&self, request: RequestBuilder) -> Result<Record> {
		let (status, body) = self.http.send(request).await?;

		match Record::parse(&body) {
			Ok(record) => Ok(record),
			Err(_) if !(200..300).contains(&status) =>
				Err(TransportError::Status { status }.into()),
			Err(e) => Err(e.into()),
		}
	}

	pub(crate) async fn bytes(&self, request: RequestBuilder) -> Result<Vec<u8>> {
		self.http.send_bytes(request).await
	}

	pub(crate) async fn get(
		&self,
		access: &CredentialManager,
		path: &str,
		query: &[(&str, &str)],
	) -> Result<Record> {
		let request = self.authorized(access, Method::GET, path).await?.query(query);

		self.json(request).await
	}

	pub(crate) async fn post<B>(
		&self,
		access: &CredentialManager,
		path: &str,
		body: &B,
	) -> Result<Record>
	where
		B: ?Sized + Serialize,
	{
		let request = self.authorized(access, Method::POST, path).await?.json(body);

		self.json(request).await
	}

	/// Unauthenticated call, used by refresh and code-exchange endpoints.
	pub(crate) async fn anonymous<F>(
		&self,
		method: Method,
		path: &str,
		decorate: F,
	) -> Result<Record>
	where
		F: FnOnce(RequestBuilder) -> RequestBuilder,
	{
		let request = decorate(self.request(method, path)?);

		self.json(request).await
	}

	/// Refresh source sending `decorate(METHOD path)` on every refresh.
	pub(crate) fn refresh<F>(
		&self,
		method: Method,
		path: &str,
		decorate: F,
	) -> Result<Arc<dyn RefreshSource>, ConfigError>
	where
		F: 'static + Send + Sync + Fn(RequestBuilder) -> RequestBuilder,
	{
		let client = self.http.inner().clone();
		let url = self.url(path)?;

		Ok(Arc::new(HttpRefresh::new(move || {
			decorate(client.request(method.clone(), url.clone()))
		})))
	}

	/// Refresh source that first obtains a credential from `access` and attaches it with
	/// `placement`.
	pub(crate) fn scoped_refresh<F>(
		&self,
		access: CredentialManager,
		placement: CredentialPlacement,
		method: Method,
		path: &str,
		decorate: F,
	) -> Result<Arc<dyn RefreshSource>, ConfigError>
	where
		F: 'static + Send + Sync + Fn(RequestBuilder) -> RequestBuilder,
	{
		let client = self.http.inner().clone();
		let url = self.url(path)?;

		Ok(Arc::new(ScopedRefresh {
			access,
			placement,
			build: move || decorate(client.request(method.clone(), url.clone())),
		}))
	}

	/// Decodes an already-received body with this host's throttle rule.
	#[cfg(test)]
	fn decode(&self, body: &[u8]) -> Result<Record> {
		crate::http::decode_reply(body, self.throttle.as_ref())
	}
}

struct ScopedRefresh<F> {
	access: CredentialManager,
	placement: CredentialPlacement,
	build: F,
}
impl<F> RefreshSource for ScopedRefresh<F>
where
	F: Send + Sync + Fn() -> RequestBuilder,
{
	fn refresh(&self) -> RefreshFuture<'_> {
		Box::pin(async move {
			match self.access.get().await {
				Ok(token) => fetch_body(self.placement.apply((self.build)(), &token)).await,
				Err(e) => {
					tracing::warn!(
						kind = self.access.kind().prefix(),
						error = %e,
						"Scoped refresh could not obtain its access credential."
					);

					Vec::new()
				},
			}
		})
	}
}

/// Maps a vendor "no privilege" reply to `None`.
pub(crate) fn unless_denied<T>(code: i64, result: Result<T>) -> Result<Option<T>> {
	match result {
		Ok(value) => Ok(Some(value)),
		Err(Error::Vendor { code: denied, .. }) if denied == code => Ok(None),
		Err(e) => Err(e),
	}
}

/// Rejects replies that carry a non-zero status, except `allowed`.
pub(crate) fn status_allowing(record: Record, allowed: i64) -> Result<Record> {
	match record.vendor_status() {
		None => Ok(record),
		Some((code, _)) if code == allowed => Ok(record),
		Some((code, message)) => Err(Error::Vendor { code, message }),
	}
}
