//! Transport primitives shared by every vendor facade.
//!
//! [`HttpClient`] wraps a pooled reqwest client with the broker's timeouts. Vendor replies
//! are decoded through [`decode_reply`], which understands both the `errcode`/`errmsg` and
//! the `code`/`msg` status conventions and classifies throttling via [`ThrottleRule`].
//! Successful replies are exposed as [`Record`]s: typed accessors over a JSON object.

// std
use std::time::Duration as StdDuration;
// crates.io
use reqwest::RequestBuilder;
// self
use crate::{
	_prelude::*,
	credential::{RefreshFuture, RefreshSource},
	error::{ConfigError, DecodeError, TransportError},
};

/// Pooled reqwest client carrying the broker's timeouts.
#[derive(Clone, Debug)]
pub struct HttpClient(ReqwestClient);
impl HttpClient {
	/// Total per-request timeout.
	pub const TIMEOUT: StdDuration = StdDuration::from_secs(30);
	/// TCP/TLS connect timeout.
	pub const CONNECT_TIMEOUT: StdDuration = StdDuration::from_secs(10);
	/// Idle connections kept per host.
	pub const MAX_IDLE_PER_HOST: usize = 10;
	/// Idle connection lifetime.
	pub const IDLE_TIMEOUT: StdDuration = StdDuration::from_secs(90);

	/// Builds a client with the broker's pool and timeout settings.
	pub fn new() -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder()
			.timeout(Self::TIMEOUT)
			.connect_timeout(Self::CONNECT_TIMEOUT)
			.pool_max_idle_per_host(Self::MAX_IDLE_PER_HOST)
			.pool_idle_timeout(Self::IDLE_TIMEOUT)
			.build()?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Underlying reqwest client.
	pub fn inner(&self) -> &ReqwestClient {
		&self.0
	}

	/// Sends `request` and returns the status code with the full body.
	pub async fn send(&self, request: RequestBuilder) -> Result<(u16, Vec<u8>), TransportError> {
		let response = request.send().await?;
		let status = response.status().as_u16();
		let body = response.bytes().await?;

		Ok((status, body.to_vec()))
	}

	/// Sends `request` and decodes the vendor reply.
	pub async fn send_json(
		&self,
		request: RequestBuilder,
		throttle: Option<&ThrottleRule>,
	) -> Result<Record> {
		let (status, body) = self.send(request).await?;

		match decode_reply(&body, throttle) {
			Err(Error::Decode(_)) if !is_success(status) =>
				Err(TransportError::Status { status }.into()),
			result => result,
		}
	}

	/// Sends `request` expecting a binary body (images); a JSON body is treated as a vendor
	/// error reply.
	pub async fn send_bytes(&self, request: RequestBuilder) -> Result<Vec<u8>> {
		let (status, body) = self.send(request).await?;

		if body.first() == Some(&b'{') {
			decode_reply(&body, None)?;

			return Err(Error::Vendor {
				code: -1,
				message: "Expected a binary body but received JSON".into(),
			});
		}
		if !is_success(status) {
			return Err(TransportError::Status { status }.into());
		}

		Ok(body)
	}
}
impl Default for HttpClient {
	fn default() -> Self {
		Self::new().unwrap_or_else(|e| {
			tracing::warn!(error = %e, "Falling back to a default HTTP client.");

			Self(ReqwestClient::default())
		})
	}
}

fn is_success(status: u16) -> bool {
	(200..300).contains(&status)
}

/// Sends a refresh request, collapsing any transport failure into an empty body.
pub async fn fetch_body(request: RequestBuilder) -> Vec<u8> {
	let response = match request.send().await {
		Ok(response) => response,
		Err(e) => {
			tracing::warn!(error = %e, "Refresh request failed.");

			return Vec::new();
		},
	};

	match response.bytes().await {
		Ok(body) => body.to_vec(),
		Err(e) => {
			tracing::warn!(error = %e, "Refresh response body could not be read.");

			Vec::new()
		},
	}
}

/// [`RefreshSource`] that rebuilds and sends one HTTP request per refresh.
pub struct HttpRefresh<F>(F);
impl<F> HttpRefresh<F>
where
	F: Send + Sync + Fn() -> RequestBuilder,
{
	/// Wraps a request builder factory.
	pub fn new(build: F) -> Self {
		Self(build)
	}
}
impl<F> RefreshSource for HttpRefresh<F>
where
	F: Send + Sync + Fn() -> RequestBuilder,
{
	fn refresh(&self) -> RefreshFuture<'_> {
		Box::pin(fetch_body((self.0)()))
	}
}
impl<F> Debug for HttpRefresh<F> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("HttpRefresh(..)")
	}
}

/// Vendor error code (and message fragment) that signals rate limiting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThrottleRule {
	/// Error code carried by throttled replies.
	pub code: i64,
	/// Fragment the error message must contain.
	pub needle: &'static str,
}
impl ThrottleRule {
	/// DingTalk: errcode 88 with `subcode=90018` in the message.
	pub const DINGTALK: Self = Self { code: 88, needle: "subcode=90018" };

	/// Returns `true` when `(code, message)` is a throttling reply.
	pub fn matches(&self, code: i64, message: &str) -> bool {
		code == self.code && message.contains(self.needle)
	}
}

/// Parses a vendor body and rejects non-zero `errcode`/`code` replies.
pub fn decode_reply(body: &[u8], throttle: Option<&ThrottleRule>) -> Result<Record> {
	let record = Record::parse(body)?;

	match record.vendor_status() {
		None => Ok(record),
		Some((code, message)) if throttle.is_some_and(|rule| rule.matches(code, &message)) =>
			Err(Error::Throttled { code, message }),
		Some((code, message)) => Err(Error::Vendor { code, message }),
	}
}

/// JSON object returned by a vendor endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(JsonMap<String, Value>);
impl Record {
	/// Wraps an existing JSON object.
	pub fn new(map: JsonMap<String, Value>) -> Self {
		Self(map)
	}

	/// Parses a body that must be a JSON object.
	pub fn parse(body: &[u8]) -> Result<Self, DecodeError> {
		let mut deserializer = serde_json::Deserializer::from_slice(body);
		let value: Value = serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|source| DecodeError::Json { source })?;

		Self::try_from(value)
	}

	/// Raw value under `key`.
	pub fn get(&self, key: &str) -> Option<&Value> {
		self.0.get(key)
	}

	/// Value at a dotted path such as `data.tenant`.
	pub fn path(&self, path: &str) -> Option<&Value> {
		let mut segments = path.split('.');
		let first = self.0.get(segments.next()?)?;

		segments.try_fold(first, |value, segment| value.get(segment))
	}

	/// String value under `key`.
	pub fn str(&self, key: &str) -> Option<&str> {
		self.path(key)?.as_str()
	}

	/// Integer value under `key`; numeric strings are accepted.
	pub fn i64(&self, key: &str) -> Option<i64> {
		match self.path(key)? {
			Value::Number(n) => n.as_i64(),
			Value::String(s) => s.trim().parse().ok(),
			_ => None,
		}
	}

	/// Boolean value under `key`.
	pub fn bool(&self, key: &str) -> Option<bool> {
		self.path(key)?.as_bool()
	}

	/// Array value under `key`.
	pub fn array(&self, key: &str) -> Option<&[Value]> {
		self.path(key)?.as_array().map(Vec::as_slice)
	}

	/// Object under `key` as its own record.
	pub fn record(&self, key: &str) -> Option<Record> {
		self.path(key)?.as_object().cloned().map(Self)
	}

	/// Object under `key`, or [`DecodeError::MissingField`].
	pub fn require_record(&self, key: &str) -> Result<Record, DecodeError> {
		self.record(key).ok_or_else(|| DecodeError::missing(key))
	}

	/// String under `key`, or [`DecodeError::MissingField`].
	pub fn require_str(&self, key: &str) -> Result<String, DecodeError> {
		self.str(key).map(ToOwned::to_owned).ok_or_else(|| DecodeError::missing(key))
	}

	/// Array under `key` (a missing or null array is empty).
	pub fn items(&self, key: &str) -> Vec<Value> {
		self.array(key).map(<[Value]>::to_vec).unwrap_or_default()
	}

	/// Removes a top-level key.
	pub fn remove(&mut self, key: &str) -> Option<Value> {
		self.0.remove(key)
	}

	/// Drops the `errcode`/`errmsg` status envelope.
	pub fn without_status(mut self) -> Self {
		self.0.remove("errcode");
		self.0.remove("errmsg");

		self
	}

	/// Returns `true` when `key` is present.
	pub fn contains(&self, key: &str) -> bool {
		self.0.contains_key(key)
	}

	/// Borrows the underlying map.
	pub fn as_map(&self) -> &JsonMap<String, Value> {
		&self.0
	}

	/// Consumes the record.
	pub fn into_inner(self) -> JsonMap<String, Value> {
		self.0
	}

	/// Non-zero status carried by either convention, with its message.
	pub fn vendor_status(&self) -> Option<(i64, String)> {
		let (code, message) = ["errcode", "code"].into_iter().find_map(|field| {
			let message = match field {
				"errcode" => self.str("errmsg"),
				_ => self.str("msg").or_else(|| self.str("message")),
			};

			Some((self.get(field)?, message))
		})?;
		let message = message.unwrap_or_default().to_owned();

		match code {
			Value::Number(n) => match n.as_i64() {
				Some(0) => None,
				Some(code) => Some((code, message)),
				None => Some((-1, message)),
			},
			Value::String(s) => match s.trim().parse::<i64>() {
				Ok(0) => None,
				Ok(code) => Some((code, message)),
				Err(_) if s.is_empty() => None,
				Err(_) => Some((-1, format!("{s}: {message}"))),
			},
			_ => None,
		}
	}
}
impl TryFrom<Value> for Record {
	type Error = DecodeError;

	fn try_from(value: Value) -> Result<Self, Self::Error> {
		match value {
			Value::Object(map) => Ok(Self(map)),
			_ => Err(DecodeError::NotAnObject),
		}
	}
}
impl From<Record> for Value {
	fn from(record: Record) -> Self {
		Value::Object(record.0)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn both_status_conventions_are_recognized() {
		assert!(decode_reply(br#"{"errcode":0,"errmsg":"ok","a":1}"#, None).is_ok());
		assert!(decode_reply(br#"{"code":0,"msg":"success","data":{}}"#, None).is_ok());
		assert!(decode_reply(br#"{"access_token":"T"}"#, None).is_ok());
		assert!(matches!(
			decode_reply(br#"{"errcode":60011,"errmsg":"no privilege"}"#, None),
			Err(Error::Vendor { code: 60011, message }) if message == "no privilege"
		));
		assert!(matches!(
			decode_reply(br#"{"code":99991663,"msg":"invalid token"}"#, None),
			Err(Error::Vendor { code: 99991663, .. })
		));
		assert!(matches!(
			decode_reply(br#"{"code":"InvalidAuthentication","message":"bad token"}"#, None),
			Err(Error::Vendor { code: -1, message })
				if message == "InvalidAuthentication: bad token"
		));
	}

	#[test]
	fn throttling_requires_code_and_fragment() {
		let rule = ThrottleRule::DINGTALK;

		assert!(matches!(
			decode_reply(br#"{"errcode":88,"errmsg":"busy, subcode=90018"}"#, Some(&rule)),
			Err(Error::Throttled { code: 88, .. })
		));
		assert!(matches!(
			decode_reply(br#"{"errcode":88,"errmsg":"other"}"#, Some(&rule)),
			Err(Error::Vendor { code: 88, .. })
		));
		assert!(matches!(
			decode_reply(br#"{"errcode":88,"errmsg":"busy, subcode=90018"}"#, None),
			Err(Error::Vendor { .. })
		));
	}

	#[test]
	fn malformed_bodies_are_decode_errors() {
		assert!(matches!(decode_reply(b"", None), Err(Error::Decode(DecodeError::Json { .. }))));
		assert!(matches!(
			decode_reply(b"[1,2]", None),
			Err(Error::Decode(DecodeError::NotAnObject))
		));
	}

	#[test]
	fn record_accessors_follow_dotted_paths() {
		let record = Record::parse(
			br#"{"errcode":0,"errmsg":"ok","data":{"has_more":true,"page_token":"p2","items":[1,2],"tenant":{"name":"T"}},"total":"12"}"#,
		)
		.expect("Fixture should parse.");

		assert_eq!(record.bool("data.has_more"), Some(true));
		assert_eq!(record.str("data.page_token"), Some("p2"));
		assert_eq!(record.items("data.items").len(), 2);
		assert!(record.items("data.missing").is_empty());
		assert_eq!(record.i64("total"), Some(12));
		assert_eq!(
			record.require_record("data.tenant").expect("Tenant should exist.").str("name"),
			Some("T")
		);
		assert!(matches!(
			record.require_str("data.nope"),
			Err(DecodeError::MissingField { field }) if field == "data.nope"
		));

		let stripped = record.without_status();

		assert!(!stripped.contains("errcode") && !stripped.contains("errmsg"));
	}
}
