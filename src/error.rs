//! Broker-level error types shared across caches, credential managers, and vendor facades.

// self
use crate::{_prelude::*, auth::IdentifierError, cache::CacheError, crypto::CryptoError};

/// Broker-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical broker error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Cache backend failure while persisting a credential.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		CacheError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS, timeouts).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Vendor response could not be decoded.
	#[error(transparent)]
	Decode(#[from] DecodeError),
	/// Callback verification or payload encryption failed.
	#[error(transparent)]
	Crypto(#[from] CryptoError),

	/// Vendor answered with a non-zero `errcode`/`code`.
	#[error("Vendor rejected the request with code {code}: {message}.")]
	Vendor {
		/// Vendor error code.
		code: i64,
		/// Vendor-supplied `errmsg`/`msg`.
		message: String,
	},
	/// Vendor rate-limited the request; traversal helpers retry these locally.
	#[error("Vendor throttled the request with code {code}: {message}.")]
	Throttled {
		/// Vendor error code.
		code: i64,
		/// Vendor-supplied `errmsg`/`msg`.
		message: String,
	},
	/// A traversal kept receiving continuations past its page cap.
	#[error("Traversal stopped after {pages} pages without reaching the end.")]
	TraversalLimit {
		/// Pages fetched before giving up.
		pages: usize,
	},
}
impl Error {
	/// Returns `true` when retrying the same call later may succeed.
	pub fn is_retriable(&self) -> bool {
		matches!(self, Self::Transient(_) | Self::Transport(_) | Self::Throttled { .. })
	}
}

/// Configuration and validation failures raised by the broker.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// A vendor endpoint could not be joined onto the configured base URL.
	#[error("Endpoint `{path}` is not a valid URL.")]
	InvalidEndpoint {
		/// Endpoint path relative to the vendor base URL.
		path: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Tenant identifier failed validation.
	#[error(transparent)]
	InvalidIdentifier(#[from] IdentifierError),
	/// Callback keys are malformed (for example, an AES key of the wrong length).
	#[error("Callback keys are invalid.")]
	InvalidCallbackKey {
		/// Crypto failure describing the rejected key.
		#[source]
		source: CryptoError,
	},
	/// Callback handling was requested but no keys were configured.
	#[error("Tenant has no callback keys configured.")]
	MissingCallbackKeys,
	/// Operation requires a delegated (component-authorized) tenant.
	#[error("Operation requires a component-delegated tenant.")]
	NotDelegated,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// The refresh source answered without any recognized credential field.
	#[error("Refresh response did not contain a recognized {kind}.")]
	MissingCredential {
		/// Credential kind label (`access_token`, `ticket`, `app_access_token`).
		kind: &'static str,
	},
}

/// Transport-level failures (network, IO, non-success HTTP status).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the vendor endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Vendor answered with a non-success HTTP status.
	#[error("Vendor endpoint answered with HTTP status {status}.")]
	Status {
		/// HTTP status code.
		status: u16,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the vendor endpoint.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
impl From<ReqwestError> for Error {
	fn from(e: ReqwestError) -> Self {
		Self::Transport(e.into())
	}
}

/// Vendor payloads that could not be interpreted.
#[derive(Debug, ThisError)]
pub enum DecodeError {
	/// Body is not valid JSON (or does not match the expected shape).
	#[error("Vendor returned malformed JSON.")]
	Json {
		/// Structured parsing failure with the offending path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// Body is valid JSON but not an object.
	#[error("Vendor returned a JSON value that is not an object.")]
	NotAnObject,
	/// An expected field is absent or has the wrong type.
	#[error("Vendor response is missing the `{field}` field.")]
	MissingField {
		/// Dotted path of the missing field.
		field: String,
	},
}
impl DecodeError {
	/// Builds a [`DecodeError::MissingField`] for the dotted `field` path.
	pub fn missing(field: impl Into<String>) -> Self {
		Self::MissingField { field: field.into() }
	}
}
