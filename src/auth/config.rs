//! Tenant configuration records shared by every vendor facade.

// self
use crate::{
	_prelude::*,
	auth::{ComponentId, TenantId, TokenSecret},
};

/// Secret prefix older deployments used to mark component-delegated tenants.
pub const LEGACY_DELEGATION_PREFIX: &str = "refreshtoken@@@";

/// Component credentials accompanying every delegated refresh.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentGrant {
	/// Component app id (`component_appid`).
	pub app_id: ComponentId,
	/// Component access token (`component_access_token`).
	pub access_token: TokenSecret,
}
impl ComponentGrant {
	/// Bundles a component app id with its current access token.
	pub fn new(app_id: ComponentId, access_token: impl Into<TokenSecret>) -> Self {
		Self { app_id, access_token: access_token.into() }
	}
}

/// How a tenant proves its identity to the vendor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TenantSecret {
	/// Ordinary app secret exchanged directly for an access token.
	Direct(TokenSecret),
	/// The tenant authorized a component, which refreshes on its behalf.
	Delegated {
		/// Authorizer refresh token issued when the tenant granted the component.
		refresh_token: TokenSecret,
		/// Component performing the refresh.
		component: ComponentGrant,
	},
}
impl TenantSecret {
	/// Wraps an ordinary app secret.
	pub fn direct(secret: impl Into<TokenSecret>) -> Self {
		Self::Direct(secret.into())
	}

	/// Builds a delegated secret.
	pub fn delegated(refresh_token: impl Into<TokenSecret>, component: ComponentGrant) -> Self {
		Self::Delegated { refresh_token: refresh_token.into(), component }
	}

	/// Interprets a secret string from a legacy configuration record.
	///
	/// Strings carrying [`LEGACY_DELEGATION_PREFIX`] become [`TenantSecret::Delegated`] when a
	/// component is available. The whole string, prefix included, is kept as the refresh token
	/// because that is what those deployments stored and sent upstream.
	pub fn from_legacy(secret: impl Into<String>, component: Option<ComponentGrant>) -> Self {
		let secret = secret.into();

		match component {
			Some(component) if secret.starts_with(LEGACY_DELEGATION_PREFIX) =>
				Self::delegated(secret, component),
			_ => Self::direct(secret),
		}
	}

	/// Raw secret string used for cache identities and direct refreshes.
	pub fn expose(&self) -> &str {
		match self {
			Self::Direct(secret) => secret.expose(),
			Self::Delegated { refresh_token, .. } => refresh_token.expose(),
		}
	}

	/// Component grant for delegated tenants.
	pub fn component(&self) -> Option<&ComponentGrant> {
		match self {
			Self::Direct(_) => None,
			Self::Delegated { component, .. } => Some(component),
		}
	}

	/// Returns `true` for [`TenantSecret::Delegated`].
	pub fn is_delegated(&self) -> bool {
		matches!(self, Self::Delegated { .. })
	}
}

/// Keys used to verify and encrypt callback payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackKeys {
	/// Shared verification token mixed into signatures.
	pub token: TokenSecret,
	/// 43-character encoding AES key (or, for Lark, the raw encrypt key).
	#[serde(alias = "aes_key", alias = "encodingAESKey")]
	pub encoding_aes_key: TokenSecret,
}
impl CallbackKeys {
	/// Creates a key pair.
	pub fn new(token: impl Into<TokenSecret>, encoding_aes_key: impl Into<TokenSecret>) -> Self {
		Self { token: token.into(), encoding_aes_key: encoding_aes_key.into() }
	}
}

/// Immutable description of one tenant against one vendor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfig {
	/// Vendor-issued tenant identifier.
	pub id: TenantId,
	/// Credential used to obtain access tokens.
	pub secret: TenantSecret,
	/// Optional callback keys.
	#[serde(default)]
	pub callback: Option<CallbackKeys>,
}
impl TenantConfig {
	/// Creates a configuration without callback keys.
	pub fn new(id: TenantId, secret: TenantSecret) -> Self {
		Self { id, secret, callback: None }
	}

	/// Attaches callback keys.
	pub fn with_callback(mut self, keys: CallbackKeys) -> Self {
		self.callback = Some(keys);

		self
	}

	/// Logical cache identity: identifier followed by the secret string.
	pub fn identity(&self) -> String {
		format!("{}{}", self.id, self.secret.expose())
	}
}
