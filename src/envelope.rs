//! Attaching credentials to outgoing vendor requests.

// crates.io
use reqwest::{RequestBuilder, header::AUTHORIZATION};
// self
use crate::{_prelude::*, auth::ComponentGrant};

/// Where a request carries its credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialPlacement {
	/// Query parameter `<name>=<token>`.
	Query(&'static str),
	/// `Authorization: Bearer <token>`.
	Bearer,
	/// Custom header `<name>: <token>`.
	Header(&'static str),
}
impl CredentialPlacement {
	/// `?access_token=<token>`, the default for WeChat-family endpoints.
	pub const ACCESS_TOKEN: Self = Self::Query("access_token");
	/// `?component_access_token=<token>` for component endpoints.
	pub const COMPONENT_ACCESS_TOKEN: Self = Self::Query("component_access_token");
	/// DingTalk's header used by the `api.dingtalk.com` v1.0 endpoints.
	pub const DINGTALK_HEADER: Self = Self::Header("x-acs-dingtalk-access-token");
	/// DingTalk's query variant of the same credential.
	pub const DINGTALK_QUERY: Self = Self::Query("x-acs-dingtalk-access-token");

	/// Decorates `request` with `token`.
	pub fn apply(self, request: RequestBuilder, token: &str) -> RequestBuilder {
		match self {
			Self::Query(name) => request.query(&[(name, token)]),
			Self::Bearer => request.header(AUTHORIZATION, format!("Bearer {token}")),
			Self::Header(name) => request.header(name, token),
		}
	}
}
impl Default for CredentialPlacement {
	fn default() -> Self {
		Self::ACCESS_TOKEN
	}
}

/// Body of the delegated authorizer token refresh.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DelegatedRefresh<'a> {
	/// Component app id.
	pub component_appid: &'a str,
	/// Tenant (authorizer) app id.
	pub authorizer_appid: &'a str,
	/// Refresh token the tenant granted to the component.
	pub authorizer_refresh_token: &'a str,
}

/// Component-delegated mode: the component token travels in the query and the tenant's
/// refresh material in the JSON body.
pub fn component_delegated(
	request: RequestBuilder,
	component: &ComponentGrant,
	authorizer_appid: &str,
	refresh_token: &str,
) -> RequestBuilder {
	CredentialPlacement::COMPONENT_ACCESS_TOKEN
		.apply(request, component.access_token.expose())
		.json(&DelegatedRefresh {
			component_appid: component.app_id.as_str(),
			authorizer_appid,
			authorizer_refresh_token: refresh_token,
		})
}
