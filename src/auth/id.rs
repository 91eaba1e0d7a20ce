//! Strongly typed identifiers for tenants and components.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				validate_view($kind, view)?;

				Ok(Self(view.to_owned()))
			}

			/// Returns the identifier as a string slice.
			pub fn as_str(&self) -> &str {
				&self.0
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				validate_view($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 128;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (tenant or component).
		kind: &'static str,
	},
	/// The identifier contains a character vendors never issue.
	#[error("{kind} identifier contains the invalid character {found:?}.")]
	InvalidCharacter {
		/// Kind of identifier (tenant or component).
		kind: &'static str,
		/// First offending character.
		found: char,
	},
	/// The identifier exceeded the allowed length.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (tenant or component).
		kind: &'static str,
		/// Maximum permitted length.
		max: usize,
	},
}

def_id! { TenantId, "Vendor-issued identifier of a tenant (corp id, app id, app key).", "Tenant" }
def_id! {
	ComponentId,
	"App id of an open-platform component acting for authorizing tenants.",
	"Component"
}

// Identifiers end up inside cache keys and URL paths, so only printable ASCII without
// separators is accepted.
fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if let Some(found) = view.chars().find(|c| !c.is_ascii_graphic() || matches!(c, '/' | '\\')) {
		return Err(IdentifierError::InvalidCharacter { kind, found });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn vendor_identifiers_validate() {
		let corp = TenantId::new("ww4f1c2d3e5a6b7c8d").expect("Corp id fixture should be valid.");

		assert_eq!(corp.as_str(), "ww4f1c2d3e5a6b7c8d");
		assert!(TenantId::new("").is_err());
		assert!(TenantId::new("cli_a1b2 ").is_err(), "Trailing whitespace must be rejected.");
		assert!(ComponentId::new("wx/../etc").is_err(), "Path separators must be rejected.");
		assert_eq!(
			TenantId::new("租户"),
			Err(IdentifierError::InvalidCharacter { kind: "Tenant", found: '租' })
		);
	}

	#[test]
	fn serde_enforces_validation() {
		let tenant: TenantId =
			serde_json::from_str("\"dingoa1b2c3\"").expect("Tenant should deserialize.");

		assert_eq!(tenant.as_ref(), "dingoa1b2c3");
		assert!(serde_json::from_str::<TenantId>("\"with space\"").is_err());
		assert_eq!(
			serde_json::to_string(&tenant).expect("Tenant should serialize."),
			"\"dingoa1b2c3\""
		);
	}

	#[test]
	fn length_limit_is_inclusive() {
		TenantId::new("a".repeat(IDENTIFIER_MAX_LEN)).expect("Exact length should succeed.");

		assert!(TenantId::new("a".repeat(IDENTIFIER_MAX_LEN + 1)).is_err());
	}

	#[test]
	fn borrow_supports_map_lookup() {
		let map = HashMap::from([(
			ComponentId::new("wxcomponent01").expect("Component fixture should be valid."),
			1_u8,
		)]);

		assert_eq!(map.get("wxcomponent01"), Some(&1));
	}
}
