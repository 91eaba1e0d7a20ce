//! Callback cryptography: AES-CBC envelopes, sorted-tuple signatures, and the verification
//! state machine used by the XML (Work WeChat, Official Account) and JSON (DingTalk, Lark)
//! callback families.

pub mod aes_cbc;
pub mod callback;
pub mod lark;
pub mod signature;

pub use aes_cbc::*;
pub use callback::*;
pub use lark::*;
pub use signature::*;

// crates.io
use rand::{Rng, distr::Alphanumeric};
// self
use crate::_prelude::*;

/// Callback crypto failures. [`CryptoError::code`] returns the integer code existing callback
/// endpoints report on the wire.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum CryptoError {
	/// Received signature does not match the computed one.
	#[error("Callback signature does not match.")]
	SignatureMismatch,
	/// Inbound XML document could not be parsed.
	#[error("Callback XML could not be parsed: {message}.")]
	ParseXml {
		/// Parser message.
		message: String,
	},
	/// Signature could not be computed.
	#[error("Callback signature could not be computed.")]
	ComputeSignature,
	/// Encoding AES key does not decode to 32 bytes.
	#[error("Encoding AES key is invalid ({length} characters).")]
	IllegalAesKey {
		/// Length of the rejected key string.
		length: usize,
	},
	/// Embedded receiver id differs from the tenant identity.
	#[error("Callback receiver `{found}` does not match the expected receiver.")]
	ReceiverMismatch {
		/// Receiver id found in the envelope.
		found: String,
	},
	/// Plaintext could not be encrypted.
	#[error("Callback payload could not be encrypted.")]
	Encrypt,
	/// Ciphertext could not be decrypted.
	#[error("Callback payload could not be decrypted: {reason}.")]
	Decrypt {
		/// What went wrong.
		reason: &'static str,
	},
	/// Decrypted buffer is shorter than its framing claims.
	#[error("Callback buffer is malformed: {reason}.")]
	IllegalBuffer {
		/// What went wrong.
		reason: &'static str,
	},
	/// Ciphertext could not be base64 encoded.
	#[error("Callback payload could not be base64 encoded.")]
	EncodeBase64,
	/// Ciphertext is not valid base64.
	#[error("Callback payload is not valid base64: {message}.")]
	DecodeBase64 {
		/// Decoder message.
		message: String,
	},
	/// Reply XML could not be generated.
	#[error("Callback reply XML could not be generated: {message}.")]
	GenerateXml {
		/// Writer message.
		message: String,
	},
	/// Inbound JSON document could not be parsed.
	#[error("Callback JSON could not be parsed: {message}.")]
	ParseJson {
		/// Parser message.
		message: String,
	},
	/// Reply JSON could not be generated.
	#[error("Callback reply JSON could not be generated: {message}.")]
	GenerateJson {
		/// Serializer message.
		message: String,
	},
}
impl CryptoError {
	/// Wire error code understood by existing callback integrations.
	pub const fn code(&self) -> i32 {
		match self {
			Self::SignatureMismatch => -40001,
			Self::ParseXml { .. } => -40002,
			Self::ComputeSignature => -40003,
			Self::IllegalAesKey { .. } => -40004,
			Self::ReceiverMismatch { .. } => -40005,
			Self::Encrypt => -40006,
			Self::Decrypt { .. } => -40007,
			Self::IllegalBuffer { .. } => -40008,
			Self::EncodeBase64 => -40009,
			Self::DecodeBase64 { .. } => -40010,
			Self::GenerateXml { .. } => -40011,
			Self::ParseJson { .. } => -40012,
			Self::GenerateJson { .. } => -40013,
		}
	}
}

/// Random alphanumeric string drawn from the thread-local CSPRNG (nonces, envelope prefixes).
pub fn random_string(len: usize) -> String {
	rand::rng().sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn wire_codes_are_stable() {
		assert_eq!(CryptoError::SignatureMismatch.code(), -40001);
		assert_eq!(CryptoError::ReceiverMismatch { found: "OTHER".into() }.code(), -40005);
		assert_eq!(CryptoError::Decrypt { reason: "bad padding" }.code(), -40007);
		assert_eq!(CryptoError::IllegalBuffer { reason: "short" }.code(), -40008);
		assert_eq!(CryptoError::DecodeBase64 { message: String::new() }.code(), -40010);
		assert_eq!(CryptoError::GenerateXml { message: String::new() }.code(), -40011);
	}

	#[test]
	fn random_strings_are_alphanumeric() {
		let a = random_string(16);
		let b = random_string(16);

		assert_eq!(a.len(), 16);
		assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
		assert_ne!(a, b);
	}
}
