//! Lark event decryption: SHA-256 derived key, IV-prefixed ciphertext, ordered signature.

// crates.io
use base64::{Engine, engine::general_purpose::STANDARD};
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	crypto::{
		AES_BLOCK_SIZE, AesKey, CryptoError, SignatureAlgorithm, cbc_decrypt, pkcs7_unpad,
		sign_ordered, verify_signature,
	},
	obs::{self, FlowKind, FlowSpan},
};

#[derive(Deserialize)]
struct EncryptedEvent {
	encrypt: String,
}

/// Decrypts Lark event callbacks for one app.
#[derive(Clone, Debug)]
pub struct LarkDecryptor {
	key: AesKey,
	encrypt_key: TokenSecret,
	verification_token: Option<TokenSecret>,
	require_signature: bool,
}
impl LarkDecryptor {
	/// Derives the AES key from the app's encrypt key.
	pub fn new(encrypt_key: impl Into<TokenSecret>) -> Self {
		let encrypt_key = encrypt_key.into();

		Self {
			key: AesKey::derive(encrypt_key.expose()),
			encrypt_key,
			verification_token: None,
			require_signature: false,
		}
	}

	/// Rejects events that arrive without a signature header.
	pub fn with_required_signature(mut self) -> Self {
		self.require_signature = true;

		self
	}

	/// Requires every decrypted event to contain `token`.
	pub fn with_verification_token(mut self, token: impl Into<TokenSecret>) -> Self {
		self.verification_token = Some(token.into());

		self
	}

	/// SHA-256 over `timestamp ‖ nonce ‖ encrypt key ‖ body`, lowercase hex.
	pub fn signature(&self, timestamp: &str, nonce: &str, body: &str) -> String {
		sign_ordered(
			&[timestamp, nonce, self.encrypt_key.expose(), body],
			SignatureAlgorithm::Sha256,
		)
	}

	/// Checks a request signature against the raw body.
	pub fn verify(
		&self,
		signature: &str,
		timestamp: &str,
		nonce: &str,
		body: &str,
	) -> Result<(), CryptoError> {
		if verify_signature(signature, &self.signature(timestamp, nonce, body)) {
			Ok(())
		} else {
			Err(CryptoError::SignatureMismatch)
		}
	}

	/// Decrypts one `encrypt` field and returns the JSON object it wraps.
	pub fn decrypt(&self, encrypt: &str) -> Result<String, CryptoError> {
		let raw = STANDARD
			.decode(encrypt.trim())
			.map_err(|e| CryptoError::DecodeBase64 { message: e.to_string() })?;

		if raw.len() < AES_BLOCK_SIZE {
			return Err(CryptoError::Decrypt { reason: "ciphertext shorter than its IV" });
		}

		let (iv, body) = raw.split_at(AES_BLOCK_SIZE);
		let plain = cbc_decrypt(&self.key, iv, body)?;
		let plain = String::from_utf8(pkcs7_unpad(&plain, AES_BLOCK_SIZE)?.to_vec())
			.map_err(|_| CryptoError::IllegalBuffer { reason: "event is not UTF-8" })?;

		if self.verification_token.as_ref().is_some_and(|token| !plain.contains(token.expose())) {
			return Err(CryptoError::SignatureMismatch);
		}

		let start = plain.find('{').unwrap_or(0);
		let end = plain.rfind('}').map_or(plain.len(), |i| i + 1);

		Ok(plain.get(start..end).unwrap_or_default().to_owned())
	}

	/// Verifies and decrypts a `{"encrypt": …}` body.
	///
	/// A missing signature skips verification unless [`Self::with_required_signature`] is set.
	pub fn decrypt_event(
		&self,
		signature: Option<&str>,
		timestamp: &str,
		nonce: &str,
		body: &str,
	) -> Result<String, CryptoError> {
		let _span = FlowSpan::new(FlowKind::Callback, "LarkDecryptor::decrypt_event").entered();
		let result = self.open_event(signature, timestamp, nonce, body);

		if let Err(e) = &result {
			tracing::warn!(code = e.code(), error = %e, "Rejected Lark event.");
		}

		obs::observe(FlowKind::Callback, result)
	}

	fn open_event(
		&self,
		signature: Option<&str>,
		timestamp: &str,
		nonce: &str,
		body: &str,
	) -> Result<String, CryptoError> {
		match signature.filter(|s| !s.is_empty()) {
			Some(signature) => self.verify(signature, timestamp, nonce, body)?,
			None if self.require_signature => return Err(CryptoError::SignatureMismatch),
			None => {},
		}

		let event = serde_json::from_str::<EncryptedEvent>(body)
			.map_err(|e| CryptoError::ParseJson { message: e.to_string() })?;

		self.decrypt(&event.encrypt)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::crypto::{cbc_encrypt, pkcs7_pad};

	fn seal(decryptor: &LarkDecryptor, plaintext: &str) -> String {
		let iv = [5_u8; AES_BLOCK_SIZE];
		let mut raw = iv.to_vec();

		raw.extend(
			cbc_encrypt(&decryptor.key, &iv, &pkcs7_pad(plaintext.as_bytes(), AES_BLOCK_SIZE))
				.expect("Aligned buffer should encrypt."),
		);

		STANDARD.encode(raw)
	}

	#[test]
	fn decrypts_and_trims_to_the_json_object() {
		let decryptor = LarkDecryptor::new("lark-encrypt-key").with_verification_token("vtok");
		let encrypt = seal(&decryptor, r#"{"token":"vtok","event":{"type":"message"}}"#);

		assert_eq!(
			decryptor.decrypt(&encrypt),
			Ok(r#"{"token":"vtok","event":{"type":"message"}}"#.to_owned())
		);
	}

	#[test]
	fn missing_verification_token_is_rejected() {
		let decryptor = LarkDecryptor::new("lark-encrypt-key").with_verification_token("vtok");
		let encrypt = seal(&decryptor, r#"{"token":"other"}"#);

		assert_eq!(decryptor.decrypt(&encrypt), Err(CryptoError::SignatureMismatch));
	}

	#[test]
	fn event_signature_covers_the_raw_body() {
		let decryptor = LarkDecryptor::new("lark-encrypt-key");
		let body = serde_json::json!({ "encrypt": seal(&decryptor, r#"{"a":1}"#) }).to_string();
		let signature = decryptor.signature("1700000000", "n0nce", &body);

		assert_eq!(signature.len(), 64);
		assert_eq!(
			decryptor.decrypt_event(Some(&signature), "1700000000", "n0nce", &body),
			Ok(r#"{"a":1}"#.to_owned())
		);
		assert_eq!(decryptor.decrypt_event(None, "", "", &body), Ok(r#"{"a":1}"#.to_owned()));
		assert_eq!(
			decryptor.decrypt_event(Some("bad"), "1700000000", "n0nce", &body),
			Err(CryptoError::SignatureMismatch)
		);
		assert!(matches!(
			decryptor.decrypt_event(None, "", "", "{}"),
			Err(CryptoError::ParseJson { .. })
		));
	}

	#[test]
	fn required_signature_rejects_unsigned_events() {
		let decryptor = LarkDecryptor::new("lark-encrypt-key").with_required_signature();
		let body = serde_json::json!({ "encrypt": seal(&decryptor, r#"{"a":1}"#) }).to_string();
		let signature = decryptor.signature("1700000000", "n0nce", &body);

		assert_eq!(
			decryptor.decrypt_event(None, "1700000000", "n0nce", &body),
			Err(CryptoError::SignatureMismatch)
		);
		assert_eq!(
			decryptor.decrypt_event(Some(""), "1700000000", "n0nce", &body),
			Err(CryptoError::SignatureMismatch)
		);
		assert_eq!(
			decryptor.decrypt_event(Some(&signature), "1700000000", "n0nce", &body),
			Ok(r#"{"a":1}"#.to_owned())
		);
	}
}
