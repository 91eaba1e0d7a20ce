//! AES-256-CBC with PKCS#7 padding and the random-prefix callback envelope.

// crates.io
use aes::Aes256;
use base64::{
	Engine,
	alphabet,
	engine::{
		DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig, general_purpose::STANDARD,
	},
};
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, crypto::CryptoError};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES cipher block size in bytes.
pub const AES_BLOCK_SIZE: usize = 16;
/// Padding block used by the XML callback family (Work WeChat, Official Account).
pub const WIDE_PAD_BLOCK: usize = 32;

const ENVELOPE_PREFIX_LEN: usize = 16;
const ENVELOPE_HEADER_LEN: usize = ENVELOPE_PREFIX_LEN + 4;
// Encoding AES keys are 43 characters without the trailing `=`, and some issued keys carry
// non-zero trailing bits, so both padding and trailing bits are tolerated.
const AES_KEY_ENGINE: GeneralPurpose = GeneralPurpose::new(
	&alphabet::STANDARD,
	GeneralPurposeConfig::new()
		.with_decode_allow_trailing_bits(true)
		.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// 32-byte AES-256 key.
#[derive(Clone, PartialEq, Eq)]
pub struct AesKey([u8; 32]);
impl AesKey {
	/// Decodes a 43-character encoding AES key (or its 44-character padded form).
	pub fn from_encoded(encoded: &str) -> Result<Self, CryptoError> {
		let length = encoded.len();

		if !(43..=44).contains(&length) {
			return Err(CryptoError::IllegalAesKey { length });
		}

		let bytes =
			AES_KEY_ENGINE.decode(encoded).map_err(|_| CryptoError::IllegalAesKey { length })?;

		Self::from_bytes(&bytes).map_err(|_| CryptoError::IllegalAesKey { length })
	}

	/// Wraps raw key material, which must be exactly 32 bytes.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
		let key = <[u8; 32]>::try_from(bytes)
			.map_err(|_| CryptoError::IllegalAesKey { length: bytes.len() })?;

		Ok(Self(key))
	}

	/// Derives a key as the SHA-256 digest of `secret` (Lark encrypt keys).
	pub fn derive(secret: &str) -> Self {
		Self(Sha256::digest(secret.as_bytes()).into())
	}

	/// Raw key bytes.
	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.0
	}

	/// Envelope IV: the first 16 key bytes.
	pub fn iv(&self) -> &[u8] {
		&self.0[..AES_BLOCK_SIZE]
	}
}
impl Debug for AesKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("AesKey").field(&"<redacted>").finish()
	}
}

/// Appends PKCS#7 padding up to a multiple of `block`.
pub fn pkcs7_pad(data: &[u8], block: usize) -> Vec<u8> {
	let pad = block - data.len() % block;
	let mut padded = Vec::with_capacity(data.len() + pad);

	padded.extend_from_slice(data);
	padded.resize(data.len() + pad, pad as u8);

	padded
}

/// Strips PKCS#7 padding produced for a `block`-byte block size.
pub fn pkcs7_unpad(data: &[u8], block: usize) -> Result<&[u8], CryptoError> {
	let Some(&last) = data.last() else {
		return Err(CryptoError::Decrypt { reason: "empty plaintext" });
	};
	let pad = usize::from(last);

	if pad == 0 || pad > block || pad > data.len() {
		return Err(CryptoError::Decrypt { reason: "invalid padding length" });
	}

	let (body, padding) = data.split_at(data.len() - pad);

	if padding.iter().any(|&b| b != last) {
		return Err(CryptoError::Decrypt { reason: "inconsistent padding bytes" });
	}

	Ok(body)
}

/// Encrypts block-aligned `data` with AES-256-CBC.
pub fn cbc_encrypt(key: &AesKey, iv: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
	if data.len() % AES_BLOCK_SIZE != 0 {
		return Err(CryptoError::Encrypt);
	}

	let encryptor =
		Aes256CbcEnc::new_from_slices(key.as_bytes(), iv).map_err(|_| CryptoError::Encrypt)?;

	Ok(encryptor.encrypt_padded_vec_mut::<NoPadding>(data))
}

/// Decrypts AES-256-CBC `data`; padding is left for the caller to strip.
pub fn cbc_decrypt(key: &AesKey, iv: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
	if data.is_empty() || data.len() % AES_BLOCK_SIZE != 0 {
		return Err(CryptoError::Decrypt { reason: "ciphertext is not block aligned" });
	}

	let decryptor = Aes256CbcDec::new_from_slices(key.as_bytes(), iv)
		.map_err(|_| CryptoError::Decrypt { reason: "invalid IV length" })?;

	decryptor
		.decrypt_padded_vec_mut::<NoPadding>(data)
		.map_err(|_| CryptoError::Decrypt { reason: "block decryption failed" })
}

/// Decrypted callback envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
	/// Payload bytes.
	pub message: Vec<u8>,
	/// Receiver id appended after the payload.
	pub receiver_id: String,
}
impl Envelope {
	/// Accepts the envelope when its receiver equals `expected`; an empty `expected` accepts any
	/// receiver.
	pub fn check_receiver(&self, expected: &str) -> Result<(), CryptoError> {
		if expected.is_empty() || self.receiver_id == expected {
			Ok(())
		} else {
			Err(CryptoError::ReceiverMismatch { found: self.receiver_id.clone() })
		}
	}
}

/// Builds and encrypts `random(16) ‖ len(BE u32) ‖ plaintext ‖ receiver`, returning base64.
pub fn seal_envelope(
	plaintext: &[u8],
	key: &AesKey,
	receiver_id: &str,
	pad_block: usize,
) -> Result<String, CryptoError> {
	let length = u32::try_from(plaintext.len()).map_err(|_| CryptoError::Encrypt)?;
	let mut buf = Vec::with_capacity(ENVELOPE_HEADER_LEN + plaintext.len() + receiver_id.len());

	buf.extend_from_slice(super::random_string(ENVELOPE_PREFIX_LEN).as_bytes());
	buf.extend_from_slice(&length.to_be_bytes());
	buf.extend_from_slice(plaintext);
	buf.extend_from_slice(receiver_id.as_bytes());

	let ciphertext = cbc_encrypt(key, key.iv(), &pkcs7_pad(&buf, pad_block))?;

	Ok(STANDARD.encode(ciphertext))
}

/// Decrypts a base64 envelope and splits it into payload and receiver id.
pub fn open_envelope(
	ciphertext: &str,
	key: &AesKey,
	pad_block: usize,
) -> Result<Envelope, CryptoError> {
	let raw = STANDARD
		.decode(ciphertext.trim())
		.map_err(|e| CryptoError::DecodeBase64 { message: e.to_string() })?;
	let plain = cbc_decrypt(key, key.iv(), &raw)?;
	let plain = pkcs7_unpad(&plain, pad_block)?;

	if plain.len() < ENVELOPE_HEADER_LEN {
		return Err(CryptoError::IllegalBuffer { reason: "plaintext shorter than its header" });
	}

	let mut length = [0_u8; 4];

	length.copy_from_slice(&plain[ENVELOPE_PREFIX_LEN..ENVELOPE_HEADER_LEN]);

	let end = usize::try_from(u32::from_be_bytes(length))
		.ok()
		.and_then(|n| ENVELOPE_HEADER_LEN.checked_add(n))
		.filter(|&end| end <= plain.len())
		.ok_or(CryptoError::IllegalBuffer { reason: "embedded length exceeds the buffer" })?;
	let receiver_id = String::from_utf8(plain[end..].to_vec())
		.map_err(|_| CryptoError::IllegalBuffer { reason: "receiver id is not UTF-8" })?;

	Ok(Envelope { message: plain[ENVELOPE_HEADER_LEN..end].to_vec(), receiver_id })
}

/// Encrypts `plaintext` for `receiver_id` with 32-byte padding blocks.
pub fn encrypt(plaintext: &[u8], key: &AesKey, receiver_id: &str) -> Result<String, CryptoError> {
	seal_envelope(plaintext, key, receiver_id, WIDE_PAD_BLOCK)
}

/// Decrypts an envelope sealed with 32-byte padding blocks and checks its receiver.
pub fn decrypt(
	ciphertext: &str,
	key: &AesKey,
	expected_receiver: &str,
) -> Result<Vec<u8>, CryptoError> {
	let envelope = open_envelope(ciphertext, key, WIDE_PAD_BLOCK)?;

	envelope.check_receiver(expected_receiver)?;

	Ok(envelope.message)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn key() -> AesKey {
		AesKey::from_bytes(&[7_u8; 32]).expect("32-byte key should be accepted.")
	}

	#[test]
	fn encoded_keys_accept_both_lengths() {
		let unpadded = STANDARD.encode([9_u8; 32]).trim_end_matches('=').to_owned();

		assert_eq!(unpadded.len(), 43);

		let from_unpadded = AesKey::from_encoded(&unpadded).expect("43-char key should decode.");
		let from_padded =
			AesKey::from_encoded(&format!("{unpadded}=")).expect("44-char key should decode.");

		assert_eq!(from_unpadded, from_padded);
		assert_eq!(from_unpadded.as_bytes(), &[9_u8; 32]);
		assert_eq!(
			AesKey::from_encoded("short"),
			Err(CryptoError::IllegalAesKey { length: 5 })
		);
		assert!(!format!("{from_padded:?}").contains('9'));
	}

	#[test]
	fn padding_rejects_malformed_tails() {
		let padded = pkcs7_pad(b"abc", 16);

		assert_eq!(padded.len(), 16);
		assert_eq!(pkcs7_unpad(&padded, 16), Ok(&b"abc"[..]));
		assert_eq!(pkcs7_pad(&[1; 32], 32).len(), 64);

		let mut zero = padded.clone();

		*zero.last_mut().expect("Padded buffer is non-empty.") = 0;

		assert!(matches!(pkcs7_unpad(&zero, 16), Err(CryptoError::Decrypt { .. })));

		let mut inconsistent = padded;

		inconsistent[14] = 1;

		assert!(matches!(pkcs7_unpad(&inconsistent, 16), Err(CryptoError::Decrypt { .. })));
		assert!(matches!(pkcs7_unpad(&[33; 64], 32), Err(CryptoError::Decrypt { .. })));
	}

	#[test]
	fn envelope_round_trips_for_both_block_sizes() {
		let key = key();

		for block in [AES_BLOCK_SIZE, WIDE_PAD_BLOCK] {
			let sealed = seal_envelope(b"hello", &key, "RCPT", block)
				.expect("Sealing a short payload should succeed.");
			let envelope =
				open_envelope(&sealed, &key, block).expect("Sealed envelope should open.");

			assert_eq!(envelope.message, b"hello");
			assert_eq!(envelope.receiver_id, "RCPT");
		}
	}

	#[test]
	fn receiver_checks_honor_empty_expectation() {
		let key = key();
		let sealed = encrypt(b"payload", &key, "OTHER").expect("Encryption should succeed.");

		assert_eq!(decrypt(&sealed, &key, "").as_deref(), Ok(&b"payload"[..]));
		assert_eq!(
			decrypt(&sealed, &key, "RCPT"),
			Err(CryptoError::ReceiverMismatch { found: "OTHER".into() })
		);
	}

	#[test]
	fn malformed_ciphertexts_map_to_typed_errors() {
		let key = key();

		assert!(matches!(decrypt("%%%", &key, ""), Err(CryptoError::DecodeBase64 { .. })));
		assert!(matches!(
			decrypt(&STANDARD.encode([1_u8; 15]), &key, ""),
			Err(CryptoError::Decrypt { .. })
		));

		// Valid padding around a body too short to hold the header.
		let short = cbc_encrypt(&key, key.iv(), &pkcs7_pad(b"tiny", WIDE_PAD_BLOCK))
			.expect("Aligned buffer should encrypt.");

		assert!(matches!(
			decrypt(&STANDARD.encode(short), &key, ""),
			Err(CryptoError::IllegalBuffer { .. })
		));

		let mut lying = Vec::from(*b"0123456789abcdef");

		lying.extend_from_slice(&1_000_u32.to_be_bytes());
		lying.extend_from_slice(b"abc");

		let lying = cbc_encrypt(&key, key.iv(), &pkcs7_pad(&lying, WIDE_PAD_BLOCK))
			.expect("Aligned buffer should encrypt.");

		assert_eq!(
			decrypt(&STANDARD.encode(lying), &key, ""),
			Err(CryptoError::IllegalBuffer { reason: "embedded length exceeds the buffer" })
		);
	}
}
