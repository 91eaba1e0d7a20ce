//! Sorted-tuple and ordered signatures over callback parameters.

// crates.io
use sha1::Sha1;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Hash used to sign callback tuples.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
	/// SHA-1 (Work WeChat, Official Account, DingTalk).
	#[default]
	Sha1,
	/// SHA-256 (Lark).
	Sha256,
}

/// Sorts `{token, timestamp, nonce, data}` ascending, concatenates and hashes them.
pub fn sign(
	token: &str,
	timestamp: &str,
	nonce: &str,
	data: &str,
	algorithm: SignatureAlgorithm,
) -> String {
	let mut parts = [token, timestamp, nonce, data];

	parts.sort_unstable();

	sign_ordered(&parts, algorithm)
}

/// Hashes `parts` concatenated in the given order; returns lowercase hex.
pub fn sign_ordered(parts: &[&str], algorithm: SignatureAlgorithm) -> String {
	match algorithm {
		SignatureAlgorithm::Sha1 => digest_hex::<Sha1>(parts),
		SignatureAlgorithm::Sha256 => digest_hex::<Sha256>(parts),
	}
}

/// Compares two signatures in constant time.
pub fn verify_signature(expected: &str, computed: &str) -> bool {
	expected.as_bytes().ct_eq(computed.as_bytes()).into()
}

fn digest_hex<D>(parts: &[&str]) -> String
where
	D: Digest,
{
	let mut hasher = D::new();

	for part in parts {
		hasher.update(part.as_bytes());
	}

	hex::encode(hasher.finalize())
}
