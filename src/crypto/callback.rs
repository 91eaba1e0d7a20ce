//! Callback verification state machine plus the XML and JSON envelope codecs.

// std
use std::mem;
// crates.io
use quick_xml::{
	Writer,
	events::{BytesCData, BytesText},
};
// self
use crate::{
	_prelude::*,
	auth::{CallbackKeys, TokenSecret},
	crypto::{
		AesKey, CryptoError, Envelope, SignatureAlgorithm, WIDE_PAD_BLOCK, open_envelope,
		seal_envelope, sign, verify_signature,
	},
	error::ConfigError,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

/// Hash and padding block used by one callback family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallbackProfile {
	/// Signature hash.
	pub algorithm: SignatureAlgorithm,
	/// PKCS#7 block size applied before encryption.
	pub pad_block: usize,
}
impl CallbackProfile {
	/// Work WeChat and Official Account XML callbacks.
	pub const WORK_WECHAT: Self =
		Self { algorithm: SignatureAlgorithm::Sha1, pad_block: WIDE_PAD_BLOCK };
	/// DingTalk JSON callbacks. Pad values run up to 32 like the XML family.
	pub const DINGTALK: Self =
		Self { algorithm: SignatureAlgorithm::Sha1, pad_block: WIDE_PAD_BLOCK };
}
impl Default for CallbackProfile {
	fn default() -> Self {
		Self::WORK_WECHAT
	}
}

/// Inbound XML callback document.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InboundMessage {
	/// Receiver named by the vendor.
	#[serde(default)]
	pub to_user_name: Option<String>,
	/// Base64 ciphertext.
	pub encrypt: String,
	/// Agent the callback belongs to.
	#[serde(rename = "AgentID", default)]
	pub agent_id: Option<String>,
}
impl InboundMessage {
	/// Parses the `<xml>` callback body.
	pub fn parse(xml: &str) -> Result<Self, CryptoError> {
		quick_xml::de::from_str(xml).map_err(|e| CryptoError::ParseXml { message: e.to_string() })
	}
}

#[derive(Deserialize)]
struct InboundEvent {
	encrypt: String,
}

/// Encrypted JSON reply expected by DingTalk callbacks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedJsonReply {
	/// Signature over the reply tuple.
	pub msg_signature: String,
	/// Timestamp echoed into the signature.
	#[serde(rename = "timeStamp")]
	pub timestamp: String,
	/// Nonce echoed into the signature.
	pub nonce: String,
	/// Base64 ciphertext.
	pub encrypt: String,
}

/// Verification progress for one callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackState {
	/// Signature not yet checked.
	AwaitingSignature,
	/// Signature matched; ciphertext not yet decrypted.
	AwaitingPlaintext,
	/// Envelope decrypted; receiver id not yet checked.
	AwaitingReceiverCheck(Envelope),
	/// Terminal: the payload is trusted.
	Accepted(Vec<u8>),
	/// Terminal: the callback must be rejected.
	Rejected(CryptoError),
}
impl CallbackState {
	/// Returns `true` for [`CallbackState::Accepted`] and [`CallbackState::Rejected`].
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Accepted(_) | Self::Rejected(_))
	}
}

/// Verifies and decrypts callbacks for one tenant.
#[derive(Clone, Debug)]
pub struct CallbackVerifier {
	token: TokenSecret,
	key: AesKey,
	receiver_id: String,
	profile: CallbackProfile,
}
impl CallbackVerifier {
	/// Builds a verifier; malformed AES keys fail here rather than on the first callback.
	pub fn new(
		keys: &CallbackKeys,
		receiver_id: impl Into<String>,
		profile: CallbackProfile,
	) -> Result<Self, ConfigError> {
		let key = AesKey::from_encoded(keys.encoding_aes_key.expose())
			.map_err(|source| ConfigError::InvalidCallbackKey { source })?;

		Ok(Self { token: keys.token.clone(), key, receiver_id: receiver_id.into(), profile })
	}

	/// Receiver id every accepted envelope must carry (empty accepts any).
	pub fn receiver_id(&self) -> &str {
		&self.receiver_id
	}

	/// Signature over `{token, timestamp, nonce, data}` for this profile.
	pub fn signature(&self, timestamp: &str, nonce: &str, data: &str) -> String {
		sign(self.token.expose(), timestamp, nonce, data, self.profile.algorithm)
	}

	/// Starts a step-wise verification of `ciphertext`.
	pub fn verification<'a>(
		&'a self,
		signature: &'a str,
		timestamp: &'a str,
		nonce: &'a str,
		ciphertext: &'a str,
	) -> CallbackVerification<'a> {
		CallbackVerification {
			verifier: self,
			signature,
			timestamp,
			nonce,
			ciphertext,
			state: CallbackState::AwaitingSignature,
		}
	}

	/// Verifies the signature over `ciphertext` and returns the decrypted payload.
	pub fn verify(
		&self,
		signature: &str,
		timestamp: &str,
		nonce: &str,
		ciphertext: &str,
	) -> Result<Vec<u8>, CryptoError> {
		self.verification(signature, timestamp, nonce, ciphertext).run()
	}

	/// Handles the URL verification handshake and returns the echo string to send back.
	pub fn verify_url(
		&self,
		signature: &str,
		timestamp: &str,
		nonce: &str,
		echostr: &str,
	) -> Result<String, CryptoError> {
		let plain = self.verify(signature, timestamp, nonce, echostr)?;

		String::from_utf8(plain)
			.map_err(|_| CryptoError::IllegalBuffer { reason: "echo string is not UTF-8" })
	}

	/// Verifies and decrypts an XML callback body.
	pub fn decrypt_xml(
		&self,
		signature: &str,
		timestamp: &str,
		nonce: &str,
		body: &str,
	) -> Result<Vec<u8>, CryptoError> {
		let inbound = InboundMessage::parse(body)?;

		self.verify(signature, timestamp, nonce, &inbound.encrypt)
	}

	/// Verifies and decrypts a `{"encrypt": …}` callback body.
	pub fn decrypt_json(
		&self,
		signature: &str,
		timestamp: &str,
		nonce: &str,
		body: &str,
	) -> Result<Vec<u8>, CryptoError> {
		let inbound = serde_json::from_str::<InboundEvent>(body)
			.map_err(|e| CryptoError::ParseJson { message: e.to_string() })?;

		self.verify(signature, timestamp, nonce, &inbound.encrypt)
	}

	/// Encrypts `message` for this verifier's receiver.
	pub fn seal(&self, message: &[u8]) -> Result<String, CryptoError> {
		seal_envelope(message, &self.key, &self.receiver_id, self.profile.pad_block)
	}

	/// Encrypts and signs a passive reply, rendered as the `<xml>` reply document.
	pub fn encrypt_reply(
		&self,
		message: &[u8],
		timestamp: &str,
		nonce: &str,
	) -> Result<String, CryptoError> {
		let encrypt = self.seal(message)?;
		let signature = self.signature(timestamp, nonce, &encrypt);
		let mut writer = Writer::new(Vec::new());

		writer
			.create_element("xml")
			.write_inner_content(|w| {
				w.create_element("Encrypt").write_cdata_content(BytesCData::new(&encrypt))?;
				w.create_element("MsgSignature").write_cdata_content(BytesCData::new(&signature))?;
				w.create_element("TimeStamp").write_text_content(BytesText::new(timestamp))?;
				w.create_element("Nonce").write_cdata_content(BytesCData::new(nonce))?;

				Ok::<_, quick_xml::Error>(())
			})
			.map_err(|e| CryptoError::GenerateXml { message: e.to_string() })?;

		String::from_utf8(writer.into_inner())
			.map_err(|e| CryptoError::GenerateXml { message: e.to_string() })
	}

	/// Encrypts and signs a reply as the JSON document DingTalk expects.
	pub fn encrypt_json_reply(
		&self,
		message: &[u8],
		timestamp: &str,
		nonce: &str,
	) -> Result<String, CryptoError> {
		let encrypt = self.seal(message)?;
		let reply = EncryptedJsonReply {
			msg_signature: self.signature(timestamp, nonce, &encrypt),
			timestamp: timestamp.to_owned(),
			nonce: nonce.to_owned(),
			encrypt,
		};

		serde_json::to_string(&reply)
			.map_err(|e| CryptoError::GenerateJson { message: e.to_string() })
	}
}

/// Step-wise run of the verification state machine over one callback.
#[derive(Debug)]
pub struct CallbackVerification<'a> {
	verifier: &'a CallbackVerifier,
	signature: &'a str,
	timestamp: &'a str,
	nonce: &'a str,
	ciphertext: &'a str,
	state: CallbackState,
}
impl CallbackVerification<'_> {
	/// Current state.
	pub fn state(&self) -> &CallbackState {
		&self.state
	}

	/// Returns `true` once accepted or rejected.
	pub fn is_terminal(&self) -> bool {
		self.state.is_terminal()
	}

	/// Advances one transition; terminal states are absorbing.
	pub fn step(&mut self) -> &CallbackState {
		let verifier = self.verifier;

		self.state = match mem::replace(&mut self.state, CallbackState::AwaitingSignature) {
			CallbackState::AwaitingSignature => {
				let computed = verifier.signature(self.timestamp, self.nonce, self.ciphertext);

				if verify_signature(self.signature, &computed) {
					CallbackState::AwaitingPlaintext
				} else {
					CallbackState::Rejected(CryptoError::SignatureMismatch)
				}
			},
			CallbackState::AwaitingPlaintext =>
				match open_envelope(self.ciphertext, &verifier.key, verifier.profile.pad_block) {
					Ok(envelope) => CallbackState::AwaitingReceiverCheck(envelope),
					Err(e) => CallbackState::Rejected(e),
				},
			CallbackState::AwaitingReceiverCheck(envelope) =>
				match envelope.check_receiver(&verifier.receiver_id) {
					Ok(()) => CallbackState::Accepted(envelope.message),
					Err(e) => CallbackState::Rejected(e),
				},
			terminal => terminal,
		};

		&self.state
	}

	/// Runs to a terminal state.
	pub fn run(mut self) -> Result<Vec<u8>, CryptoError> {
		let _span = FlowSpan::new(FlowKind::Callback, "CallbackVerification::run")
			.with_tenant(Some(self.verifier.receiver_id.as_str()).filter(|id| !id.is_empty()))
			.entered();

		obs::record_flow_outcome(FlowKind::Callback, FlowOutcome::Attempt);

		loop {
			self.step();

			match mem::replace(&mut self.state, CallbackState::AwaitingSignature) {
				CallbackState::Accepted(message) =>
					return obs::observe(FlowKind::Callback, Ok(message)),
				CallbackState::Rejected(e) => {
					tracing::warn!(code = e.code(), error = %e, "Rejected callback.");

					return obs::observe(FlowKind::Callback, Err(e));
				},
				state => self.state = state,
			}
		}
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use base64::{Engine, engine::general_purpose::STANDARD};
	// self
	use super::*;

	fn keys() -> CallbackKeys {
		let encoded = STANDARD.encode([3_u8; 32]);

		CallbackKeys::new("callback-token", encoded.trim_end_matches('='))
	}

	#[test]
	fn bad_keys_fail_at_construction() {
		let keys = CallbackKeys::new("t", "not-a-key");
		let err = CallbackVerifier::new(&keys, "RCPT", CallbackProfile::WORK_WECHAT)
			.expect_err("Short AES key must be rejected.");

		assert!(matches!(
			err,
			ConfigError::InvalidCallbackKey { source: CryptoError::IllegalAesKey { length: 9 } }
		));
	}

	#[test]
	fn state_machine_walks_every_stage() {
		let verifier = CallbackVerifier::new(&keys(), "RCPT", CallbackProfile::WORK_WECHAT)
			.expect("Verifier should build.");
		let ciphertext = verifier.seal(b"hello").expect("Sealing should succeed.");
		let signature = verifier.signature("1700000000", "n0nce", &ciphertext);
		let mut run = verifier.verification(&signature, "1700000000", "n0nce", &ciphertext);

		assert_eq!(run.state(), &CallbackState::AwaitingSignature);
		assert_eq!(run.step(), &CallbackState::AwaitingPlaintext);
		assert!(matches!(
			run.step(),
			CallbackState::AwaitingReceiverCheck(e) if e.receiver_id == "RCPT"
		));
		assert_eq!(run.step(), &CallbackState::Accepted(b"hello".to_vec()));
		assert!(run.is_terminal());
		assert_eq!(run.step(), &CallbackState::Accepted(b"hello".to_vec()));
	}

	#[test]
	fn wrong_signature_stops_before_decryption() {
		let verifier = CallbackVerifier::new(&keys(), "RCPT", CallbackProfile::WORK_WECHAT)
			.expect("Verifier should build.");
		let mut run = verifier.verification("deadbeef", "1", "n", "not even base64");

		assert_eq!(run.step(), &CallbackState::Rejected(CryptoError::SignatureMismatch));
		assert_eq!(
			verifier.verify("deadbeef", "1", "n", "not even base64"),
			Err(CryptoError::SignatureMismatch)
		);
	}

	#[test]
	fn xml_reply_decodes_back_through_the_verifier() {
		let verifier = CallbackVerifier::new(&keys(), "wxcorp", CallbackProfile::WORK_WECHAT)
			.expect("Verifier should build.");
		let reply = verifier
			.encrypt_reply(b"<xml><Content>hi</Content></xml>", "1700000000", "n0nce")
			.expect("Reply should render.");

		assert!(reply.starts_with("<xml><Encrypt><![CDATA["));
		assert!(reply.contains("<TimeStamp>1700000000</TimeStamp>"));
		assert!(reply.contains("<Nonce><![CDATA[n0nce]]></Nonce>"));

		#[derive(Deserialize)]
		#[serde(rename_all = "PascalCase")]
		struct Reply {
			encrypt: String,
			msg_signature: String,
		}

		let parsed: Reply = quick_xml::de::from_str(&reply).expect("Reply XML should parse.");

		assert_eq!(
			verifier.verify(&parsed.msg_signature, "1700000000", "n0nce", &parsed.encrypt),
			Ok(b"<xml><Content>hi</Content></xml>".to_vec())
		);
	}

	#[test]
	fn inbound_xml_is_parsed() {
		let inbound = InboundMessage::parse(
			"<xml><ToUserName><![CDATA[wxcorp]]></ToUserName><Encrypt><![CDATA[abc=]]></Encrypt><AgentID><![CDATA[1000002]]></AgentID></xml>",
		)
		.expect("Inbound XML should parse.");

		assert_eq!(inbound.to_user_name.as_deref(), Some("wxcorp"));
		assert_eq!(inbound.encrypt, "abc=");
		assert_eq!(inbound.agent_id.as_deref(), Some("1000002"));
		assert!(matches!(InboundMessage::parse("<xml>"), Err(CryptoError::ParseXml { .. })));
	}

	#[test]
	fn dingtalk_json_reply_round_trips() {
		let verifier = CallbackVerifier::new(&keys(), "suite-key", CallbackProfile::DINGTALK)
			.expect("Verifier should build.");
		let reply = verifier
			.encrypt_json_reply(b"success", "1700000000", "abcdefgh")
			.expect("JSON reply should render.");
		let parsed: EncryptedJsonReply =
			serde_json::from_str(&reply).expect("JSON reply should parse.");
		let body = serde_json::json!({ "encrypt": parsed.encrypt }).to_string();

		assert!(reply.contains("\"timeStamp\":\"1700000000\""));
		assert_eq!(
			verifier.decrypt_json(&parsed.msg_signature, "1700000000", "abcdefgh", &body),
			Ok(b"success".to_vec())
		);
		assert!(matches!(
			verifier.decrypt_json("sig", "1", "n", "[]"),
			Err(CryptoError::ParseJson { .. })
		));
	}
}
