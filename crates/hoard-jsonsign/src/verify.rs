//! Verification of signed schema JSON.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signature, Verifier};
use hoard_store::SeekFetcher;
use hoard_types::BlobRef;
use serde_json::{Map, Value};

use crate::SIG_SEPARATOR;
use crate::error::SignError;
use crate::keyring::{key_id, parse_armored_public_key};

/// Outcome of a successful verification.
#[derive(Debug)]
pub struct VerifyResult {
    /// Ref of the signer's public-key blob.
    pub signer: BlobRef,
    /// Key id of the verified public key.
    pub key_id: String,
    /// The full parsed object, `camliSig` included.
    pub payload: Map<String, Value>,
}

/// A request to verify one signed JSON object.
pub struct VerifyRequest<'a> {
    signed_json: &'a str,
    fetcher: &'a dyn SeekFetcher,
}

impl<'a> VerifyRequest<'a> {
    pub fn new(signed_json: &'a str, fetcher: &'a dyn SeekFetcher) -> Self {
        Self {
            signed_json,
            fetcher,
        }
    }

    /// Recover the pre-signature bytes, fetch the signer's public key, and
    /// check the detached signature against them.
    pub async fn verify(self) -> Result<VerifyResult, SignError> {
        let trimmed = self.signed_json.trim_end();

        // Split on the LAST occurrence of the separator: the payload may
        // legitimately contain the same byte sequence inside a string.
        let split = trimmed.rfind(SIG_SEPARATOR).ok_or(SignError::MissingSig)?;
        let payload_bytes = &trimmed[..split];

        let jmap: Map<String, Value> = serde_json::from_str(trimmed)
            .map_err(|e| SignError::InputJson(e.to_string()))?;

        let sig_b64 = jmap
            .get("camliSig")
            .and_then(Value::as_str)
            .ok_or(SignError::MissingSig)?;
        let sig_raw = BASE64
            .decode(sig_b64.as_bytes())
            .map_err(|e| SignError::BadArmor(e.to_string()))?;
        let decoded_len = sig_raw.len();
        let sig_raw: [u8; 64] = sig_raw
            .as_slice()
            .try_into()
            .map_err(|_| SignError::BadArmor(format!("signature is {decoded_len} bytes")))?;
        let signature = Signature::from_bytes(&sig_raw);

        let signer_str = jmap
            .get("camliSigner")
            .and_then(Value::as_str)
            .ok_or(SignError::MissingSigner)?;
        let signer_ref = BlobRef::parse(signer_str).map_err(|_| SignError::MalformedSigner)?;

        let pubkey_blob = self
            .fetcher
            .fetch(&signer_ref)
            .await?
            .ok_or_else(|| SignError::PublicKeyFetch(signer_ref.clone()))?;
        let pubkey_text = std::str::from_utf8(&pubkey_blob)
            .map_err(|e| SignError::BadPublicKey(e.to_string()))?;
        let vk = parse_armored_public_key(pubkey_text)?;

        vk.verify(payload_bytes.as_bytes(), &signature)
            .map_err(|_| SignError::BadSignature)?;

        Ok(VerifyResult {
            signer: signer_ref,
            key_id: key_id(&vk),
            payload: jmap,
        })
    }
}
