//! Signing of canonical schema JSON.

use ed25519_dalek::Signer;
use hoard_store::SeekFetcher;
use hoard_types::BlobRef;
use serde_json::{Map, Value};
use tracing::debug;

use crate::armor::{SIG_FOOTER, SIG_HEADER, armor};
use crate::error::SignError;
use crate::keyring::{KeyFetcher, key_id, parse_armored_public_key};

/// A request to sign one unsigned canonical JSON object.
pub struct SignRequest<'a> {
    /// The unsigned JSON, already carrying `camliSigner`.
    pub unsigned_json: String,
    /// Where to fetch the signer's public-key blob from.
    pub fetcher: &'a dyn SeekFetcher,
    /// Where to get the matching secret key.
    pub key_fetcher: &'a dyn KeyFetcher,
}

impl SignRequest<'_> {
    /// Produce the signed JSON: `<trimmed-without-}>,"camliSig":"<sig>"}\n`.
    pub async fn sign(self) -> Result<String, SignError> {
        let trimmed = self.unsigned_json.trim_end();

        let jmap: Map<String, Value> = serde_json::from_str(trimmed)
            .map_err(|e| SignError::InputJson(e.to_string()))?;

        let signer_value = jmap.get("camliSigner").ok_or(SignError::MissingSigner)?;
        let signer_str = signer_value.as_str().ok_or(SignError::MalformedSigner)?;
        let signer_ref = BlobRef::parse(signer_str).map_err(|_| SignError::MalformedSigner)?;

        let pubkey_blob = self
            .fetcher
            .fetch(&signer_ref)
            .await?
            .ok_or_else(|| SignError::PublicKeyFetch(signer_ref.clone()))?;
        let pubkey_text = std::str::from_utf8(&pubkey_blob)
            .map_err(|e| SignError::BadPublicKey(e.to_string()))?;
        let vk = parse_armored_public_key(pubkey_text)?;
        let id = key_id(&vk);

        // Redundant if the JSON parse succeeded, but explicit.
        if trimmed.is_empty() || !trimmed.ends_with('}') {
            return Err(SignError::InputJson("lacks trailing '}'".into()));
        }
        let payload = &trimmed[..trimmed.len() - 1];

        let sk = self.key_fetcher.fetch_signing_key(&id)?;
        if sk.verifying_key() != vk {
            return Err(SignError::KeyMismatch(id));
        }

        let signature = sk.sign(payload.as_bytes());
        let armored = armor(SIG_HEADER, SIG_FOOTER, &signature.to_bytes());

        // Pull the base64 body back out of the armor: everything between
        // the first blank line and the terminating delimiter.
        let index1 = armored
            .find("\n\n")
            .ok_or_else(|| SignError::BadArmor("no blank line in armor".into()))?;
        let index2 = armored
            .find("\n-----END")
            .ok_or_else(|| SignError::BadArmor("no footer in armor".into()))?;
        let sig: String = armored[index1 + 2..index2]
            .chars()
            .filter(|c| *c != '\n')
            .collect();

        debug!(signer = %signer_ref, key_id = %id, "signed schema blob");
        Ok(format!("{payload},\"camliSig\":\"{sig}\"}}\n"))
    }
}
