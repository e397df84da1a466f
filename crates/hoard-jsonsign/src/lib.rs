//! Detached, armored signatures embedded in schema JSON.
//!
//! Signing takes an unsigned canonical JSON object that already carries a
//! `camliSigner` key (the ref of an armored public-key blob), strips the
//! trailing `}`, signs the remaining bytes with the matching secret key
//! from the keyring, and splices the armor's base64 body back in as
//! `,"camliSig":"<sig>"}`. Verification inverts the splice.
//!
//! Secret keys live in a keyring file, each sealed with a key derived from
//! a passphrase (argon2id) and XChaCha20Poly1305. Decryption happens on
//! demand through a [`PassphraseSource`], with two attempts before the
//! operation is canceled; decrypted keys can be cached process-wide with
//! [`CachingKeyFetcher`].

mod armor;
mod error;
mod keyring;
mod sign;
mod verify;

pub use armor::{PUBKEY_FOOTER, PUBKEY_HEADER, SIG_FOOTER, SIG_HEADER, armor, unarmor};
pub use error::SignError;
pub use keyring::{
    CachingKeyFetcher, EnvPassphrase, KeyFetcher, Keyring, KeyringFetcher, PassphraseSource,
    StaticPassphrase, armored_public_key, generate_signing_key, key_id, parse_armored_public_key,
};
pub use sign::SignRequest;
pub use verify::{VerifyRequest, VerifyResult};

/// The splice point between the signed bytes and the signature.
pub(crate) const SIG_SEPARATOR: &str = ",\"camliSig\":\"";
