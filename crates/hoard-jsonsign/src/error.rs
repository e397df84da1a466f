//! Error types for signing and verification.

/// Errors from the signing layer.
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    /// The input was not a JSON object ending in `}`.
    #[error("input is not a JSON object: {0}")]
    InputJson(String),

    /// The unsigned JSON lacks a `camliSigner` key.
    #[error("json lacks camliSigner key with public key blobref")]
    MissingSigner,

    /// The `camliSigner` value is not a valid blob ref.
    #[error("camliSigner key is malformed or unsupported")]
    MalformedSigner,

    /// The signed JSON lacks a `camliSig` value.
    #[error("json lacks camliSig signature")]
    MissingSig,

    /// The signer's public-key blob could not be fetched.
    #[error("failed to find public key {0}")]
    PublicKeyFetch(hoard_types::BlobRef),

    /// The public-key blob did not parse as an armored key.
    #[error("bad public key blob: {0}")]
    BadPublicKey(String),

    /// The armor framing is malformed.
    #[error("bad armor: {0}")]
    BadArmor(String),

    /// No secret key for the given key id exists in the keyring.
    #[error("no secret key for key id {0} in keyring")]
    KeyNotFound(String),

    /// The user gave up on decrypting the secret key.
    #[error("failed to decrypt key; action canceled")]
    DecryptCanceled,

    /// The passphrase failed to decrypt the secret key.
    #[error("failed to decrypt key {0}")]
    DecryptFailed(String),

    /// The keyring secret key does not match the referenced public key.
    #[error("keyring key {0} does not match camliSigner public key")]
    KeyMismatch(String),

    /// The signature does not verify against the signer's public key.
    #[error("signature verification failed")]
    BadSignature,

    /// Cryptographic plumbing failure.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Failure fetching the public-key blob.
    #[error(transparent)]
    Store(#[from] hoard_store::StoreError),

    /// Keyring file I/O failure.
    #[error("keyring io error: {0}")]
    Io(#[from] std::io::Error),

    /// Keyring file encode/decode failure.
    #[error("keyring format error: {0}")]
    KeyringFormat(#[from] serde_json::Error),
}
