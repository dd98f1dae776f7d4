//! Signing and payload encryption, consumed as opaque capabilities.

use async_trait::async_trait;

use crate::{EventRecord, NostrError, UnsignedEvent};

/// Encrypts and decrypts direct-message payloads for the local key.
///
/// Implementations hold the local secret (or talk to a remote signer); peers
/// are raw participant ids. A failed decrypt is an error, never an empty
/// string.
#[async_trait]
pub trait Cipher: Send + Sync {
    async fn encrypt(&self, peer: &str, plaintext: &str) -> Result<String, NostrError>;

    async fn decrypt(&self, peer: &str, ciphertext: &str) -> Result<String, NostrError>;
}

/// Signs events on behalf of the local participant.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Raw participant id of the signing key.
    fn public_key(&self) -> &str;

    async fn sign(&self, unsigned: UnsignedEvent) -> Result<EventRecord, NostrError>;
}
