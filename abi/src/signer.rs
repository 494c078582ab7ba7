use std::sync::Arc;

use everscale_crypto::ed25519;
use everscale_types::prelude::*;
use sha2::{Digest, Sha256};

use crate::error::EncodingError;

/// Ed25519 key pair used to sign external call bodies.
#[derive(Clone)]
pub struct Signer {
    inner: Arc<Inner>,
}

struct Inner {
    keypair: ed25519::KeyPair,
    public: ed25519::PublicKey,
}

impl Signer {
    pub fn from_secret(secret: [u8; 32]) -> Self {
        let secret = ed25519::SecretKey::from_bytes(secret);
        Self {
            inner: Arc::new(Inner {
                keypair: ed25519::KeyPair::from(&secret),
                public: ed25519::PublicKey::from(&secret),
            }),
        }
    }

    pub fn from_secret_hex(secret: &str) -> Result<Self, EncodingError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(secret.trim(), &mut bytes)?;
        Ok(Self::from_secret(bytes))
    }

    /// Deterministic key pair derived from an arbitrary seed phrase.
    pub fn from_seed(seed: &str) -> Self {
        Self::from_secret(Sha256::digest(seed.as_bytes()).into())
    }

    pub fn public_key(&self) -> HashBytes {
        HashBytes(self.inner.public.to_bytes())
    }

    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        self.inner.keypair.sign_raw(data)
    }

    /// Signs the representation hash of a cell.
    pub fn sign_cell(&self, cell: &DynCell) -> [u8; 64] {
        self.sign(&cell.repr_hash().0)
    }

    pub fn verify(&self, data: &[u8], signature: &[u8; 64]) -> bool {
        self.inner.public.verify_raw(data, signature)
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("public_key", &hex::encode(self.public_key().0))
            .finish()
    }
}

impl PartialEq for Signer {
    fn eq(&self, other: &Self) -> bool {
        self.public_key() == other.public_key()
    }
}

impl Eq for Signer {}
