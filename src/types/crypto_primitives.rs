/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! All signatures in the protocol are recoverable ECDSA over secp256k1, produced over Keccak-256
//! digests, so that a signer's [`Address`] can be recovered from any (digest, signature) pair
//! without shipping public keys on the wire.

use sha3::{Digest, Keccak256};

use crate::errors::ConsensusError;
use crate::types::data_types::{Address, Hash, SignatureBytes};

// re-exports below.
pub use k256::ecdsa::{SigningKey, VerifyingKey};

use k256::ecdsa::{RecoveryId, Signature};

const SIGNING_FAILED: &str = "ECDSA signing over a 32-byte digest cannot fail for a valid key";

/// Compute the Keccak-256 hash of `data`.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    Hash::new(hasher.finalize().into())
}

/// Derive the 20-byte address of a secp256k1 public key: the last 20 bytes of the Keccak-256
/// hash of the uncompressed encoding (without the 0x04 prefix byte).
pub fn public_key_address(verifying_key: &VerifyingKey) -> Address {
    let encoded = verifying_key.to_encoded_point(false);
    let digest = keccak256(&encoded.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest.bytes()[12..]);
    Address::new(address)
}

/// Recover the address that produced `signature` over the 32-byte `digest`.
///
/// Fails with [`ConsensusError::InvalidSignature`] if the signature bytes are malformed or do
/// not recover to any point on the curve.
pub fn recover(digest: &Hash, signature: &SignatureBytes) -> Result<Address, ConsensusError> {
    let bytes = signature.bytes();
    let signature =
        Signature::from_slice(&bytes[..64]).map_err(|_| ConsensusError::InvalidSignature)?;
    let recovery_id =
        RecoveryId::from_byte(bytes[64]).ok_or(ConsensusError::InvalidSignature)?;
    let verifying_key =
        VerifyingKey::recover_from_prehash(&digest.bytes(), &signature, recovery_id)
            .map_err(|_| ConsensusError::InvalidSignature)?;
    Ok(public_key_address(&verifying_key))
}

/// A wrapper around [`SigningKey`] that produces the protocol's 65-byte recoverable signatures
/// and exposes the signer's derived [`Address`].
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    /// Create a new `Keypair` wrapping `signing_key`.
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Load a `Keypair` from a raw 32-byte secret scalar.
    ///
    /// Fails with [`ConsensusError::Fatal`] if the bytes are not a valid secret key. Key
    /// material problems at startup are fatal and must reach the operator.
    pub fn from_bytes(secret: [u8; 32]) -> Result<Keypair, ConsensusError> {
        let signing_key = SigningKey::from_bytes(&secret.into())
            .map_err(|err| ConsensusError::Fatal(format!("invalid secret key: {err}")))?;
        Ok(Keypair(signing_key))
    }

    /// Sign the Keccak-256 digest of `message`.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        self.sign_hash(&keccak256(message))
    }

    /// Sign a precomputed 32-byte `digest`.
    pub fn sign_hash(&self, digest: &Hash) -> SignatureBytes {
        let (signature, recovery_id) = self
            .0
            .sign_prehash_recoverable(&digest.bytes())
            .expect(SIGNING_FAILED);
        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(signature.to_bytes().as_slice());
        bytes[64] = recovery_id.to_byte();
        SignatureBytes::new(bytes)
    }

    /// Get the public half of this `Keypair`.
    pub fn public(&self) -> VerifyingKey {
        *self.0.verifying_key()
    }

    /// Get the address derived from this `Keypair`'s public key.
    pub fn address(&self) -> Address {
        public_key_address(&self.public())
    }
}
