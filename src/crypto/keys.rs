//! ECDSA keys, signatures and addresses
//!
//! Key pairs live on secp256k1. Signatures are 64-byte compact ECDSA over
//! a 32-byte message digest. Addresses are Base58Check over a network
//! version byte followed by the HASH160 of the compressed public key.

use crate::crypto::hash::{hash160, sha256, PubKeyHash};
use crate::params::Network;
use secp256k1::ecdsa::Signature;
use secp256k1::rand::rngs::OsRng;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use thiserror::Error;

/// Errors from key handling and address parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid secret key")]
    InvalidSecretKey,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid address encoding")]
    InvalidAddress,
    #[error("address checksum mismatch")]
    BadChecksum,
    #[error("wrong address version byte: expected {expected}, got {actual}")]
    WrongVersion { expected: u8, actual: u8 },
}

/// An secp256k1 key pair
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a fresh random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    /// Reconstruct a key pair from a 32-byte secret key
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(bytes).map_err(|_| KeyError::InvalidSecretKey)?;
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Ok(KeyPair {
            secret_key,
            public_key,
        })
    }

    /// Sign a 32-byte digest, returning the 64-byte compact signature
    pub fn sign(&self, digest: &[u8; 32]) -> Result<Vec<u8>, KeyError> {
        let secp = Secp256k1::new();
        let message =
            Message::from_digest_slice(digest).map_err(|_| KeyError::InvalidSignature)?;
        let signature = secp.sign_ecdsa(&message, &self.secret_key);
        Ok(signature.serialize_compact().to_vec())
    }

    /// The 33-byte compressed public key encoding
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key.serialize().to_vec()
    }

    /// Locking hash of the compressed public key
    pub fn pubkey_hash(&self) -> PubKeyHash {
        hash160(&self.public_key.serialize())
    }

    /// Address of this key on the given network
    pub fn address(&self, network: Network) -> String {
        encode_address(network, &self.pubkey_hash())
    }
}

/// Verify a 64-byte compact signature over a digest with a 33-byte
/// compressed public key.
pub fn verify_signature(public_key: &[u8], digest: &[u8; 32], signature: &[u8]) -> bool {
    let secp = Secp256k1::verification_only();
    let public_key = match PublicKey::from_slice(public_key) {
        Ok(pk) => pk,
        Err(_) => return false,
    };
    let message = match Message::from_digest_slice(digest) {
        Ok(m) => m,
        Err(_) => return false,
    };
    let signature = match Signature::from_compact(signature) {
        Ok(s) => s,
        Err(_) => return false,
    };
    secp.verify_ecdsa(&message, &signature, &public_key).is_ok()
}

// =============================================================================
// Addresses
// =============================================================================

/// Base58Check-encode a locking hash as an address
pub fn encode_address(network: Network, hash: &PubKeyHash) -> String {
    let mut payload = Vec::with_capacity(25);
    payload.push(network.address_version());
    payload.extend_from_slice(hash.as_bytes());
    let checksum = sha256(&sha256(&payload));
    payload.extend_from_slice(&checksum[..4]);
    bs58::encode(payload).into_string()
}

/// Decode an address, checking the checksum and the network version byte
pub fn decode_address(network: Network, address: &str) -> Result<PubKeyHash, KeyError> {
    let payload = bs58::decode(address)
        .into_vec()
        .map_err(|_| KeyError::InvalidAddress)?;
    if payload.len() != 25 {
        return Err(KeyError::InvalidAddress);
    }
    let (body, checksum) = payload.split_at(21);
    let expected = sha256(&sha256(body));
    if checksum != &expected[..4] {
        return Err(KeyError::BadChecksum);
    }
    if body[0] != network.address_version() {
        return Err(KeyError::WrongVersion {
            expected: network.address_version(),
            actual: body[0],
        });
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&body[1..]);
    Ok(PubKeyHash(hash))
}
