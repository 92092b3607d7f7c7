//! Cryptographic primitives
//!
//! Double-SHA256 ids, HASH160 locking hashes, secp256k1 signatures,
//! Base58Check addresses, and merkle trees.

pub mod hash;
pub mod keys;
pub mod merkle;

pub use hash::{hash160, sha256, sha256d, BlockHash, Hash256, PubKeyHash, TxId};
pub use keys::{decode_address, encode_address, verify_signature, KeyError, KeyPair};
pub use merkle::merkle_root;
