//! Transactions
//!
//! A transaction spends previous outputs and creates new ones. Every
//! output locks an amount to a HASH160 of a public key; every input
//! proves ownership with a compressed public key and a compact ECDSA
//! signature over the transaction's signing digest.
//!
//! The canonical encoding is what gets hashed for the txid:
//! version | varint(inputs) | inputs | varint(outputs) | outputs | locktime
//! with all integers little-endian. The signing digest is sha256d over
//! the same encoding with every input's signature and public key fields
//! replaced by empty strings, which commits signatures to all inputs and
//! outputs at once.

use crate::core::encode::{write_bytes, write_varint, DecodeError, Reader};
use crate::crypto::hash::{sha256d, Hash256, PubKeyHash, TxId};
use crate::crypto::keys::{KeyError, KeyPair};
use crate::params::MAX_TX_SIZE;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors constructing or signing transactions
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("transaction has no inputs")]
    NoInputs,
    #[error("transaction has no outputs")]
    NoOutputs,
    #[error("input index {0} out of range")]
    InputOutOfRange(usize),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
}

// =============================================================================
// OutPoint
// =============================================================================

/// Reference to a specific output of a previous transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub txid: TxId,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: TxId, vout: u32) -> Self {
        OutPoint { txid, vout }
    }

    /// The sentinel outpoint carried by coinbase inputs
    pub fn coinbase_marker() -> Self {
        OutPoint {
            txid: Hash256::ZERO,
            vout: u32::MAX,
        }
    }

    pub fn is_coinbase_marker(&self) -> bool {
        self.txid.is_zero() && self.vout == u32::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

impl FromStr for OutPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, vout) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("malformed outpoint: {}", s))?;
        Ok(OutPoint {
            txid: txid.parse().map_err(|e| format!("{}", e))?,
            vout: vout.parse().map_err(|_| format!("bad output index: {}", vout))?,
        })
    }
}

// Serialized as "txid:vout" so outpoints work as JSON map keys
impl Serialize for OutPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for OutPoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Inputs and outputs
// =============================================================================

/// Transaction input: an outpoint plus the ownership proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub outpoint: OutPoint,
    /// Compact 64-byte ECDSA signature. Coinbase inputs carry arbitrary
    /// miner data here instead.
    #[serde(with = "hex")]
    pub signature: Vec<u8>,
    /// 33-byte compressed public key. Empty on coinbase inputs.
    #[serde(with = "hex")]
    pub public_key: Vec<u8>,
}

impl TxInput {
    pub fn new(outpoint: OutPoint) -> Self {
        TxInput {
            outpoint,
            signature: Vec::new(),
            public_key: Vec::new(),
        }
    }
}

/// Transaction output: an amount locked to a public key hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub amount: u64,
    pub pubkey_hash: PubKeyHash,
}

impl TxOutput {
    pub fn new(amount: u64, pubkey_hash: PubKeyHash) -> Self {
        TxOutput {
            amount,
            pubkey_hash,
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// Maximum miner data carried in a coinbase input beyond the height
pub const MAX_COINBASE_DATA: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub locktime: u32,
}

impl Transaction {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Transaction {
            version: 1,
            inputs,
            outputs,
            locktime: 0,
        }
    }

    /// Build a coinbase transaction claiming `value` at `height`. The
    /// height is committed in the input data so coinbases at different
    /// heights never share a txid.
    pub fn coinbase(height: u64, value: u64, payout: PubKeyHash, message: &str) -> Self {
        let mut data = Vec::with_capacity(4 + MAX_COINBASE_DATA);
        data.extend_from_slice(&(height as u32).to_le_bytes());
        let message = message.as_bytes();
        data.extend_from_slice(&message[..message.len().min(MAX_COINBASE_DATA)]);

        let mut input = TxInput::new(OutPoint::coinbase_marker());
        input.signature = data;

        Transaction::new(vec![input], vec![TxOutput::new(value, payout)])
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].outpoint.is_coinbase_marker()
    }

    /// Sum of output amounts. None on overflow.
    pub fn total_output(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |sum, out| sum.checked_add(out.amount))
    }

    // -------------------------------------------------------------------------
    // Encoding
    // -------------------------------------------------------------------------

    fn encode_with(&self, for_sighash: bool) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.inputs.len() * 130 + self.outputs.len() * 28);
        buf.extend_from_slice(&self.version.to_le_bytes());
        write_varint(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            buf.extend_from_slice(input.outpoint.txid.as_bytes());
            buf.extend_from_slice(&input.outpoint.vout.to_le_bytes());
            if for_sighash {
                write_varint(&mut buf, 0);
                write_varint(&mut buf, 0);
            } else {
                write_bytes(&mut buf, &input.signature);
                write_bytes(&mut buf, &input.public_key);
            }
        }
        write_varint(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            buf.extend_from_slice(&output.amount.to_le_bytes());
            buf.extend_from_slice(output.pubkey_hash.as_bytes());
        }
        buf.extend_from_slice(&self.locktime.to_le_bytes());
        buf
    }

    /// Canonical encoding, the preimage of the txid.
    pub fn encode(&self) -> Vec<u8> {
        self.encode_with(false)
    }

    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        self.encode().len()
    }

    pub fn txid(&self) -> TxId {
        sha256d(&self.encode())
    }

    /// The digest every input signs.
    pub fn sighash(&self) -> Hash256 {
        sha256d(&self.encode_with(true))
    }

    /// Decode from an in-progress reader, as used inside block bodies.
    pub(crate) fn decode_from(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let limit = MAX_TX_SIZE as u64;
        let version = reader.read_u32_le()?;

        let input_count = reader.read_count(limit)?;
        let mut inputs = Vec::with_capacity(input_count.min(1024) as usize);
        for _ in 0..input_count {
            let txid = Hash256(reader.read_array::<32>()?);
            let vout = reader.read_u32_le()?;
            let signature = reader.read_bytes(limit)?;
            let public_key = reader.read_bytes(limit)?;
            inputs.push(TxInput {
                outpoint: OutPoint::new(txid, vout),
                signature,
                public_key,
            });
        }

        let output_count = reader.read_count(limit)?;
        let mut outputs = Vec::with_capacity(output_count.min(1024) as usize);
        for _ in 0..output_count {
            let amount = reader.read_u64_le()?;
            let pubkey_hash = PubKeyHash(reader.read_array::<20>()?);
            outputs.push(TxOutput {
                amount,
                pubkey_hash,
            });
        }

        let locktime = reader.read_u32_le()?;
        Ok(Transaction {
            version,
            inputs,
            outputs,
            locktime,
        })
    }

    /// Decode a standalone transaction, rejecting trailing bytes and
    /// oversized encodings.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() > MAX_TX_SIZE {
            return Err(DecodeError::Oversized {
                declared: bytes.len() as u64,
                limit: MAX_TX_SIZE as u64,
            });
        }
        let mut reader = Reader::new(bytes);
        let tx = Transaction::decode_from(&mut reader)?;
        reader.finish()?;
        Ok(tx)
    }

    // -------------------------------------------------------------------------
    // Signing
    // -------------------------------------------------------------------------

    /// Sign a single input with the given key.
    pub fn sign_input(&mut self, index: usize, keypair: &KeyPair) -> Result<(), TransactionError> {
        if index >= self.inputs.len() {
            return Err(TransactionError::InputOutOfRange(index));
        }
        let digest = *self.sighash().as_bytes();
        let signature = keypair.sign(&digest)?;
        let input = &mut self.inputs[index];
        input.signature = signature;
        input.public_key = keypair.public_key_bytes();
        Ok(())
    }

    /// Sign every input with the same key.
    pub fn sign(&mut self, keypair: &KeyPair) -> Result<(), TransactionError> {
        if self.inputs.is_empty() {
            return Err(TransactionError::NoInputs);
        }
        // All proofs cleared first so every input signs the same digest
        for input in &mut self.inputs {
            input.signature.clear();
            input.public_key.clear();
        }
        let digest = *self.sighash().as_bytes();
        let signature = keypair.sign(&digest)?;
        let public_key = keypair.public_key_bytes();
        for input in &mut self.inputs {
            input.signature = signature.clone();
            input.public_key = public_key.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::verify_signature;

    fn sample_tx() -> Transaction {
        let prev = sha256d(b"previous tx");
        Transaction::new(
            vec![TxInput::new(OutPoint::new(prev, 1))],
            vec![
                TxOutput::new(50_000, PubKeyHash([7u8; 20])),
                TxOutput::new(25_000, PubKeyHash([9u8; 20])),
            ],
        )
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut tx = sample_tx();
        tx.sign(&KeyPair::generate()).unwrap();

        let bytes = tx.encode();
        let decoded = Transaction::decode(&bytes).unwrap();
        assert_eq!(tx, decoded);
        assert_eq!(tx.txid(), decoded.txid());
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = sample_tx().encode();
        bytes.push(0);
        assert_eq!(Transaction::decode(&bytes), Err(DecodeError::TrailingBytes));
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let bytes = sample_tx().encode();
        assert!(Transaction::decode(&bytes[..bytes.len() - 2]).is_err());
    }

    #[test]
    fn test_txid_commits_to_outputs() {
        let tx = sample_tx();
        let mut other = tx.clone();
        other.outputs[0].amount += 1;
        assert_ne!(tx.txid(), other.txid());
    }

    #[test]
    fn test_sighash_ignores_proofs() {
        let mut tx = sample_tx();
        let before = tx.sighash();
        tx.sign(&KeyPair::generate()).unwrap();
        assert_eq!(before, tx.sighash());
        // But the txid does change once proofs are attached
        assert_ne!(tx.txid(), sample_tx().txid());
    }

    #[test]
    fn test_signature_verifies_against_sighash() {
        let keypair = KeyPair::generate();
        let mut tx = sample_tx();
        tx.sign(&keypair).unwrap();

        let input = &tx.inputs[0];
        assert!(verify_signature(
            &input.public_key,
            tx.sighash().as_bytes(),
            &input.signature
        ));
    }

    #[test]
    fn test_coinbase_shape() {
        let cb = Transaction::coinbase(42, 100_000, PubKeyHash([1u8; 20]), "hello miner");
        assert!(cb.is_coinbase());
        assert_eq!(cb.outputs[0].amount, 100_000);
        // Height is the first four bytes of the input data
        assert_eq!(&cb.inputs[0].signature[..4], &42u32.to_le_bytes());
    }

    #[test]
    fn test_coinbase_txids_differ_by_height() {
        let a = Transaction::coinbase(1, 100, PubKeyHash::ZERO, "");
        let b = Transaction::coinbase(2, 100, PubKeyHash::ZERO, "");
        assert_ne!(a.txid(), b.txid());
    }

    #[test]
    fn test_coinbase_message_truncated() {
        let long = "x".repeat(500);
        let cb = Transaction::coinbase(0, 100, PubKeyHash::ZERO, &long);
        assert_eq!(cb.inputs[0].signature.len(), 4 + MAX_COINBASE_DATA);
    }

    #[test]
    fn test_total_output_overflow() {
        let tx = Transaction::new(
            vec![TxInput::new(OutPoint::new(Hash256::ZERO, 0))],
            vec![
                TxOutput::new(u64::MAX, PubKeyHash::ZERO),
                TxOutput::new(1, PubKeyHash::ZERO),
            ],
        );
        assert_eq!(tx.total_output(), None);
    }

    #[test]
    fn test_outpoint_string_form() {
        let op = OutPoint::new(sha256d(b"op"), 3);
        let parsed: OutPoint = op.to_string().parse().unwrap();
        assert_eq!(op, parsed);
    }
}
