//! Blocks and block headers
//!
//! The header is exactly 80 bytes on the wire and is the sole input to
//! the proof of work: version, previous hash, merkle root, timestamp,
//! compact difficulty bits and nonce, all little-endian with hashes in
//! their internal byte order. The body is a varint transaction count
//! followed by the canonical transaction encodings.

use crate::core::encode::{write_varint, DecodeError, Reader};
use crate::core::transaction::Transaction;
use crate::crypto::hash::{sha256d, BlockHash, Hash256};
use crate::crypto::merkle::merkle_root;
use crate::params::{self, Network, MAX_BLOCK_SIZE};
use serde::{Deserialize, Serialize};

/// Serialized header size
pub const HEADER_SIZE: usize = 80;

// =============================================================================
// BlockHeader
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub previous_hash: BlockHash,
    pub merkle_root: Hash256,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// The 80-byte wire encoding, preimage of the block hash.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.version.to_le_bytes());
        buf[4..36].copy_from_slice(self.previous_hash.as_bytes());
        buf[36..68].copy_from_slice(self.merkle_root.as_bytes());
        buf[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[72..76].copy_from_slice(&self.bits.to_le_bytes());
        buf[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        buf
    }

    pub(crate) fn decode_from(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(BlockHeader {
            version: reader.read_u32_le()?,
            previous_hash: Hash256(reader.read_array::<32>()?),
            merkle_root: Hash256(reader.read_array::<32>()?),
            timestamp: reader.read_u32_le()?,
            bits: reader.read_u32_le()?,
            nonce: reader.read_u32_le()?,
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        let header = BlockHeader::decode_from(&mut reader)?;
        reader.finish()?;
        Ok(header)
    }

    pub fn hash(&self) -> BlockHash {
        sha256d(&self.encode())
    }
}

// =============================================================================
// Block
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }

    /// Merkle root computed from the body, to be checked against the header.
    pub fn compute_merkle_root(&self) -> Hash256 {
        let txids: Vec<_> = self.transactions.iter().map(|tx| tx.txid()).collect();
        merkle_root(&txids)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + 64 * self.transactions.len());
        buf.extend_from_slice(&self.header.encode());
        write_varint(&mut buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            buf.extend_from_slice(&tx.encode());
        }
        buf
    }

    /// Decode a full block, rejecting oversized or trailing input.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() > MAX_BLOCK_SIZE {
            return Err(DecodeError::Oversized {
                declared: bytes.len() as u64,
                limit: MAX_BLOCK_SIZE as u64,
            });
        }
        let mut reader = Reader::new(bytes);
        let header = BlockHeader::decode_from(&mut reader)?;
        let tx_count = reader.read_count(MAX_BLOCK_SIZE as u64)?;
        let mut transactions = Vec::with_capacity(tx_count.min(4096) as usize);
        for _ in 0..tx_count {
            transactions.push(Transaction::decode_from(&mut reader)?);
        }
        reader.finish()?;
        Ok(Block {
            header,
            transactions,
        })
    }

    pub fn size(&self) -> usize {
        self.encode().len()
    }

    /// The fixed genesis block of a network. Its coinbase pays the full
    /// initial subsidy to the all-zero locking hash, so the output can
    /// never be spent.
    pub fn genesis(network: Network) -> Self {
        let coinbase = Transaction::coinbase(
            0,
            params::block_subsidy(0),
            crate::crypto::hash::PubKeyHash::ZERO,
            params::GENESIS_MESSAGE,
        );
        let txids = vec![coinbase.txid()];
        let header = BlockHeader {
            version: 1,
            previous_hash: Hash256::ZERO,
            merkle_root: merkle_root(&txids),
            timestamp: params::GENESIS_TIMESTAMP,
            bits: network.pow_limit_bits(),
            nonce: 0,
        };
        Block {
            header,
            transactions: vec![coinbase],
        }
    }
}
