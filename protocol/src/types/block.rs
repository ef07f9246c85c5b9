//! # Block Structure
//!
//! Headers, blocks, transactions and receipts as the consensus core sees
//! them.
//!
//! ## Header Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  BlockHeader                                 │
//! │  ├── height, parent_hash, time, leader       │
//! │  ├── state_root, tx_root, receipt_root       │
//! │  ├── bloom, gas_limit, gas_used              │
//! │  ├── version, vrf_value                      │
//! │  ├── net_topology, elect                     │
//! │  ├── consensus_turn                          │
//! │  ├── signatures   ┐ excluded from            │
//! │  └── nonce        ┘ hash_no_sign_nonce()     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Hash Computation
//!
//! Validators vote on [`BlockHeader::hash_no_sign_nonce`]: BLAKE3 over the
//! bincode encoding of every field except `signatures` and `nonce`. The
//! votes become the signatures, and the miner fills the nonce afterwards,
//! so neither may feed the hash they are attached to.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::hash::{blake3_hash, hash_encoded, merkle_root};
use crate::crypto::keys::Signature;
use crate::types::{Address, ConsensusTurn, Hash};

/// Reference to a transaction inside a proposal: the transaction's hash.
pub type TxCode = Hash;

// ---------------------------------------------------------------------------
// Transaction & Receipt
// ---------------------------------------------------------------------------

/// A value transfer. Execution semantics belong to the chain backend; the
/// consensus core only moves transactions around and hashes them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: Address,
    pub to: Address,
    pub amount: u64,
    pub nonce: u64,
    pub gas: u64,
}

impl Transaction {
    /// The code proposals use to reference this transaction.
    pub fn code(&self) -> TxCode {
        hash_encoded(self)
    }
}

/// Outcome of executing one transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_code: TxCode,
    pub success: bool,
    pub gas_used: u64,
}

// ---------------------------------------------------------------------------
// BlockHeader
// ---------------------------------------------------------------------------

/// Header fields compared when a re-executed header disagrees with the
/// proposal. Used for diagnostics only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderField {
    StateRoot,
    TxRoot,
    ReceiptRoot,
    Bloom,
    GasUsed,
    /// Some other hashed field differs (version, topology, election ...).
    Other,
}

impl fmt::Display for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StateRoot => "state_root",
            Self::TxRoot => "tx_root",
            Self::ReceiptRoot => "receipt_root",
            Self::Bloom => "bloom",
            Self::GasUsed => "gas_used",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// A block header.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height (genesis = 0).
    pub height: u64,
    /// Hash (no signatures, no nonce) of the parent header.
    pub parent_hash: Hash,
    /// Unix timestamp in seconds.
    pub time: i64,
    /// Address of the proposing leader.
    pub leader: Address,
    pub state_root: Hash,
    pub tx_root: Hash,
    pub receipt_root: Hash,
    /// 256-bit log bloom digest.
    pub bloom: [u8; 32],
    pub gas_limit: u64,
    pub gas_used: u64,
    /// Protocol version string the leader built this block under.
    pub version: String,
    /// VRF output supplied by the leader.
    pub vrf_value: Vec<u8>,
    /// Validator topology the leader observed.
    pub net_topology: Vec<Address>,
    /// Election results carried by this block, if any.
    pub elect: Vec<Address>,
    /// Turn under which this header was proposed.
    pub consensus_turn: ConsensusTurn,
    /// Quorum of validator signatures over `hash_no_sign_nonce()`.
    pub signatures: Vec<Signature>,
    pub nonce: u64,
}

/// Borrowed view over the hashed header fields.
#[derive(Serialize)]
struct HashedFields<'a> {
    height: u64,
    parent_hash: &'a Hash,
    time: i64,
    leader: &'a Address,
    state_root: &'a Hash,
    tx_root: &'a Hash,
    receipt_root: &'a Hash,
    bloom: &'a [u8; 32],
    gas_limit: u64,
    gas_used: u64,
    version: &'a str,
    vrf_value: &'a [u8],
    net_topology: &'a [Address],
    elect: &'a [Address],
    consensus_turn: &'a ConsensusTurn,
}

impl BlockHeader {
    /// The hash validators sign: every field except signatures and nonce.
    pub fn hash_no_sign_nonce(&self) -> Hash {
        hash_encoded(&HashedFields {
            height: self.height,
            parent_hash: &self.parent_hash,
            time: self.time,
            leader: &self.leader,
            state_root: &self.state_root,
            tx_root: &self.tx_root,
            receipt_root: &self.receipt_root,
            bloom: &self.bloom,
            gas_limit: self.gas_limit,
            gas_used: self.gas_used,
            version: &self.version,
            vrf_value: &self.vrf_value,
            net_topology: &self.net_topology,
            elect: &self.elect,
            consensus_turn: &self.consensus_turn,
        })
    }

    /// Fields of the execution result that differ between `self` and
    /// `other`. Returns `[HeaderField::Other]` when the headers hash
    /// differently but none of the execution fields explain it.
    pub fn execution_mismatches(&self, other: &BlockHeader) -> Vec<HeaderField> {
        let mut fields = Vec::new();
        if self.state_root != other.state_root {
            fields.push(HeaderField::StateRoot);
        }
        if self.tx_root != other.tx_root {
            fields.push(HeaderField::TxRoot);
        }
        if self.receipt_root != other.receipt_root {
            fields.push(HeaderField::ReceiptRoot);
        }
        if self.bloom != other.bloom {
            fields.push(HeaderField::Bloom);
        }
        if self.gas_used != other.gas_used {
            fields.push(HeaderField::GasUsed);
        }
        if fields.is_empty() && self.hash_no_sign_nonce() != other.hash_no_sign_nonce() {
            fields.push(HeaderField::Other);
        }
        fields
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// Header plus the ordered transactions it commits to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Convenience accessor for the signed hash.
    pub fn hash(&self) -> Hash {
        self.header.hash_no_sign_nonce()
    }

    /// Codes of the contained transactions, in block order.
    pub fn tx_codes(&self) -> Vec<TxCode> {
        self.transactions.iter().map(Transaction::code).collect()
    }
}

/// Merkle root over transaction codes.
pub fn compute_tx_root(txs: &[Transaction]) -> Hash {
    let leaves: Vec<Hash> = txs.iter().map(Transaction::code).collect();
    merkle_root(&leaves)
}

/// Merkle root over receipts.
pub fn compute_receipt_root(receipts: &[Receipt]) -> Hash {
    let leaves: Vec<Hash> = receipts.iter().map(hash_encoded).collect();
    merkle_root(&leaves)
}

/// Folds receipts into a 256-bit bloom: one bit per successful
/// transaction code.
pub fn compute_bloom(receipts: &[Receipt]) -> [u8; 32] {
    let mut bloom = [0u8; 32];
    for receipt in receipts.iter().filter(|r| r.success) {
        let digest = blake3_hash(receipt.tx_code.as_bytes());
        let bit = u16::from_le_bytes([digest.0[0], digest.0[1]]) as usize % 256;
        bloom[bit / 8] |= 1 << (bit % 8);
    }
    bloom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::ValidatorKeypair;

    fn sample_header() -> BlockHeader {
        BlockHeader {
            height: 7,
            parent_hash: blake3_hash(b"parent"),
            time: 1_700_000_000,
            leader: Address([1u8; 20]),
            state_root: blake3_hash(b"state"),
            gas_limit: 1_000_000,
            version: "1.0.0".into(),
            ..BlockHeader::default()
        }
    }

    #[test]
    fn signatures_and_nonce_do_not_change_hash() {
        let header = sample_header();
        let base = header.hash_no_sign_nonce();

        let mut sealed = header.clone();
        sealed.nonce = 99;
        sealed.signatures.push(ValidatorKeypair::generate().sign(b"x"));
        assert_eq!(sealed.hash_no_sign_nonce(), base);
    }

    #[test]
    fn execution_fields_change_hash() {
        let header = sample_header();
        let mut other = header.clone();
        other.gas_used = 21_000;
        other.state_root = blake3_hash(b"different");
        assert_ne!(header.hash_no_sign_nonce(), other.hash_no_sign_nonce());
        assert_eq!(
            header.execution_mismatches(&other),
            vec![HeaderField::StateRoot, HeaderField::GasUsed]
        );
    }

    #[test]
    fn non_execution_difference_reports_other() {
        let header = sample_header();
        let mut other = header.clone();
        other.version = "2.0.0".into();
        assert_eq!(header.execution_mismatches(&other), vec![HeaderField::Other]);
        assert!(header.execution_mismatches(&header).is_empty());
    }

    #[test]
    fn tx_codes_follow_block_order() {
        let tx = |n| Transaction {
            from: Address([1; 20]),
            to: Address([2; 20]),
            amount: n,
            nonce: n,
            gas: 21_000,
        };
        let block = Block {
            header: sample_header(),
            transactions: vec![tx(1), tx(2)],
        };
        assert_eq!(block.tx_codes(), vec![tx(1).code(), tx(2).code()]);
        assert_ne!(compute_tx_root(&block.transactions), Hash::ZERO);
    }
}
