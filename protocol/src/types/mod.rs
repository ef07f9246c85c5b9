//! # Core Types
//!
//! Identifiers, turns, headers and blocks shared by the consensus core and
//! its collaborators.

pub mod block;
pub mod primitives;
pub mod turn;

pub use block::{
    compute_bloom, compute_receipt_root, compute_tx_root, Block, BlockHeader, HeaderField,
    Receipt, Transaction, TxCode,
};
pub use primitives::{Address, Hash, ADDRESS_LENGTH, HASH_LENGTH};
pub use turn::{ConsensusTurn, ReelectTurn};
