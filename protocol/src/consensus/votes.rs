//! # Vote Ledger
//!
//! Weighted, signer-deduplicated votes for one proposal, plus the bounded
//! pool that parks votes whose proposal has not arrived yet.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::messages::VoteMessage;
use crate::crypto::keys::Signature;
use crate::types::{Address, Hash};

/// A verified vote counted toward quorum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub sign_hash: Hash,
    pub signature: Signature,
    pub signer: Address,
    pub is_valid: bool,
    /// Stake the signer carries at this height.
    pub weight: u64,
}

// ---------------------------------------------------------------------------
// VoteLedger
// ---------------------------------------------------------------------------

/// Votes for one proposal, at most one per signer, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct VoteLedger {
    votes: Vec<Vote>,
    signers: HashSet<Address>,
}

impl VoteLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a vote. A second vote from the same signer is ignored and
    /// `false` is returned.
    pub fn add_vote(&mut self, vote: Vote) -> bool {
        if !self.signers.insert(vote.signer) {
            debug!(signer = %vote.signer, hash = %vote.sign_hash.short(), "duplicate vote ignored");
            return false;
        }
        self.votes.push(vote);
        true
    }

    pub fn votes(&self) -> &[Vote] {
        &self.votes
    }

    pub fn has_vote_from(&self, signer: &Address) -> bool {
        self.signers.contains(signer)
    }

    pub fn clear(&mut self) {
        self.votes.clear();
        self.signers.clear();
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// Sum of vote weights.
    pub fn total_weight(&self) -> u64 {
        self.votes.iter().map(|v| v.weight).sum()
    }
}

// ---------------------------------------------------------------------------
// UnverifiedVotePool
// ---------------------------------------------------------------------------

/// Raw votes waiting for their proposal, keyed by endorsed hash.
///
/// Holds at most `per_hash` votes per hash (one per claimed sender) and at
/// most `max_hashes` hashes. When a new hash would exceed the bound, the
/// hash that arrived first is evicted.
#[derive(Debug, Clone)]
pub struct UnverifiedVotePool {
    per_hash: usize,
    max_hashes: usize,
    entries: HashMap<Hash, Vec<VoteMessage>>,
    order: VecDeque<Hash>,
}

impl UnverifiedVotePool {
    pub fn new(per_hash: usize, max_hashes: usize) -> Self {
        Self {
            per_hash,
            max_hashes,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Buffers a vote. Returns `false` if it was dropped.
    pub fn add(&mut self, vote: VoteMessage) -> bool {
        if self.per_hash == 0 || self.max_hashes == 0 {
            return false;
        }
        if let Some(bucket) = self.entries.get_mut(&vote.sign_hash) {
            if bucket.len() >= self.per_hash || bucket.iter().any(|v| v.from == vote.from) {
                return false;
            }
            bucket.push(vote);
            return true;
        }

        while self.order.len() >= self.max_hashes {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                debug!(hash = %oldest.short(), "unverified vote pool full, evicted oldest hash");
            }
        }
        self.order.push_back(vote.sign_hash);
        self.entries.insert(vote.sign_hash, vec![vote]);
        true
    }

    /// Removes and returns every vote buffered for `hash`.
    pub fn take(&mut self, hash: &Hash) -> Vec<VoteMessage> {
        match self.entries.remove(hash) {
            Some(votes) => {
                self.order.retain(|h| h != hash);
                votes
            }
            None => Vec::new(),
        }
    }

    /// Number of buffered votes across all hashes.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::ValidatorKeypair;

    fn vote(kp: &ValidatorKeypair, hash: Hash, weight: u64) -> Vote {
        Vote {
            sign_hash: hash,
            signature: kp.sign(hash.as_bytes()),
            signer: kp.address(),
            is_valid: true,
            weight,
        }
    }

    fn raw(kp: &ValidatorKeypair, hash: Hash) -> VoteMessage {
        VoteMessage {
            height: 1,
            sign_hash: hash,
            signature: kp.sign(hash.as_bytes()),
            from: kp.address(),
        }
    }

    #[test]
    fn ledger_deduplicates_signers() {
        let kp = ValidatorKeypair::from_seed(&[1; 32]);
        let other = ValidatorKeypair::from_seed(&[2; 32]);
        let hash = Hash([9; 32]);
        let mut ledger = VoteLedger::new();

        assert!(ledger.add_vote(vote(&kp, hash, 10)));
        assert!(!ledger.add_vote(vote(&kp, hash, 10)));
        assert!(ledger.add_vote(vote(&other, hash, 5)));

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.total_weight(), 15);
        assert!(ledger.has_vote_from(&kp.address()));

        ledger.clear();
        assert!(ledger.is_empty());
        assert!(!ledger.has_vote_from(&kp.address()));
    }

    #[test]
    fn pool_bounds_per_hash() {
        let hash = Hash([3; 32]);
        let mut pool = UnverifiedVotePool::new(2, 8);
        let keys: Vec<_> = (1..=3u8).map(|i| ValidatorKeypair::from_seed(&[i; 32])).collect();

        assert!(pool.add(raw(&keys[0], hash)));
        assert!(!pool.add(raw(&keys[0], hash)), "same sender twice");
        assert!(pool.add(raw(&keys[1], hash)));
        assert!(!pool.add(raw(&keys[2], hash)), "bucket full");
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn pool_evicts_oldest_hash() {
        let kp = ValidatorKeypair::from_seed(&[1; 32]);
        let mut pool = UnverifiedVotePool::new(4, 2);
        pool.add(raw(&kp, Hash([1; 32])));
        pool.add(raw(&kp, Hash([2; 32])));
        pool.add(raw(&kp, Hash([3; 32])));

        assert!(pool.take(&Hash([1; 32])).is_empty());
        assert_eq!(pool.take(&Hash([2; 32])).len(), 1);
        assert_eq!(pool.take(&Hash([3; 32])).len(), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn take_drains_bucket() {
        let kp = ValidatorKeypair::from_seed(&[1; 32]);
        let hash = Hash([4; 32]);
        let mut pool = UnverifiedVotePool::new(4, 4);
        pool.add(raw(&kp, hash));
        assert_eq!(pool.take(&hash).len(), 1);
        assert!(pool.take(&hash).is_empty());
    }
}
