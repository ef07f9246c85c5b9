//! Stake-weighted quorum and a permissive topology policy for the devnet.

use std::collections::HashMap;

use tracing::debug;

use crate::config::PROTOCOL_VERSION;
use crate::consensus::error::{DposError, TopologyError};
use crate::consensus::schedule::ValidatorInfo;
use crate::consensus::traits::{DposEngine, TopologyValidator};
use crate::consensus::votes::Vote;
use crate::crypto::keys::Signature;
use crate::types::{Address, BlockHeader, Hash};

use super::chain::MemoryState;

// ---------------------------------------------------------------------------
// StakeDpos
// ---------------------------------------------------------------------------

/// Quorum is reached when the valid votes carry strictly more than two
/// thirds of the total stake.
#[derive(Debug, Clone)]
pub struct StakeDpos {
    stakes: HashMap<Address, u64>,
    total: u64,
}

impl StakeDpos {
    pub fn new(validators: &[ValidatorInfo]) -> Self {
        let stakes: HashMap<Address, u64> =
            validators.iter().map(|v| (v.address, v.stake)).collect();
        let total = stakes.values().sum();
        Self { stakes, total }
    }

    pub fn total_stake(&self) -> u64 {
        self.total
    }

    /// Smallest stake that reaches quorum.
    pub fn quorum_threshold(&self) -> u64 {
        self.total * 2 / 3 + 1
    }
}

impl DposEngine for StakeDpos {
    fn verify_version(&self, header: &BlockHeader) -> Result<(), DposError> {
        if header.version != PROTOCOL_VERSION {
            return Err(DposError::Version(header.version.clone()));
        }
        Ok(())
    }

    fn verify_weighted_signatures(
        &self,
        votes: &[Vote],
        parent_hash: &Hash,
    ) -> Result<Vec<Signature>, DposError> {
        let mut have = 0u64;
        let mut signatures = Vec::with_capacity(votes.len());
        for vote in votes.iter().filter(|v| v.is_valid) {
            let stake = self
                .stakes
                .get(&vote.signer)
                .copied()
                .ok_or(DposError::UnknownSigner(vote.signer))?;
            have = have.saturating_add(stake);
            signatures.push(vote.signature.clone());
        }
        if u128::from(have) * 3 <= u128::from(self.total) * 2 {
            return Err(DposError::InsufficientStake {
                have,
                total: self.total,
            });
        }
        debug!(
            parent = %parent_hash.short(),
            have,
            total = self.total,
            "weighted quorum reached"
        );
        Ok(signatures)
    }
}

// ---------------------------------------------------------------------------
// PermissiveTopology
// ---------------------------------------------------------------------------

/// Accepts any topology and VRF. The devnet never runs elections, so a
/// header carrying election results is a mismatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissiveTopology;

impl TopologyValidator<MemoryState> for PermissiveTopology {
    fn verify_net_topology(
        &self,
        _header: &BlockHeader,
        _votes: &[Vote],
    ) -> Result<(), TopologyError> {
        Ok(())
    }

    fn verify_vrf(&self, _header: &BlockHeader) -> Result<(), TopologyError> {
        Ok(())
    }

    fn verify_election_result(
        &self,
        header: &BlockHeader,
        _state: &MemoryState,
    ) -> Result<(), TopologyError> {
        if !header.elect.is_empty() {
            return Err(TopologyError::Election(format!(
                "unexpected election of {} accounts",
                header.elect.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::role::Role;
    use crate::crypto::keys::ValidatorKeypair;

    fn validators(stakes: &[u64]) -> Vec<ValidatorInfo> {
        stakes
            .iter()
            .enumerate()
            .map(|(i, stake)| ValidatorInfo {
                address: Address([i as u8 + 1; 20]),
                stake: *stake,
                role: Role::Validator,
            })
            .collect()
    }

    fn vote(signer: u8, weight: u64) -> Vote {
        let kp = ValidatorKeypair::from_seed(&[signer; 32]);
        Vote {
            sign_hash: Hash([1; 32]),
            signature: kp.sign(b"proposal"),
            signer: Address([signer; 20]),
            is_valid: true,
            weight,
        }
    }

    #[test]
    fn exactly_two_thirds_is_not_quorum() {
        let dpos = StakeDpos::new(&validators(&[10, 10, 10]));
        let parent = Hash::ZERO;

        let err = dpos
            .verify_weighted_signatures(&[vote(1, 10), vote(2, 10)], &parent)
            .expect_err("20 of 30");
        assert_eq!(err, DposError::InsufficientStake { have: 20, total: 30 });

        let sigs = dpos
            .verify_weighted_signatures(&[vote(1, 10), vote(2, 10), vote(3, 10)], &parent)
            .expect("30 of 30");
        assert_eq!(sigs.len(), 3);
        assert_eq!(dpos.quorum_threshold(), 21);
    }

    #[test]
    fn stake_weighs_more_than_headcount() {
        let dpos = StakeDpos::new(&validators(&[70, 10, 10, 10]));
        assert!(dpos
            .verify_weighted_signatures(&[vote(1, 70)], &Hash::ZERO)
            .is_ok());
        assert!(dpos
            .verify_weighted_signatures(&[vote(2, 10), vote(3, 10), vote(4, 10)], &Hash::ZERO)
            .is_err());
    }

    #[test]
    fn unknown_signer_is_rejected() {
        let dpos = StakeDpos::new(&validators(&[10]));
        let err = dpos
            .verify_weighted_signatures(&[vote(9, 10)], &Hash::ZERO)
            .expect_err("unknown");
        assert_eq!(err, DposError::UnknownSigner(Address([9; 20])));
    }

    #[test]
    fn version_must_match() {
        let dpos = StakeDpos::new(&validators(&[10]));
        let mut header = BlockHeader {
            version: PROTOCOL_VERSION.to_string(),
            ..BlockHeader::default()
        };
        assert!(dpos.verify_version(&header).is_ok());
        header.version = "0.9.0".into();
        assert_eq!(
            dpos.verify_version(&header),
            Err(DposError::Version("0.9.0".into()))
        );
    }

    #[test]
    fn election_results_are_rejected() {
        let header = BlockHeader {
            elect: vec![Address([1; 20])],
            ..BlockHeader::default()
        };
        let state = crate::devnet::chain::Genesis {
            time: 0,
            validators: validators(&[10]),
            broadcast: Address::ZERO,
            time_config: Default::default(),
            broadcast_interval: crate::consensus::schedule::BroadcastInterval {
                interval: 0,
                last_broadcast_number: 0,
            },
            balances: Vec::new(),
        };
        let chain = crate::devnet::chain::MemoryChain::new(&state);
        let snapshot = chain.head_state().expect("genesis state");
        assert!(PermissiveTopology
            .verify_election_result(&header, &snapshot)
            .is_err());
        assert!(PermissiveTopology
            .verify_election_result(&BlockHeader::default(), &snapshot)
            .is_ok());
    }
}
