//! Deterministic re-execution of a remote proposal.
//!
//! Runs on a blocking worker against a private copy of the parent state.
//! The pipeline order matters: the state root commits to the auxiliary
//! state, so the block is finalized a second time after it is folded in.

use super::proposal::{LocalVerifyResult, StateFailureReason};
use super::traits::{ChainBackend, TopologyValidator};
use crate::types::{Block, BlockHeader, Receipt, Transaction};

/// Locally rebuilt block and the state it leaves behind.
#[derive(Debug, Clone)]
pub struct Reexecuted<S> {
    pub block: Block,
    pub receipts: Vec<Receipt>,
    pub state: S,
}

fn execution_failure(e: impl ToString) -> LocalVerifyResult {
    LocalVerifyResult::StateFailure(StateFailureReason::Execution(e.to_string()))
}

/// Rebuilds `remote` from `txs` on top of `state` and compares hashes.
///
/// Every failure here is a state failure: the inputs are exactly what the
/// leader claims to have executed.
pub fn reexecute<B: ChainBackend + ?Sized>(
    chain: &B,
    topology: &dyn TopologyValidator<B::State>,
    remote: &BlockHeader,
    txs: &[Transaction],
    mut state: B::State,
) -> Result<Reexecuted<B::State>, LocalVerifyResult> {
    let mut local = remote.clone();
    local.gas_used = 0;
    local.signatures.clear();

    chain
        .process_uptime(&mut state, &local)
        .map_err(execution_failure)?;
    let receipts = chain
        .apply_transactions(&mut local, &mut state, txs)
        .map_err(execution_failure)?;
    let block = chain
        .finalize(&local, &mut state, txs, &receipts)
        .map_err(execution_failure)?;
    chain
        .process_auxiliary_state(&block, &mut state)
        .map_err(execution_failure)?;
    let block = chain
        .finalize(&block.header, &mut state, txs, &receipts)
        .map_err(execution_failure)?;

    topology
        .verify_election_result(&block.header, &state)
        .map_err(|e| {
            LocalVerifyResult::StateFailure(StateFailureReason::ElectionMismatch(e.to_string()))
        })?;

    let expected = remote.hash_no_sign_nonce();
    let computed = block.header.hash_no_sign_nonce();
    if computed != expected {
        return Err(LocalVerifyResult::StateFailure(
            StateFailureReason::HashMismatch {
                expected,
                computed,
                fields: remote.execution_mismatches(&block.header),
            },
        ));
    }

    Ok(Reexecuted {
        block,
        receipts,
        state,
    })
}
