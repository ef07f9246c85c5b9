//! End-to-end devnet tests.
//!
//! These run real validators with short turn windows on paused tokio time:
//! the devnet clock follows the tokio clock, so turn windows, reelections
//! and resends elapse in virtual time and every run schedules the same
//! way. Leaders rotate every height, proposals are verified by
//! re-execution, votes reach a stake quorum and every replica commits the
//! same chain.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use strata_protocol::config::{ResendPolicy, VerifierConfig, DEVNET_TRANSFER_GAS};
use strata_protocol::consensus::schedule::leader_for_turn;
use strata_protocol::consensus::{BroadcastInterval, ConsensusEvent, EventSink, LeaderTimeConfig};
use strata_protocol::devnet::{Devnet, DevnetConfig, NodeOptions};
use strata_protocol::types::{Address, Transaction};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const FAST: LeaderTimeConfig = LeaderTimeConfig {
    parent_mining_time: 1,
    pos_out_time: 2,
    reelect_out_time: 2,
    reelect_handle_interval: 1,
};

const SENDER: Address = Address([0xA1; 20]);
const RECIPIENT: Address = Address([0xB2; 20]);

fn devnet_with(node: NodeOptions) -> Devnet {
    Devnet::new(DevnetConfig {
        validators: 4,
        time_config: FAST,
        node,
        balances: vec![(SENDER, 10_000)],
        ..DevnetConfig::default()
    })
}

fn devnet() -> Devnet {
    devnet_with(NodeOptions::default())
}

fn transfer(nonce: u64, amount: u64) -> Transaction {
    Transaction {
        from: SENDER,
        to: RECIPIENT,
        amount,
        nonce,
        gas: DEVNET_TRANSFER_GAS,
    }
}

fn addresses(net: &Devnet) -> Vec<Address> {
    (0..net.len())
        .map(|i| net.address(i).expect("validator"))
        .collect()
}

/// Every replica that reached `height` agrees on the blocks up to it.
fn assert_same_chain(net: &Devnet, reference: usize, height: u64) {
    let ours = net.chain(reference).expect("reference node");
    for index in 0..net.len() {
        let chain = net.chain(index).expect("node");
        if chain.height() < height {
            continue;
        }
        for h in 1..=height {
            let expected = ours.block_at(h).expect("reference block");
            let theirs = chain.block_at(h).expect("replica block");
            assert_eq!(expected.hash(), theirs.hash(), "node {index} diverges at height {h}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn validators_finalize_and_agree() {
    let mut net = devnet();
    let codes: Vec<_> = (0..5).map(|n| net.pool().submit(transfer(n, 100))).collect();

    let (observer_tx, mut observed) = mpsc::unbounded_channel::<ConsensusEvent>();
    let observer: Arc<dyn EventSink> = Arc::new(observer_tx);
    net.spawn_all(&[], Some(observer));

    assert!(
        net.wait_for_height(3, Duration::from_secs(20)).await,
        "stalled at {:?}",
        net.running_heights()
    );
    assert_same_chain(&net, 0, 3);

    for code in &codes {
        assert!(net.pool().included_at(code).is_some(), "transfer not included");
    }
    for index in 0..net.len() {
        let state = net.chain(index).expect("node").head_state().expect("head state");
        assert_eq!(state.balance(&RECIPIENT), 500);
        assert_eq!(state.balance(&SENDER), 9_500);
    }

    let block = net.chain(0).expect("node 0").block_at(1).expect("height 1");
    assert_eq!(block.header.leader, net.address(0).expect("validator 0"));
    assert!(block.header.signatures.len() >= 3, "stake quorum of four");

    let mut committed = Vec::new();
    while let Ok(event) = observed.try_recv() {
        if let ConsensusEvent::BlockCommitted { height, .. } = event {
            committed.push(height);
        }
    }
    assert!(committed.starts_with(&[1, 2, 3]), "committed {committed:?}");

    net.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn offline_leader_is_reelected() {
    let mut net = devnet();
    let offline = net.address(1).expect("validator 1");
    net.spawn_all(&[1], None);

    assert!(
        net.wait_for_height(4, Duration::from_secs(60)).await,
        "stalled at {:?}",
        net.running_heights()
    );
    assert_same_chain(&net, 0, 4);
    assert_eq!(net.chain(1).expect("node 1").height(), 0);

    let validators = addresses(&net);
    let no_broadcast = BroadcastInterval {
        interval: 0,
        last_broadcast_number: 0,
    };
    let chain = net.chain(0).expect("node 0");
    let mut reelections = 0;
    for height in 1..=4 {
        let parent = chain.block_at(height - 1).expect("parent");
        let block = chain.block_at(height).expect("block");
        let turn = block.header.consensus_turn.total_turns();
        let leader_at = |turn| {
            leader_for_turn(
                &validators,
                &parent.header.leader,
                height,
                &Address::ZERO,
                turn,
                &no_broadcast,
            )
            .expect("leader lookup")
        };

        assert_eq!(block.header.leader, leader_at(turn), "height {height}");
        assert_ne!(block.header.leader, offline);
        if leader_at(0) == offline {
            assert!(turn > 0, "height {height} was scheduled for the offline validator");
            reelections += 1;
        }
    }
    assert!(reelections >= 1, "the rotation passed over the offline validator");

    net.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn partitioned_leader_catches_up_through_recovery() {
    // Mining requests go out once, so the cut-off leader can only learn
    // about its finalized block from a recovery reply.
    let mut net = devnet_with(NodeOptions {
        verifier: VerifierConfig {
            vote_resend: ResendPolicy {
                interval_ms: 250,
                max_attempts: 40,
            },
            mining_resend: ResendPolicy {
                interval_ms: 60_000,
                max_attempts: 1,
            },
            ..VerifierConfig::default()
        },
        ..NodeOptions::default()
    });
    let validators = addresses(&net);
    let leader = validators[0];
    for peer in &validators[1..] {
        net.network().partition_unidirectional(*peer, leader);
    }
    net.pool().submit(transfer(0, 250));
    net.spawn_all(&[], None);

    // Validator 0 leads height 1: its proposal and vote go out, nothing
    // comes back.
    let peer_chain = Arc::clone(net.chain(1).expect("node 1"));
    let mut waited = Duration::ZERO;
    while peer_chain.height() < 1 {
        assert!(waited < Duration::from_secs(10), "peers never finalized height 1");
        tokio::time::sleep(Duration::from_millis(25)).await;
        waited += Duration::from_millis(25);
    }
    assert_eq!(net.chain(0).expect("node 0").height(), 0);
    assert_eq!(net.network().delivered("recovery"), 0);

    net.network().heal_all();
    assert!(
        net.wait_for_height(3, Duration::from_secs(30)).await,
        "stalled at {:?}",
        net.running_heights()
    );
    assert_same_chain(&net, 1, 3);
    assert!(net.network().delivered("recovery") >= 1);

    let block = net.chain(0).expect("node 0").block_at(1).expect("height 1");
    assert_eq!(block.header.leader, leader);
    assert!(block.header.signatures.len() >= 3);
    let state = net.chain(0).expect("node 0").head_state().expect("head state");
    assert_eq!(state.balance(&RECIPIENT), 250);

    net.shutdown().await;
}
