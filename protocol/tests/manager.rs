//! Routing and pruning in the process manager and the block verifier loop.

mod common;

use common::{eventually, pos_finished, Harness, Setup};
use strata_protocol::config::VerifierConfig;
use strata_protocol::consensus::{
    BlockVerifier, ProcessManager, ProcessState, Role, VerifierInput,
};
use tokio::sync::watch;

fn start_input(h: &Harness, height: u64) -> VerifierInput {
    VerifierInput::StartRunning {
        height,
        role: Role::Validator,
        validators: h.validators.clone(),
    }
}

#[tokio::test]
async fn routes_inputs_to_their_height() {
    let mut h = Harness::new(Setup::default());
    let mut manager = ProcessManager::new(h.collab.clone(), VerifierConfig::default());
    let req = h.proposal(&h.transfers(1));

    manager.handle(start_input(&h, 1));
    manager.handle(VerifierInput::LeaderChange(h.notice.clone()));
    manager.handle(VerifierInput::Request(req.clone()));
    assert_eq!(manager.current_height(), 1);
    assert_eq!(manager.len(), 1);

    let process = manager.process(1).expect("height 1");
    assert!(eventually(|| process.state() == ProcessState::DposVerify).await);

    manager.handle(VerifierInput::Vote(h.vote_from(0, &req)));
    assert_eq!(process.state(), ProcessState::End);
    assert_eq!(pos_finished(&h.drain_events()).len(), 1);
}

#[tokio::test]
async fn start_running_prunes_lower_heights() {
    let h = Harness::new(Setup::default());
    let mut manager = ProcessManager::new(h.collab.clone(), VerifierConfig::default());
    let req = h.proposal(&[]);

    manager.handle(start_input(&h, 1));
    let old = manager.process(1).expect("height 1");

    // A vote for a future height creates its process and parks there.
    let mut future = h.vote_from(0, &req);
    future.height = 3;
    manager.handle(VerifierInput::Vote(future));
    assert_eq!(manager.len(), 2);
    assert_eq!(manager.process(3).expect("height 3").unverified_votes(), 1);

    manager.handle(start_input(&h, 3));
    assert_eq!(manager.current_height(), 3);
    assert_eq!(manager.len(), 1);
    assert!(manager.process(1).is_none());
    assert!(manager.process(2).is_none());

    // The pruned process is closed.
    old.set_leader_info(h.notice.clone());
    old.add_req(req);
    assert_eq!(old.current_hash(), None);

    // Lowering the height is a no-op.
    manager.set_current_height(2);
    assert_eq!(manager.current_height(), 3);
}

#[tokio::test]
async fn block_verifier_drains_until_shutdown() {
    let mut h = Harness::new(Setup::default());
    let (verifier, inbox) = BlockVerifier::new(h.collab.clone(), VerifierConfig::default(), 16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(verifier.run(shutdown_rx));

    let req = h.proposal(&h.transfers(2));
    for input in [
        start_input(&h, 1),
        VerifierInput::LeaderChange(h.notice.clone()),
        VerifierInput::Request(req.clone()),
    ] {
        inbox.send(input).await.expect("verifier inbox");
    }

    // Our self-vote goes out once the proposal is verified.
    assert!(eventually(|| h.messenger.count("vote") >= 1).await);
    inbox
        .send(VerifierInput::Vote(h.vote_from(2, &req)))
        .await
        .expect("verifier inbox");

    let mut finished = Vec::new();
    assert!(
        eventually(|| {
            finished.extend(
                pos_finished(&h.drain_events())
                    .into_iter()
                    .map(|n| n.height),
            );
            !finished.is_empty()
        })
        .await
    );
    assert_eq!(finished, vec![1]);

    shutdown_tx.send(true).expect("verifier alive");
    task.await.expect("verifier task");
}
