use airdrop_treasury::cycle::{
    Collaborators, CycleAccounts, InflightGuard, Orchestrator, ShortCircuit, TickOutcome,
};
use airdrop_treasury::ledger::{MemoryStore, ReserveLedger};
use airdrop_treasury::providers::memory::MemoryChain;
use airdrop_treasury::status::{ActivityKind, CycleState, RecordingSink};
use airdrop_treasury::types::{Address, CycleResult};
use airdrop_treasury::utils::config::CycleParams;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const TREASURY: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
const GATING: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
const REWARD: &str = "XsDoVfqeBukxuZHWhdvWHBhgEHjGNst4MLodqsJHzoB";

struct Harness {
    chain: Arc<MemoryChain>,
    sink: RecordingSink,
    store: MemoryStore,
    orchestrator: Orchestrator,
    treasury: Address,
    gating: Address,
    reward: Address,
}

fn holder(tag: &str) -> Address {
    Address::new(format!("Holder{tag:1>38}"))
}

fn fast_params() -> CycleParams {
    CycleParams {
        batch_delay: Duration::ZERO,
        poll_interval: Duration::from_millis(20),
        ..CycleParams::default()
    }
}

fn harness(params: CycleParams) -> Harness {
    let treasury = Address::new(TREASURY);
    let gating = Address::new(GATING);
    let reward = Address::new(REWARD);
    let chain = Arc::new(MemoryChain::new(treasury.clone()));
    let sink = RecordingSink::new();
    let store = MemoryStore::new();
    let ledger = ReserveLedger::open(Box::new(store.clone()), params.reserve_fraction);
    let orchestrator = Orchestrator::new(
        CycleAccounts::new(treasury.clone(), gating.clone(), reward.clone()),
        params,
        Collaborators::from_chain(chain.clone()),
        ledger,
        Arc::new(sink.clone()),
    );
    Harness {
        chain,
        sink,
        store,
        orchestrator,
        treasury,
        gating,
        reward,
    }
}

fn completed(outcome: TickOutcome) -> CycleResult {
    match outcome {
        TickOutcome::Completed(result) => result,
        other => panic!("expected a completed cycle, got {other:?}"),
    }
}

fn close(actual: f64, expected: f64, tolerance: f64) -> bool {
    (actual - expected).abs() <= tolerance
}

#[tokio::test]
async fn test_full_cycle_claims_reserves_swaps_and_airdrops() {
    let mut h = harness(fast_params());
    h.chain.set_claimable_fees(2.0);
    h.chain.set_swap_rate(100_000.0 / 1.4);
    h.chain.add_holder(&h.gating, &holder("A"), 500_000.0);
    h.chain.add_holder(&h.gating, &holder("B"), 300_000.0);
    h.chain.add_holder(&h.gating, &holder("C"), 200_000.0);

    let result = completed(h.orchestrator.tick().await);

    assert!(close(result.distributed, 100_000.0, 0.01), "{}", result.distributed);
    assert_eq!(result.recipients, 3);
    assert_eq!(result.skipped_dumpers, 0);
    assert_eq!(result.transfer_ids.len(), 1);
    assert!(result.is_clean());

    for (tag, share) in [("A", 50_000.0), ("B", 30_000.0), ("C", 20_000.0)] {
        let received = h.chain.token_balance_of(&holder(tag), &h.reward);
        assert!(close(received, share, 0.01), "{tag} received {received}");
    }

    let stats = h.orchestrator.ledger().stats();
    assert!(close(stats.total_claimed, 2.0, 1e-9));
    assert!(close(stats.total_swapped, 1.4, 1e-9));
    assert_eq!(stats.total_airdrops, 1);
    assert!(close(stats.total_distributed, 100_000.0, 0.01));
    assert!(close(h.orchestrator.ledger().reserve_amount(), 0.6, 1e-9));
    assert!(close(h.chain.base_balance_of(&h.treasury), 0.6, 1e-9));
    assert_eq!(h.store.current().map(|s| s.total_airdrops), Some(1));

    assert_eq!(
        h.sink.states(),
        vec![
            CycleState::Claiming,
            CycleState::Swapping,
            CycleState::Snapshotting,
            CycleState::Verifying,
            CycleState::Distributing,
            CycleState::Celebrating,
            CycleState::Idle,
        ]
    );
    let kinds: Vec<ActivityKind> = h.sink.activities().iter().map(|a| a.kind).collect();
    for expected in [ActivityKind::Claim, ActivityKind::Swap, ActivityKind::Airdrop] {
        assert!(kinds.contains(&expected), "missing {expected:?} in {kinds:?}");
    }
    assert!(!kinds.contains(&ActivityKind::Error));

    let status = h.orchestrator.status();
    assert_eq!(status.state, CycleState::Idle);
    assert_eq!(status.eligible_holders, 3);
    assert_eq!(status.last_airdrop_recipients, 3);

    // Reserve stays put and the reward dust is below the distribution floor.
    assert_eq!(h.orchestrator.tick().await, TickOutcome::NoTrigger);
    assert_eq!(h.chain.swaps_submitted(), 1);
}

#[tokio::test]
async fn test_dumped_holder_is_skipped_and_share_carries_forward() {
    let mut h = harness(fast_params());
    h.chain.set_token_balance(&h.treasury, &h.reward, 1_000_000.0);
    h.chain.add_holder(&h.gating, &holder("A"), 600_000.0);
    h.chain.add_holder(&h.gating, &holder("B"), 400_000.0);
    // B sells after the index row was written.
    h.chain.set_token_balance(&holder("B"), &h.gating, 10_000.0);

    let first = completed(h.orchestrator.tick().await);
    assert_eq!(first.recipients, 1);
    assert_eq!(first.skipped_dumpers, 1);
    assert!(close(first.distributed, 600_000.0, 0.01));
    assert_eq!(h.chain.quote_calls(), 0);
    assert!(close(h.chain.token_balance_of(&holder("B"), &h.reward), 0.0, 1e-12));
    assert!(close(
        h.chain.token_balance_of(&h.treasury, &h.reward),
        400_000.0,
        0.01
    ));
    assert!(h
        .sink
        .activities()
        .iter()
        .any(|a| a.kind == ActivityKind::Info && a.message.contains("Anti-dump")));

    // The withheld share is distributed on the next tick without a swap.
    let second = completed(h.orchestrator.tick().await);
    assert_eq!(second.recipients, 1);
    assert!(close(second.distributed, 240_000.0, 0.01));
    assert!(close(
        h.chain.token_balance_of(&holder("A"), &h.reward),
        840_000.0,
        0.02
    ));
    assert_eq!(h.orchestrator.ledger().stats().total_airdrops, 2);
    assert_eq!(h.chain.index_calls(), 2);
}

#[tokio::test]
async fn test_no_eligible_holders_short_circuits_quietly() {
    let mut h = harness(fast_params());
    h.chain.set_token_balance(&h.treasury, &h.reward, 500.0);
    h.chain.add_holder(&h.gating, &holder("A"), 10_000.0);

    let outcome = h.orchestrator.tick().await;
    assert_eq!(
        outcome,
        TickOutcome::ShortCircuited(ShortCircuit::NoEligibleHolders)
    );
    assert_eq!(h.chain.transfer_calls(), 0);
    assert!(close(h.chain.token_balance_of(&h.treasury, &h.reward), 500.0, 1e-9));

    let activities = h.sink.activities();
    assert!(activities.iter().all(|a| a.kind != ActivityKind::Error));
    assert!(activities
        .iter()
        .any(|a| a.message.contains("No eligible holders")));
    assert_eq!(
        h.sink.states(),
        vec![CycleState::Claiming, CycleState::Snapshotting, CycleState::Idle]
    );
    assert_eq!(h.orchestrator.ledger().stats().total_airdrops, 0);
}

#[tokio::test]
async fn test_swap_failure_skips_snapshot_and_keeps_ledger() {
    let mut h = harness(fast_params());
    h.chain.set_claimable_fees(2.0);
    h.chain.set_no_route(true);
    h.chain.add_holder(&h.gating, &holder("A"), 500_000.0);

    assert_eq!(h.orchestrator.tick().await, TickOutcome::SwapFailed);
    assert_eq!(h.chain.index_calls(), 0);
    assert_eq!(h.chain.transfer_calls(), 0);

    let stats = h.orchestrator.ledger().stats();
    assert!(close(stats.total_claimed, 2.0, 1e-9));
    assert_eq!(stats.total_swapped, 0.0);
    assert!(close(h.chain.base_balance_of(&h.treasury), 2.0, 1e-9));

    let states = h.sink.states();
    assert!(states.contains(&CycleState::Error));
    assert_eq!(states.last(), Some(&CycleState::Idle));
    assert!(h
        .sink
        .activities()
        .iter()
        .any(|a| a.kind == ActivityKind::Error && a.message.starts_with("Swap failed")));
}

#[tokio::test]
async fn test_partial_batch_failure_records_only_delivered_amount() {
    let mut h = harness(fast_params());
    h.chain.set_token_balance(&h.treasury, &h.reward, 1_500.0);
    for i in 0..15 {
        h.chain
            .add_holder(&h.gating, &holder(&format!("P{i:02}")), 100_000.0);
    }
    h.chain.fail_transfer_batch(1);

    let result = completed(h.orchestrator.tick().await);
    assert_eq!(result.recipients, 8);
    assert_eq!(result.transfer_ids.len(), 2);
    assert_eq!(result.errors.len(), 1);
    assert!(close(result.distributed, 800.0, 0.01), "{}", result.distributed);

    let stats = h.orchestrator.ledger().stats();
    assert_eq!(stats.total_airdrops, 1);
    assert!(close(stats.total_distributed, result.distributed, 1e-9));
    assert!(close(h.chain.token_balance_of(&h.treasury, &h.reward), 700.0, 0.01));

    let states = h.sink.states();
    assert!(states.contains(&CycleState::Celebrating));
    assert_eq!(states.last(), Some(&CycleState::Idle));
    assert!(h
        .sink
        .activities()
        .iter()
        .any(|a| a.kind == ActivityKind::Error && a.message.contains("Batch 2/3")));
}

#[tokio::test]
async fn test_every_batch_failing_ends_in_error() {
    let mut h = harness(fast_params());
    h.chain.set_token_balance(&h.treasury, &h.reward, 100.0);
    h.chain.add_holder(&h.gating, &holder("A"), 100_000.0);
    h.chain.fail_transfer_batch(0);

    let result = completed(h.orchestrator.tick().await);
    assert_eq!(result.recipients, 0);
    assert_eq!(result.distributed, 0.0);
    assert_eq!(h.orchestrator.ledger().stats().total_airdrops, 0);

    let states = h.sink.states();
    assert!(states.contains(&CycleState::Error));
    assert!(!states.contains(&CycleState::Celebrating));
    assert_eq!(h.orchestrator.state(), CycleState::Idle);
}

#[tokio::test]
async fn test_claim_is_measured_from_cycle_read_when_post_claim_read_fails() {
    let mut h = harness(fast_params());
    h.chain.set_claimable_fees(2.0);
    h.chain.set_swap_rate(100_000.0 / 1.4);
    h.chain.add_holder(&h.gating, &holder("A"), 500_000.0);
    // Read 0 is the pre-claim balance; read 1 is the post-claim balance.
    h.chain.fail_base_read(1);

    let result = completed(h.orchestrator.tick().await);
    assert_eq!(result.recipients, 1);

    let stats = h.orchestrator.ledger().stats();
    assert!(close(stats.total_claimed, 2.0, 1e-9), "{}", stats.total_claimed);
    assert!(close(stats.total_swapped, 1.4, 1e-9), "{}", stats.total_swapped);
    assert!(close(h.orchestrator.ledger().reserve_amount(), 0.6, 1e-9));
    assert!(close(h.chain.base_balance_of(&h.treasury), 0.6, 1e-9));
    assert!(h
        .sink
        .activities()
        .iter()
        .any(|a| a.kind == ActivityKind::Claim && a.transfer_id.is_some()));
}

#[tokio::test]
async fn test_unmeasured_claim_blocks_swap_until_balance_is_readable() {
    let mut h = harness(fast_params());
    h.chain.set_claimable_fees(2.0);
    h.chain.set_swap_rate(100_000.0 / 1.4);
    h.chain.add_holder(&h.gating, &holder("A"), 500_000.0);
    h.chain.fail_base_read(1);
    h.chain.fail_base_read(2);

    assert_eq!(h.orchestrator.tick().await, TickOutcome::BalanceUnavailable);
    assert_eq!(h.chain.swaps_submitted(), 0);
    assert_eq!(h.orchestrator.ledger().stats().total_claimed, 0.0);
    assert_eq!(h.orchestrator.state(), CycleState::Idle);

    // Nothing left to claim; the pending gain is measured before any swap.
    completed(h.orchestrator.tick().await);
    let stats = h.orchestrator.ledger().stats();
    assert!(close(stats.total_claimed, 2.0, 1e-9), "{}", stats.total_claimed);
    assert!(close(stats.total_swapped, 1.4, 1e-9), "{}", stats.total_swapped);
    assert!(close(h.chain.base_balance_of(&h.treasury), 0.6, 1e-9));
    assert_eq!(h.chain.swaps_submitted(), 1);
}

#[tokio::test]
async fn test_new_recipients_get_account_creation_once() {
    let mut h = harness(fast_params());
    h.chain.set_token_balance(&h.treasury, &h.reward, 1_000.0);
    h.chain.add_holder(&h.gating, &holder("A"), 100_000.0);
    h.chain.add_holder(&h.gating, &holder("B"), 100_000.0);

    completed(h.orchestrator.tick().await);
    h.chain.set_token_balance(&h.treasury, &h.reward, 1_000.0);
    completed(h.orchestrator.tick().await);

    let batches = h.chain.transfer_batches();
    assert_eq!(batches.len(), 2);
    assert!(batches[0].legs.iter().all(|leg| leg.create_account));
    assert!(batches[1].legs.iter().all(|leg| !leg.create_account));
    assert!(close(h.chain.token_balance_of(&holder("A"), &h.reward), 1_000.0, 0.01));
}

#[tokio::test]
async fn test_tick_while_in_flight_is_a_no_op() {
    let mut h = harness(fast_params());
    h.chain.set_claimable_fees(2.0);

    let flag = h.orchestrator.inflight_flag();
    let guard = InflightGuard::try_acquire(&flag).expect("flag starts free");
    assert_eq!(h.orchestrator.tick().await, TickOutcome::AlreadyRunning);
    assert_eq!(h.chain.claims_submitted(), 0);
    assert!(h.sink.states().is_empty());

    drop(guard);
    let outcome = h.orchestrator.tick().await;
    assert_ne!(outcome, TickOutcome::AlreadyRunning);
    assert_eq!(h.chain.claims_submitted(), 1);
}

#[tokio::test]
async fn test_failed_persistence_keeps_cycle_running() {
    let mut h = harness(fast_params());
    h.store.set_fail_writes(true);
    h.chain.set_token_balance(&h.treasury, &h.reward, 100.0);
    h.chain.add_holder(&h.gating, &holder("A"), 100_000.0);

    let result = completed(h.orchestrator.tick().await);
    assert_eq!(result.recipients, 1);
    assert_eq!(h.orchestrator.ledger().stats().total_airdrops, 1);
    assert_eq!(h.store.current(), None);
}

#[tokio::test]
async fn test_snapshot_failure_short_circuits_with_error() {
    let mut h = harness(fast_params());
    h.chain.set_token_balance(&h.treasury, &h.reward, 100.0);
    h.chain.set_fail_index(true);

    assert_eq!(
        h.orchestrator.tick().await,
        TickOutcome::ShortCircuited(ShortCircuit::SnapshotFailed)
    );
    assert_eq!(h.chain.transfer_calls(), 0);
    assert_eq!(h.orchestrator.state(), CycleState::Idle);
}

#[tokio::test]
async fn test_trigger_requests_coalesce() {
    let h = harness(fast_params());
    let trigger = h.orchestrator.trigger();
    assert!(trigger.request());
    assert!(!trigger.request(), "second request folds into the queued one");

    let flag = h.orchestrator.inflight_flag();
    let _guard = InflightGuard::try_acquire(&flag).expect("flag starts free");
    assert!(trigger.is_cycle_running());
    assert!(!trigger.request());
}

#[tokio::test]
async fn test_run_loop_distributes_then_stops_on_shutdown() {
    let mut h = harness(fast_params());
    h.chain.set_token_balance(&h.treasury, &h.reward, 1_000.0);
    h.chain.add_holder(&h.gating, &holder("A"), 100_000.0);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let stopper = async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = shutdown_tx.send(());
    };
    tokio::join!(h.orchestrator.run(shutdown_rx), stopper);

    // Later ticks find only dust.
    assert_eq!(h.orchestrator.ledger().stats().total_airdrops, 1);
    assert_eq!(h.chain.transfer_calls(), 1);
    assert_eq!(h.orchestrator.state(), CycleState::Idle);
}

#[tokio::test]
async fn test_shutdown_mid_cycle_releases_guard() {
    let mut h = harness(fast_params());
    h.chain.set_claimable_fees(2.0);
    h.chain.set_latency(Duration::from_millis(200));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let stopper = async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = shutdown_tx.send(());
    };
    tokio::join!(h.orchestrator.run(shutdown_rx), stopper);

    assert_eq!(h.orchestrator.state(), CycleState::Idle);
    assert!(InflightGuard::try_acquire(&h.orchestrator.inflight_flag()).is_some());
    assert_eq!(h.chain.claims_submitted(), 0);
    assert_eq!(h.orchestrator.ledger().stats().total_claimed, 0.0);
}
