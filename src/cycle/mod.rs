//! Cycle Orchestrator.
//!
//! One tick walks `Claiming -> Swapping -> Snapshotting -> Verifying ->
//! Distributing -> Celebrating` and always ends back in `Idle`. A tick that
//! finds another one in flight returns immediately. Failures inside a tick are
//! turned into activity events; nothing escapes the loop.

mod guard;

pub use guard::{CycleTrigger, InflightGuard};

use crate::batch::{BatchExecutor, BatchSettings};
use crate::distribution::allocate;
use crate::error::TreasuryError;
use crate::intake::{ClaimOutcome, FeeIntake, SafetyPolicy};
use crate::ledger::ReserveLedger;
use crate::providers::{BalanceReader, ChainGateway, FeeClaimProvider, HolderIndex, SwapProvider};
use crate::snapshot::{SnapshotService, SnapshotSettings};
use crate::status::{ActivityKind, CycleState, StatusBoard, StatusSink, TreasuryStatus};
use crate::swap::{SwapExecutor, SwapSettings};
use crate::types::{Address, Amount, CycleResult, TransferId};
use crate::utils::config::{CycleParams, NATIVE_MINT};
use crate::utils::error::compact_error;
use crate::utils::telemetry;
use crate::verifier::AntiDumpVerifier;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;

/// Accounts the cycle operates on.
#[derive(Debug, Clone)]
pub struct CycleAccounts {
    pub treasury: Address,
    pub gating_mint: Address,
    pub reward_mint: Address,
    pub base_mint: Address,
}

impl CycleAccounts {
    pub fn new(treasury: Address, gating_mint: Address, reward_mint: Address) -> Self {
        Self {
            treasury,
            gating_mint,
            reward_mint,
            base_mint: Address::new(NATIVE_MINT),
        }
    }
}

#[derive(Clone)]
pub struct Collaborators {
    pub balances: Arc<dyn BalanceReader>,
    pub claims: Arc<dyn FeeClaimProvider>,
    pub swaps: Arc<dyn SwapProvider>,
    pub holders: Arc<dyn HolderIndex>,
    pub gateway: Arc<dyn ChainGateway>,
}

impl Collaborators {
    /// Wires one value that implements every seam (the in-memory chain).
    pub fn from_chain<C>(chain: Arc<C>) -> Self
    where
        C: BalanceReader + FeeClaimProvider + SwapProvider + HolderIndex + ChainGateway + 'static,
    {
        Self {
            balances: chain.clone(),
            claims: chain.clone(),
            swaps: chain.clone(),
            holders: chain.clone(),
            gateway: chain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortCircuit {
    SnapshotFailed,
    NoEligibleHolders,
    NoVerifiedHolders,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    AlreadyRunning,
    /// Nothing to swap and no reward balance worth distributing.
    NoTrigger,
    BalanceUnavailable,
    SwapFailed,
    ShortCircuited(ShortCircuit),
    Completed(CycleResult),
}

pub struct Orchestrator {
    accounts: CycleAccounts,
    params: CycleParams,
    ledger: ReserveLedger,
    board: StatusBoard,
    balances: Arc<dyn BalanceReader>,
    intake: FeeIntake,
    swapper: SwapExecutor,
    snapshots: SnapshotService,
    batches: BatchExecutor,
    verifier: AntiDumpVerifier,
    /// Pre-claim balance and signature of a confirmed claim not yet measured.
    unreconciled: Option<(Amount, TransferId)>,
    inflight: Arc<AtomicBool>,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: mpsc::Receiver<()>,
}

impl Orchestrator {
    pub fn new(
        accounts: CycleAccounts,
        params: CycleParams,
        collaborators: Collaborators,
        ledger: ReserveLedger,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        let Collaborators {
            balances,
            claims,
            swaps,
            holders,
            gateway,
        } = collaborators;

        let intake = FeeIntake::new(
            accounts.treasury.clone(),
            params.claim_priority_fee,
            SafetyPolicy::new(
                accounts.treasury.clone(),
                params.claim_fee_ceiling_lamports,
                params.claim_max_instructions,
            ),
            balances.clone(),
            claims,
            gateway.clone(),
        );
        let swapper = SwapExecutor::new(
            accounts.treasury.clone(),
            SwapSettings {
                base_mint: accounts.base_mint.clone(),
                reward_mint: accounts.reward_mint.clone(),
                base_decimals: params.base_decimals,
                slippage_bps: params.slippage_bps,
                priority_fee_lamports: params.swap_priority_fee_lamports,
            },
            balances.clone(),
            swaps,
            gateway.clone(),
        );
        let snapshots = SnapshotService::new(
            SnapshotSettings {
                gating_mint: accounts.gating_mint.clone(),
                gating_decimals: params.gating_decimals,
                min_holding: params.min_holding,
                max_pages: params.snapshot_max_pages,
                page_limit: params.snapshot_page_limit,
            },
            holders,
        );
        let verifier = AntiDumpVerifier::new(
            accounts.gating_mint.clone(),
            params.min_holding,
            balances.clone(),
        );
        let batches = BatchExecutor::new(
            BatchSettings {
                reward_mint: accounts.reward_mint.clone(),
                reward_decimals: params.reward_decimals,
                batch_size: params.batch_size,
                batch_delay: params.batch_delay,
            },
            balances.clone(),
            gateway,
        );

        let mut board = StatusBoard::new(sink, params.activity_capacity);
        let stats = ledger.stats();
        board.sync_totals(
            stats.total_claimed,
            stats.total_swapped,
            stats.total_airdrops,
            stats.total_distributed,
            ledger.reserve_amount(),
        );
        let (trigger_tx, trigger_rx) = mpsc::channel(1);

        Self {
            accounts,
            params,
            ledger,
            board,
            balances,
            intake,
            swapper,
            snapshots,
            batches,
            verifier,
            unreconciled: None,
            inflight: Arc::new(AtomicBool::new(false)),
            trigger_tx,
            trigger_rx,
        }
    }

    pub fn trigger(&self) -> CycleTrigger {
        CycleTrigger::new(self.trigger_tx.clone(), self.inflight.clone())
    }

    /// Shared in-flight flag; holding an [`InflightGuard`] on it blocks ticks.
    pub fn inflight_flag(&self) -> Arc<AtomicBool> {
        self.inflight.clone()
    }

    pub fn ledger(&self) -> &ReserveLedger {
        &self.ledger
    }

    pub fn state(&self) -> CycleState {
        self.board.state()
    }

    pub fn status(&self) -> TreasuryStatus {
        self.board.snapshot()
    }

    pub async fn tick(&mut self) -> TickOutcome {
        let Some(_guard) = InflightGuard::try_acquire(&self.inflight) else {
            tracing::debug!("[CYCLE] Previous cycle still in flight; skipping tick.");
            return TickOutcome::AlreadyRunning;
        };
        let outcome = self.run_cycle().await;
        if self.board.state() != CycleState::Idle {
            self.board.set_state(CycleState::Idle);
        }
        outcome
    }

    fn fail(&mut self, message: String) {
        self.board.set_state(CycleState::Error);
        self.board.error(message);
    }

    async fn run_cycle(&mut self) -> TickOutcome {
        self.board.set_state(CycleState::Claiming);
        let claimed_before = self.ledger.stats().total_claimed;
        let fresh = self.claim_step().await;
        // The earliest pending balance covers every claim since; nothing is
        // swapped out while a claim is pending.
        let unreconciled = self.unreconciled.take().or(fresh);

        let treasury = self.accounts.treasury.clone();
        let (base, reward) = match self.read_treasury().await {
            Ok(balances) => balances,
            Err(err) => {
                if unreconciled.is_some() {
                    tracing::warn!(
                        "[CYCLE] Treasury balance read failed with a claim unreconciled: {err}; skipping swap."
                    );
                    self.unreconciled = unreconciled;
                } else {
                    tracing::warn!("[CYCLE] Treasury balance read failed: {err}");
                }
                return TickOutcome::BalanceUnavailable;
            }
        };
        if let Some((before, signature)) = unreconciled {
            let measured_now = self.ledger.stats().total_claimed - claimed_before;
            let claimed = (base - before - measured_now).max(0.0);
            tracing::info!(
                "[CLAIM] Reconciled claim {signature}: balance {before:.6} -> {base:.6}, claimed {claimed:.6}"
            );
            self.apply_claim(claimed, Some(signature));
        }
        self.board.update_treasury(base, reward);

        let available = self.ledger.available_to_swap(base);
        tracing::debug!(
            "[CYCLE] {} base={:.6} reserve={:.6} available={:.6} reward={:.4}",
            treasury.short(),
            base,
            self.ledger.reserve_amount(),
            available,
            reward
        );

        if available >= self.params.min_trigger_amount && available > 0.0 {
            return self.swap_and_distribute(available, reward).await;
        }
        if reward >= self.params.min_distribution_amount && reward > 0.0 {
            tracing::info!("[CYCLE] Reward balance {reward:.4} on hand; distributing without a swap.");
            return self.distribute(reward).await;
        }
        TickOutcome::NoTrigger
    }

    async fn read_treasury(&self) -> crate::error::Result<(Amount, Amount)> {
        let base = self.balances.base_balance(&self.accounts.treasury).await?;
        let reward = self
            .balances
            .token_balance(&self.accounts.treasury, &self.accounts.reward_mint)
            .await?;
        Ok((base, reward))
    }

    /// Runs the claim. Returns the pre-claim balance and signature of a confirmed
    /// claim whose gain still has to be measured.
    async fn claim_step(&mut self) -> Option<(Amount, TransferId)> {
        match self.intake.claim().await {
            Ok(ClaimOutcome::Claimed { claimed, signature }) => {
                self.apply_claim(claimed, signature);
            }
            Ok(ClaimOutcome::Unreconciled { before, signature }) => {
                return Some((before, signature));
            }
            Ok(ClaimOutcome::NoFeesAvailable) => {}
            Err(err) if err.is_submission_disabled() => {
                tracing::debug!("[CLAIM] Skipped: {err}");
            }
            Err(TreasuryError::Safety(rejection)) => {
                let message = format!("Claim rejected by safety filter: {rejection}");
                tracing::error!("[CLAIM] {message}");
                self.board.error(message.clone());
                telemetry::emit_critical("claim_rejected", message);
            }
            Err(err) => {
                tracing::warn!("[CLAIM] Claim attempt failed: {}", compact_error(&err));
            }
        }
        None
    }

    fn apply_claim(&mut self, claimed: Amount, signature: Option<TransferId>) {
        if claimed <= 0.0 {
            tracing::debug!("[CLAIM] Claim confirmed with no balance gain.");
            return;
        }
        self.ledger.record_claim(claimed);
        let stats = self.ledger.stats();
        let reserve = self.ledger.reserve_amount();
        self.board.record_claim(claimed, stats.total_claimed, reserve);
        self.board.activity_with_transfer(
            ActivityKind::Claim,
            format!("Claimed {claimed:.4} SOL in creator fees (reserve now {reserve:.4})"),
            signature,
        );
    }

    async fn swap_and_distribute(&mut self, available: Amount, reward_before: Amount) -> TickOutcome {
        self.board.set_state(CycleState::Swapping);
        tracing::info!("[SWAP] Swapping {available:.6} available base asset.");

        let outcome = match self.swapper.swap(available).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let message = format!("Swap failed: {}", compact_error(&err));
                if err.is_submission_disabled() {
                    tracing::debug!("[SWAP] {message}");
                } else {
                    tracing::error!("[SWAP] {message}");
                    telemetry::emit_critical("swap_failed", message.clone());
                }
                self.fail(message);
                return TickOutcome::SwapFailed;
            }
        };

        self.ledger.record_swap(available);
        let total_swapped = self.ledger.stats().total_swapped;
        self.board.record_swap(available, total_swapped);
        self.board.activity_with_transfer(
            ActivityKind::Swap,
            format!(
                "Swapped {:.4} SOL for {:.2} reward tokens",
                available, outcome.reward_acquired
            ),
            Some(outcome.transfer_id.clone()),
        );

        let reward = match self.read_treasury().await {
            Ok((base, reward)) => {
                self.board.update_treasury(base, reward);
                reward
            }
            Err(err) => {
                tracing::warn!("[CYCLE] Post-swap balance read failed: {err}; using swap delta.");
                reward_before + outcome.reward_acquired
            }
        };
        self.distribute(reward).await
    }

    async fn distribute(&mut self, reward: Amount) -> TickOutcome {
        self.board.set_state(CycleState::Snapshotting);
        self.board.info("Taking snapshot of holders...");
        let snapshot = match self.snapshots.take().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let message = format!("Snapshot failed: {}", compact_error(&err));
                tracing::warn!("[SNAPSHOT] {message}");
                self.fail(message);
                return TickOutcome::ShortCircuited(ShortCircuit::SnapshotFailed);
            }
        };
        self.board
            .update_holders(snapshot.eligible.len(), snapshot.all_holders.len());
        self.board.info(format!(
            "Snapshot: {} eligible holders (>= {}) out of {} total",
            snapshot.eligible.len(),
            self.snapshots.min_holding(),
            snapshot.all_holders.len()
        ));
        if snapshot.is_empty() {
            tracing::info!("[SNAPSHOT] No eligible holders; skipping distribution.");
            self.board.info("No eligible holders this cycle; rewards carried forward.");
            return TickOutcome::ShortCircuited(ShortCircuit::NoEligibleHolders);
        }

        let allocations = allocate(&snapshot.eligible, snapshot.total_eligible_balance, reward);

        self.board.set_state(CycleState::Verifying);
        let report = self.verifier.verify(allocations).await;
        if report.skipped > 0 {
            self.board.info(format!(
                "Anti-dump: skipped {} holders below {} since snapshot",
                report.skipped,
                self.snapshots.min_holding()
            ));
        }
        if report.verified.is_empty() {
            tracing::info!("[VERIFY] No holders passed verification; skipping distribution.");
            self.board.info("No verified holders this cycle; rewards carried forward.");
            return TickOutcome::ShortCircuited(ShortCircuit::NoVerifiedHolders);
        }

        self.board.set_state(CycleState::Distributing);
        let skipped = report.skipped;
        let mut result = self.batches.execute(report.verified, &mut self.board).await;
        result.skipped_dumpers = skipped;

        if result.distributed > 0.0 {
            self.ledger
                .record_distribution(result.distributed, result.recipients);
            let stats = self.ledger.stats();
            self.board.record_airdrop(
                result.distributed,
                result.recipients,
                stats.total_airdrops,
                stats.total_distributed,
            );
            let message = format!(
                "Airdropped {:.2} reward tokens to {} holders ({} skipped, {} batch errors)",
                result.distributed,
                result.recipients,
                result.skipped_dumpers,
                result.errors.len()
            );
            tracing::info!("[AIRDROP] {message}");
            telemetry::emit_with_details(
                telemetry::TelemetryLevel::Success,
                "airdrop",
                message.clone(),
                Some(serde_json::json!({
                    "distributed": result.distributed,
                    "recipients": result.recipients,
                    "skippedDumpers": result.skipped_dumpers,
                    "transferIds": result.transfer_ids,
                    "totalAirdrops": stats.total_airdrops,
                })),
            );
            self.board.set_state(CycleState::Celebrating);
            self.board.activity(ActivityKind::Airdrop, message);
        } else if !result.errors.is_empty() {
            self.fail(format!(
                "Distribution sent nothing: {} batches failed",
                result.errors.len()
            ));
        }

        match self.read_treasury().await {
            Ok((base, reward)) => self.board.update_treasury(base, reward),
            Err(err) => tracing::debug!("[CYCLE] Post-airdrop balance read failed: {err}"),
        }
        TickOutcome::Completed(result)
    }

    /// Polls every `poll_interval` (and on trigger) until `shutdown` fires.
    /// A shutdown during a tick drops the tick at its next await point.
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.params.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            "[CYCLE] Loop started: poll={}ms trigger>={} min_holding={} batch={}",
            self.params.poll_interval.as_millis(),
            self.params.min_trigger_amount,
            self.params.min_holding,
            self.params.batch_size
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("[CYCLE] Shutdown signal received. Stopping treasury loop...");
                    break;
                }
                _ = interval.tick() => {}
                Some(()) = self.trigger_rx.recv() => {
                    tracing::debug!("[CYCLE] Manual trigger received.");
                }
            }

            let outcome = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("[CYCLE] Shutdown signal received mid-cycle. Abandoning in-flight step.");
                    break;
                }
                outcome = self.tick() => outcome,
            };
            match &outcome {
                TickOutcome::Completed(result) => tracing::info!(
                    "[CYCLE] Cycle complete: distributed={:.4} recipients={} skipped={} errors={}",
                    result.distributed,
                    result.recipients,
                    result.skipped_dumpers,
                    result.errors.len()
                ),
                other => tracing::debug!("[CYCLE] Tick outcome: {other:?}"),
            }
        }

        if self.board.state() != CycleState::Idle {
            self.board.set_state(CycleState::Idle);
        }
    }
}
