//! In-memory chain implementing every collaborator trait.
//!
//! Used by the unit and integration tests to drive full cycles without a
//! network. The holder index and live balances are tracked separately so a
//! holder can "dump" between the snapshot and verification.

use super::{
    BalanceReader, ChainGateway, ClaimRequest, ClaimResponse, FeeClaimProvider, HolderIndex,
    HolderPage, IndexedAccount, OperationPayload, OperationPurpose, OperationSummary,
    QuoteRequest, Simulation, SwapProvider, SwapQuote, TransferBatch, UnsignedOperation,
};
use crate::error::{Result, RpcError};
use crate::types::{from_base_units, to_base_units, Address, Amount, TransferId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub const PUMP_PROGRAM: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";
pub const COMPUTE_BUDGET_PROGRAM: &str = "ComputeBudget111111111111111111111111111111";

#[derive(Debug, Clone)]
enum PendingOp {
    Claim,
    Swap(SwapQuote),
}

#[derive(Default)]
struct ChainState {
    base: HashMap<Address, Amount>,
    tokens: HashMap<(Address, Address), Amount>,
    token_accounts: HashSet<(Address, Address)>,
    index: HashMap<Address, Vec<IndexedAccount>>,
    pending: HashMap<String, PendingOp>,
    next_op: u64,

    claimable_fees: Amount,
    claim_gas: Amount,
    claims_submitted: usize,
    claim_summary: Option<OperationSummary>,
    claim_simulation: Option<Simulation>,

    swap_rate: f64,
    no_route: bool,
    fail_swap_submission: bool,
    swaps_submitted: usize,
    quote_calls: usize,

    failing_batches: HashSet<usize>,
    transfer_calls: usize,
    batches: Vec<TransferBatch>,

    failing_reads: HashSet<Address>,
    failing_base_reads: HashSet<usize>,
    base_reads: usize,
    fail_index: bool,
    index_calls: usize,
    latency: Option<Duration>,
}

pub struct MemoryChain {
    treasury: Address,
    base_decimals: u8,
    token_decimals: u8,
    state: Mutex<ChainState>,
}

impl MemoryChain {
    pub fn new(treasury: Address) -> Self {
        Self {
            treasury,
            base_decimals: 9,
            token_decimals: 6,
            state: Mutex::new(ChainState {
                swap_rate: 1.0,
                ..ChainState::default()
            }),
        }
    }

    pub fn with_decimals(mut self, base_decimals: u8, token_decimals: u8) -> Self {
        self.base_decimals = base_decimals;
        self.token_decimals = token_decimals;
        self
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn delay(&self) {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    pub fn treasury(&self) -> &Address {
        &self.treasury
    }

    // -- seeding --------------------------------------------------------------

    pub fn set_base_balance(&self, owner: &Address, amount: Amount) {
        self.lock().base.insert(owner.clone(), amount);
    }

    /// Sets the live balance only; the holder index is untouched.
    pub fn set_token_balance(&self, owner: &Address, mint: &Address, amount: Amount) {
        let mut state = self.lock();
        let key = (owner.clone(), mint.clone());
        if amount > 0.0 {
            state.token_accounts.insert(key.clone());
        }
        state.tokens.insert(key, amount);
    }

    /// Adds one indexed token account and credits the owner's live balance.
    pub fn add_holder(&self, mint: &Address, owner: &Address, balance: Amount) {
        let units = to_base_units(balance, self.token_decimals);
        let mut state = self.lock();
        state
            .index
            .entry(mint.clone())
            .or_default()
            .push(IndexedAccount {
                owner: owner.clone(),
                amount_units: units,
            });
        let key = (owner.clone(), mint.clone());
        state.token_accounts.insert(key.clone());
        *state.tokens.entry(key).or_insert(0.0) += balance;
    }

    pub fn set_claimable_fees(&self, amount: Amount) {
        self.lock().claimable_fees = amount;
    }

    /// Base asset burned by each submitted claim.
    pub fn set_claim_gas(&self, amount: Amount) {
        self.lock().claim_gas = amount;
    }

    pub fn set_claim_summary(&self, summary: OperationSummary) {
        self.lock().claim_summary = Some(summary);
    }

    pub fn set_claim_simulation(&self, simulation: Simulation) {
        self.lock().claim_simulation = Some(simulation);
    }

    /// Reward units acquired per unit of base asset.
    pub fn set_swap_rate(&self, rate: f64) {
        self.lock().swap_rate = rate;
    }

    pub fn set_no_route(&self, no_route: bool) {
        self.lock().no_route = no_route;
    }

    pub fn set_fail_swap_submission(&self, fail: bool) {
        self.lock().fail_swap_submission = fail;
    }

    /// Fails the `call_index`-th (0-based) transfer submission.
    pub fn fail_transfer_batch(&self, call_index: usize) {
        self.lock().failing_batches.insert(call_index);
    }

    pub fn fail_balance_reads_for(&self, owner: &Address) {
        self.lock().failing_reads.insert(owner.clone());
    }

    /// Fails the `call_index`-th (0-based) base balance read, for any owner.
    pub fn fail_base_read(&self, call_index: usize) {
        self.lock().failing_base_reads.insert(call_index);
    }

    pub fn set_fail_index(&self, fail: bool) {
        self.lock().fail_index = fail;
    }

    /// Delay applied to every collaborator call.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    // -- observation ----------------------------------------------------------

    pub fn base_balance_of(&self, owner: &Address) -> Amount {
        self.lock().base.get(owner).copied().unwrap_or(0.0)
    }

    pub fn token_balance_of(&self, owner: &Address, mint: &Address) -> Amount {
        self.lock()
            .tokens
            .get(&(owner.clone(), mint.clone()))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn has_token_account(&self, owner: &Address, mint: &Address) -> bool {
        self.lock()
            .token_accounts
            .contains(&(owner.clone(), mint.clone()))
    }

    pub fn index_calls(&self) -> usize {
        self.lock().index_calls
    }

    pub fn quote_calls(&self) -> usize {
        self.lock().quote_calls
    }

    pub fn claims_submitted(&self) -> usize {
        self.lock().claims_submitted
    }

    pub fn swaps_submitted(&self) -> usize {
        self.lock().swaps_submitted
    }

    pub fn transfer_calls(&self) -> usize {
        self.lock().transfer_calls
    }

    /// Successfully applied transfer batches, in submission order.
    pub fn transfer_batches(&self) -> Vec<TransferBatch> {
        self.lock().batches.clone()
    }

    fn default_summary(&self) -> OperationSummary {
        OperationSummary {
            fee_payer: self.treasury.clone(),
            program_ids: vec![
                Address::new(COMPUTE_BUDGET_PROGRAM),
                Address::new(PUMP_PROGRAM),
            ],
            instruction_count: 2,
        }
    }

    fn pending_id(op: &UnsignedOperation) -> Option<String> {
        match &op.payload {
            OperationPayload::Encoded(id) => Some(id.clone()),
            OperationPayload::Raw(bytes) => String::from_utf8(bytes.clone()).ok(),
        }
    }

    fn issue(state: &mut ChainState, prefix: &str, op: PendingOp) -> String {
        state.next_op += 1;
        let id = format!("{prefix}-{}", state.next_op);
        state.pending.insert(id.clone(), op);
        id
    }
}

#[async_trait]
impl BalanceReader for MemoryChain {
    async fn base_balance(&self, owner: &Address) -> Result<Amount> {
        self.delay().await;
        let mut state = self.lock();
        let call = state.base_reads;
        state.base_reads += 1;
        if state.failing_reads.contains(owner) || state.failing_base_reads.contains(&call) {
            return Err(RpcError::Transport(format!("getBalance({}) timed out", owner.short())).into());
        }
        Ok(state.base.get(owner).copied().unwrap_or(0.0))
    }

    async fn token_balance(&self, owner: &Address, mint: &Address) -> Result<Amount> {
        self.delay().await;
        let state = self.lock();
        if state.failing_reads.contains(owner) {
            return Err(RpcError::Transport(format!(
                "getTokenAccountsByOwner({}) timed out",
                owner.short()
            ))
            .into());
        }
        Ok(state
            .tokens
            .get(&(owner.clone(), mint.clone()))
            .copied()
            .unwrap_or(0.0))
    }

    async fn token_account_exists(&self, owner: &Address, mint: &Address) -> Result<bool> {
        self.delay().await;
        let state = self.lock();
        if state.failing_reads.contains(owner) {
            return Err(RpcError::Transport("getTokenAccountsByOwner timed out".to_string()).into());
        }
        Ok(state.token_accounts.contains(&(owner.clone(), mint.clone())))
    }
}

#[async_trait]
impl FeeClaimProvider for MemoryChain {
    async fn request_claim(&self, request: &ClaimRequest) -> Result<ClaimResponse> {
        self.delay().await;
        let mut state = self.lock();
        if request.treasury != self.treasury || state.claimable_fees <= 0.0 {
            return Ok(ClaimResponse::NoFees);
        }
        let id = Self::issue(&mut state, "claim", PendingOp::Claim);
        Ok(ClaimResponse::Operation(UnsignedOperation {
            purpose: OperationPurpose::FeeClaim,
            payload: OperationPayload::Encoded(id),
        }))
    }
}

#[async_trait]
impl SwapProvider for MemoryChain {
    async fn quote(&self, request: &QuoteRequest) -> Result<Option<SwapQuote>> {
        self.delay().await;
        let mut state = self.lock();
        state.quote_calls += 1;
        if state.no_route || request.amount_units == 0 {
            return Ok(None);
        }
        let input = from_base_units(request.amount_units, self.base_decimals);
        let out_amount_units = to_base_units(input * state.swap_rate, self.token_decimals);
        Ok(Some(SwapQuote {
            input_mint: request.input_mint.clone(),
            output_mint: request.output_mint.clone(),
            in_amount_units: request.amount_units,
            out_amount_units,
            slippage_bps: request.slippage_bps,
            raw: serde_json::json!({
                "inAmount": request.amount_units.to_string(),
                "outAmount": out_amount_units.to_string(),
            }),
        }))
    }

    async fn build_swap(
        &self,
        quote: &SwapQuote,
        _user: &Address,
        _priority_fee_lamports: u64,
    ) -> Result<UnsignedOperation> {
        self.delay().await;
        let mut state = self.lock();
        let id = Self::issue(&mut state, "swap", PendingOp::Swap(quote.clone()));
        Ok(UnsignedOperation {
            purpose: OperationPurpose::Swap,
            payload: OperationPayload::Encoded(id),
        })
    }
}

#[async_trait]
impl HolderIndex for MemoryChain {
    async fn list_accounts(
        &self,
        mint: &Address,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<HolderPage> {
        self.delay().await;
        let mut state = self.lock();
        state.index_calls += 1;
        if state.fail_index {
            return Err(RpcError::Transport("holder index unreachable".to_string()).into());
        }
        let offset = cursor
            .and_then(|c| c.strip_prefix("offset-"))
            .and_then(|raw| raw.parse::<usize>().ok())
            .unwrap_or(0);
        let rows = state.index.get(mint).map(Vec::as_slice).unwrap_or(&[]);
        let limit = limit.max(1);
        let end = offset.saturating_add(limit).min(rows.len());
        let accounts = rows.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_cursor = (end < rows.len()).then(|| format!("offset-{end}"));
        Ok(HolderPage {
            accounts,
            next_cursor,
        })
    }
}

#[async_trait]
impl ChainGateway for MemoryChain {
    async fn inspect(&self, op: &UnsignedOperation) -> Result<OperationSummary> {
        self.delay().await;
        let state = self.lock();
        match op.purpose {
            OperationPurpose::FeeClaim => Ok(state
                .claim_summary
                .clone()
                .unwrap_or_else(|| self.default_summary())),
            OperationPurpose::Swap => Ok(self.default_summary()),
        }
    }

    async fn simulate(&self, op: &UnsignedOperation) -> Result<Simulation> {
        self.delay().await;
        let state = self.lock();
        let default = Simulation {
            error: None,
            logs: vec![
                format!("Program {PUMP_PROGRAM} invoke [1]"),
                "Program log: Instruction: CollectCreatorFee".to_string(),
                format!("Program {PUMP_PROGRAM} success"),
            ],
            fee_payer_lamports_drop: Some(5_000),
        };
        match op.purpose {
            OperationPurpose::FeeClaim => Ok(state.claim_simulation.clone().unwrap_or(default)),
            OperationPurpose::Swap => Ok(default),
        }
    }

    async fn sign_and_submit(&self, op: UnsignedOperation) -> Result<TransferId> {
        self.delay().await;
        let id = Self::pending_id(&op)
            .ok_or_else(|| RpcError::Rejected("unreadable operation payload".to_string()))?;
        let mut state = self.lock();
        let pending = state
            .pending
            .remove(&id)
            .ok_or_else(|| RpcError::Rejected(format!("unknown operation `{id}`")))?;

        match pending {
            PendingOp::Claim => {
                let claimed = state.claimable_fees.max(0.0);
                let gas = state.claim_gas.max(0.0);
                *state.base.entry(self.treasury.clone()).or_insert(0.0) += claimed - gas;
                state.claimable_fees = 0.0;
                state.claims_submitted += 1;
            }
            PendingOp::Swap(quote) => {
                if state.fail_swap_submission {
                    return Err(RpcError::Rejected("swap simulation failed: slippage".to_string()).into());
                }
                let input = from_base_units(quote.in_amount_units, self.base_decimals);
                let balance = state.base.get(&self.treasury).copied().unwrap_or(0.0);
                if input > balance + f64::EPSILON {
                    return Err(RpcError::Rejected("insufficient funds for swap".to_string()).into());
                }
                state.base.insert(self.treasury.clone(), balance - input);
                let output = from_base_units(quote.out_amount_units, self.token_decimals);
                let key = (self.treasury.clone(), quote.output_mint.clone());
                state.token_accounts.insert(key.clone());
                *state.tokens.entry(key).or_insert(0.0) += output;
                state.swaps_submitted += 1;
            }
        }
        Ok(format!("sig-{id}"))
    }

    async fn submit_transfers(&self, batch: &TransferBatch) -> Result<TransferId> {
        self.delay().await;
        let mut state = self.lock();
        let call = state.transfer_calls;
        state.transfer_calls += 1;

        if state.failing_batches.contains(&call) {
            return Err(RpcError::Rejected(format!("batch {call} simulation failed")).into());
        }
        for leg in &batch.legs {
            let key = (leg.recipient.clone(), batch.mint.clone());
            if !leg.create_account && !state.token_accounts.contains(&key) {
                return Err(RpcError::Rejected(format!(
                    "AccountNotFound for {}",
                    leg.recipient.short()
                ))
                .into());
            }
        }
        let total_units: u64 = batch.legs.iter().map(|l| l.amount_units).sum();
        let treasury_key = (self.treasury.clone(), batch.mint.clone());
        // Balances are tracked as floats; round to the nearest unit before comparing.
        let treasury_units = (state.tokens.get(&treasury_key).copied().unwrap_or(0.0)
            * 10f64.powi(i32::from(self.token_decimals)))
        .round()
        .max(0.0) as u64;
        if total_units > treasury_units {
            return Err(RpcError::Rejected("insufficient token balance".to_string()).into());
        }

        for leg in &batch.legs {
            let amount = from_base_units(leg.amount_units, self.token_decimals);
            *state.tokens.entry(treasury_key.clone()).or_insert(0.0) -= amount;
            let key = (leg.recipient.clone(), batch.mint.clone());
            state.token_accounts.insert(key.clone());
            *state.tokens.entry(key).or_insert(0.0) += amount;
        }
        state.batches.push(batch.clone());
        Ok(format!("transfer-{call}"))
    }
}
