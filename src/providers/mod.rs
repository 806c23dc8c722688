//! Collaborator seams consumed by the treasury cycle.
//!
//! Everything that touches the network or the chain sits behind one of these
//! traits. The cycle holds them as `Arc<dyn ...>` so the binary can wire HTTP
//! clients while tests wire [`memory::MemoryChain`].

pub mod dry_run;
pub mod http;
pub mod memory;

use crate::error::Result;
use crate::types::{Address, Amount, TransferId};
use async_trait::async_trait;
use serde_json::Value;

/// Balance and account reads against the chain.
#[async_trait]
pub trait BalanceReader: Send + Sync {
    /// Native (base asset) balance in UI units.
    async fn base_balance(&self, owner: &Address) -> Result<Amount>;
    /// Sum of every token account `owner` holds for `mint`, in UI units.
    async fn token_balance(&self, owner: &Address, mint: &Address) -> Result<Amount>;
    async fn token_account_exists(&self, owner: &Address, mint: &Address) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationPurpose {
    FeeClaim,
    Swap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationPayload {
    /// Serialized transaction bytes as returned by the provider.
    Raw(Vec<u8>),
    /// Base64 (or provider-specific) text encoding.
    Encoded(String),
}

/// A pre-built, unsigned chain operation handed to us by an external provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedOperation {
    pub purpose: OperationPurpose,
    pub payload: OperationPayload,
}

/// What the gateway decoded out of an operation before signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSummary {
    pub fee_payer: Address,
    /// Program invoked by each instruction, in instruction order.
    pub program_ids: Vec<Address>,
    pub instruction_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Simulation {
    pub error: Option<String>,
    pub logs: Vec<String>,
    /// Lamports the fee payer would lose, when the simulator reports balances.
    pub fee_payer_lamports_drop: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClaimRequest {
    pub treasury: Address,
    pub priority_fee: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResponse {
    Operation(UnsignedOperation),
    NoFees,
}

#[async_trait]
pub trait FeeClaimProvider: Send + Sync {
    async fn request_claim(&self, request: &ClaimRequest) -> Result<ClaimResponse>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRequest {
    pub input_mint: Address,
    pub output_mint: Address,
    /// Input amount in the input asset's smallest units.
    pub amount_units: u64,
    pub slippage_bps: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwapQuote {
    pub input_mint: Address,
    pub output_mint: Address,
    pub in_amount_units: u64,
    /// Advisory estimate; the realized output is read back from the chain.
    pub out_amount_units: u64,
    pub slippage_bps: u16,
    /// Provider response, passed back verbatim when building the swap.
    pub raw: Value,
}

#[async_trait]
pub trait SwapProvider: Send + Sync {
    /// `Ok(None)` when the provider has no route for the pair.
    async fn quote(&self, request: &QuoteRequest) -> Result<Option<SwapQuote>>;
    async fn build_swap(
        &self,
        quote: &SwapQuote,
        user: &Address,
        priority_fee_lamports: u64,
    ) -> Result<UnsignedOperation>;
}

/// One token account as reported by the holder index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedAccount {
    pub owner: Address,
    /// Raw amount in the mint's smallest units.
    pub amount_units: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HolderPage {
    pub accounts: Vec<IndexedAccount>,
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait HolderIndex: Send + Sync {
    async fn list_accounts(
        &self,
        mint: &Address,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<HolderPage>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLeg {
    pub recipient: Address,
    pub amount_units: u64,
    /// Create the recipient's token account inside the same submission.
    pub create_account: bool,
}

/// One atomic multi-transfer submission from the treasury.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferBatch {
    pub mint: Address,
    pub legs: Vec<TransferLeg>,
}

/// Signing, encoding, simulation and confirmation.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    async fn inspect(&self, op: &UnsignedOperation) -> Result<OperationSummary>;
    async fn simulate(&self, op: &UnsignedOperation) -> Result<Simulation>;
    /// Signs with the treasury key, submits and waits for confirmation.
    async fn sign_and_submit(&self, op: UnsignedOperation) -> Result<TransferId>;
    /// Builds, signs and confirms one transfer operation covering every leg.
    async fn submit_transfers(&self, batch: &TransferBatch) -> Result<TransferId>;
}
