//! Swap Executor: base asset into reward token via quote-then-execute.

use crate::error::{LogicError, Result, RpcError};
use crate::providers::{BalanceReader, ChainGateway, QuoteRequest, SwapProvider};
use crate::types::{to_base_units, Address, Amount, TransferId};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct SwapOutcome {
    /// Realized reward-token balance delta, not the quote estimate.
    pub reward_acquired: Amount,
    pub transfer_id: TransferId,
}

pub struct SwapSettings {
    pub base_mint: Address,
    pub reward_mint: Address,
    pub base_decimals: u8,
    pub slippage_bps: u16,
    pub priority_fee_lamports: u64,
}

pub struct SwapExecutor {
    treasury: Address,
    settings: SwapSettings,
    balances: Arc<dyn BalanceReader>,
    swaps: Arc<dyn SwapProvider>,
    gateway: Arc<dyn ChainGateway>,
}

impl SwapExecutor {
    pub fn new(
        treasury: Address,
        settings: SwapSettings,
        balances: Arc<dyn BalanceReader>,
        swaps: Arc<dyn SwapProvider>,
        gateway: Arc<dyn ChainGateway>,
    ) -> Self {
        Self {
            treasury,
            settings,
            balances,
            swaps,
            gateway,
        }
    }

    pub fn reward_mint(&self) -> &Address {
        &self.settings.reward_mint
    }

    /// Swaps exactly `base_amount`. Any failure before submission moves no funds.
    pub async fn swap(&self, base_amount: Amount) -> Result<SwapOutcome> {
        let amount_units = to_base_units(base_amount, self.settings.base_decimals);
        if amount_units == 0 {
            return Err(LogicError::Invariant(format!(
                "swap amount {base_amount} rounds to zero units"
            ))
            .into());
        }

        let request = QuoteRequest {
            input_mint: self.settings.base_mint.clone(),
            output_mint: self.settings.reward_mint.clone(),
            amount_units,
            slippage_bps: self.settings.slippage_bps,
        };
        let quote = self.swaps.quote(&request).await?.ok_or_else(|| {
            RpcError::Rejected(format!(
                "no route for {} -> {}",
                request.input_mint.short(),
                request.output_mint.short()
            ))
        })?;
        tracing::info!(
            "[SWAP] Quote: {} units in -> ~{} units out ({} bps slippage)",
            quote.in_amount_units,
            quote.out_amount_units,
            quote.slippage_bps
        );

        let before = self
            .balances
            .token_balance(&self.treasury, &self.settings.reward_mint)
            .await?;
        let op = self
            .swaps
            .build_swap(&quote, &self.treasury, self.settings.priority_fee_lamports)
            .await?;
        let transfer_id = self.gateway.sign_and_submit(op).await?;

        let reward_acquired = match self
            .balances
            .token_balance(&self.treasury, &self.settings.reward_mint)
            .await
        {
            Ok(after) => (after - before).max(0.0),
            Err(err) => {
                tracing::warn!(
                    "[SWAP] Swap {transfer_id} confirmed but post-swap balance read failed: {err}. Recording 0."
                );
                0.0
            }
        };
        tracing::info!(
            "[SWAP] Swap {} confirmed: {:.6} base -> {:.6} reward",
            transfer_id,
            base_amount,
            reward_acquired
        );
        Ok(SwapOutcome {
            reward_acquired,
            transfer_id,
        })
    }
}
