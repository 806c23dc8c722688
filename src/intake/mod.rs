//! Fee Intake: claim accrued creator fees into the treasury.
//!
//! The claimed amount is never taken from the provider. It is the treasury's
//! base-balance delta across the claim, clamped at zero.

pub mod safety;

pub use safety::{SafetyPolicy, SAFE_PROGRAMS};

use crate::error::{Result, RpcError, TreasuryError};
use crate::providers::{BalanceReader, ChainGateway, ClaimRequest, ClaimResponse, FeeClaimProvider};
use crate::types::{Address, Amount, TransferId};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed {
        claimed: Amount,
        signature: Option<TransferId>,
    },
    /// The claim landed but the post-claim balance could not be read. The caller
    /// owes a reconciliation against `before` from its next successful read.
    Unreconciled {
        before: Amount,
        signature: TransferId,
    },
    NoFeesAvailable,
}

fn is_insufficient_fee_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("insufficient")
        || lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|token| token == "0x1")
}

fn is_nothing_to_claim_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("no fees") || lower.contains("nothing")
}

pub struct FeeIntake {
    treasury: Address,
    priority_fee: Amount,
    policy: SafetyPolicy,
    balances: Arc<dyn BalanceReader>,
    claims: Arc<dyn FeeClaimProvider>,
    gateway: Arc<dyn ChainGateway>,
}

impl FeeIntake {
    pub fn new(
        treasury: Address,
        priority_fee: Amount,
        policy: SafetyPolicy,
        balances: Arc<dyn BalanceReader>,
        claims: Arc<dyn FeeClaimProvider>,
        gateway: Arc<dyn ChainGateway>,
    ) -> Self {
        Self {
            treasury,
            priority_fee,
            policy,
            balances,
            claims,
            gateway,
        }
    }

    pub async fn claim(&self) -> Result<ClaimOutcome> {
        let before = self.balances.base_balance(&self.treasury).await?;

        let request = ClaimRequest {
            treasury: self.treasury.clone(),
            priority_fee: self.priority_fee,
        };
        let op = match self.claims.request_claim(&request).await? {
            ClaimResponse::Operation(op) => op,
            ClaimResponse::NoFees => {
                tracing::debug!("[CLAIM] Provider reports no fees to claim.");
                return Ok(ClaimOutcome::NoFeesAvailable);
            }
        };

        self.policy.verify(self.gateway.as_ref(), &op).await?;
        tracing::debug!("[CLAIM] Claim operation passed the safety filter.");

        let signature = match self.gateway.sign_and_submit(op).await {
            Ok(signature) => signature,
            Err(err) if err.is_submission_disabled() => return Err(err),
            Err(err) => return classify_submit_error(err),
        };

        let after = match self.balances.base_balance(&self.treasury).await {
            Ok(after) => after,
            Err(err) => {
                tracing::warn!(
                    "[CLAIM] Claim {signature} confirmed but post-claim balance read failed: {err}. Deferring reconciliation."
                );
                return Ok(ClaimOutcome::Unreconciled { before, signature });
            }
        };
        let claimed = (after - before).max(0.0);
        tracing::info!(
            "[CLAIM] Claim {} confirmed: balance {:.6} -> {:.6}, claimed {:.6}",
            signature,
            before,
            after,
            claimed
        );
        Ok(ClaimOutcome::Claimed {
            claimed,
            signature: Some(signature),
        })
    }
}

fn classify_submit_error(err: TreasuryError) -> Result<ClaimOutcome> {
    let message = err.to_string();
    if is_nothing_to_claim_message(&message) {
        return Ok(ClaimOutcome::NoFeesAvailable);
    }
    if is_insufficient_fee_message(&message) {
        return Err(RpcError::Rejected(
            "insufficient base balance for claim transaction fee".to_string(),
        )
        .into());
    }
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::memory::MemoryChain;
    use crate::providers::{OperationSummary, Simulation};

    fn treasury() -> Address {
        Address::new("TreasuryWa11et111111111111111111111")
    }

    fn intake(chain: &Arc<MemoryChain>) -> FeeIntake {
        FeeIntake::new(
            treasury(),
            0.0001,
            SafetyPolicy::new(treasury(), 10_000_000, 10),
            chain.clone(),
            chain.clone(),
            chain.clone(),
        )
    }

    #[tokio::test]
    async fn test_claim_reports_balance_delta() {
        let chain = Arc::new(MemoryChain::new(treasury()));
        chain.set_base_balance(&treasury(), 0.5);
        chain.set_claimable_fees(2.0);
        let outcome = intake(&chain).claim().await.expect("claim");
        let ClaimOutcome::Claimed { claimed, signature } = outcome else {
            panic!("expected claim, got {outcome:?}");
        };
        assert!((claimed - 2.0).abs() < 1e-9);
        assert!(signature.is_some());
    }

    #[tokio::test]
    async fn test_gas_exceeding_fees_records_zero() {
        let chain = Arc::new(MemoryChain::new(treasury()));
        chain.set_base_balance(&treasury(), 1.0);
        chain.set_claimable_fees(0.001);
        chain.set_claim_gas(0.005);
        let outcome = intake(&chain).claim().await.expect("claim");
        assert!(matches!(outcome, ClaimOutcome::Claimed { claimed, .. } if claimed == 0.0));
    }

    #[tokio::test]
    async fn test_failed_post_claim_read_defers_reconciliation() {
        let chain = Arc::new(MemoryChain::new(treasury()));
        chain.set_base_balance(&treasury(), 0.5);
        chain.set_claimable_fees(2.0);
        chain.fail_base_read(1);
        let outcome = intake(&chain).claim().await.expect("claim");
        let ClaimOutcome::Unreconciled { before, .. } = outcome else {
            panic!("expected an unreconciled claim, got {outcome:?}");
        };
        assert!((before - 0.5).abs() < 1e-9);
        assert_eq!(chain.claims_submitted(), 1);
        assert!((chain.base_balance_of(&treasury()) - 2.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_fees_is_benign() {
        let chain = Arc::new(MemoryChain::new(treasury()));
        chain.set_base_balance(&treasury(), 1.0);
        assert_eq!(
            intake(&chain).claim().await.expect("claim"),
            ClaimOutcome::NoFeesAvailable
        );
        assert_eq!(chain.claims_submitted(), 0);
    }

    #[tokio::test]
    async fn test_unsafe_operation_is_never_signed() {
        let chain = Arc::new(MemoryChain::new(treasury()));
        chain.set_base_balance(&treasury(), 1.0);
        chain.set_claimable_fees(2.0);
        chain.set_claim_summary(OperationSummary {
            fee_payer: treasury(),
            program_ids: vec![Address::new("Drainer1111111111111111111111111111")],
            instruction_count: 1,
        });
        let err = intake(&chain).claim().await.expect_err("rejected");
        assert!(matches!(err, TreasuryError::Safety(_)));
        assert_eq!(chain.claims_submitted(), 0);
        assert_eq!(chain.base_balance_of(&treasury()), 1.0);
    }

    #[tokio::test]
    async fn test_failed_simulation_is_rejected() {
        let chain = Arc::new(MemoryChain::new(treasury()));
        chain.set_claimable_fees(2.0);
        chain.set_claim_simulation(Simulation {
            error: Some("custom program error: 0x1771".to_string()),
            ..Simulation::default()
        });
        let err = intake(&chain).claim().await.expect_err("rejected");
        assert!(matches!(
            err,
            TreasuryError::Safety(crate::error::SafetyRejection::SimulationFailed(_))
        ));
    }

    #[test]
    fn test_submit_error_classification() {
        let nothing = classify_submit_error(RpcError::Rejected("nothing to collect".into()).into());
        assert!(matches!(nothing, Ok(ClaimOutcome::NoFeesAvailable)));
        let broke = classify_submit_error(
            RpcError::Rejected("Attempt to debit an account but found no record; insufficient lamports".into())
                .into(),
        );
        assert!(matches!(broke, Err(e) if e.to_string().contains("insufficient base balance")));
        let custom = classify_submit_error(
            RpcError::Rejected("Transaction failed: custom program error: 0x1".into()).into(),
        );
        assert!(matches!(custom, Err(e) if e.to_string().contains("insufficient base balance")));
        let hex = classify_submit_error(RpcError::Rejected("custom program error: 0x1771".into()).into());
        assert!(matches!(hex, Err(e) if e.to_string().contains("0x1771")));
        let other = classify_submit_error(RpcError::Transport("timeout".into()).into());
        assert!(matches!(other, Err(TreasuryError::Net(RpcError::Transport(_)))));
    }
}
