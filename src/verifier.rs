//! Anti-Dump Verifier: live balance re-check right before transfer.
//!
//! A holder who fell below the threshold since the snapshot is dropped. Their
//! allocation is not handed to anyone else; it stays in the treasury.

use crate::providers::BalanceReader;
use crate::types::{Address, Amount, Distribution};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerificationReport {
    pub verified: Vec<Distribution>,
    pub skipped: usize,
}

impl VerificationReport {
    pub fn verified_total(&self) -> Amount {
        self.verified.iter().map(|d| d.amount).sum()
    }
}

pub struct AntiDumpVerifier {
    gating_mint: Address,
    min_holding: Amount,
    balances: Arc<dyn BalanceReader>,
}

impl AntiDumpVerifier {
    pub fn new(gating_mint: Address, min_holding: Amount, balances: Arc<dyn BalanceReader>) -> Self {
        Self {
            gating_mint,
            min_holding,
            balances,
        }
    }

    /// Sequential, one query per holder. A failed query counts as a dumper.
    pub async fn verify(&self, distributions: Vec<Distribution>) -> VerificationReport {
        let mut report = VerificationReport::default();
        for dist in distributions {
            match self.balances.token_balance(&dist.address, &self.gating_mint).await {
                Ok(balance) if balance >= self.min_holding => report.verified.push(dist),
                Ok(balance) => {
                    tracing::info!(
                        "[VERIFY] {} dropped to {:.2} (< {}); skipping {:.4}",
                        dist.address.short(),
                        balance,
                        self.min_holding,
                        dist.amount
                    );
                    report.skipped += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        "[VERIFY] Balance check failed for {}: {err}; skipping.",
                        dist.address.short()
                    );
                    report.skipped += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::allocate;
    use crate::providers::memory::MemoryChain;
    use crate::types::Holder;

    fn addr(tag: &str) -> Address {
        Address::new(format!("{tag:1>32}"))
    }

    #[tokio::test]
    async fn test_dumper_allocation_is_not_redistributed() {
        let gating = addr("G");
        let chain = Arc::new(MemoryChain::new(addr("T")));
        chain.add_holder(&gating, &addr("A"), 600_000.0);
        chain.add_holder(&gating, &addr("B"), 400_000.0);

        let eligible = vec![
            Holder {
                address: addr("A"),
                balance: 600_000.0,
            },
            Holder {
                address: addr("B"),
                balance: 400_000.0,
            },
        ];
        let allocations = allocate(&eligible, 1_000_000.0, 1_000_000.0);
        chain.set_token_balance(&addr("B"), &gating, 10_000.0);

        let verifier = AntiDumpVerifier::new(gating, 50_000.0, chain.clone());
        let report = verifier.verify(allocations).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.verified.len(), 1);
        assert_eq!(report.verified[0].address, addr("A"));
        assert!((report.verified[0].amount - 600_000.0).abs() < 1e-6);
        assert!(report.verified_total() < 1_000_000.0);
    }

    #[tokio::test]
    async fn test_failed_lookup_fails_closed() {
        let gating = addr("G");
        let chain = Arc::new(MemoryChain::new(addr("T")));
        chain.add_holder(&gating, &addr("A"), 600_000.0);
        chain.fail_balance_reads_for(&addr("A"));
        let verifier = AntiDumpVerifier::new(gating, 50_000.0, chain.clone());
        let report = verifier
            .verify(vec![Distribution {
                address: addr("A"),
                amount: 10.0,
            }])
            .await;
        assert!(report.verified.is_empty());
        assert_eq!(report.skipped, 1);
    }
}
