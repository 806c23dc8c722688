//! Batch Transfer Executor.
//!
//! Batches are submitted one at a time and fail independently: a rejected
//! batch is recorded in `CycleResult::errors` and the next batch still runs.
//! Nothing is rolled back.

use crate::providers::{BalanceReader, ChainGateway, TransferBatch, TransferLeg};
use crate::status::{ActivityKind, StatusBoard};
use crate::types::{from_base_units, to_base_units, Address, CycleResult, Distribution};
use crate::utils::error::compact_error;
use std::sync::Arc;
use std::time::Duration;

/// Order-preserving fixed-size chunks. A zero size is treated as one.
pub fn partition<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let size = batch_size.max(1);
    let mut out = Vec::with_capacity(items.len().div_ceil(size));
    let mut current = Vec::with_capacity(size);
    for item in items {
        current.push(item);
        if current.len() == size {
            out.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

pub struct BatchSettings {
    pub reward_mint: Address,
    pub reward_decimals: u8,
    pub batch_size: usize,
    pub batch_delay: Duration,
}

pub struct BatchExecutor {
    settings: BatchSettings,
    balances: Arc<dyn BalanceReader>,
    gateway: Arc<dyn ChainGateway>,
}

impl BatchExecutor {
    pub fn new(
        settings: BatchSettings,
        balances: Arc<dyn BalanceReader>,
        gateway: Arc<dyn ChainGateway>,
    ) -> Self {
        Self {
            settings,
            balances,
            gateway,
        }
    }

    async fn build_legs(&self, batch: Vec<Distribution>) -> Vec<TransferLeg> {
        let mut legs = Vec::with_capacity(batch.len());
        for dist in batch {
            let amount_units = to_base_units(dist.amount, self.settings.reward_decimals);
            if amount_units == 0 {
                tracing::debug!(
                    "[AIRDROP] Allocation {:.8} to {} rounds to zero units; not sent.",
                    dist.amount,
                    dist.address.short()
                );
                continue;
            }
            let create_account = match self
                .balances
                .token_account_exists(&dist.address, &self.settings.reward_mint)
                .await
            {
                Ok(exists) => !exists,
                Err(err) => {
                    // Idempotent create covers the unknown case.
                    tracing::debug!(
                        "[AIRDROP] Account lookup for {} failed ({err}); including create.",
                        dist.address.short()
                    );
                    true
                }
            };
            legs.push(TransferLeg {
                recipient: dist.address,
                amount_units,
                create_account,
            });
        }
        legs
    }

    pub async fn execute(&self, verified: Vec<Distribution>, board: &mut StatusBoard) -> CycleResult {
        let mut result = CycleResult::default();
        let batches = partition(verified, self.settings.batch_size);
        let count = batches.len();

        for (i, batch) in batches.into_iter().enumerate() {
            let legs = self.build_legs(batch).await;
            if legs.is_empty() {
                continue;
            }
            let units: u64 = legs.iter().map(|l| l.amount_units).sum();
            let amount = from_base_units(units, self.settings.reward_decimals);
            let recipients = legs.len();
            let creates = legs.iter().filter(|l| l.create_account).count();
            let submission = TransferBatch {
                mint: self.settings.reward_mint.clone(),
                legs,
            };

            match self.gateway.submit_transfers(&submission).await {
                Ok(transfer_id) => {
                    tracing::info!(
                        "[AIRDROP] Batch {}/{} confirmed ({}): {:.4} to {} holders, {} new accounts",
                        i + 1,
                        count,
                        transfer_id,
                        amount,
                        recipients,
                        creates
                    );
                    board.activity_with_transfer(
                        ActivityKind::Airdrop,
                        format!(
                            "Batch {}/{}: sent {:.2} to {} holders",
                            i + 1,
                            count,
                            amount,
                            recipients
                        ),
                        Some(transfer_id.clone()),
                    );
                    result.distributed += amount;
                    result.recipients += recipients;
                    result.transfer_ids.push(transfer_id);

                    if i + 1 < count && !self.settings.batch_delay.is_zero() {
                        tokio::time::sleep(self.settings.batch_delay).await;
                    }
                }
                Err(err) => {
                    let message = format!("Batch {}/{} failed: {}", i + 1, count, compact_error(&err));
                    if err.is_submission_disabled() {
                        tracing::debug!("[AIRDROP] {message}");
                    } else {
                        tracing::warn!("[AIRDROP] {message}");
                    }
                    board.error(message.clone());
                    result.errors.push(message);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::memory::MemoryChain;
    use crate::status::RecordingSink;
    use proptest::prelude::*;

    fn addr(tag: &str) -> Address {
        Address::new(format!("{tag:1>32}"))
    }

    fn dists(n: usize, amount: f64) -> Vec<Distribution> {
        (0..n)
            .map(|i| Distribution {
                address: addr(&format!("H{i}")),
                amount,
            })
            .collect()
    }

    fn executor(chain: &Arc<MemoryChain>) -> BatchExecutor {
        BatchExecutor::new(
            BatchSettings {
                reward_mint: addr("R"),
                reward_decimals: 6,
                batch_size: 7,
                batch_delay: Duration::ZERO,
            },
            chain.clone(),
            chain.clone(),
        )
    }

    #[test]
    fn test_partition_22_by_7() {
        let sizes: Vec<usize> = partition((0..22).collect::<Vec<_>>(), 7)
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(sizes, vec![7, 7, 7, 1]);
        assert!(partition(Vec::<u8>::new(), 7).is_empty());
        assert_eq!(partition(vec![1, 2, 3], 0).len(), 3);
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_later_batches() {
        let chain = Arc::new(MemoryChain::new(addr("T")));
        chain.set_token_balance(&addr("T"), &addr("R"), 1_000.0);
        chain.fail_transfer_batch(1);
        let sink = Arc::new(RecordingSink::new());
        let mut board = StatusBoard::new(sink.clone(), 50);

        let result = executor(&chain).execute(dists(22, 10.0), &mut board).await;
        assert_eq!(chain.transfer_calls(), 4);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.recipients, 15);
        assert!((result.distributed - 150.0).abs() < 1e-9);
        assert_eq!(result.transfer_ids.len(), 3);
        assert!((chain.token_balance_of(&addr("T"), &addr("R")) - 850.0).abs() < 1e-9);
        assert!(sink
            .activities()
            .iter()
            .any(|a| a.kind == ActivityKind::Error && a.message.contains("Batch 2/4")));
    }

    #[tokio::test]
    async fn test_missing_accounts_are_created_in_batch() {
        let chain = Arc::new(MemoryChain::new(addr("T")));
        chain.set_token_balance(&addr("T"), &addr("R"), 100.0);
        chain.set_token_balance(&addr("H0"), &addr("R"), 1.0);
        let mut board = StatusBoard::new(Arc::new(RecordingSink::new()), 50);

        let result = executor(&chain).execute(dists(2, 5.0), &mut board).await;
        assert!(result.is_clean());
        let batches = chain.transfer_batches();
        assert_eq!(batches.len(), 1);
        assert!(!batches[0].legs[0].create_account);
        assert!(batches[0].legs[1].create_account);
        assert!(chain.has_token_account(&addr("H1"), &addr("R")));
    }

    #[tokio::test]
    async fn test_zero_unit_legs_are_skipped() {
        let chain = Arc::new(MemoryChain::new(addr("T")));
        chain.set_token_balance(&addr("T"), &addr("R"), 100.0);
        let mut board = StatusBoard::new(Arc::new(RecordingSink::new()), 50);
        let mut input = dists(2, 5.0);
        input.push(Distribution {
            address: addr("Dust"),
            amount: 0.000_000_4,
        });
        let result = executor(&chain).execute(input, &mut board).await;
        assert_eq!(result.recipients, 2);
        assert_eq!(chain.transfer_batches()[0].legs.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_partition_preserves_order_and_bounds(len in 0usize..200, size in 1usize..20) {
            let items: Vec<usize> = (0..len).collect();
            let batches = partition(items.clone(), size);
            prop_assert_eq!(batches.len(), len.div_ceil(size));
            prop_assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= size));
            let flat: Vec<usize> = batches.into_iter().flatten().collect();
            prop_assert_eq!(flat, items);
        }
    }
}
