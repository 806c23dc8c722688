//! Snapshot Service: paginated holder enumeration for the gating mint.

use crate::error::Result;
use crate::providers::HolderIndex;
use crate::types::{from_base_units, Address, Amount, Holder};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotResult {
    pub all_holders: Vec<Holder>,
    pub eligible: Vec<Holder>,
    pub total_eligible_balance: Amount,
}

impl SnapshotResult {
    pub fn is_empty(&self) -> bool {
        self.eligible.is_empty()
    }
}

pub struct SnapshotSettings {
    pub gating_mint: Address,
    pub gating_decimals: u8,
    pub min_holding: Amount,
    pub max_pages: usize,
    pub page_limit: usize,
}

pub struct SnapshotService {
    settings: SnapshotSettings,
    index: Arc<dyn HolderIndex>,
}

impl SnapshotService {
    pub fn new(settings: SnapshotSettings, index: Arc<dyn HolderIndex>) -> Self {
        Self { settings, index }
    }

    pub fn min_holding(&self) -> Amount {
        self.settings.min_holding
    }

    pub fn gating_mint(&self) -> &Address {
        &self.settings.gating_mint
    }

    /// Every holder of the gating mint, one entry per owner in first-seen order.
    pub async fn list_holders(&self) -> Result<Vec<Holder>> {
        let mint = &self.settings.gating_mint;
        let mut order: Vec<Address> = Vec::new();
        let mut units: HashMap<Address, u64> = HashMap::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .index
                .list_accounts(mint, cursor.as_deref(), self.settings.page_limit)
                .await?;
            pages += 1;
            for account in page.accounts {
                if account.amount_units == 0 {
                    continue;
                }
                let slot = units.entry(account.owner.clone()).or_insert_with(|| {
                    order.push(account.owner.clone());
                    0
                });
                *slot = slot.saturating_add(account.amount_units);
            }
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
            if pages >= self.settings.max_pages {
                tracing::warn!(
                    "[SNAPSHOT] Page cap {} reached; using {} holders gathered so far.",
                    self.settings.max_pages,
                    order.len()
                );
                break;
            }
        }

        Ok(order
            .into_iter()
            .map(|owner| {
                let raw = units.get(&owner).copied().unwrap_or(0);
                Holder {
                    address: owner,
                    balance: from_base_units(raw, self.settings.gating_decimals),
                }
            })
            .collect())
    }

    pub async fn take(&self) -> Result<SnapshotResult> {
        let all_holders = self.list_holders().await?;
        let eligible: Vec<Holder> = all_holders
            .iter()
            .filter(|h| h.balance >= self.settings.min_holding)
            .cloned()
            .collect();
        let total_eligible_balance = eligible.iter().map(|h| h.balance).sum();
        tracing::info!(
            "[SNAPSHOT] {} eligible holders (>= {}) out of {} total, eligible balance {:.2}",
            eligible.len(),
            self.settings.min_holding,
            all_holders.len(),
            total_eligible_balance
        );
        Ok(SnapshotResult {
            all_holders,
            eligible,
            total_eligible_balance,
        })
    }
}
