use crate::types::{Amount, Distribution, Holder};

/// Pro-rata split of `reward` across `eligible` by balance.
///
/// Returns an empty allocation when there is nothing to weight by, so callers
/// never divide by a zero total.
pub fn allocate(eligible: &[Holder], total_eligible_balance: Amount, reward: Amount) -> Vec<Distribution> {
    if eligible.is_empty()
        || !total_eligible_balance.is_finite()
        || total_eligible_balance <= 0.0
        || !reward.is_finite()
        || reward <= 0.0
    {
        return Vec::new();
    }
    eligible
        .iter()
        .map(|holder| Distribution {
            address: holder.address.clone(),
            amount: holder.balance / total_eligible_balance * reward,
        })
        .collect()
}

pub fn total_allocated(distributions: &[Distribution]) -> Amount {
    distributions.iter().map(|d| d.amount).sum()
}
