use super::{
    ChainGateway, OperationPurpose, OperationSummary, Simulation, TransferBatch,
    UnsignedOperation,
};
use crate::error::{Result, RpcError};
use crate::types::TransferId;
use async_trait::async_trait;

/// Gateway that refuses every chain-facing call.
///
/// The binary ships without a signer, so it runs the full read path (balances,
/// quotes, snapshots, verification) and stops at the first step that would need
/// a signature.
#[derive(Debug, Default, Clone)]
pub struct DryRunGateway;

impl DryRunGateway {
    pub fn new() -> Self {
        Self
    }
}

fn purpose_label(purpose: OperationPurpose) -> &'static str {
    match purpose {
        OperationPurpose::FeeClaim => "fee claim",
        OperationPurpose::Swap => "swap",
    }
}

fn disabled(what: impl Into<String>) -> crate::error::TreasuryError {
    RpcError::SubmissionDisabled(what.into()).into()
}

#[async_trait]
impl ChainGateway for DryRunGateway {
    async fn inspect(&self, op: &UnsignedOperation) -> Result<OperationSummary> {
        Err(disabled(format!(
            "cannot decode {} operation without a signing gateway",
            purpose_label(op.purpose)
        )))
    }

    async fn simulate(&self, op: &UnsignedOperation) -> Result<Simulation> {
        Err(disabled(format!(
            "cannot simulate {} operation without a signing gateway",
            purpose_label(op.purpose)
        )))
    }

    async fn sign_and_submit(&self, op: UnsignedOperation) -> Result<TransferId> {
        tracing::debug!(
            "[OPS] dry-run: dropping unsigned {} operation",
            purpose_label(op.purpose)
        );
        Err(disabled(format!(
            "{} not submitted (dry-run)",
            purpose_label(op.purpose)
        )))
    }

    async fn submit_transfers(&self, batch: &TransferBatch) -> Result<TransferId> {
        tracing::debug!(
            "[OPS] dry-run: dropping transfer batch of {} legs",
            batch.legs.len()
        );
        Err(disabled(format!(
            "transfer batch of {} legs not submitted (dry-run)",
            batch.legs.len()
        )))
    }
}
