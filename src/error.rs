use thiserror::Error;

pub type Result<T> = std::result::Result<T, TreasuryError>;

#[derive(Debug, Error)]
pub enum TreasuryError {
    #[error("network error: {0}")]
    Net(#[from] RpcError),
    #[error("safety rejection: {0}")]
    Safety(#[from] SafetyRejection),
    #[error("logic error: {0}")]
    Logic(#[from] LogicError),
    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),
}

impl TreasuryError {
    /// True when the failure came from a collaborator that refuses to move funds
    /// in this build (dry-run gateway), as opposed to a real upstream fault.
    pub fn is_submission_disabled(&self) -> bool {
        matches!(self, Self::Net(RpcError::SubmissionDisabled(_)))
    }
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("upstream `{endpoint}` returned HTTP {status}: {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("rpc `{method}` failed: {message}")]
    Rpc { method: String, message: String },
    #[error("unexpected response from `{endpoint}`: {reason}")]
    Decode { endpoint: String, reason: String },
    #[error("submission rejected: {0}")]
    Rejected(String),
    #[error("submission disabled: {0}")]
    SubmissionDisabled(String),
}

/// Verdict of the claim safety filter. Each variant is terminal for the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SafetyRejection {
    #[error("unknown program detected: {0}")]
    UnknownProgram(String),
    #[error("simulation failed: {0}")]
    SimulationFailed(String),
    #[error("simulated balance drop of {lamports} lamports exceeds fee ceiling {ceiling}")]
    BalanceDrop { lamports: u64, ceiling: u64 },
    #[error("large transfer of {lamports} lamports found in simulation logs")]
    LargeTransfer { lamports: u64 },
    #[error("unexpected fee payer {found}, expected {expected}")]
    UnexpectedFeePayer { found: String, expected: String },
    #[error("too many instructions ({count} > {max})")]
    TooManyInstructions { count: usize, max: usize },
    #[error("verification error: {0}")]
    Verification(String),
}

#[derive(Debug, Error)]
pub enum LogicError {
    #[error("missing required configuration: {0}")]
    MissingConfig(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invariant failed: {0}")]
    Invariant(String),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("stats io failure at `{path}`: {reason}")]
    Io { path: String, reason: String },
    #[error("stats encoding failure: {0}")]
    Encoding(String),
}
