//! Pre-signing filter for provider-built claim operations.

use crate::error::{Result, SafetyRejection};
use crate::providers::{ChainGateway, OperationSummary, Simulation, UnsignedOperation};
use crate::types::Address;
use crate::utils::error::compact_error;
use std::collections::HashSet;

/// Programs a fee-claim operation may invoke.
pub const SAFE_PROGRAMS: [&str; 7] = [
    "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P", // pump
    "pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA", // pump AMM
    "11111111111111111111111111111111",
    "ComputeBudget111111111111111111111111111111",
    "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL",
    "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA",
    "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb", // token-2022
];

#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    allowed_programs: HashSet<Address>,
    expected_fee_payer: Address,
    fee_ceiling_lamports: u64,
    max_instructions: usize,
}

impl SafetyPolicy {
    pub fn new(expected_fee_payer: Address, fee_ceiling_lamports: u64, max_instructions: usize) -> Self {
        Self {
            allowed_programs: SAFE_PROGRAMS.iter().map(|p| Address::new(*p)).collect(),
            expected_fee_payer,
            fee_ceiling_lamports,
            max_instructions,
        }
    }

    pub fn allow_program(mut self, program: Address) -> Self {
        self.allowed_programs.insert(program);
        self
    }

    pub fn is_allowed(&self, program: &Address) -> bool {
        self.allowed_programs.contains(program)
    }

    /// Checks that only need the decoded operation.
    pub fn check_programs(&self, summary: &OperationSummary) -> std::result::Result<(), SafetyRejection> {
        match summary.program_ids.iter().find(|p| !self.is_allowed(p)) {
            Some(unknown) => Err(SafetyRejection::UnknownProgram(unknown.to_string())),
            None => Ok(()),
        }
    }

    /// Remaining checks, in order: simulation error, balance drop, transfer
    /// logs, fee payer, instruction count.
    pub fn check_simulated(
        &self,
        summary: &OperationSummary,
        simulation: &Simulation,
    ) -> std::result::Result<(), SafetyRejection> {
        if let Some(err) = &simulation.error {
            return Err(SafetyRejection::SimulationFailed(err.clone()));
        }
        if let Some(drop) = simulation.fee_payer_lamports_drop {
            if drop > self.fee_ceiling_lamports {
                return Err(SafetyRejection::BalanceDrop {
                    lamports: drop,
                    ceiling: self.fee_ceiling_lamports,
                });
            }
        }
        for line in &simulation.logs {
            if !line.contains("Transfer") || line.contains("success") {
                continue;
            }
            if let Some(lamports) = lamports_in_log(line) {
                if lamports > self.fee_ceiling_lamports {
                    return Err(SafetyRejection::LargeTransfer { lamports });
                }
            }
        }
        if summary.fee_payer != self.expected_fee_payer {
            return Err(SafetyRejection::UnexpectedFeePayer {
                found: summary.fee_payer.to_string(),
                expected: self.expected_fee_payer.to_string(),
            });
        }
        if summary.instruction_count > self.max_instructions {
            return Err(SafetyRejection::TooManyInstructions {
                count: summary.instruction_count,
                max: self.max_instructions,
            });
        }
        Ok(())
    }

    /// Runs the full filter against the gateway. Gateway failures become a
    /// `Verification` rejection, except a disabled gateway which propagates as-is.
    pub async fn verify(&self, gateway: &dyn ChainGateway, op: &UnsignedOperation) -> Result<()> {
        let summary = match gateway.inspect(op).await {
            Ok(summary) => summary,
            Err(err) if err.is_submission_disabled() => return Err(err),
            Err(err) => return Err(SafetyRejection::Verification(compact_error(err)).into()),
        };
        self.check_programs(&summary)?;

        let simulation = match gateway.simulate(op).await {
            Ok(simulation) => simulation,
            Err(err) if err.is_submission_disabled() => return Err(err),
            Err(err) => return Err(SafetyRejection::Verification(compact_error(err)).into()),
        };
        self.check_simulated(&summary, &simulation)?;
        Ok(())
    }
}

/// First `<digits> lamports` figure in a log line.
fn lamports_in_log(line: &str) -> Option<u64> {
    let mut rest = line;
    while let Some(pos) = rest.find("lamports") {
        let head = rest[..pos].trim_end();
        let digits_start = head
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_ascii_digit())
            .last()
            .map(|(i, _)| i);
        if let Some(start) = digits_start {
            if let Ok(value) = head[start..].parse::<u64>() {
                return Some(value);
            }
        }
        rest = &rest[pos + "lamports".len()..];
    }
    None
}
