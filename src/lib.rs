pub mod batch;
pub mod cycle;
pub mod distribution;
pub mod error;
pub mod intake;
pub mod ledger;
pub mod providers;
pub mod runtime;
pub mod snapshot;
pub mod status;
pub mod swap;
pub mod types;
pub mod utils;
pub mod verifier;
