//! latepay - deferred SPL token transfers anchored to a durable nonce
//!
//! A transfer is composed and signed now, then submitted after a delay. It
//! stays valid for as long as the nonce account keeps the value the
//! transaction was built against, instead of expiring with a recent blockhash.

pub mod config;
pub mod flow;
pub mod keys;
pub mod ledger;
pub mod nonce;
pub mod provision;
pub mod submit;
pub mod transaction;

pub use config::{KeyRole, Settings};
pub use flow::{FlowReport, FlowStage, PreparedTransfer, ScheduledTransfer, TransferFlow};
pub use keys::{KeyResolver, SignerKeys};
pub use ledger::{InMemoryLedger, Ledger, SendOptions};
#[cfg(feature = "rpc-client")]
pub use ledger::RpcLedger;
pub use nonce::{NonceReader, NonceValue};
pub use provision::{AccountProvisioner, TokenAccount};
pub use submit::{DelayedSubmitter, SubmissionHandle};

use thiserror::Error;

/// Error types for latepay
#[derive(Error, Debug)]
pub enum LatePayError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] config::ConfigError),

    #[error("Key error: {0}")]
    Keys(#[from] keys::KeyError),

    #[error("Provisioning error: {0}")]
    Provision(#[from] provision::ProvisionError),

    #[error("Nonce error: {0}")]
    Nonce(#[from] nonce::NonceError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] transaction::TransactionError),

    #[error("Signing error: {0}")]
    Signing(#[from] transaction::SignError),

    #[error("Submission error: {0}")]
    Submit(#[from] submit::SubmitError),

    /// A flow step was called out of order
    #[error("Cannot {operation} in stage {stage:?}")]
    InvalidStage {
        operation: &'static str,
        stage: FlowStage,
    },
}

impl LatePayError {
    /// The nonce moved on before submission; re-run from the nonce read
    pub fn is_stale_anchor(&self) -> bool {
        matches!(self, LatePayError::Submit(submit::SubmitError::StaleAnchor { .. }))
    }
}
