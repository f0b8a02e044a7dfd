//! Ledger collaborator for latepay
//!
//! The flow only needs four things from the network: raw account data,
//! get-or-create of associated token accounts, minting, and
//! send-and-confirm. [`Ledger`] is the seam; [`RpcLedger`] talks to a real
//! cluster and [`InMemoryLedger`] simulates one in-process.

pub mod memory;
#[cfg(feature = "rpc-client")]
pub mod rpc;

pub use memory::{InMemoryLedger, LedgerCalls};
#[cfg(feature = "rpc-client")]
pub use rpc::RpcLedger;

use async_trait::async_trait;
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    transaction::{Transaction, TransactionError as SolanaTransactionError},
};
use thiserror::Error;

/// Network operations consumed by the transfer flow
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Fetch raw account data
    ///
    /// # Returns
    /// * `Ok(None)` if the account does not exist
    async fn get_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError>;

    /// Return the associated token account of `owner` for `mint`, creating it
    /// (funded by `payer`) when it does not exist yet
    async fn get_or_create_associated_token_account(
        &self,
        payer: &Keypair,
        owner: &Pubkey,
        mint: &Pubkey,
    ) -> Result<Pubkey, LedgerError>;

    /// Mint `amount` base units of `mint` into `destination`
    async fn mint_to(
        &self,
        payer: &Keypair,
        mint: &Pubkey,
        destination: &Pubkey,
        authority: &Keypair,
        amount: u64,
    ) -> Result<Signature, LedgerError>;

    /// Submit an already signed transaction and wait for confirmation
    async fn send_and_confirm(
        &self,
        transaction: &Transaction,
        options: SendOptions,
    ) -> Result<Signature, LedgerError>;
}

/// Submission options passed through to the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    pub skip_preflight: bool,
    pub preflight_commitment: CommitmentLevel,
    pub commitment: CommitmentConfig,
}

impl SendOptions {
    /// Preflight enabled, preflight and confirmation at `commitment`
    pub fn with_commitment(commitment: CommitmentConfig) -> Self {
        Self {
            skip_preflight: false,
            preflight_commitment: commitment.commitment,
            commitment,
        }
    }
}

impl Default for SendOptions {
    fn default() -> Self {
        Self::with_commitment(CommitmentConfig::confirmed())
    }
}

/// Why the network refused a transaction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("transaction anchor (durable nonce) is not current")]
    StaleAnchor,

    #[error("required signature missing")]
    MissingSignature,

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("transaction already processed")]
    AlreadyProcessed,

    #[error("{0}")]
    Program(String),
}

impl From<&SolanaTransactionError> for Rejection {
    fn from(err: &SolanaTransactionError) -> Self {
        match err {
            // Failed durable nonce checks surface as an unknown blockhash
            SolanaTransactionError::BlockhashNotFound => Rejection::StaleAnchor,
            SolanaTransactionError::MissingSignatureForFee => Rejection::MissingSignature,
            SolanaTransactionError::SignatureFailure => Rejection::InvalidSignature,
            SolanaTransactionError::InsufficientFundsForFee
            | SolanaTransactionError::InsufficientFundsForRent { .. } => {
                Rejection::InsufficientFunds
            }
            SolanaTransactionError::AlreadyProcessed => Rejection::AlreadyProcessed,
            other => Rejection::Program(other.to_string()),
        }
    }
}

/// Error types for ledger operations
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Insufficient funds: {payer} has {available} lamports, needs {required}")]
    InsufficientFunds {
        payer: Pubkey,
        available: u64,
        required: u64,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(Pubkey),

    #[error("Instruction error: {0}")]
    Instruction(String),

    #[error("Transaction rejected: {0}")]
    Rejected(Rejection),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_send_options() {
        let options = SendOptions::default();
        assert!(!options.skip_preflight);
        assert_eq!(options.preflight_commitment, CommitmentLevel::Confirmed);
        assert_eq!(options.commitment, CommitmentConfig::confirmed());
    }

    #[test]
    fn test_rejection_classification() {
        assert_eq!(
            Rejection::from(&SolanaTransactionError::BlockhashNotFound),
            Rejection::StaleAnchor
        );
        assert_eq!(
            Rejection::from(&SolanaTransactionError::SignatureFailure),
            Rejection::InvalidSignature
        );
        assert_eq!(
            Rejection::from(&SolanaTransactionError::InsufficientFundsForFee),
            Rejection::InsufficientFunds
        );
        assert_eq!(
            Rejection::from(&SolanaTransactionError::AlreadyProcessed),
            Rejection::AlreadyProcessed
        );
        assert!(matches!(
            Rejection::from(&SolanaTransactionError::AccountInUse),
            Rejection::Program(_)
        ));
    }
}
