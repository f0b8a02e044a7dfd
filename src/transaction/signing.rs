//! Multi-party signing
//!
//! Signers may be applied in any order and in several passes; completeness
//! is judged by the network at submission, these helpers only report it.

use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    transaction::Transaction,
};
use thiserror::Error;

/// Apply each signer's signature against the transaction's anchor
pub fn sign(mut transaction: Transaction, signers: &[&Keypair]) -> Result<Transaction, SignError> {
    let anchor = transaction.message.recent_blockhash;
    transaction
        .try_partial_sign(signers, anchor)
        .map_err(|e| SignError::SigningFailed(e.to_string()))?;

    tracing::debug!(
        "Applied {} signature(s), {} still missing",
        signers.len(),
        missing_signers(&transaction).len()
    );
    Ok(transaction)
}

/// Every address the transaction requires a signature from
pub fn required_signers(transaction: &Transaction) -> Vec<Pubkey> {
    let count = transaction.message.header.num_required_signatures as usize;
    transaction.message.account_keys.iter().take(count).copied().collect()
}

/// Required signers that have not signed yet
pub fn missing_signers(transaction: &Transaction) -> Vec<Pubkey> {
    required_signers(transaction)
        .into_iter()
        .zip(transaction.signatures.iter())
        .filter(|(_, signature)| **signature == Signature::default())
        .map(|(pubkey, _)| pubkey)
        .collect()
}

pub fn is_fully_signed(transaction: &Transaction) -> bool {
    missing_signers(transaction).is_empty()
}

/// Error types for signing
#[derive(Error, Debug)]
pub enum SignError {
    #[error("Signing failed: {0}")]
    SigningFailed(String),
}
