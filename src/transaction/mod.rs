//! Transaction management for latepay
//!
//! Composes durable-nonce transactions, builds the token transfer payload,
//! and encodes signed transactions for hand-off to another party.

pub mod signing;

pub use signing::{is_fully_signed, missing_signers, required_signers, sign, SignError};

use crate::nonce::{advance_nonce_instruction, NonceValue};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use solana_sdk::{instruction::Instruction, pubkey::Pubkey, transaction::Transaction};
use thiserror::Error;

/// Builds transactions anchored to a durable nonce
pub struct TransactionComposer {
    nonce_account: Pubkey,
    nonce_authority: Pubkey,
}

impl TransactionComposer {
    pub fn new(nonce_account: Pubkey, nonce_authority: Pubkey) -> Self {
        Self {
            nonce_account,
            nonce_authority,
        }
    }

    /// Compose `[advance-nonce, instructions...]` anchored to `nonce`
    ///
    /// The advance instruction is always instruction 0; the payload follows
    /// in the given order. An empty payload is allowed.
    pub fn compose(
        &self,
        nonce: &NonceValue,
        fee_payer: &Pubkey,
        instructions: &[Instruction],
    ) -> Transaction {
        let mut all = Vec::with_capacity(instructions.len() + 1);
        all.push(advance_nonce_instruction(
            &self.nonce_account,
            &self.nonce_authority,
        ));
        all.extend_from_slice(instructions);

        let mut transaction = Transaction::new_with_payer(&all, Some(fee_payer));
        // Use the nonce account's stored value instead of a recent blockhash
        transaction.message.recent_blockhash = *nonce.as_hash();

        tracing::debug!(
            "Composed transaction: {} instruction(s), anchor {}, fee payer {}",
            all.len(),
            nonce,
            fee_payer
        );
        transaction
    }

    pub fn nonce_account(&self) -> &Pubkey {
        &self.nonce_account
    }

    pub fn nonce_authority(&self) -> &Pubkey {
        &self.nonce_authority
    }
}

/// Build an SPL token transfer instruction
///
/// With a non-empty `additional_signers` list every listed key becomes a
/// required signer of the transfer.
pub fn build_transfer_instruction(
    source: &Pubkey,
    destination: &Pubkey,
    owner: &Pubkey,
    amount: u64,
    additional_signers: &[&Pubkey],
) -> Result<Instruction, TransactionError> {
    spl_token::instruction::transfer(
        &spl_token::id(),
        source,
        destination,
        owner,
        additional_signers,
        amount,
    )
    .map_err(|e| TransactionError::SolanaInstruction(e.to_string()))
}

/// Encode a transaction as base64 (bincode wire format)
pub fn encode_base64(transaction: &Transaction) -> Result<String, TransactionError> {
    let bytes = bincode1::serialize(transaction)
        .map_err(|e| TransactionError::Serialization(e.to_string()))?;
    Ok(STANDARD.encode(bytes))
}

/// Decode a transaction produced by [`encode_base64`]
pub fn decode_base64(encoded: &str) -> Result<Transaction, TransactionError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| TransactionError::Serialization(e.to_string()))?;
    bincode1::deserialize(&bytes).map_err(|e| TransactionError::Serialization(e.to_string()))
}

/// Error types for transaction operations
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Solana instruction error: {0}")]
    SolanaInstruction(String),
}
