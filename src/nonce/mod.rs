//! Durable nonce handling for latepay
//!
//! Reads the value stored in a nonce account so a transaction can use it as
//! its anchor instead of a recent blockhash.

use crate::ledger::{Ledger, LedgerError};
use serde::{Deserialize, Serialize};
use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    nonce::state::{State, Versions},
    pubkey::Pubkey,
};
#[allow(deprecated)]
use solana_sdk::{system_instruction, system_program};
use std::fmt;
use thiserror::Error;

/// Value currently stored in a nonce account
///
/// Bound into `recent_blockhash` of a durable-nonce transaction. The network
/// accepts the transaction only while the account still holds this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonceValue(solana_sdk::hash::Hash);

impl NonceValue {
    pub fn new(hash: Hash) -> Self {
        Self(hash)
    }

    pub fn as_hash(&self) -> &Hash {
        &self.0
    }
}

impl From<Hash> for NonceValue {
    fn from(hash: Hash) -> Self {
        Self(hash)
    }
}

impl fmt::Display for NonceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Decoded state of an initialized nonce account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceState {
    pub address: Pubkey,
    /// Key allowed to advance the nonce
    pub authority: Pubkey,
    pub value: NonceValue,
    pub lamports_per_signature: u64,
}

/// Decode nonce account data (bincode `nonce::state::Versions`)
pub fn decode_nonce_state(address: &Pubkey, data: &[u8]) -> Result<NonceState, NonceError> {
    let versions: Versions = bincode1::deserialize(data).map_err(|e| NonceError::Unavailable {
        account: *address,
        reason: format!("undecodable nonce data: {}", e),
    })?;

    match versions.state() {
        State::Initialized(data) => Ok(NonceState {
            address: *address,
            authority: data.authority,
            value: NonceValue(data.blockhash()),
            lamports_per_signature: data.get_lamports_per_signature(),
        }),
        State::Uninitialized => Err(NonceError::Unavailable {
            account: *address,
            reason: "nonce account is uninitialized".to_string(),
        }),
    }
}

/// Advance-nonce instruction; must be instruction 0 of a durable-nonce transaction
#[allow(deprecated)]
pub fn advance_nonce_instruction(nonce_account: &Pubkey, authority: &Pubkey) -> Instruction {
    system_instruction::advance_nonce_account(nonce_account, authority)
}

/// Whether `program_id`/`data` encode an advance-nonce instruction
#[allow(deprecated)]
pub fn is_advance_nonce(program_id: &Pubkey, data: &[u8]) -> bool {
    if *program_id != system_program::id() {
        return false;
    }
    // Instruction data does not depend on the accounts
    let reference = advance_nonce_instruction(&Pubkey::default(), &Pubkey::default());
    data == reference.data.as_slice()
}

/// Reads nonce values from the ledger
pub struct NonceReader<'a> {
    ledger: &'a dyn Ledger,
}

impl<'a> NonceReader<'a> {
    pub fn new(ledger: &'a dyn Ledger) -> Self {
        Self { ledger }
    }

    /// Fetch and decode the full nonce account state
    pub async fn read_state(&self, address: &Pubkey) -> Result<NonceState, NonceError> {
        let data = self
            .ledger
            .get_account_data(address)
            .await
            .map_err(|e| NonceError::from_ledger(address, e))?
            .ok_or_else(|| NonceError::Unavailable {
                account: *address,
                reason: "account does not exist".to_string(),
            })?;

        let state = decode_nonce_state(address, &data)?;
        tracing::debug!(
            "Nonce account {}: value={}, authority={}",
            address,
            state.value,
            state.authority
        );
        Ok(state)
    }

    /// Fetch the current nonce value
    pub async fn read_nonce(&self, address: &Pubkey) -> Result<NonceValue, NonceError> {
        Ok(self.read_state(address).await?.value)
    }
}

/// Error types for nonce operations
#[derive(Error, Debug)]
pub enum NonceError {
    #[error("Nonce unavailable for account {account}: {reason}")]
    Unavailable { account: Pubkey, reason: String },
}

impl NonceError {
    fn from_ledger(account: &Pubkey, err: LedgerError) -> Self {
        NonceError::Unavailable {
            account: *account,
            reason: err.to_string(),
        }
    }
}
