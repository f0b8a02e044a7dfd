//! In-process ledger simulation
//!
//! Enforces the rules that matter for deferred transfers: the anchor must
//! equal the stored durable nonce, instruction 0 advances it, every required
//! signer must sign, a signature is processed at most once, and token
//! balances move atomically with the nonce advance.

use super::{Ledger, LedgerError, Rejection, SendOptions};
use crate::nonce::{is_advance_nonce, NonceValue};
use async_trait::async_trait;
use parking_lot::Mutex;
use solana_sdk::{
    hash::hashv,
    message::Message,
    nonce::state::{Data, DurableNonce, State, Versions},
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use spl_associated_token_account::get_associated_token_address;
use spl_token::instruction::TokenInstruction;
use std::collections::{HashMap, HashSet};

/// Fee charged per required signature
pub const LAMPORTS_PER_SIGNATURE: u64 = 5_000;

/// Rent-exempt minimum of an SPL token account
pub const TOKEN_ACCOUNT_RENT: u64 = 2_039_280;

/// Counters of state-changing calls, for asserting what the flow touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerCalls {
    pub account_reads: usize,
    pub account_creations: usize,
    pub mints: usize,
    pub submissions: usize,
}

impl LedgerCalls {
    pub fn total(&self) -> usize {
        self.account_reads + self.account_creations + self.mints + self.submissions
    }
}

#[derive(Debug, Clone)]
struct TokenBalance {
    owner: Pubkey,
    mint: Pubkey,
    amount: u64,
}

#[derive(Debug, Clone)]
struct NonceEntry {
    authority: Pubkey,
    durable: DurableNonce,
    advances: u64,
}

#[derive(Default)]
struct LedgerState {
    lamports: HashMap<Pubkey, u64>,
    tokens: HashMap<Pubkey, TokenBalance>,
    /// mint -> mint authority
    mints: HashMap<Pubkey, Pubkey>,
    nonces: HashMap<Pubkey, NonceEntry>,
    raw: HashMap<Pubkey, Vec<u8>>,
    processed: HashSet<Signature>,
    sequence: u64,
    calls: LedgerCalls,
}

/// Deterministic in-memory ledger
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit lamports to an address
    pub fn fund(&self, address: &Pubkey, lamports: u64) {
        let mut state = self.state.lock();
        *state.lamports.entry(*address).or_insert(0) += lamports;
    }

    pub fn lamports(&self, address: &Pubkey) -> u64 {
        self.state.lock().lamports.get(address).copied().unwrap_or(0)
    }

    /// Register a token mint controlled by `authority`
    pub fn add_mint(&self, mint: &Pubkey, authority: &Pubkey) {
        self.state.lock().mints.insert(*mint, *authority);
    }

    /// Create an initialized nonce account and return its stored value
    pub fn add_nonce_account(&self, address: &Pubkey, authority: &Pubkey) -> NonceValue {
        let seed = hashv(&[address.as_ref(), b"nonce-genesis"]);
        let durable = DurableNonce::from_blockhash(&seed);

        self.state.lock().nonces.insert(
            *address,
            NonceEntry {
                authority: *authority,
                durable,
                advances: 0,
            },
        );
        NonceValue::new(*durable.as_hash())
    }

    /// Advance a nonce the way an unrelated transaction would
    pub fn advance_nonce_externally(&self, address: &Pubkey) -> Option<NonceValue> {
        let mut state = self.state.lock();
        let entry = state.nonces.get_mut(address)?;
        advance(entry);
        Some(NonceValue::new(*entry.durable.as_hash()))
    }

    /// Current value of a nonce account
    pub fn nonce_value(&self, address: &Pubkey) -> Option<NonceValue> {
        self.state
            .lock()
            .nonces
            .get(address)
            .map(|entry| NonceValue::new(*entry.durable.as_hash()))
    }

    /// Store arbitrary data at an address (e.g. a corrupt nonce account)
    pub fn set_account_data(&self, address: &Pubkey, data: Vec<u8>) {
        self.state.lock().raw.insert(*address, data);
    }

    /// Token balance of a token account, if it exists
    pub fn token_balance(&self, address: &Pubkey) -> Option<u64> {
        self.state.lock().tokens.get(address).map(|t| t.amount)
    }

    pub fn calls(&self) -> LedgerCalls {
        self.state.lock().calls
    }

    fn next_signature(state: &mut LedgerState, signer: &Keypair, tag: &str) -> Signature {
        state.sequence += 1;
        signer.sign_message(format!("{}:{}", tag, state.sequence).as_bytes())
    }
}

fn advance(entry: &mut NonceEntry) {
    entry.advances += 1;
    let next = hashv(&[
        entry.durable.as_hash().as_ref(),
        &entry.advances.to_le_bytes(),
    ]);
    entry.durable = DurableNonce::from_blockhash(&next);
}

fn reject(rejection: Rejection) -> LedgerError {
    LedgerError::Rejected(rejection)
}

fn account_at(message: &Message, accounts: &[u8], position: usize) -> Result<(usize, Pubkey), LedgerError> {
    let index = *accounts
        .get(position)
        .ok_or_else(|| reject(Rejection::Program("not enough account keys".to_string())))?
        as usize;
    let key = message
        .account_keys
        .get(index)
        .copied()
        .ok_or_else(|| reject(Rejection::Program("account index out of range".to_string())))?;
    Ok((index, key))
}

fn program_of(message: &Message, program_id_index: u8) -> Result<Pubkey, LedgerError> {
    message
        .account_keys
        .get(program_id_index as usize)
        .copied()
        .ok_or_else(|| reject(Rejection::Program("program index out of range".to_string())))
}

/// Validate the durable nonce in instruction 0 and return the nonce account
fn check_anchor(state: &LedgerState, message: &Message) -> Result<Pubkey, LedgerError> {
    let first = message
        .instructions
        .first()
        .ok_or_else(|| reject(Rejection::Program("empty transaction".to_string())))?;
    let program_id = program_of(message, first.program_id_index)?;

    // Without an advance in slot 0 the anchor is treated as a blockhash,
    // and this ledger keeps no recent blockhashes
    if !is_advance_nonce(&program_id, &first.data) {
        return Err(reject(Rejection::StaleAnchor));
    }

    let (_, nonce_account) = account_at(message, &first.accounts, 0)?;
    let (authority_index, authority) = account_at(message, &first.accounts, 2)?;

    let entry = state
        .nonces
        .get(&nonce_account)
        .ok_or_else(|| reject(Rejection::StaleAnchor))?;

    if *entry.durable.as_hash() != message.recent_blockhash {
        return Err(reject(Rejection::StaleAnchor));
    }
    if entry.authority != authority || !message.is_signer(authority_index) {
        return Err(reject(Rejection::Program(
            "nonce authority did not sign".to_string(),
        )));
    }

    Ok(nonce_account)
}

/// Apply payload instructions to a copy of the token table
fn execute_payload(
    state: &LedgerState,
    message: &Message,
) -> Result<HashMap<Pubkey, TokenBalance>, LedgerError> {
    let mut tokens = state.tokens.clone();

    for instruction in message.instructions.iter().skip(1) {
        let program_id = program_of(message, instruction.program_id_index)?;
        if program_id != spl_token::id() {
            return Err(reject(Rejection::Program(format!(
                "unsupported program {}",
                program_id
            ))));
        }

        let amount = match TokenInstruction::unpack(&instruction.data) {
            Ok(TokenInstruction::Transfer { amount }) => amount,
            Ok(_) => {
                return Err(reject(Rejection::Program(
                    "unsupported token instruction".to_string(),
                )))
            }
            Err(e) => return Err(reject(Rejection::Program(e.to_string()))),
        };

        let (_, source) = account_at(message, &instruction.accounts, 0)?;
        let (_, destination) = account_at(message, &instruction.accounts, 1)?;
        let (owner_index, owner) = account_at(message, &instruction.accounts, 2)?;

        let source_balance = tokens
            .get(&source)
            .cloned()
            .ok_or_else(|| reject(Rejection::Program(format!("token account {} not found", source))))?;
        let destination_balance = tokens.get(&destination).cloned().ok_or_else(|| {
            reject(Rejection::Program(format!("token account {} not found", destination)))
        })?;

        if source_balance.mint != destination_balance.mint {
            return Err(reject(Rejection::Program("mint mismatch".to_string())));
        }
        if source_balance.owner != owner || !message.is_signer(owner_index) {
            return Err(reject(Rejection::Program(
                "owner does not match or did not sign".to_string(),
            )));
        }
        if source_balance.amount < amount {
            return Err(reject(Rejection::Program(
                "insufficient token balance".to_string(),
            )));
        }

        let credited = destination_balance
            .amount
            .checked_add(amount)
            .ok_or_else(|| reject(Rejection::Program("token balance overflow".to_string())))?;

        if let Some(balance) = tokens.get_mut(&source) {
            balance.amount -= amount;
        }
        if let Some(balance) = tokens.get_mut(&destination) {
            balance.amount = if source == destination {
                balance.amount + amount
            } else {
                credited
            };
        }
    }

    Ok(tokens)
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn get_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError> {
        let mut state = self.state.lock();
        state.calls.account_reads += 1;

        if let Some(data) = state.raw.get(address) {
            return Ok(Some(data.clone()));
        }

        if let Some(entry) = state.nonces.get(address) {
            let data = Data::new(entry.authority, entry.durable, LAMPORTS_PER_SIGNATURE);
            let encoded = bincode1::serialize(&Versions::new(State::Initialized(data)))
                .map_err(|e| LedgerError::Rpc(e.to_string()))?;
            return Ok(Some(encoded));
        }

        if let Some(balance) = state.tokens.get(address) {
            // Owner, mint and amount are enough for anything reading it here
            let mut data = Vec::with_capacity(72);
            data.extend_from_slice(balance.mint.as_ref());
            data.extend_from_slice(balance.owner.as_ref());
            data.extend_from_slice(&balance.amount.to_le_bytes());
            return Ok(Some(data));
        }

        Ok(None)
    }

    async fn get_or_create_associated_token_account(
        &self,
        payer: &Keypair,
        owner: &Pubkey,
        mint: &Pubkey,
    ) -> Result<Pubkey, LedgerError> {
        let address = get_associated_token_address(owner, mint);
        let mut state = self.state.lock();

        if state.tokens.contains_key(&address) {
            return Ok(address);
        }
        if !state.mints.contains_key(mint) {
            return Err(LedgerError::AccountNotFound(*mint));
        }

        let available = state.lamports.get(&payer.pubkey()).copied().unwrap_or(0);
        let required = TOKEN_ACCOUNT_RENT + LAMPORTS_PER_SIGNATURE;
        if available < required {
            return Err(LedgerError::InsufficientFunds {
                payer: payer.pubkey(),
                available,
                required,
            });
        }

        state.lamports.insert(payer.pubkey(), available - required);
        state.tokens.insert(
            address,
            TokenBalance {
                owner: *owner,
                mint: *mint,
                amount: 0,
            },
        );
        state.calls.account_creations += 1;

        Ok(address)
    }

    async fn mint_to(
        &self,
        payer: &Keypair,
        mint: &Pubkey,
        destination: &Pubkey,
        authority: &Keypair,
        amount: u64,
    ) -> Result<Signature, LedgerError> {
        let mut state = self.state.lock();

        let mint_authority = *state
            .mints
            .get(mint)
            .ok_or(LedgerError::AccountNotFound(*mint))?;
        if mint_authority != authority.pubkey() {
            return Err(reject(Rejection::Program(
                "mint authority mismatch".to_string(),
            )));
        }

        let balance = state
            .tokens
            .get(destination)
            .ok_or(LedgerError::AccountNotFound(*destination))?;
        if balance.mint != *mint {
            return Err(reject(Rejection::Program("mint mismatch".to_string())));
        }
        let credited = balance
            .amount
            .checked_add(amount)
            .ok_or_else(|| reject(Rejection::Program("token supply overflow".to_string())))?;

        let fee = if payer.pubkey() == authority.pubkey() {
            LAMPORTS_PER_SIGNATURE
        } else {
            2 * LAMPORTS_PER_SIGNATURE
        };
        let available = state.lamports.get(&payer.pubkey()).copied().unwrap_or(0);
        if available < fee {
            return Err(reject(Rejection::InsufficientFunds));
        }

        state.lamports.insert(payer.pubkey(), available - fee);
        if let Some(balance) = state.tokens.get_mut(destination) {
            balance.amount = credited;
        }
        state.calls.mints += 1;

        Ok(Self::next_signature(&mut state, payer, "mint"))
    }

    async fn send_and_confirm(
        &self,
        transaction: &Transaction,
        _options: SendOptions,
    ) -> Result<Signature, LedgerError> {
        let mut state = self.state.lock();
        state.calls.submissions += 1;

        // An empty signature list passes both checks below vacuously
        let signature = match transaction.signatures.first() {
            Some(signature) if transaction.is_signed() => *signature,
            _ => return Err(reject(Rejection::MissingSignature)),
        };
        if transaction.verify().is_err() {
            return Err(reject(Rejection::InvalidSignature));
        }

        if state.processed.contains(&signature) {
            return Err(reject(Rejection::AlreadyProcessed));
        }

        let message = &transaction.message;
        let nonce_account = check_anchor(&state, message)?;

        let fee_payer = message
            .account_keys
            .first()
            .copied()
            .ok_or_else(|| reject(Rejection::Program("no fee payer".to_string())))?;
        let fee = LAMPORTS_PER_SIGNATURE * message.header.num_required_signatures as u64;
        let available = state.lamports.get(&fee_payer).copied().unwrap_or(0);
        if available < fee {
            return Err(reject(Rejection::InsufficientFunds));
        }

        let tokens = execute_payload(&state, message)?;

        // Commit: fee, balances, nonce advance
        state.lamports.insert(fee_payer, available - fee);
        state.tokens = tokens;
        if let Some(entry) = state.nonces.get_mut(&nonce_account) {
            advance(entry);
        }
        state.processed.insert(signature);

        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_external_advance_changes_value() {
        let ledger = InMemoryLedger::new();
        let nonce = Pubkey::new_unique();
        let initial = ledger.add_nonce_account(&nonce, &Pubkey::new_unique());

        let advanced = ledger.advance_nonce_externally(&nonce).unwrap();
        assert_ne!(initial, advanced);
        assert_eq!(ledger.nonce_value(&nonce), Some(advanced));
        assert!(ledger.advance_nonce_externally(&Pubkey::new_unique()).is_none());
    }

    #[tokio::test]
    async fn test_empty_transaction_is_rejected() {
        let ledger = InMemoryLedger::new();

        let result = ledger
            .send_and_confirm(&Transaction::default(), SendOptions::default())
            .await;
        assert!(matches!(
            result,
            Err(LedgerError::Rejected(Rejection::MissingSignature))
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_program_index_is_rejected() {
        let ledger = InMemoryLedger::new();
        let payer = Keypair::new();
        ledger.fund(&payer.pubkey(), 1_000_000);

        let ix = crate::nonce::advance_nonce_instruction(&Pubkey::new_unique(), &payer.pubkey());
        let mut message = Message::new(&[ix], Some(&payer.pubkey()));
        message.instructions[0].program_id_index = 99;
        let tx = Transaction::new(&[&payer], message, solana_sdk::hash::Hash::default());

        let result = ledger.send_and_confirm(&tx, SendOptions::default()).await;
        assert!(matches!(
            result,
            Err(LedgerError::Rejected(Rejection::Program(_)))
        ));
    }

    #[tokio::test]
    async fn test_mint_overflow_is_rejected() {
        let ledger = InMemoryLedger::new();
        let authority = Keypair::new();
        let mint = Pubkey::new_unique();
        ledger.add_mint(&mint, &authority.pubkey());
        ledger.fund(&authority.pubkey(), 1_000_000_000);

        let account = ledger
            .get_or_create_associated_token_account(&authority, &authority.pubkey(), &mint)
            .await
            .unwrap();
        ledger
            .mint_to(&authority, &mint, &account, &authority, u64::MAX)
            .await
            .unwrap();

        let result = ledger.mint_to(&authority, &mint, &account, &authority, 1).await;
        assert!(matches!(
            result,
            Err(LedgerError::Rejected(Rejection::Program(_)))
        ));
        assert_eq!(ledger.token_balance(&account), Some(u64::MAX));
        assert_eq!(ledger.calls().mints, 1);
    }

    #[tokio::test]
    async fn test_account_creation_requires_rent() {
        let ledger = InMemoryLedger::new();
        let payer = Keypair::new();
        let mint = Pubkey::new_unique();
        ledger.add_mint(&mint, &payer.pubkey());
        ledger.fund(&payer.pubkey(), TOKEN_ACCOUNT_RENT - 1);

        let result = ledger
            .get_or_create_associated_token_account(&payer, &payer.pubkey(), &mint)
            .await;
        assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));
        assert_eq!(ledger.calls().account_creations, 0);
    }

    #[tokio::test]
    async fn test_mint_credits_destination() {
        let ledger = InMemoryLedger::new();
        let authority = Keypair::new();
        let mint = Pubkey::new_unique();
        ledger.add_mint(&mint, &authority.pubkey());
        ledger.fund(&authority.pubkey(), 1_000_000_000);

        let account = ledger
            .get_or_create_associated_token_account(&authority, &authority.pubkey(), &mint)
            .await
            .unwrap();
        ledger
            .mint_to(&authority, &mint, &account, &authority, 42)
            .await
            .unwrap();

        assert_eq!(ledger.token_balance(&account), Some(42));

        let stranger = Keypair::new();
        assert!(ledger
            .mint_to(&authority, &mint, &account, &stranger, 1)
            .await
            .is_err());
    }
}
