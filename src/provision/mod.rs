//! Associated token account provisioning
//!
//! Makes sure sender and recipient hold a token account for the mint before
//! the transfer is composed, and funds the sender's account.

use crate::ledger::Ledger;
use serde::Serialize;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};
use thiserror::Error;
use tracing::info;

/// Token account holding one owner's balance of one mint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenAccount {
    pub address: Pubkey,
    pub owner: Pubkey,
    pub mint: Pubkey,
}

/// Get-or-create of associated token accounts, paid for by `payer`
pub struct AccountProvisioner<'a> {
    ledger: &'a dyn Ledger,
    payer: &'a Keypair,
}

impl<'a> AccountProvisioner<'a> {
    pub fn new(ledger: &'a dyn Ledger, payer: &'a Keypair) -> Self {
        Self { ledger, payer }
    }

    /// Return the associated token account of `owner` for `mint`, creating it
    /// when absent. Calling again for the same pair returns the same address.
    pub async fn ensure_token_account(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
    ) -> Result<TokenAccount, ProvisionError> {
        let address = self
            .ledger
            .get_or_create_associated_token_account(self.payer, owner, mint)
            .await
            .map_err(|e| ProvisionError::AccountCreationFailed {
                owner: *owner,
                mint: *mint,
                reason: e.to_string(),
            })?;

        info!("Token account for {}: {}", owner, address);

        Ok(TokenAccount {
            address,
            owner: *owner,
            mint: *mint,
        })
    }

    /// Mint `amount` into `account`, with the payer as mint authority
    pub async fn mint_to(
        &self,
        account: &TokenAccount,
        amount: u64,
    ) -> Result<Signature, ProvisionError> {
        self.ledger
            .mint_to(self.payer, &account.mint, &account.address, self.payer, amount)
            .await
            .map_err(|e| ProvisionError::MintFailed {
                account: account.address,
                reason: e.to_string(),
            })
    }

    pub fn payer(&self) -> Pubkey {
        self.payer.pubkey()
    }
}

/// Error types for account provisioning
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Account creation failed for owner {owner} (mint {mint}): {reason}")]
    AccountCreationFailed {
        owner: Pubkey,
        mint: Pubkey,
        reason: String,
    },

    #[error("Minting into {account} failed: {reason}")]
    MintFailed { account: Pubkey, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use solana_sdk::native_token::LAMPORTS_PER_SOL;

    fn setup() -> (InMemoryLedger, Keypair, Pubkey) {
        let ledger = InMemoryLedger::new();
        let payer = Keypair::new();
        let mint = Pubkey::new_unique();
        ledger.add_mint(&mint, &payer.pubkey());
        ledger.fund(&payer.pubkey(), LAMPORTS_PER_SOL);
        (ledger, payer, mint)
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let (ledger, payer, mint) = setup();
        let owner = Pubkey::new_unique();
        let provisioner = AccountProvisioner::new(&ledger, &payer);

        let first = provisioner.ensure_token_account(&owner, &mint).await.unwrap();
        let second = provisioner.ensure_token_account(&owner, &mint).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(ledger.calls().account_creations, 1);
    }

    #[tokio::test]
    async fn test_distinct_owners_get_distinct_accounts() {
        let (ledger, payer, mint) = setup();
        let provisioner = AccountProvisioner::new(&ledger, &payer);

        let a = provisioner
            .ensure_token_account(&payer.pubkey(), &mint)
            .await
            .unwrap();
        let b = provisioner
            .ensure_token_account(&Pubkey::new_unique(), &mint)
            .await
            .unwrap();

        assert_ne!(a.address, b.address);
        assert_eq!(ledger.calls().account_creations, 2);
    }

    #[tokio::test]
    async fn test_unfunded_payer_fails() {
        let ledger = InMemoryLedger::new();
        let payer = Keypair::new();
        let mint = Pubkey::new_unique();
        ledger.add_mint(&mint, &payer.pubkey());

        let result = AccountProvisioner::new(&ledger, &payer)
            .ensure_token_account(&payer.pubkey(), &mint)
            .await;

        assert!(matches!(
            result,
            Err(ProvisionError::AccountCreationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_mint_to_sender_account() {
        let (ledger, payer, mint) = setup();
        let provisioner = AccountProvisioner::new(&ledger, &payer);

        let account = provisioner
            .ensure_token_account(&payer.pubkey(), &mint)
            .await
            .unwrap();
        provisioner.mint_to(&account, 1_000_000_000).await.unwrap();

        assert_eq!(ledger.token_balance(&account.address), Some(1_000_000_000));
    }
}
