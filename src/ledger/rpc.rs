//! Solana RPC implementation of [`Ledger`]

use super::{Ledger, LedgerError, Rejection, SendOptions};
use async_trait::async_trait;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_client::rpc_request::RpcError;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account_idempotent,
};
use solana_program::program_pack::Pack;
use tracing::{debug, info};

/// JSON-RPC code returned when a submitted transaction fails sigverify
const SIGNATURE_VERIFICATION_FAILURE: i64 = -32003;

/// Ledger backed by a Solana JSON-RPC endpoint
pub struct RpcLedger {
    client: RpcClient,
    commitment: CommitmentConfig,
}

impl RpcLedger {
    pub fn new(rpc_url: &str, commitment: CommitmentConfig) -> Self {
        Self {
            client: RpcClient::new_with_commitment(rpc_url.to_string(), commitment),
            commitment,
        }
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    /// Sign `instructions` with a fresh blockhash and send them
    async fn send_with_latest_blockhash(
        &self,
        instructions: &[Instruction],
        payer: &Keypair,
        extra_signers: &[&Keypair],
    ) -> Result<Signature, LedgerError> {
        let blockhash = self.client.get_latest_blockhash().await.map_err(rpc_error)?;

        let mut signers: Vec<&Keypair> = vec![payer];
        for signer in extra_signers {
            if signer.pubkey() != payer.pubkey() {
                signers.push(signer);
            }
        }

        let transaction = Transaction::new_signed_with_payer(
            instructions,
            Some(&payer.pubkey()),
            &signers,
            blockhash,
        );

        self.client
            .send_and_confirm_transaction(&transaction)
            .await
            .map_err(classify_client_error)
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn get_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError> {
        let response = self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await
            .map_err(rpc_error)?;

        Ok(response.value.map(|account| account.data))
    }

    async fn get_or_create_associated_token_account(
        &self,
        payer: &Keypair,
        owner: &Pubkey,
        mint: &Pubkey,
    ) -> Result<Pubkey, LedgerError> {
        let address = get_associated_token_address(owner, mint);

        if self.get_account_data(&address).await?.is_some() {
            debug!("Token account {} already exists for owner {}", address, owner);
            return Ok(address);
        }

        let rent = self
            .client
            .get_minimum_balance_for_rent_exemption(spl_token::state::Account::LEN)
            .await
            .map_err(rpc_error)?;
        let balance = self.client.get_balance(&payer.pubkey()).await.map_err(rpc_error)?;

        if balance < rent {
            return Err(LedgerError::InsufficientFunds {
                payer: payer.pubkey(),
                available: balance,
                required: rent,
            });
        }

        let instruction =
            create_associated_token_account_idempotent(&payer.pubkey(), owner, mint, &spl_token::id());
        let signature = self
            .send_with_latest_blockhash(&[instruction], payer, &[])
            .await?;

        info!("Created token account {} for {} ({})", address, owner, signature);
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
        let instruction = spl_token::instruction::mint_to(
            &spl_token::id(),
            mint,
            destination,
            &authority.pubkey(),
            &[],
            amount,
        )
        .map_err(|e| LedgerError::Instruction(e.to_string()))?;

        self.send_with_latest_blockhash(&[instruction], payer, &[authority])
            .await
    }

    async fn send_and_confirm(
        &self,
        transaction: &Transaction,
        options: SendOptions,
    ) -> Result<Signature, LedgerError> {
        let config = RpcSendTransactionConfig {
            skip_preflight: options.skip_preflight,
            preflight_commitment: Some(options.preflight_commitment),
            ..RpcSendTransactionConfig::default()
        };

        self.client
            .send_and_confirm_transaction_with_spinner_and_config(
                transaction,
                options.commitment,
                config,
            )
            .await
            .map_err(classify_client_error)
    }
}

fn rpc_error(err: ClientError) -> LedgerError {
    LedgerError::Rpc(err.to_string())
}

/// Map a client error onto a [`Rejection`] when the cluster refused the
/// transaction, otherwise report it as a transport failure
fn classify_client_error(err: ClientError) -> LedgerError {
    if let Some(tx_err) = err.get_transaction_error() {
        return LedgerError::Rejected(Rejection::from(&tx_err));
    }

    if let ClientErrorKind::RpcError(RpcError::RpcResponseError { code, .. }) = err.kind() {
        if *code == SIGNATURE_VERIFICATION_FAILURE {
            return LedgerError::Rejected(Rejection::InvalidSignature);
        }
    }

    rpc_error(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_client::rpc_request::RpcResponseErrorData;
    use solana_sdk::transaction::TransactionError;

    fn response_error(code: i64) -> ClientError {
        ClientError::from(RpcError::RpcResponseError {
            code,
            message: "Transaction signature verification failure".to_string(),
            data: RpcResponseErrorData::Empty,
        })
    }

    #[test]
    fn test_sigverify_code_is_invalid_signature() {
        assert!(matches!(
            classify_client_error(response_error(SIGNATURE_VERIFICATION_FAILURE)),
            LedgerError::Rejected(Rejection::InvalidSignature)
        ));
    }

    #[test]
    fn test_unknown_blockhash_is_stale_anchor() {
        let err = ClientError::from(TransactionError::BlockhashNotFound);
        assert!(matches!(
            classify_client_error(err),
            LedgerError::Rejected(Rejection::StaleAnchor)
        ));
    }

    #[test]
    fn test_missing_fee_signature_is_missing_signature() {
        let err = ClientError::from(TransactionError::MissingSignatureForFee);
        assert!(matches!(
            classify_client_error(err),
            LedgerError::Rejected(Rejection::MissingSignature)
        ));
    }

    #[test]
    fn test_other_response_errors_stay_transport_errors() {
        assert!(matches!(
            classify_client_error(response_error(-32005)),
            LedgerError::Rpc(_)
        ));
    }
}
