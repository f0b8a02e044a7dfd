//! Deferred transfer flow
//!
//! Drives one transfer through its stages: keys, token accounts, mint, nonce
//! read, composition, signing, the delayed submission and confirmation.
//! Data only flows forward; a failure moves the flow to [`FlowStage::Failed`].
//!
//! Steps only run from the stage they follow; anything else is refused with
//! [`LatePayError::InvalidStage`]. The one way back is a stale anchor: when
//! the submission is refused because the nonce moved on
//! ([`LatePayError::is_stale_anchor`]), call [`TransferFlow::execute`] again
//! with the same [`PreparedTransfer`]. It restarts from the nonce read.

use crate::config::Settings;
use crate::keys::{KeyResolver, SignerKeys};
use crate::ledger::{Ledger, SendOptions};
use crate::nonce::{NonceError, NonceReader, NonceValue};
use crate::provision::{AccountProvisioner, TokenAccount};
use crate::submit::{DelayedSubmitter, SubmissionHandle};
use crate::transaction::{build_transfer_instruction, encode_base64, sign, TransactionComposer};
use crate::LatePayError;
use serde::{Serialize, Serializer};
use solana_sdk::{pubkey::Pubkey, signature::Signature, signature::Signer, transaction::Transaction};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Stages of a transfer, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlowStage {
    Init,
    KeysLoaded,
    AccountsProvisioned,
    Minted,
    NonceRead,
    Composed,
    Signed,
    Waiting,
    Submitted,
    Confirmed,
    Failed,
}

/// Output of [`TransferFlow::prepare`]: provisioned accounts and the funding mint
#[derive(Debug, Clone, Copy)]
pub struct PreparedTransfer {
    pub sender_account: TokenAccount,
    pub recipient_account: TokenAccount,
    pub mint_signature: Signature,
}

/// A signed transfer waiting for its submission
pub struct ScheduledTransfer {
    nonce: NonceValue,
    transaction: Transaction,
    handle: SubmissionHandle,
}

impl ScheduledTransfer {
    /// Nonce value the transaction is anchored to
    pub fn nonce(&self) -> NonceValue {
        self.nonce
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Fee payer signature, which identifies the transaction once submitted
    pub fn signature(&self) -> Signature {
        self.transaction.signatures[0]
    }

    /// Drop the submission if it has not been sent yet
    pub fn cancel(&self) {
        self.handle.cancel();
    }
}

/// Result of a confirmed transfer
#[derive(Debug, Clone, Serialize)]
pub struct FlowReport {
    #[serde(serialize_with = "as_display")]
    pub mint_signature: Signature,
    #[serde(serialize_with = "as_display")]
    pub transfer_signature: Signature,
    #[serde(serialize_with = "as_display")]
    pub nonce_used: NonceValue,
    #[serde(serialize_with = "as_display")]
    pub sender_token_account: Pubkey,
    #[serde(serialize_with = "as_display")]
    pub recipient_token_account: Pubkey,
}

fn as_display<T: fmt::Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// One deferred token transfer against a ledger
pub struct TransferFlow {
    settings: Settings,
    ledger: Arc<dyn Ledger>,
    keys: SignerKeys,
    stage: FlowStage,
    /// Set when the last failure was a stale anchor
    retry_allowed: bool,
}

impl TransferFlow {
    /// Resolve all signer keys; nothing touches the ledger if one is missing
    pub fn new(settings: Settings, ledger: Arc<dyn Ledger>) -> Result<Self, LatePayError> {
        let keys = KeyResolver::new(&settings).resolve_all()?;
        info!(
            "🔑 Keys loaded: sender={}, recipient={}, nonce authority={}",
            keys.sender.pubkey(),
            keys.recipient.pubkey(),
            keys.nonce_authority.pubkey()
        );

        Ok(Self {
            settings,
            ledger,
            keys,
            stage: FlowStage::KeysLoaded,
            retry_allowed: false,
        })
    }

    pub fn stage(&self) -> FlowStage {
        self.stage
    }

    pub fn keys(&self) -> &SignerKeys {
        &self.keys
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Prepare, then execute
    pub async fn run(&mut self) -> Result<FlowReport, LatePayError> {
        let prepared = self.prepare().await?;
        self.execute(&prepared).await
    }

    /// Make sure both token accounts exist and fund the sender's
    pub async fn prepare(&mut self) -> Result<PreparedTransfer, LatePayError> {
        self.expect_stage("prepare", self.stage == FlowStage::KeysLoaded)?;

        let mint = self.settings.token_mint;
        let provisioner = AccountProvisioner::new(self.ledger.as_ref(), &self.keys.sender);

        let sender_account = track(
            &mut self.stage,
            provisioner
                .ensure_token_account(&self.keys.sender.pubkey(), &mint)
                .await,
        )?;
        let recipient_account = track(
            &mut self.stage,
            provisioner
                .ensure_token_account(&self.keys.recipient.pubkey(), &mint)
                .await,
        )?;
        advance(&mut self.stage, FlowStage::AccountsProvisioned);

        let mint_signature = track(
            &mut self.stage,
            provisioner
                .mint_to(&sender_account, self.settings.mint_amount)
                .await,
        )?;
        info!("🪙 Mint tx: {}", mint_signature);
        advance(&mut self.stage, FlowStage::Minted);

        Ok(PreparedTransfer {
            sender_account,
            recipient_account,
            mint_signature,
        })
    }

    /// Read the nonce, compose and sign the transfer, and start the wait
    pub async fn schedule(
        &mut self,
        prepared: &PreparedTransfer,
    ) -> Result<ScheduledTransfer, LatePayError> {
        let retrying = self.stage == FlowStage::Failed && self.retry_allowed;
        self.expect_stage("schedule", self.stage == FlowStage::Minted || retrying)?;
        self.retry_allowed = false;

        let state = track(
            &mut self.stage,
            NonceReader::new(self.ledger.as_ref())
                .read_state(&self.settings.nonce_account)
                .await,
        )?;
        let [sender, recipient, authority] = self.keys.pubkeys();
        if state.authority != authority {
            return track(
                &mut self.stage,
                Err(NonceError::Unavailable {
                    account: state.address,
                    reason: format!(
                        "nonce authority is {}, configured key is {}",
                        state.authority, authority
                    ),
                }),
            );
        }
        let nonce = state.value;
        info!("📖 Nonce {} read from {}", nonce, self.settings.nonce_account);
        advance(&mut self.stage, FlowStage::NonceRead);

        let transfer = track(
            &mut self.stage,
            build_transfer_instruction(
                &prepared.sender_account.address,
                &prepared.recipient_account.address,
                &sender,
                self.settings.transfer_amount,
                &[&sender, &recipient, &authority],
            ),
        )?;
        let transaction = TransactionComposer::new(self.settings.nonce_account, authority)
            .compose(&nonce, &sender, &[transfer]);
        advance(&mut self.stage, FlowStage::Composed);

        let transaction = track(&mut self.stage, sign(transaction, &self.keys.all()))?;
        advance(&mut self.stage, FlowStage::Signed);

        match encode_base64(&transaction) {
            Ok(encoded) => debug!("Signed transaction (base64): {}", encoded),
            Err(e) => debug!("Could not encode signed transaction: {}", e),
        }

        let submitter = DelayedSubmitter::new(
            Arc::clone(&self.ledger),
            SendOptions::with_commitment(self.settings.commitment),
        );
        let handle = submitter.submit_after_delay(transaction.clone(), self.settings.submit_delay);
        advance(&mut self.stage, FlowStage::Waiting);

        Ok(ScheduledTransfer {
            nonce,
            transaction,
            handle,
        })
    }

    /// Wait for the scheduled submission to be confirmed
    pub async fn finish(&mut self, scheduled: ScheduledTransfer) -> Result<Signature, LatePayError> {
        self.expect_stage("finish", self.stage == FlowStage::Waiting)?;

        let outcome = track(&mut self.stage, scheduled.handle.wait().await);
        self.retry_allowed = matches!(&outcome, Err(e) if e.is_stale_anchor());
        let signature = outcome?;
        advance(&mut self.stage, FlowStage::Submitted);

        info!("✅ Transfer tx: {}", signature);
        advance(&mut self.stage, FlowStage::Confirmed);
        Ok(signature)
    }

    /// Run everything after provisioning; safe to call again after a stale anchor
    pub async fn execute(&mut self, prepared: &PreparedTransfer) -> Result<FlowReport, LatePayError> {
        let scheduled = self.schedule(prepared).await?;
        let nonce_used = scheduled.nonce();
        let transfer_signature = self.finish(scheduled).await?;

        Ok(FlowReport {
            mint_signature: prepared.mint_signature,
            transfer_signature,
            nonce_used,
            sender_token_account: prepared.sender_account.address,
            recipient_token_account: prepared.recipient_account.address,
        })
    }
}

impl TransferFlow {
    fn expect_stage(&self, operation: &'static str, allowed: bool) -> Result<(), LatePayError> {
        if allowed {
            Ok(())
        } else {
            Err(LatePayError::InvalidStage {
                operation,
                stage: self.stage,
            })
        }
    }
}

fn advance(stage: &mut FlowStage, next: FlowStage) {
    debug!("Flow stage: {:?} -> {:?}", stage, next);
    *stage = next;
}

/// Move to `Failed` on error, naming the last stage reached
fn track<T, E: Into<LatePayError>>(
    stage: &mut FlowStage,
    result: Result<T, E>,
) -> Result<T, LatePayError> {
    result.map_err(|e| {
        let err = e.into();
        debug!("Transfer failed after {:?}: {}", stage, err);
        *stage = FlowStage::Failed;
        err
    })
}
