//! Delayed submission of pre-signed transactions
//!
//! The wait runs as a spawned task that can be cancelled through its
//! [`SubmissionHandle`]. The nonce is not re-checked before sending: if it
//! was advanced during the wait the network refuses the transaction and the
//! caller gets [`SubmitError::StaleAnchor`].

use crate::ledger::{Ledger, LedgerError, Rejection, SendOptions};
use crate::transaction::missing_signers;
use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature, transaction::Transaction};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{info, warn};

/// Submits signed transactions after a wait
pub struct DelayedSubmitter {
    ledger: Arc<dyn Ledger>,
    options: SendOptions,
}

impl DelayedSubmitter {
    pub fn new(ledger: Arc<dyn Ledger>, options: SendOptions) -> Self {
        Self { ledger, options }
    }

    /// Wait `delay`, then submit `transaction` and await confirmation
    pub fn submit_after_delay(&self, transaction: Transaction, delay: Duration) -> SubmissionHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let ledger = Arc::clone(&self.ledger);
        let options = self.options;

        let task = tokio::spawn(async move {
            let submit_at = chrono::Local::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            info!(
                "⏳ Waiting {}s before submission (at {})",
                delay.as_secs(),
                submit_at.format("%Y-%m-%d %H:%M:%S")
            );

            if token
                .run_until_cancelled(tokio::time::sleep(delay))
                .await
                .is_none()
            {
                warn!("Submission cancelled before the wait elapsed");
                return Err(SubmitError::Cancelled);
            }

            submit_now(ledger.as_ref(), &transaction, options).await
        });

        SubmissionHandle {
            _abort: cancel.clone().drop_guard(),
            cancel,
            task,
        }
    }
}

/// Handle to a scheduled submission
///
/// Dropping the handle before the wait elapses cancels the submission.
pub struct SubmissionHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<Signature, SubmitError>>,
    _abort: DropGuard,
}

impl SubmissionHandle {
    /// Cancel the submission if it has not been sent yet
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the submission outcome
    pub async fn wait(self) -> Result<Signature, SubmitError> {
        self.task
            .await
            .map_err(|e| SubmitError::Aborted(e.to_string()))?
    }
}

/// Submit immediately and classify any rejection
pub async fn submit_now(
    ledger: &dyn Ledger,
    transaction: &Transaction,
    options: SendOptions,
) -> Result<Signature, SubmitError> {
    match ledger.send_and_confirm(transaction, options).await {
        Ok(signature) => Ok(signature),
        Err(LedgerError::Rejected(rejection)) => {
            let err = classify(rejection, transaction);
            warn!("Transaction rejected: {}", err);
            Err(err)
        }
        Err(other) => Err(SubmitError::SubmissionRejected(other.to_string())),
    }
}

fn classify(rejection: Rejection, transaction: &Transaction) -> SubmitError {
    match rejection {
        Rejection::StaleAnchor => SubmitError::StaleAnchor {
            anchor: transaction.message.recent_blockhash,
        },
        Rejection::MissingSignature | Rejection::InvalidSignature => {
            SubmitError::IncompleteSignatureSet {
                missing: missing_signers(transaction),
            }
        }
        other => SubmitError::SubmissionRejected(other.to_string()),
    }
}

/// Error types for submission
#[derive(Error, Debug)]
pub enum SubmitError {
    /// The nonce was advanced after it was read; read it again and recompose
    #[error("Stale anchor {anchor}: nonce account advanced before submission")]
    StaleAnchor { anchor: Hash },

    #[error("Incomplete signature set, missing: {missing:?}")]
    IncompleteSignatureSet { missing: Vec<Pubkey> },

    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("Submission cancelled")]
    Cancelled,

    #[error("Submission task aborted: {0}")]
    Aborted(String),
}
