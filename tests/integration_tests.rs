//! Integration tests for the deferred transfer flow against the in-memory ledger

use latepay::keys::keypair_to_json;
use latepay::ledger::LedgerCalls;
use latepay::submit::{submit_now, SubmitError};
use latepay::transaction::{build_transfer_instruction, sign, TransactionComposer};
use latepay::{
    FlowStage, InMemoryLedger, KeyRole, LatePayError, NonceReader, SendOptions, Settings,
    TransferFlow,
};
use solana_sdk::native_token::LAMPORTS_PER_SOL;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::sync::Arc;
use std::time::Duration;

const MINTED: u64 = 1_000_000_000;
const TRANSFERRED: u64 = 1_000_000;

struct Harness {
    ledger: Arc<InMemoryLedger>,
    sender: Keypair,
    recipient: Keypair,
    authority: Keypair,
    mint: Pubkey,
    nonce_account: Pubkey,
}

impl Harness {
    fn new() -> Self {
        let harness = Self {
            ledger: Arc::new(InMemoryLedger::new()),
            sender: Keypair::new(),
            recipient: Keypair::new(),
            authority: Keypair::new(),
            mint: Pubkey::new_unique(),
            nonce_account: Pubkey::new_unique(),
        };
        harness.ledger.add_mint(&harness.mint, &harness.sender.pubkey());
        harness.ledger.fund(&harness.sender.pubkey(), LAMPORTS_PER_SOL);
        harness
            .ledger
            .add_nonce_account(&harness.nonce_account, &harness.authority.pubkey());
        harness
    }

    fn settings(&self) -> Settings {
        Settings::new(self.mint, self.nonce_account)
            .with_secret(KeyRole::Sender, keypair_to_json(&self.sender))
            .with_secret(KeyRole::Recipient, keypair_to_json(&self.recipient))
            .with_secret(KeyRole::NonceAuthority, keypair_to_json(&self.authority))
            .with_submit_delay(Duration::from_secs(180))
    }

    fn flow(&self) -> TransferFlow {
        TransferFlow::new(self.settings(), self.ledger.clone()).unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn test_transfer_confirms_and_consumes_nonce() {
    let harness = Harness::new();
    let nonce_before = harness.ledger.nonce_value(&harness.nonce_account).unwrap();

    let mut flow = harness.flow();
    let report = flow.run().await.unwrap();

    assert_eq!(flow.stage(), FlowStage::Confirmed);
    assert_eq!(report.nonce_used, nonce_before);
    assert_ne!(
        harness.ledger.nonce_value(&harness.nonce_account),
        Some(nonce_before)
    );
    assert_eq!(
        harness.ledger.token_balance(&report.sender_token_account),
        Some(MINTED - TRANSFERRED)
    );
    assert_eq!(
        harness.ledger.token_balance(&report.recipient_token_account),
        Some(TRANSFERRED)
    );
}

#[tokio::test(start_paused = true)]
async fn test_external_advance_yields_stale_anchor_then_retry_succeeds() {
    let harness = Harness::new();
    let mut flow = harness.flow();

    let prepared = flow.prepare().await.unwrap();
    let scheduled = flow.schedule(&prepared).await.unwrap();

    // Someone else consumes the nonce during the wait
    harness
        .ledger
        .advance_nonce_externally(&harness.nonce_account)
        .unwrap();

    let err = flow.finish(scheduled).await.unwrap_err();
    assert!(err.is_stale_anchor(), "unexpected error: {}", err);
    assert_eq!(flow.stage(), FlowStage::Failed);
    assert_eq!(
        harness.ledger.token_balance(&prepared.sender_account.address),
        Some(MINTED)
    );
    assert_eq!(
        harness.ledger.token_balance(&prepared.recipient_account.address),
        Some(0)
    );

    let report = flow.execute(&prepared).await.unwrap();
    assert_eq!(flow.stage(), FlowStage::Confirmed);
    assert_eq!(
        harness.ledger.token_balance(&report.recipient_token_account),
        Some(TRANSFERRED)
    );
}

#[tokio::test]
async fn test_missing_nonce_authority_halts_before_ledger() {
    let harness = Harness::new();
    let settings = Settings::new(harness.mint, harness.nonce_account)
        .with_secret(KeyRole::Sender, keypair_to_json(&harness.sender))
        .with_secret(KeyRole::Recipient, keypair_to_json(&harness.recipient));

    let result = TransferFlow::new(settings, harness.ledger.clone());

    match result {
        Err(LatePayError::Keys(latepay::keys::KeyError::MissingCredential { role, entry, .. })) => {
            assert_eq!(role, KeyRole::NonceAuthority);
            assert_eq!(entry, "SECRET_KEYnonceAuthority");
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("flow must not start without the nonce authority key"),
    }
    assert_eq!(harness.ledger.calls(), LedgerCalls::default());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_runs_reuse_token_accounts() {
    let harness = Harness::new();

    let first = harness.flow().run().await.unwrap();
    let second = harness.flow().run().await.unwrap();

    assert_eq!(first.sender_token_account, second.sender_token_account);
    assert_eq!(first.recipient_token_account, second.recipient_token_account);
    assert_ne!(first.nonce_used, second.nonce_used);
    assert_eq!(harness.ledger.calls().account_creations, 2);
    assert_eq!(
        harness.ledger.token_balance(&second.recipient_token_account),
        Some(2 * TRANSFERRED)
    );
}

#[tokio::test]
async fn test_submission_requires_every_signer() {
    let harness = Harness::new();
    let mut flow = harness.flow();
    let prepared = flow.prepare().await.unwrap();

    let nonce = NonceReader::new(harness.ledger.as_ref())
        .read_nonce(&harness.nonce_account)
        .await
        .unwrap();
    let [sender, recipient, authority] = flow.keys().pubkeys();
    let transfer = build_transfer_instruction(
        &prepared.sender_account.address,
        &prepared.recipient_account.address,
        &sender,
        TRANSFERRED,
        &[&sender, &recipient, &authority],
    )
    .unwrap();
    let unsigned =
        TransactionComposer::new(harness.nonce_account, authority).compose(&nonce, &sender, &[transfer]);

    let signers = [&harness.sender, &harness.recipient, &harness.authority];
    for omitted in 0..signers.len() {
        let partial: Vec<&Keypair> = signers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != omitted)
            .map(|(_, k)| *k)
            .collect();
        let tx = sign(unsigned.clone(), &partial).unwrap();

        match submit_now(harness.ledger.as_ref(), &tx, SendOptions::default()).await {
            Err(SubmitError::IncompleteSignatureSet { missing }) => {
                assert_eq!(missing, vec![signers[omitted].pubkey()])
            }
            other => panic!("expected incomplete signature set, got {:?}", other.map(|_| ())),
        }
        assert_eq!(harness.ledger.nonce_value(&harness.nonce_account), Some(nonce));
    }

    let complete = sign(unsigned, &signers).unwrap();
    submit_now(harness.ledger.as_ref(), &complete, SendOptions::default())
        .await
        .unwrap();
    assert_eq!(
        harness.ledger.token_balance(&prepared.recipient_account.address),
        Some(TRANSFERRED)
    );
}
