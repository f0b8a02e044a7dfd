//! Signer key resolution
//!
//! Turns the secret entries collected in [`Settings`] into keypairs. Every
//! key is resolved before the flow touches the ledger.

use crate::config::{KeyRole, Settings};
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

/// Keypairs for every signer the transfer needs
pub struct SignerKeys {
    pub sender: Keypair,
    pub recipient: Keypair,
    pub nonce_authority: Keypair,
}

impl SignerKeys {
    /// All three signers, in role order
    pub fn all(&self) -> [&Keypair; 3] {
        [&self.sender, &self.recipient, &self.nonce_authority]
    }

    pub fn pubkeys(&self) -> [Pubkey; 3] {
        [
            self.sender.pubkey(),
            self.recipient.pubkey(),
            self.nonce_authority.pubkey(),
        ]
    }
}

/// Resolves signer keys from settings
pub struct KeyResolver<'a> {
    settings: &'a Settings,
}

impl<'a> KeyResolver<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Resolve the keypair for a single role
    pub fn resolve(&self, role: KeyRole) -> Result<Keypair, KeyError> {
        let entry = role.entry_name();
        let raw = self
            .settings
            .secret(role)
            .ok_or_else(|| KeyError::MissingCredential {
                role,
                entry,
                reason: "entry not set".to_string(),
            })?;

        let keypair = keypair_from_json(raw).map_err(|reason| KeyError::MissingCredential {
            role,
            entry,
            reason,
        })?;

        tracing::debug!("Resolved {} key: {}", role, keypair.pubkey());
        Ok(keypair)
    }

    /// Resolve sender, recipient and nonce authority
    pub fn resolve_all(&self) -> Result<SignerKeys, KeyError> {
        Ok(SignerKeys {
            sender: self.resolve(KeyRole::Sender)?,
            recipient: self.resolve(KeyRole::Recipient)?,
            nonce_authority: self.resolve(KeyRole::NonceAuthority)?,
        })
    }
}

/// Parse a keypair from a JSON byte array (`[12,34,...]`, 64 bytes)
pub fn keypair_from_json(raw: &str) -> Result<Keypair, String> {
    let bytes: Vec<u8> = serde_json::from_str(raw.trim())
        .map_err(|e| format!("not a JSON byte array: {}", e))?;

    Keypair::try_from(bytes.as_slice()).map_err(|e| format!("invalid keypair bytes: {}", e))
}

/// Encode a keypair as the JSON byte array accepted by [`keypair_from_json`]
pub fn keypair_to_json(keypair: &Keypair) -> String {
    format!("{:?}", keypair.to_bytes().to_vec())
}

/// Error types for key resolution
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Missing credential for {role}: add {entry} to .env ({reason})")]
    MissingCredential {
        role: KeyRole,
        entry: &'static str,
        reason: String,
    },
}
