//! Runtime settings for latepay
//!
//! Everything the transfer flow needs from the environment is read once by
//! [`Settings::from_env`] and then passed down explicitly.

use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default RPC endpoint (devnet)
pub const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";

/// Environment variable overriding the RPC endpoint
pub const RPC_URL_ENV: &str = "SOLANA_URL";

/// Token mint transferred by the flow
pub const TOKEN_MINT: &str = "GLCkK1D5aKAaeeQSLRXHLzdWrrkmad2rJXBD3A5mWTis";

/// Nonce account anchoring the deferred transaction
pub const NONCE_ACCOUNT: &str = "3dAQDH5bxCzukAuwzkjvy3g3jzY7BeJzVGbwMDuMRA59";

/// Amount moved from sender to recipient (1 token = 1,000,000 micro-units)
pub const TRANSFER_AMOUNT: u64 = 1_000_000;

/// Amount minted into the sender's token account before the transfer
pub const MINT_AMOUNT: u64 = 1_000_000_000;

/// Wait between signing and submission
pub const SUBMIT_DELAY: Duration = Duration::from_secs(3 * 60);

/// Logical signer identities the flow needs keys for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyRole {
    Sender,
    Recipient,
    NonceAuthority,
}

impl KeyRole {
    pub const ALL: [KeyRole; 3] = [KeyRole::Sender, KeyRole::Recipient, KeyRole::NonceAuthority];

    /// Name of the configuration entry holding this role's secret key
    pub fn entry_name(&self) -> &'static str {
        match self {
            KeyRole::Sender => "SECRET_KEY1",
            KeyRole::Recipient => "SECRET_KEY2",
            KeyRole::NonceAuthority => "SECRET_KEYnonceAuthority",
        }
    }
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyRole::Sender => "sender",
            KeyRole::Recipient => "recipient",
            KeyRole::NonceAuthority => "nonceAuthority",
        };
        f.write_str(name)
    }
}

/// Settings for one run of the transfer flow
#[derive(Clone)]
pub struct Settings {
    /// RPC endpoint
    pub rpc_url: String,
    /// Commitment used for reads, preflight and confirmation
    pub commitment: CommitmentConfig,
    /// Mint of the transferred token
    pub token_mint: Pubkey,
    /// Nonce account used as the transaction anchor
    pub nonce_account: Pubkey,
    /// Amount transferred from sender to recipient
    pub transfer_amount: u64,
    /// Amount minted to the sender before transferring
    pub mint_amount: u64,
    /// Wait before the signed transaction is submitted
    pub submit_delay: Duration,
    /// Raw secret entries keyed by role (JSON byte arrays)
    secrets: HashMap<KeyRole, String>,
}

impl Settings {
    /// Create settings for the given mint and nonce account with default amounts
    pub fn new(token_mint: Pubkey, nonce_account: Pubkey) -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            commitment: CommitmentConfig::confirmed(),
            token_mint,
            nonce_account,
            transfer_amount: TRANSFER_AMOUNT,
            mint_amount: MINT_AMOUNT,
            submit_delay: SUBMIT_DELAY,
            secrets: HashMap::new(),
        }
    }

    /// Build settings from the process environment
    ///
    /// Loads `.env` if present. Secret entries are only collected here; they
    /// are parsed and validated by the key resolver.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file (silently fails if not found)
        dotenv().ok();

        let token_mint = parse_pubkey("TOKEN_MINT", TOKEN_MINT)?;
        let nonce_account = parse_pubkey("NONCE_ACCOUNT", NONCE_ACCOUNT)?;

        let mut settings = Self::new(token_mint, nonce_account);
        settings.rpc_url = env::var(RPC_URL_ENV).unwrap_or_else(|_| DEFAULT_RPC_URL.to_string());

        for role in KeyRole::ALL {
            if let Ok(value) = env::var(role.entry_name()) {
                settings.secrets.insert(role, value);
            }
        }

        tracing::debug!(
            "Loaded settings: rpc={}, secrets present={}/{}",
            settings.rpc_url,
            settings.secrets.len(),
            KeyRole::ALL.len()
        );

        Ok(settings)
    }

    /// Set the secret entry for a role
    pub fn with_secret(mut self, role: KeyRole, value: impl Into<String>) -> Self {
        self.secrets.insert(role, value.into());
        self
    }

    pub fn with_rpc_url(mut self, rpc_url: impl Into<String>) -> Self {
        self.rpc_url = rpc_url.into();
        self
    }

    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    pub fn with_amounts(mut self, mint_amount: u64, transfer_amount: u64) -> Self {
        self.mint_amount = mint_amount;
        self.transfer_amount = transfer_amount;
        self
    }

    /// Raw secret entry for a role, if configured
    pub fn secret(&self, role: KeyRole) -> Option<&str> {
        self.secrets.get(&role).map(String::as_str)
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let configured: Vec<KeyRole> = KeyRole::ALL
            .into_iter()
            .filter(|role| self.secrets.contains_key(role))
            .collect();

        f.debug_struct("Settings")
            .field("rpc_url", &self.rpc_url)
            .field("commitment", &self.commitment.commitment)
            .field("token_mint", &self.token_mint)
            .field("nonce_account", &self.nonce_account)
            .field("transfer_amount", &self.transfer_amount)
            .field("mint_amount", &self.mint_amount)
            .field("submit_delay", &self.submit_delay)
            .field("secrets", &configured)
            .finish()
    }
}

fn parse_pubkey(name: &'static str, value: &str) -> Result<Pubkey, ConfigError> {
    Pubkey::from_str(value).map_err(|e| ConfigError::InvalidSetting {
        name,
        reason: e.to_string(),
    })
}

/// Error types for configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}
