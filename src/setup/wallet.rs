//! Wallet provisioning.
//!
//! ```text
//! NoWallet ──begin──▶ Generating ──ok──▶ AwaitingBackupAck ──ack──▶ Active
//!    ▲                    │                      ▲
//!    └────err (no dev)────┘──err (dev fallback)──┘
//! ```
//!
//! The generated secret is handed out exactly once by [`WalletProvisioner::reveal_backup`]
//! and dropped when the backup is acknowledged.

use std::fmt::Write as _;
use std::sync::Arc;

use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::bridge::{GeneratedWallet, NativeBridge};
use crate::error::{BridgeError, WalletError};

/// Chains a wallet entry can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Near,
    Eth,
    Sol,
    Btc,
    Zec,
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Chain::Near => "near",
            Chain::Eth => "eth",
            Chain::Sol => "sol",
            Chain::Btc => "btc",
            Chain::Zec => "zec",
        })
    }
}

impl std::str::FromStr for Chain {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "near" => Ok(Chain::Near),
            "eth" | "ethereum" => Ok(Chain::Eth),
            "sol" | "solana" => Ok(Chain::Sol),
            "btc" | "bitcoin" => Ok(Chain::Btc),
            "zec" | "zcash" => Ok(Chain::Zec),
            other => Err(WalletError::InvalidAddress {
                chain: other.to_string(),
                message: "unsupported chain".to_string(),
            }),
        }
    }
}

/// A wallet known to the setup flow. Never carries key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletEntry {
    pub id: String,
    pub chain: Chain,
    pub address: String,
    pub label: String,
    pub has_private_key: bool,
    pub is_active: bool,
    /// Synthesized locally because the bridge could not generate a keypair.
    #[serde(default)]
    pub is_placeholder: bool,
}

impl WalletEntry {
    /// Import an existing address as a watch-only wallet.
    pub fn import(
        chain: Chain,
        address: &str,
        label: impl Into<String>,
    ) -> Result<Self, WalletError> {
        let address = address.trim();
        validate_address(chain, address)?;
        Ok(Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            chain,
            address: address.to_string(),
            label: label.into(),
            has_private_key: false,
            is_active: false,
            is_placeholder: false,
        })
    }

    /// A non-cryptographic stand-in used only when the dev fallback is enabled.
    pub fn placeholder() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            chain: Chain::Near,
            address: to_hex(&bytes),
            label: "Placeholder wallet (development only)".to_string(),
            has_private_key: false,
            is_active: false,
            is_placeholder: true,
        }
    }
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut output, "{:02x}", byte);
    }
    output
}

fn invalid(chain: Chain, message: impl Into<String>) -> WalletError {
    WalletError::InvalidAddress {
        chain: chain.to_string(),
        message: message.into(),
    }
}

/// Validate an address for its chain.
pub fn validate_address(chain: Chain, address: &str) -> Result<(), WalletError> {
    let len = address.len();
    match chain {
        Chain::Near => {
            let named = address
                .strip_suffix(".near")
                .or_else(|| address.strip_suffix(".testnet"));
            match named {
                Some("") => Err(invalid(chain, "named account has an empty prefix")),
                Some(_) => Ok(()),
                None if len == 64 && address.chars().all(|c| c.is_ascii_hexdigit()) => Ok(()),
                None => Err(invalid(
                    chain,
                    "must be a .near/.testnet name or a 64-character hex implicit account",
                )),
            }
        }
        Chain::Eth => {
            if !address.starts_with("0x") {
                return Err(invalid(chain, "must start with 0x"));
            }
            if len != 42 {
                return Err(invalid(chain, format!("must be 42 characters, got {len}")));
            }
            if !address[2..].chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid(chain, "contains non-hex characters after 0x"));
            }
            Ok(())
        }
        Chain::Sol => {
            if !(32..=44).contains(&len) {
                return Err(invalid(chain, format!("must be 32-44 characters, got {len}")));
            }
            bs58::decode(address)
                .into_vec()
                .map(|_| ())
                .map_err(|_| invalid(chain, "is not valid base58"))
        }
        Chain::Btc => {
            if !(25..=62).contains(&len) {
                return Err(invalid(chain, format!("must be 25-62 characters, got {len}")));
            }
            let prefixed = ["1", "3", "bc1", "tb1"]
                .iter()
                .any(|prefix| address.starts_with(prefix));
            if !prefixed {
                return Err(invalid(chain, "must start with 1, 3, bc1, or tb1"));
            }
            Ok(())
        }
        Chain::Zec => {
            if address.starts_with("t1") || address.starts_with("t3") {
                if len != 35 {
                    return Err(invalid(
                        chain,
                        format!("transparent address must be 35 characters, got {len}"),
                    ));
                }
                return bs58::decode(address)
                    .into_vec()
                    .map(|_| ())
                    .map_err(|_| invalid(chain, "transparent address is not valid base58"));
            }
            if address.starts_with("zs1") {
                if !(70..=90).contains(&len) {
                    return Err(invalid(
                        chain,
                        format!("shielded address should be ~78 characters, got {len}"),
                    ));
                }
                return Ok(());
            }
            if address.starts_with("u1") {
                if len < 50 {
                    return Err(invalid(
                        chain,
                        format!("unified address seems too short, got {len}"),
                    ));
                }
                return Ok(());
            }
            Err(invalid(
                chain,
                "must start with t1/t3 (transparent), zs1 (shielded), or u1 (unified)",
            ))
        }
    }
}

/// Wallet provisioning phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletPhase {
    NoWallet,
    Generating,
    AwaitingBackupAck,
    Active,
}

impl WalletPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoWallet => "no_wallet",
            Self::Generating => "generating",
            Self::AwaitingBackupAck => "awaiting_backup_ack",
            Self::Active => "active",
        }
    }
}

/// What the user is shown once, before acknowledging the backup.
#[derive(Debug)]
pub struct BackupNotice {
    pub address: String,
    pub public_key: Option<String>,
    /// `None` for placeholder wallets, which have no key to back up.
    pub secret_key: Option<SecretString>,
    pub is_placeholder: bool,
}

/// Wallet provisioner shared between the UI and the orchestrator.
pub type SharedWallet = Arc<Mutex<WalletProvisioner>>;

/// Explicit wallet state with reducer-style transitions.
#[derive(Debug)]
pub struct WalletProvisioner {
    phase: WalletPhase,
    generated: Option<WalletEntry>,
    public_key: Option<String>,
    pending_secret: Option<SecretString>,
    revealed: bool,
    imported: Vec<WalletEntry>,
    last_error: Option<String>,
}

impl Default for WalletProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl WalletProvisioner {
    pub fn new() -> Self {
        Self {
            phase: WalletPhase::NoWallet,
            generated: None,
            public_key: None,
            pending_secret: None,
            revealed: false,
            imported: Vec::new(),
            last_error: None,
        }
    }

    pub fn shared() -> SharedWallet {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn phase(&self) -> WalletPhase {
        self.phase
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn expect_phase(&self, expected: WalletPhase) -> Result<(), WalletError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(WalletError::InvalidTransition {
                expected: expected.as_str(),
                actual: self.phase.as_str(),
            })
        }
    }

    /// `NoWallet → Generating`.
    pub fn begin_generation(&mut self) -> Result<(), WalletError> {
        self.expect_phase(WalletPhase::NoWallet)?;
        self.phase = WalletPhase::Generating;
        self.last_error = None;
        Ok(())
    }

    /// Apply the bridge's keypair result.
    ///
    /// Success moves to `AwaitingBackupAck`. Failure either synthesizes a
    /// placeholder (dev fallback, still awaiting acknowledgment) or returns to
    /// `NoWallet` with the error recorded. The new wallet only becomes active
    /// when no imported wallet already is.
    pub fn complete_generation(
        &mut self,
        result: Result<GeneratedWallet, BridgeError>,
        dev_fallback: bool,
    ) -> Result<(), WalletError> {
        self.expect_phase(WalletPhase::Generating)?;
        let first = self.active_wallet().is_none();
        match result {
            Ok(generated) => {
                tracing::info!(chain = %generated.entry.chain, "Generated wallet keypair");
                let mut entry = generated.entry;
                entry.is_active = first;
                self.generated = Some(entry);
                self.public_key = Some(generated.public_key);
                self.pending_secret = Some(generated.secret_key);
                self.revealed = false;
                self.phase = WalletPhase::AwaitingBackupAck;
                Ok(())
            }
            Err(e) if dev_fallback => {
                tracing::warn!("Keypair generation failed, using placeholder wallet: {}", e);
                let mut entry = WalletEntry::placeholder();
                entry.is_active = first;
                self.generated = Some(entry);
                self.public_key = None;
                self.pending_secret = None;
                self.revealed = false;
                self.phase = WalletPhase::AwaitingBackupAck;
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.last_error = Some(message.clone());
                self.phase = WalletPhase::NoWallet;
                Err(WalletError::GenerationFailed(message))
            }
        }
    }

    /// Hand out the backup material. Works exactly once per generated wallet.
    pub fn reveal_backup(&mut self) -> Result<BackupNotice, WalletError> {
        self.expect_phase(WalletPhase::AwaitingBackupAck)?;
        if self.revealed {
            return Err(WalletError::AlreadyRevealed);
        }
        let entry = self.generated.as_ref().ok_or(WalletError::InvalidTransition {
            expected: WalletPhase::AwaitingBackupAck.as_str(),
            actual: WalletPhase::NoWallet.as_str(),
        })?;
        self.revealed = true;
        Ok(BackupNotice {
            address: entry.address.clone(),
            public_key: self.public_key.clone(),
            secret_key: self.pending_secret.take(),
            is_placeholder: entry.is_placeholder,
        })
    }

    /// `AwaitingBackupAck → Active`. Requires the backup to have been shown.
    pub fn acknowledge_backup(&mut self) -> Result<(), WalletError> {
        self.expect_phase(WalletPhase::AwaitingBackupAck)?;
        if !self.revealed {
            return Err(WalletError::SecretNotRevealed);
        }
        self.pending_secret = None;
        self.phase = WalletPhase::Active;
        tracing::info!("Wallet backup acknowledged");
        Ok(())
    }

    /// Add a watch-only wallet. The first wallet known becomes active.
    pub fn import(&mut self, mut entry: WalletEntry) {
        entry.is_active = self.active_wallet().is_none();
        self.imported.push(entry);
    }

    /// Make the wallet with this id the only active one.
    pub fn set_active(&mut self, id: &str) -> bool {
        let known = self.wallets_mut().any(|w| w.id == id);
        if known {
            for wallet in self.wallets_mut() {
                wallet.is_active = wallet.id == id;
            }
        }
        known
    }

    fn wallets_mut(&mut self) -> impl Iterator<Item = &mut WalletEntry> {
        self.generated.iter_mut().chain(self.imported.iter_mut())
    }

    /// Whether a usable wallet exists. A generated wallet only counts once
    /// its backup has been acknowledged.
    pub fn has_wallet(&self) -> bool {
        self.phase == WalletPhase::Active || !self.imported.is_empty()
    }

    /// Wallets eligible for the commit: the acknowledged generated wallet
    /// plus any imported ones.
    pub fn wallets(&self) -> Vec<WalletEntry> {
        let generated = self
            .generated
            .iter()
            .filter(|_| self.phase == WalletPhase::Active);
        generated.chain(self.imported.iter()).cloned().collect()
    }

    pub fn active_wallet(&self) -> Option<&WalletEntry> {
        self.generated
            .iter()
            .filter(|_| self.phase == WalletPhase::Active)
            .chain(self.imported.iter())
            .find(|w| w.is_active)
    }
}

/// Run one generation round against the bridge without holding the lock
/// across the bridge call.
pub async fn generate_wallet(
    wallet: &SharedWallet,
    bridge: &dyn NativeBridge,
    dev_fallback: bool,
) -> Result<(), WalletError> {
    wallet.lock().await.begin_generation()?;
    let result = bridge.generate_keypair().await;
    wallet.lock().await.complete_generation(result, dev_fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn generated() -> GeneratedWallet {
        GeneratedWallet {
            entry: WalletEntry {
                id: "w1".to_string(),
                chain: Chain::Near,
                address: "a".repeat(64),
                label: "NEAR wallet".to_string(),
                has_private_key: true,
                is_active: false,
                is_placeholder: false,
            },
            public_key: "ed25519:pub".to_string(),
            secret_key: SecretString::from("ed25519:secret"),
        }
    }

    #[test]
    fn happy_path_reveals_once_then_activates() {
        let mut wallet = WalletProvisioner::new();
        wallet.begin_generation().unwrap();
        wallet.complete_generation(Ok(generated()), false).unwrap();
        assert_eq!(wallet.phase(), WalletPhase::AwaitingBackupAck);
        assert!(!wallet.has_wallet());

        assert_eq!(
            wallet.acknowledge_backup(),
            Err(WalletError::SecretNotRevealed)
        );

        let notice = wallet.reveal_backup().unwrap();
        assert_eq!(
            notice.secret_key.as_ref().unwrap().expose_secret(),
            "ed25519:secret"
        );
        assert_eq!(
            wallet.reveal_backup().unwrap_err(),
            WalletError::AlreadyRevealed
        );

        wallet.acknowledge_backup().unwrap();
        assert_eq!(wallet.phase(), WalletPhase::Active);
        assert!(wallet.has_wallet());
        assert_eq!(wallet.active_wallet().unwrap().id, "w1");
        assert!(wallet.reveal_backup().is_err());
    }

    #[test]
    fn failure_without_fallback_returns_to_no_wallet() {
        let mut wallet = WalletProvisioner::new();
        wallet.begin_generation().unwrap();
        let err = wallet
            .complete_generation(Err(BridgeError::Rejected("helper missing".into())), false)
            .unwrap_err();

        assert_eq!(err, WalletError::GenerationFailed("helper missing".into()));
        assert_eq!(wallet.phase(), WalletPhase::NoWallet);
        assert_eq!(wallet.last_error(), Some("helper missing"));
        wallet.begin_generation().unwrap();
    }

    #[test]
    fn fallback_wallet_still_requires_acknowledgment() {
        let mut wallet = WalletProvisioner::new();
        wallet.begin_generation().unwrap();
        wallet
            .complete_generation(Err(BridgeError::Rejected("offline".into())), true)
            .unwrap();
        assert_eq!(wallet.phase(), WalletPhase::AwaitingBackupAck);
        assert!(wallet.acknowledge_backup().is_err());

        let notice = wallet.reveal_backup().unwrap();
        assert!(notice.is_placeholder);
        assert!(notice.secret_key.is_none());
        validate_address(Chain::Near, &notice.address).unwrap();

        wallet.acknowledge_backup().unwrap();
        let wallets = wallet.wallets();
        assert_eq!(wallets.len(), 1);
        assert!(wallets[0].is_placeholder);
        assert!(!wallets[0].has_private_key);
    }

    #[test]
    fn transitions_out_of_order_are_rejected() {
        let mut wallet = WalletProvisioner::new();
        assert!(matches!(
            wallet.acknowledge_backup(),
            Err(WalletError::InvalidTransition { .. })
        ));
        assert!(
            wallet
                .complete_generation(Ok(generated()), false)
                .is_err()
        );
        wallet.begin_generation().unwrap();
        assert!(wallet.begin_generation().is_err());
    }

    #[test]
    fn imported_wallets_count_and_first_becomes_active() {
        let mut wallet = WalletProvisioner::new();
        let eth = WalletEntry::import(
            Chain::Eth,
            "0x52908400098527886E0F7030069857D2E4169EE7",
            "Ledger",
        )
        .unwrap();
        let near = WalletEntry::import(Chain::Near, "alice.near", "Main").unwrap();
        let near_id = near.id.clone();
        wallet.import(eth);
        wallet.import(near);

        assert!(wallet.has_wallet());
        assert_eq!(wallet.active_wallet().unwrap().label, "Ledger");
        assert!(wallet.set_active(&near_id));
        assert_eq!(wallet.active_wallet().unwrap().id, near_id);
        assert!(!wallet.set_active("missing"));
    }

    #[test]
    fn generated_wallet_does_not_steal_the_active_flag() {
        let mut wallet = WalletProvisioner::new();
        wallet.import(WalletEntry::import(Chain::Near, "alice.near", "Main").unwrap());
        wallet.begin_generation().unwrap();
        wallet.complete_generation(Ok(generated()), false).unwrap();
        wallet.reveal_backup().unwrap();
        wallet.acknowledge_backup().unwrap();

        let active: Vec<String> = wallet
            .wallets()
            .into_iter()
            .filter(|w| w.is_active)
            .map(|w| w.label)
            .collect();
        assert_eq!(active, vec!["Main".to_string()]);

        assert!(wallet.set_active("w1"));
        assert_eq!(wallet.active_wallet().unwrap().id, "w1");
        assert_eq!(wallet.wallets().iter().filter(|w| w.is_active).count(), 1);
    }

    #[test]
    fn fallback_wallet_respects_an_imported_active_wallet() {
        let mut wallet = WalletProvisioner::new();
        wallet.import(WalletEntry::import(Chain::Near, "alice.near", "Main").unwrap());
        wallet.begin_generation().unwrap();
        wallet
            .complete_generation(Err(BridgeError::Rejected("offline".into())), true)
            .unwrap();
        wallet.reveal_backup().unwrap();
        wallet.acknowledge_backup().unwrap();

        assert_eq!(wallet.wallets().iter().filter(|w| w.is_active).count(), 1);
        assert_eq!(wallet.active_wallet().unwrap().address, "alice.near");
    }

    #[test]
    fn address_validation_per_chain() {
        assert!(validate_address(Chain::Near, "bob.testnet").is_ok());
        assert!(validate_address(Chain::Near, ".near").is_err());
        assert!(validate_address(Chain::Eth, "0x123").is_err());
        assert!(validate_address(Chain::Sol, "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T").is_ok());
        assert!(validate_address(Chain::Sol, "0OIl0OIl0OIl0OIl0OIl0OIl0OIl0OIl").is_err());
        assert!(validate_address(Chain::Btc, "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq").is_ok());
        assert!(validate_address(Chain::Btc, "xpub1234567890123456789012345").is_err());
        assert!(validate_address(Chain::Zec, "zs1").is_err());
        assert!("zcash".parse::<Chain>().unwrap() == Chain::Zec);
    }
}
