//! NEAR ed25519 key generation and key-file persistence.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::bridge::GeneratedWallet;
use crate::error::BridgeError;
use crate::setup::wallet::{Chain, WalletEntry, to_hex};

/// Generate a NEAR implicit-account keypair.
///
/// The account id is the lowercase hex of the 32-byte public key. Keys use
/// NEAR's `ed25519:<base58>` encoding, with the secret being secret‖public.
pub fn generate_near_keypair() -> GeneratedWallet {
    let signing_key = SigningKey::generate(&mut OsRng);
    let public_bytes = signing_key.verifying_key().to_bytes();

    let account_id = to_hex(&public_bytes);
    let public_key = format!("ed25519:{}", bs58::encode(public_bytes).into_string());

    let mut full_secret = Vec::with_capacity(64);
    full_secret.extend_from_slice(&signing_key.to_bytes());
    full_secret.extend_from_slice(&public_bytes);
    let secret_key = SecretString::from(format!(
        "ed25519:{}",
        bs58::encode(&full_secret).into_string()
    ));

    GeneratedWallet {
        entry: WalletEntry {
            id: uuid::Uuid::new_v4().simple().to_string(),
            chain: Chain::Near,
            address: account_id,
            label: "NEAR wallet".to_string(),
            has_private_key: true,
            is_active: true,
            is_placeholder: false,
        },
        public_key,
        secret_key,
    }
}

#[derive(Serialize)]
struct KeyFile<'a> {
    account_id: &'a str,
    public_key: &'a str,
    secret_key: &'a str,
}

/// Write owner-only file contents, creating the file with mode 0600 on Unix.
pub(crate) fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Persist a generated wallet's key material to `{wallets_dir}/{id}.json`.
pub fn persist_key(wallets_dir: &Path, wallet: &GeneratedWallet) -> Result<PathBuf, BridgeError> {
    std::fs::create_dir_all(wallets_dir)?;
    let path = wallets_dir.join(format!("{}.json", wallet.entry.id));
    let key_file = KeyFile {
        account_id: &wallet.entry.address,
        public_key: &wallet.public_key,
        secret_key: wallet.secret_key.expose_secret(),
    };
    let content = serde_json::to_string_pretty(&key_file)
        .map_err(|e| BridgeError::Rejected(format!("Failed to serialize wallet key: {e}")))?;
    write_private(&path, content.as_bytes())?;
    tracing::info!(wallet_id = %wallet.entry.id, "Wallet key saved");
    Ok(path)
}
