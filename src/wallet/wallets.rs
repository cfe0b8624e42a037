use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use log::{debug, info};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const WALLET_FILE: &str = "wallet.dat";

/// Address -> key pair store backed by a single bincode file.
pub struct Wallets {
    wallets: HashMap<String, Wallet>,
    path: PathBuf,
}

impl Wallets {
    /// Loads the wallet file at `path`, starting empty if it does not exist yet.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Wallets> {
        let path = path.as_ref().to_path_buf();
        let wallets = if path.exists() {
            let bytes = fs::read(&path)?;
            let wallets: HashMap<String, Wallet> = deserialize(&bytes)?;
            debug!("Loaded {} wallets from {}", wallets.len(), path.display());
            wallets
        } else {
            HashMap::new()
        };
        Ok(Wallets { wallets, path })
    }

    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        self.save()?;
        info!("Created wallet {address}");
        Ok(address)
    }

    pub fn get_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.wallets.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    pub fn require_wallet(&self, address: &str) -> Result<&Wallet> {
        self.get_wallet(address).ok_or_else(|| {
            BlockchainError::Wallet(format!("Wallet not found for address: {address}"))
        })
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        let wallets_bytes = serialize(&self.wallets)?;
        writer.write_all(wallets_bytes.as_slice())?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_wallets_persist_across_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(WALLET_FILE);

        let mut wallets = Wallets::open(&path).unwrap();
        let first = wallets.create_wallet().unwrap();
        let second = wallets.create_wallet().unwrap();

        let reopened = Wallets::open(&path).unwrap();
        let addresses = reopened.get_addresses();
        assert_eq!(addresses.len(), 2);
        assert!(addresses.contains(&first));
        assert!(addresses.contains(&second));

        let original = wallets.get_wallet(&first).unwrap();
        let loaded = reopened.get_wallet(&first).unwrap();
        assert_eq!(original.get_public_key(), loaded.get_public_key());
        assert_eq!(original.get_pkcs8(), loaded.get_pkcs8());
    }

    #[test]
    fn test_missing_wallet() {
        let dir = tempdir().unwrap();
        let wallets = Wallets::open(dir.path().join(WALLET_FILE)).unwrap();
        assert!(wallets.get_wallet("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").is_none());
        assert!(matches!(
            wallets.require_wallet("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"),
            Err(BlockchainError::Wallet(_))
        ));
    }
}
