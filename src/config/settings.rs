use crate::error::{BlockchainError, Result};
use crate::wallet::WALLET_FILE;
use std::env;
use std::path::{Path, PathBuf};

const DEFAULT_DATA_DIR: &str = "./data";

const DATA_DIR_KEY: &str = "DATA_DIR";
const NODE_ID_KEY: &str = "NODE_ID";
const WALLET_FILE_KEY: &str = "WALLET_FILE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    data_dir: PathBuf,
    node_id: Option<String>,
    wallet_file: Option<PathBuf>,
}

impl Config {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Config {
        Config {
            data_dir: data_dir.as_ref().to_path_buf(),
            node_id: None,
            wallet_file: None,
        }
    }

    /// Reads `DATA_DIR`, `NODE_ID` and `WALLET_FILE`.
    pub fn from_env() -> Result<Config> {
        let data_dir = env::var(DATA_DIR_KEY).unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string());
        let mut config = Config::new(data_dir);
        if let Ok(node_id) = env::var(NODE_ID_KEY) {
            config = config.with_node_id(node_id)?;
        }
        if let Ok(wallet_file) = env::var(WALLET_FILE_KEY) {
            config.wallet_file = Some(PathBuf::from(wallet_file));
        }
        Ok(config)
    }

    /// Isolates this node's database and wallet file from other nodes sharing
    /// the data directory.
    pub fn with_node_id(mut self, node_id: String) -> Result<Config> {
        if node_id.is_empty()
            || !node_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(BlockchainError::Config(format!("Invalid node id: {node_id:?}")));
        }
        self.node_id = Some(node_id);
        Ok(self)
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    pub fn db_path(&self) -> PathBuf {
        match &self.node_id {
            Some(node_id) => self.data_dir.join(format!("node_{node_id}")),
            None => self.data_dir.join("blocks"),
        }
    }

    pub fn wallet_path(&self) -> PathBuf {
        if let Some(wallet_file) = &self.wallet_file {
            return wallet_file.clone();
        }
        match &self.node_id {
            Some(node_id) => self.data_dir.join(format!("wallet_{node_id}.dat")),
            None => self.data_dir.join(WALLET_FILE),
        }
    }
}
