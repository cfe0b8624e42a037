// Transactions move value by consuming earlier outputs (inputs) and creating new ones (outputs).
// A transaction's id is the SHA-256 of its own encoding with the id field cleared, taken
// before any input is signed.

use crate::error::{BlockchainError, Result};
use crate::storage::UTXOSet;
use crate::utils::{
    deserialize, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, serialize,
    sha256_digest,
};
use crate::wallet::{address_to_pub_key_hash, hash_pub_key, Wallets};
use data_encoding::HEXLOWER;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Reward minted by every coinbase transaction
pub const SUBSIDY: u64 = 100;

/// Output index carried by a coinbase input, which references nothing
pub const COINBASE_VOUT: i32 = -1;

/// Index of an output that has not been placed in the UTXO index
pub const UNINDEXED: i32 = -1;

/// Converts an output's position within its transaction to the stored index type.
pub(crate) fn output_index(position: usize) -> Result<i32> {
    i32::try_from(position).map_err(|_| {
        BlockchainError::Transaction(format!("Output position {position} out of range"))
    })
}

// An input names one output of an earlier transaction: "output #vout of transaction txid"
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXInput {
    txid: Vec<u8>,
    vout: i32,
    signature: Vec<u8>, // r ++ s
    pub_key: Vec<u8>,   // x ++ y of the spender, or arbitrary payload for coinbase
}

impl TXInput {
    pub fn new(txid: &[u8], vout: i32) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout,
            signature: vec![],
            pub_key: vec![],
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> i32 {
        self.vout
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        hash_pub_key(self.pub_key.as_slice()).eq(pub_key_hash)
    }
}

// An output locks `value` to whoever can prove ownership of the key behind `pub_key_hash`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
    index: i32, // position in the owning transaction, assigned by the UTXO index
}

impl TXOutput {
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        Ok(TXOutput {
            value,
            pub_key_hash: address_to_pub_key_hash(address)?,
            index: UNINDEXED,
        })
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    pub fn get_index(&self) -> i32 {
        self.index
    }

    pub fn with_index(&self, index: i32) -> TXOutput {
        TXOutput {
            index,
            ..self.clone()
        }
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Mints [`SUBSIDY`] to `to`. An empty `data` is replaced by a random payload
    /// so repeated rewards to one address still get distinct ids.
    pub fn new_coinbase_tx(to: &str, data: &str) -> Result<Transaction> {
        let payload = if data.is_empty() {
            Uuid::new_v4().as_bytes().to_vec()
        } else {
            data.as_bytes().to_vec()
        };
        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_VOUT,
            signature: vec![],
            pub_key: payload,
        };

        let mut tx = Transaction {
            id: vec![],
            vin: vec![tx_input],
            vout: vec![TXOutput::new(SUBSIDY, to)?],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Builds and signs a transfer of `amount` from `from` to `to`, paying any
    /// surplus of the selected outputs back to `from`.
    pub fn new_utxo_transaction(
        from: &str,
        to: &str,
        amount: u64,
        wallets: &Wallets,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::Transaction(
                "Amount must be positive".to_string(),
            ));
        }

        let wallet = wallets.require_wallet(from)?;
        let public_key_hash = hash_pub_key(wallet.get_public_key());

        let (accumulated, valid_outputs) =
            utxo_set.find_spendable_outputs(public_key_hash.as_slice(), amount)?;
        if accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        // Sorted so the same selection always yields the same input order
        let valid_outputs: BTreeMap<String, Vec<i32>> = valid_outputs.into_iter().collect();
        let mut inputs = vec![];
        for (txid_hex, outs) in valid_outputs {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                BlockchainError::Transaction(format!("Invalid transaction ID: {e}"))
            })?;
            for out in outs {
                inputs.push(TXInput {
                    txid: txid.clone(),
                    vout: out,
                    signature: vec![],
                    pub_key: wallet.get_public_key().to_vec(),
                });
            }
        }

        let mut outputs = vec![TXOutput::new(amount, to)?];
        if accumulated > amount {
            outputs.push(TXOutput::new(accumulated - amount, from)?);
        }

        let mut tx = Transaction {
            id: vec![],
            vin: inputs,
            vout: outputs,
        };
        tx.id = tx.hash()?;

        utxo_set
            .get_blockchain()
            .sign_transaction(&mut tx, wallet.get_pkcs8())?;
        Ok(tx)
    }

    /// Copy with every input's signature and public key cleared: the canonical
    /// message that signatures commit to.
    fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .vin
            .iter()
            .map(|input| TXInput::new(input.get_txid(), input.get_vout()))
            .collect();
        let outputs = self
            .vout
            .iter()
            .map(|output| output.with_index(UNINDEXED))
            .collect();
        Transaction {
            id: self.id.clone(),
            vin: inputs,
            vout: outputs,
        }
    }

    /// Message for input `idx`: the trimmed copy's hash with only that input's
    /// public key slot holding the lock of the output it spends.
    fn signing_message(&mut self, idx: usize, lock: &[u8]) -> Result<Vec<u8>> {
        self.vin[idx].signature = vec![];
        self.vin[idx].pub_key = lock.to_vec();
        self.id = self.hash()?;
        self.vin[idx].pub_key = vec![];
        Ok(self.id.clone())
    }

    /// Lock hashes of the outputs spent by each input, in input order.
    fn referenced_locks(&self, prev_txs: &HashMap<String, Transaction>) -> Result<Vec<Vec<u8>>> {
        self.vin
            .iter()
            .map(|vin| {
                let txid_hex = HEXLOWER.encode(vin.get_txid());
                let missing = || {
                    let outpoint = format!("{txid_hex}:{}", vin.vout);
                    BlockchainError::MissingReferencedTransaction(outpoint)
                };
                let prev_tx = prev_txs
                    .get(&txid_hex)
                    .filter(|tx| tx.id == vin.txid)
                    .ok_or_else(missing)?;
                let position = usize::try_from(vin.vout).map_err(|_| missing())?;
                prev_tx
                    .vout
                    .get(position)
                    .map(|out| out.pub_key_hash.clone())
                    .ok_or_else(missing)
            })
            .collect()
    }

    /// Signs every input with `pkcs8`. `prev_txs` maps hex txid to each
    /// transaction referenced by an input.
    pub fn sign(&mut self, pkcs8: &[u8], prev_txs: &HashMap<String, Transaction>) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let locks = self.referenced_locks(prev_txs)?;
        let mut tx_copy = self.trimmed_copy();
        for (idx, lock) in locks.iter().enumerate() {
            let message = tx_copy.signing_message(idx, lock)?;
            self.vin[idx].signature = ecdsa_p256_sha256_sign_digest(pkcs8, &message)?;
        }
        Ok(())
    }

    pub fn verify(&self, prev_txs: &HashMap<String, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }

        let locks = self.referenced_locks(prev_txs)?;
        if self.id != self.unsigned_hash()? {
            debug!("Transaction {} does not match its content", HEXLOWER.encode(&self.id));
            return Ok(false);
        }

        let mut tx_copy = self.trimmed_copy();
        for (idx, (vin, lock)) in self.vin.iter().zip(locks.iter()).enumerate() {
            // The key that signed must be the key the spent output is locked to
            if !vin.uses_key(lock) {
                return Ok(false);
            }
            let message = tx_copy.signing_message(idx, lock)?;
            if !ecdsa_p256_sha256_sign_verify(
                vin.pub_key.as_slice(),
                vin.signature.as_slice(),
                message.as_slice(),
            ) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == COINBASE_VOUT
    }

    /// SHA-256 of the transaction encoded with an empty id.
    pub fn hash(&self) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self.vin.clone(),
            vout: self.vout.clone(),
        };
        Ok(sha256_digest(tx_copy.serialize()?.as_slice()))
    }

    /// The id a transaction was given before signing: [`hash`](Self::hash) with
    /// every input signature cleared as well.
    fn unsigned_hash(&self) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self
                .vin
                .iter()
                .map(|input| TXInput {
                    signature: vec![],
                    ..input.clone()
                })
                .collect(),
            vout: self.vout.clone(),
        };
        Ok(sha256_digest(tx_copy.serialize()?.as_slice()))
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }

    #[cfg(test)]
    pub(crate) fn from_parts(vin: Vec<TXInput>, vout: Vec<TXOutput>) -> Result<Transaction> {
        let mut tx = Transaction {
            id: vec![],
            vin,
            vout,
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }
}
