use crate::core::transaction::output_index;
use crate::core::{Block, Blockchain, TXOutput};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use log::info;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
};
use sled::IVec;
use std::collections::{BTreeMap, HashMap};

pub(crate) const UTXO_TREE: &str = "chainstate";

/// Persisted index of unspent outputs, keyed by raw transaction id.
///
/// The index is derived from the ledger. It is only written by [`reindex`](UTXOSet::reindex)
/// and by the ledger itself while adopting a block.
pub struct UTXOSet {
    blockchain: Blockchain,
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> UTXOSet {
        UTXOSet { blockchain }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    /// Clears the index and rebuilds it from the ledger. Returns the number of
    /// transactions with unspent outputs.
    pub fn reindex(&self) -> Result<usize> {
        let _guard = self.blockchain.write_index()?;
        reindex_locked(&self.blockchain)
    }

    /// Like [`Blockchain::find_spendable_outputs`], but reads the persisted index.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, HashMap<String, Vec<i32>>)> {
        let _guard = self.blockchain.read_index()?;
        let mut unspent_outputs: HashMap<String, Vec<i32>> = HashMap::new();
        let mut accumulated = 0;

        for item in self.blockchain.utxo_tree().iter() {
            if accumulated >= amount {
                break;
            }
            let (k, v) = item?;
            let outs: Vec<TXOutput> = deserialize(v.as_ref())?;
            for out in outs.iter().filter(|out| out.is_locked_with_key(pub_key_hash)) {
                if accumulated >= amount {
                    break;
                }
                accumulated += out.get_value();
                unspent_outputs
                    .entry(HEXLOWER.encode(k.as_ref()))
                    .or_default()
                    .push(out.get_index());
            }
        }
        Ok((accumulated, unspent_outputs))
    }

    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let _guard = self.blockchain.read_index()?;
        let mut utxos = vec![];
        for item in self.blockchain.utxo_tree().iter() {
            let (_, v) = item?;
            let outs: Vec<TXOutput> = deserialize(v.as_ref())?;
            utxos.extend(
                outs.into_iter()
                    .filter(|out| out.is_locked_with_key(pub_key_hash)),
            );
        }
        Ok(utxos)
    }

    pub fn get_balance(&self, pub_key_hash: &[u8]) -> Result<u64> {
        Ok(self
            .find_utxo(pub_key_hash)?
            .iter()
            .map(TXOutput::get_value)
            .sum())
    }

    /// Number of transactions that still have at least one unspent output.
    pub fn count_transactions(&self) -> Result<usize> {
        let _guard = self.blockchain.read_index()?;
        let mut counter = 0;
        for item in self.blockchain.utxo_tree().iter() {
            item?;
            counter += 1;
        }
        Ok(counter)
    }

    /// Ordered copy of the whole index, keyed by hex txid.
    pub fn snapshot(&self) -> Result<BTreeMap<String, Vec<TXOutput>>> {
        let _guard = self.blockchain.read_index()?;
        let mut snapshot = BTreeMap::new();
        for item in self.blockchain.utxo_tree().iter() {
            let (k, v) = item?;
            snapshot.insert(HEXLOWER.encode(k.as_ref()), deserialize(v.as_ref())?);
        }
        Ok(snapshot)
    }

    pub fn contains_output(&self, txid: &[u8], vout: i32) -> Result<bool> {
        let _guard = self.blockchain.read_index()?;
        match self.blockchain.utxo_tree().get(txid)? {
            Some(v) => {
                let outs: Vec<TXOutput> = deserialize(v.as_ref())?;
                Ok(outs.iter().any(|out| out.get_index() == vout))
            }
            None => Ok(false),
        }
    }
}

/// Full rebuild; the caller holds the index write lock.
pub(crate) fn reindex_locked(blockchain: &Blockchain) -> Result<usize> {
    let utxo_tree = blockchain.utxo_tree();
    let entries = encode_entries(&blockchain.find_all_utxo_locked()?)?;

    let mut batch = sled::Batch::default();
    for key in utxo_tree.iter().keys() {
        batch.remove(key?);
    }
    for (txid, outs) in &entries {
        batch.insert(txid.as_slice(), outs.as_slice());
    }
    utxo_tree.apply_batch(batch)?;

    info!("Reindexed UTXO set: {} transactions", entries.len());
    Ok(entries.len())
}

/// Index rows for a hex-keyed UTXO map: raw txid and encoded outputs.
pub(crate) fn encode_entries(
    utxo_map: &HashMap<String, Vec<TXOutput>>,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    utxo_map
        .iter()
        .map(|(txid_hex, outs)| {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                BlockchainError::Serialization(format!("Failed to decode transaction ID: {e}"))
            })?;
            Ok((txid, serialize(outs)?))
        })
        .collect()
}

/// Swaps the whole index for `entries` inside the ledger's adoption
/// transaction. `stale_keys` must list every key currently in the index.
pub(crate) fn replace_all(
    utxo: &TransactionalTree,
    stale_keys: &[IVec],
    entries: &[(Vec<u8>, Vec<u8>)],
) -> ConflictableTransactionResult<(), BlockchainError> {
    for key in stale_keys {
        utxo.remove(key.as_ref())?;
    }
    for (txid, outs) in entries {
        utxo.insert(txid.as_slice(), outs.as_slice())?;
    }
    Ok(())
}

/// Absorbs one newly adopted block into the index, inside the ledger's
/// adoption transaction. Spent outputs are removed (and emptied entries
/// dropped); each transaction's outputs are added under its id.
pub(crate) fn update(
    utxo: &TransactionalTree,
    block: &Block,
) -> ConflictableTransactionResult<(), BlockchainError> {
    let abort = |e: BlockchainError| ConflictableTransactionError::Abort(e);

    for tx in block.get_transactions() {
        if !tx.is_coinbase() {
            for vin in tx.get_vin() {
                let spent = || {
                    abort(BlockchainError::InvalidBlock(format!(
                        "Block {} spends {}:{} which is not unspent",
                        HEXLOWER.encode(block.get_hash()),
                        HEXLOWER.encode(vin.get_txid()),
                        vin.get_vout()
                    )))
                };
                let outs_bytes = utxo.get(vin.get_txid())?.ok_or_else(spent)?;
                let mut outs: Vec<TXOutput> = deserialize(outs_bytes.as_ref()).map_err(abort)?;
                let position = outs
                    .iter()
                    .position(|out| out.get_index() == vin.get_vout())
                    .ok_or_else(spent)?;
                outs.remove(position);

                if outs.is_empty() {
                    utxo.remove(vin.get_txid())?;
                } else {
                    utxo.insert(vin.get_txid(), serialize(&outs).map_err(abort)?)?;
                }
            }
        }

        if tx.get_vout().is_empty() {
            continue;
        }
        let new_outputs = tx
            .get_vout()
            .iter()
            .enumerate()
            .map(|(position, out)| -> Result<TXOutput> {
                Ok(out.with_index(output_index(position)?))
            })
            .collect::<Result<Vec<TXOutput>>>()
            .map_err(abort)?;
        if utxo.get(tx.get_id())?.is_some() {
            return Err(abort(BlockchainError::InvalidBlock(format!(
                "Block {} repeats transaction {} which still has unspent outputs",
                HEXLOWER.encode(block.get_hash()),
                HEXLOWER.encode(tx.get_id())
            ))));
        }
        utxo.insert(tx.get_id(), serialize(&new_outputs).map_err(abort)?)?;
    }
    Ok(())
}

/// Greedy selection over an in-memory UTXO map, in txid order.
pub(crate) fn select_outputs(
    utxo_map: HashMap<String, Vec<TXOutput>>,
    pub_key_hash: &[u8],
    amount: u64,
) -> (u64, HashMap<String, Vec<i32>>) {
    let ordered: BTreeMap<String, Vec<TXOutput>> = utxo_map.into_iter().collect();
    let mut unspent_outputs: HashMap<String, Vec<i32>> = HashMap::new();
    let mut accumulated = 0;

    'outer: for (txid_hex, outs) in ordered {
        for out in outs.iter().filter(|out| out.is_locked_with_key(pub_key_hash)) {
            if accumulated >= amount {
                break 'outer;
            }
            accumulated += out.get_value();
            unspent_outputs
                .entry(txid_hex.clone())
                .or_default()
                .push(out.get_index());
        }
    }
    (accumulated, unspent_outputs)
}
