// The ledger: an append-only chain of blocks stored in sled, keyed by block hash,
// with a separate tip pointer. The UTXO index lives in a second tree of the same
// database and is kept in step with every block the ledger adopts.

use crate::core::{Block, ProofOfWork, TXOutput, Transaction};
use crate::core::transaction::output_index;
use crate::error::{BlockchainError, Result};
use crate::storage::utxo_set::{self, UTXOSet, UTXO_TREE};
use data_encoding::HEXLOWER;
use log::{debug, info, warn};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::{Db, IVec, Transactional, Tree};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

const TIP_BLOCK_HASH_KEY: &[u8] = b"tip_block_hash";
const BLOCKS_TREE: &str = "blocks";
const GENESIS_COINBASE_DATA: &str = "utxo-chain genesis";

#[derive(Clone)]
pub struct Blockchain {
    db: Db,
    blocks: Tree,
    utxo: Tree,
    db_path: PathBuf,
    // Held shared by UTXO index readers, exclusively while the tip or index changes
    index_lock: Arc<RwLock<()>>,
}

/// What happened to a block handed to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adoption {
    /// The hash was already stored; nothing changed
    Known,
    /// Stored, but not taller than the current tip
    Stored,
    /// Stored and adopted on top of the previous tip
    Extended,
    /// Stored and adopted as a taller tip on another branch
    Switched,
}

impl Adoption {
    pub fn advanced_tip(self) -> bool {
        matches!(self, Adoption::Extended | Adoption::Switched)
    }
}

impl Blockchain {
    /// Opens the chain at `db_path`, mining a genesis block paying
    /// `genesis_address` if the database holds no chain yet. The UTXO index is
    /// rebuilt either way.
    pub fn open_or_init<P: AsRef<Path>>(genesis_address: &str, db_path: P) -> Result<Blockchain> {
        let blockchain = Self::open_db(db_path.as_ref())?;

        if blockchain.blocks.get(TIP_BLOCK_HASH_KEY)?.is_none() {
            info!("No chain found, creating genesis block for address: {genesis_address}");
            let coinbase_tx = Transaction::new_coinbase_tx(genesis_address, GENESIS_COINBASE_DATA)?;
            let genesis = Block::generate_genesis_block(&coinbase_tx)?;
            blockchain.commit_block(&genesis)?;
        }

        let entries = UTXOSet::new(blockchain.clone()).reindex()?;
        info!("Opened chain at {} ({entries} UTXO entries)", blockchain.db_path.display());
        Ok(blockchain)
    }

    /// Opens an existing chain; fails with `NotFound` if there is none.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Blockchain> {
        let blockchain = Self::open_db(db_path.as_ref())?;
        if blockchain.blocks.get(TIP_BLOCK_HASH_KEY)?.is_none() {
            return Err(BlockchainError::NotFound(format!(
                "No existing blockchain at {}. Create one first.",
                blockchain.db_path.display()
            )));
        }
        Ok(blockchain)
    }

    fn open_db(path: &Path) -> Result<Blockchain> {
        let db = sled::open(path)
            .map_err(|e| BlockchainError::Database(format!("Failed to open database: {e}")))?;
        let blocks = db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open blocks tree: {e}")))?;
        let utxo = db
            .open_tree(UTXO_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open UTXO tree: {e}")))?;

        Ok(Blockchain {
            db,
            blocks,
            utxo,
            db_path: path.to_path_buf(),
            index_lock: Arc::new(RwLock::new(())),
        })
    }

    pub fn get_db_path(&self) -> &Path {
        &self.db_path
    }

    pub(crate) fn utxo_tree(&self) -> &Tree {
        &self.utxo
    }

    pub(crate) fn read_index(&self) -> Result<RwLockReadGuard<'_, ()>> {
        self.index_lock
            .read()
            .map_err(|_| BlockchainError::Database("UTXO index lock poisoned".to_string()))
    }

    pub(crate) fn write_index(&self) -> Result<RwLockWriteGuard<'_, ()>> {
        self.index_lock
            .write()
            .map_err(|_| BlockchainError::Database("UTXO index lock poisoned".to_string()))
    }

    /// Flushes dirty pages to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    pub fn get_tip_hash(&self) -> Result<Vec<u8>> {
        self.blocks
            .get(TIP_BLOCK_HASH_KEY)?
            .map(|hash| hash.to_vec())
            .ok_or_else(|| BlockchainError::NotFound("tip block hash".to_string()))
    }

    pub fn get_best_height(&self) -> Result<usize> {
        Ok(self.get_block(&self.get_tip_hash()?)?.get_height())
    }

    pub fn get_block(&self, block_hash: &[u8]) -> Result<Block> {
        match self.blocks.get(block_hash)? {
            Some(bytes) => Block::deserialize(bytes.as_ref()),
            None => Err(BlockchainError::NotFound(format!(
                "block {}",
                HEXLOWER.encode(block_hash)
            ))),
        }
    }

    pub fn block_exists(&self, block_hash: &[u8]) -> Result<bool> {
        Ok(self.blocks.contains_key(block_hash)?)
    }

    /// Hashes of the canonical chain, tip first.
    pub fn get_block_hashes(&self) -> Result<Vec<Vec<u8>>> {
        self.iterator()?
            .map(|block| block.map(|b| b.get_hash().to_vec()))
            .collect()
    }

    /// Walks the chain from the current tip back to genesis.
    pub fn iterator(&self) -> Result<BlockchainIterator> {
        let _guard = self.read_index()?;
        self.iterator_unlocked()
    }

    fn iterator_unlocked(&self) -> Result<BlockchainIterator> {
        Ok(BlockchainIterator::new(self.get_tip_hash()?, self.blocks.clone()))
    }

    // Blocks from `block` back to genesis, whether or not `block` is stored yet
    fn branch_from(&self, block: &Block) -> impl Iterator<Item = Result<Block>> {
        let ancestors = (!block.is_genesis()).then(|| {
            BlockchainIterator::new(block.get_prev_block_hash().to_vec(), self.blocks.clone())
        });
        std::iter::once(Ok(block.clone())).chain(ancestors.into_iter().flatten())
    }

    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        self.mine_block_internal(transactions, None)
    }

    /// Mines like [`mine_block`](Self::mine_block) but stops with a `Mining`
    /// error once `cancel` is raised.
    pub fn mine_block_with_cancel(
        &self,
        transactions: &[Transaction],
        cancel: &AtomicBool,
    ) -> Result<Block> {
        self.mine_block_internal(transactions, Some(cancel))
    }

    fn mine_block_internal(
        &self,
        transactions: &[Transaction],
        cancel: Option<&AtomicBool>,
    ) -> Result<Block> {
        for (i, transaction) in transactions.iter().enumerate() {
            if !self.verify_transaction(transaction)? {
                return Err(BlockchainError::Transaction(format!(
                    "Invalid transaction at index {i}: {}",
                    HEXLOWER.encode(transaction.get_id())
                )));
            }
        }
        self.check_for_double_spending(transactions)?;
        self.check_inputs_unspent(transactions)?;

        let tip_hash = self.get_tip_hash()?;
        if let Some(txid) = self.find_duplicate_id(Some(tip_hash.as_slice()), transactions)? {
            return Err(BlockchainError::Transaction(format!(
                "Transaction {} is already on the chain or repeated in the batch",
                HEXLOWER.encode(&txid)
            )));
        }
        let next_height = self.get_block(&tip_hash)?.get_height() + 1;
        info!(
            "Mining block at height {next_height} with {} transactions",
            transactions.len()
        );

        // The search runs without holding the index lock
        let block = match cancel {
            Some(flag) => Block::new_block_with_cancel(tip_hash, transactions, next_height, flag)?,
            None => Block::new_block(tip_hash, transactions, next_height)?,
        };

        let adoption = self.commit_block(&block)?;
        if adoption.advanced_tip() {
            info!("Successfully mined block: {}", HEXLOWER.encode(block.get_hash()));
        } else {
            warn!(
                "Mined block {} was not adopted ({adoption:?}); the tip moved during mining",
                HEXLOWER.encode(block.get_hash())
            );
        }
        Ok(block)
    }

    /// Ingests a block from outside (e.g. a peer). Storing a known hash again is a
    /// no-op; the tip advances only when the block is taller than the current tip.
    pub fn add_block(&self, block: &Block) -> Result<Adoption> {
        if self.block_exists(block.get_hash())? {
            return Ok(Adoption::Known);
        }
        self.validate_block(block)?;

        let adoption = self.commit_block(block)?;
        debug!(
            "Block {} at height {}: {adoption:?}",
            HEXLOWER.encode(block.get_hash()),
            block.get_height()
        );
        Ok(adoption)
    }

    /// Header-level admission checks for an incoming block.
    fn validate_block(&self, block: &Block) -> Result<()> {
        let hash_hex = HEXLOWER.encode(block.get_hash());
        if !ProofOfWork::validate(block) {
            return Err(BlockchainError::InvalidBlock(format!(
                "{hash_hex}: proof of work does not validate"
            )));
        }
        if !block.verify_merkle_root()? {
            return Err(BlockchainError::InvalidBlock(format!(
                "{hash_hex}: merkle root does not match transactions"
            )));
        }

        if block.is_genesis() {
            if block.get_height() != 0 {
                return Err(BlockchainError::InvalidBlock(format!(
                    "{hash_hex}: block without parent claims height {}",
                    block.get_height()
                )));
            }
        } else {
            self.validate_parent(block)?;
        }

        let parent_hash = (!block.is_genesis()).then(|| block.get_prev_block_hash());
        if let Some(txid) = self.find_duplicate_id(parent_hash, block.get_transactions())? {
            return Err(BlockchainError::InvalidBlock(format!(
                "{hash_hex}: transaction {} already appears on its branch",
                HEXLOWER.encode(&txid)
            )));
        }
        Ok(())
    }

    fn validate_parent(&self, block: &Block) -> Result<()> {
        let hash_hex = HEXLOWER.encode(block.get_hash());
        let parent = match self.get_block(block.get_prev_block_hash()) {
            Ok(parent) => parent,
            Err(BlockchainError::NotFound(_)) => {
                return Err(BlockchainError::InvalidBlock(format!(
                    "{hash_hex}: unknown parent {}",
                    HEXLOWER.encode(block.get_prev_block_hash())
                )))
            }
            Err(e) => return Err(e),
        };
        if block.get_height() != parent.get_height() + 1 {
            return Err(BlockchainError::InvalidBlock(format!(
                "{hash_hex}: height {} does not follow parent height {}",
                block.get_height(),
                parent.get_height()
            )));
        }
        Ok(())
    }

    /// Stores `block` and applies the height rule in one transaction over the
    /// blocks and UTXO trees. A block extending the old tip is absorbed into the
    /// index incrementally; a taller block on another branch replaces the index
    /// with one computed for that branch, in the same transaction.
    fn commit_block(&self, block: &Block) -> Result<Adoption> {
        let _guard = self.write_index()?;
        let block_bytes = block.serialize()?;
        let switch = self.plan_switch(block)?;

        let adoption = (&self.blocks, &self.utxo).transaction(
            |(blocks, utxo)| -> ConflictableTransactionResult<Adoption, BlockchainError> {
                if blocks.get(block.get_hash())?.is_some() {
                    return Ok(Adoption::Known);
                }
                blocks.insert(block.get_hash(), block_bytes.as_slice())?;

                let tip_hash = blocks.get(TIP_BLOCK_HASH_KEY)?;
                let tip_height = match &tip_hash {
                    Some(hash) => {
                        let tip_bytes = blocks.get(hash)?.ok_or_else(|| {
                            ConflictableTransactionError::Abort(BlockchainError::Database(
                                "Tip block missing from storage".to_string(),
                            ))
                        })?;
                        let tip_block = Block::deserialize(tip_bytes.as_ref())
                            .map_err(ConflictableTransactionError::Abort)?;
                        Some(tip_block.get_height())
                    }
                    None => None,
                };

                if tip_height.is_some_and(|height| block.get_height() <= height) {
                    return Ok(Adoption::Stored);
                }
                blocks.insert(TIP_BLOCK_HASH_KEY, block.get_hash())?;

                let extends_tip = match tip_hash.as_deref() {
                    Some(hash) => hash == block.get_prev_block_hash(),
                    None => block.is_genesis(),
                };
                if extends_tip {
                    utxo_set::update(utxo, block)?;
                    return Ok(Adoption::Extended);
                }
                match &switch {
                    Some(plan) => {
                        utxo_set::replace_all(utxo, &plan.stale_keys, &plan.entries)?;
                        Ok(Adoption::Switched)
                    }
                    None => Err(ConflictableTransactionError::Abort(BlockchainError::Database(
                        "Tip moved while adopting a block".to_string(),
                    ))),
                }
            },
        )?;

        if let (Adoption::Switched, Some(plan)) = (adoption, &switch) {
            warn!(
                "Adopted block {} from another branch, UTXO index rebuilt ({} transactions)",
                HEXLOWER.encode(block.get_hash()),
                plan.entries.len()
            );
        }
        Ok(adoption)
    }

    /// The index for the branch ending at `block`, if adopting `block` would move
    /// the tip off the current chain. The caller holds the index write lock.
    fn plan_switch(&self, block: &Block) -> Result<Option<BranchSwitch>> {
        let tip_hash = match self.blocks.get(TIP_BLOCK_HASH_KEY)? {
            Some(hash) => hash,
            None => return Ok(None),
        };
        if tip_hash.as_ref() == block.get_prev_block_hash()
            || block.get_height() <= self.get_block(&tip_hash)?.get_height()
        {
            return Ok(None);
        }

        let entries = utxo_set::encode_entries(&collect_utxo(self.branch_from(block))?)?;
        let stale_keys = self
            .utxo
            .iter()
            .keys()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Some(BranchSwitch {
            stale_keys,
            entries,
        }))
    }

    pub fn find_transaction(&self, txid: &[u8]) -> Result<Transaction> {
        for block in self.iterator()? {
            if let Some(transaction) = block?
                .get_transactions()
                .iter()
                .find(|transaction| transaction.get_id() == txid)
            {
                return Ok(transaction.clone());
            }
        }
        Err(BlockchainError::NotFound(format!(
            "transaction {}",
            HEXLOWER.encode(txid)
        )))
    }

    /// The transactions referenced by `transaction`'s inputs, keyed by hex id.
    fn find_referenced_transactions(
        &self,
        transaction: &Transaction,
    ) -> Result<HashMap<String, Transaction>> {
        let mut prev_txs = HashMap::new();
        if transaction.is_coinbase() {
            return Ok(prev_txs);
        }
        for vin in transaction.get_vin() {
            let txid_hex = HEXLOWER.encode(vin.get_txid());
            if prev_txs.contains_key(&txid_hex) {
                continue;
            }
            let prev_tx = self.find_transaction(vin.get_txid()).map_err(|e| match e {
                BlockchainError::NotFound(_) => {
                    BlockchainError::MissingReferencedTransaction(txid_hex.clone())
                }
                other => other,
            })?;
            prev_txs.insert(txid_hex, prev_tx);
        }
        Ok(prev_txs)
    }

    pub fn sign_transaction(&self, transaction: &mut Transaction, pkcs8: &[u8]) -> Result<()> {
        let prev_txs = self.find_referenced_transactions(transaction)?;
        transaction.sign(pkcs8, &prev_txs)
    }

    pub fn verify_transaction(&self, transaction: &Transaction) -> Result<bool> {
        let prev_txs = self.find_referenced_transactions(transaction)?;
        transaction.verify(&prev_txs)
    }

    // The same output must not be spent twice within one batch
    fn check_for_double_spending(&self, transactions: &[Transaction]) -> Result<()> {
        let mut spent_outputs: HashSet<(Vec<u8>, i32)> = HashSet::new();

        for (tx_index, transaction) in transactions.iter().enumerate() {
            if transaction.is_coinbase() {
                continue;
            }
            for input in transaction.get_vin() {
                let output_reference = (input.get_txid().to_vec(), input.get_vout());
                if !spent_outputs.insert(output_reference) {
                    return Err(BlockchainError::Transaction(format!(
                        "Double-spending detected in transaction {}: output {}:{} already spent \
                         in this block",
                        tx_index,
                        HEXLOWER.encode(input.get_txid()),
                        input.get_vout()
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_inputs_unspent(&self, transactions: &[Transaction]) -> Result<()> {
        let utxo_set = UTXOSet::new(self.clone());
        for transaction in transactions.iter().filter(|tx| !tx.is_coinbase()) {
            for input in transaction.get_vin() {
                if !utxo_set.contains_output(input.get_txid(), input.get_vout())? {
                    return Err(BlockchainError::Transaction(format!(
                        "Input already spent: {}:{}",
                        HEXLOWER.encode(input.get_txid()),
                        input.get_vout()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Every unspent output on the canonical chain, keyed by hex txid, each
    /// tagged with its position in its transaction.
    pub fn find_all_utxo(&self) -> Result<HashMap<String, Vec<TXOutput>>> {
        let _guard = self.read_index()?;
        collect_utxo(self.iterator_unlocked()?)
    }

    /// [`find_all_utxo`](Self::find_all_utxo) for callers already holding the
    /// index write lock.
    pub(crate) fn find_all_utxo_locked(&self) -> Result<HashMap<String, Vec<TXOutput>>> {
        collect_utxo(self.iterator_unlocked()?)
    }

    /// The first id in `transactions` that repeats within the batch or already
    /// appears on the branch ending at `branch_tip`.
    fn find_duplicate_id(
        &self,
        branch_tip: Option<&[u8]>,
        transactions: &[Transaction],
    ) -> Result<Option<Vec<u8>>> {
        let mut ids: HashSet<&[u8]> = HashSet::new();
        for transaction in transactions {
            if !ids.insert(transaction.get_id()) {
                return Ok(Some(transaction.get_id().to_vec()));
            }
        }

        let Some(tip) = branch_tip else {
            return Ok(None);
        };
        for block in BlockchainIterator::new(tip.to_vec(), self.blocks.clone()) {
            let block = block?;
            if let Some(existing) = block
                .get_transactions()
                .iter()
                .find(|transaction| ids.contains(transaction.get_id()))
            {
                return Ok(Some(existing.get_id().to_vec()));
            }
        }
        Ok(None)
    }

    /// Greedily collects outputs locked to `pub_key_hash` until `amount` is
    /// covered. The result may fall short; callers compare the total themselves.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, HashMap<String, Vec<i32>>)> {
        Ok(utxo_set::select_outputs(
            self.find_all_utxo()?,
            pub_key_hash,
            amount,
        ))
    }
}

struct BranchSwitch {
    stale_keys: Vec<IVec>,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

/// Unspent outputs of a chain given newest block first. Transactions are
/// scanned newest first within a block too, so a spend is always seen before
/// the output it consumes.
fn collect_utxo<I>(blocks: I) -> Result<HashMap<String, Vec<TXOutput>>>
where
    I: IntoIterator<Item = Result<Block>>,
{
    let mut utxo: HashMap<String, Vec<TXOutput>> = HashMap::new();
    let mut spent_txos: HashMap<String, HashSet<i32>> = HashMap::new();

    for block in blocks {
        let block = block?;
        for tx in block.get_transactions().iter().rev() {
            let txid_hex = HEXLOWER.encode(tx.get_id());
            let spent = spent_txos.get(&txid_hex);
            for (position, out) in tx.get_vout().iter().enumerate() {
                let index = output_index(position)?;
                if spent.is_some_and(|indices| indices.contains(&index)) {
                    continue;
                }
                utxo.entry(txid_hex.clone())
                    .or_default()
                    .push(out.with_index(index));
            }

            if tx.is_coinbase() {
                continue;
            }
            for txin in tx.get_vin() {
                spent_txos
                    .entry(HEXLOWER.encode(txin.get_txid()))
                    .or_default()
                    .insert(txin.get_vout());
            }
        }
    }
    Ok(utxo)
}

pub struct BlockchainIterator {
    blocks: Tree,
    current_hash: Option<Vec<u8>>,
}

impl BlockchainIterator {
    fn new(tip_hash: Vec<u8>, blocks: Tree) -> BlockchainIterator {
        BlockchainIterator {
            blocks,
            current_hash: Some(tip_hash),
        }
    }
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current_hash.take()?;
        let block = match self.blocks.get(&hash) {
            Ok(Some(bytes)) => Block::deserialize(bytes.as_ref()),
            Ok(None) => Err(BlockchainError::NotFound(format!(
                "block {}",
                HEXLOWER.encode(&hash)
            ))),
            Err(e) => Err(e.into()),
        };
        // Stops after genesis, or after the first error
        if let Ok(block) = &block {
            if !block.is_genesis() {
                self.current_hash = Some(block.get_prev_block_hash().to_vec());
            }
        }
        Some(block)
    }
}
