//! Blockchain integration tests
//!
//! Drives the ledger and UTXO index through their public entry points against
//! temporary sled databases.

use std::sync::atomic::AtomicBool;
use tempfile::{tempdir, TempDir};
use utxo_chain::core::{Adoption, Block, Blockchain, ProofOfWork, Transaction, SUBSIDY};
use utxo_chain::storage::UTXOSet;
use utxo_chain::wallet::{address_to_pub_key_hash, Wallets};
use utxo_chain::BlockchainError;

struct Fixture {
    blockchain: Blockchain,
    wallets: Wallets,
    genesis_address: String,
    _temp_dir: TempDir,
}

fn setup() -> Fixture {
    let temp_dir = tempdir().unwrap();
    let mut wallets = Wallets::open(temp_dir.path().join("wallet.dat")).unwrap();
    let genesis_address = wallets.create_wallet().unwrap();
    let blockchain =
        Blockchain::open_or_init(&genesis_address, temp_dir.path().join("blocks")).unwrap();
    Fixture {
        blockchain,
        wallets,
        genesis_address,
        _temp_dir: temp_dir,
    }
}

fn balance(utxo_set: &UTXOSet, address: &str) -> u64 {
    utxo_set
        .get_balance(&address_to_pub_key_hash(address).unwrap())
        .unwrap()
}

fn reward_block(parent: &Block, to: &str) -> Block {
    let coinbase = Transaction::new_coinbase_tx(to, "").unwrap();
    Block::new_block(parent.get_hash().to_vec(), &[coinbase], parent.get_height() + 1).unwrap()
}

#[test]
fn test_genesis_initialisation() {
    let fx = setup();
    let utxo_set = UTXOSet::new(fx.blockchain.clone());

    assert_eq!(fx.blockchain.get_best_height().unwrap(), 0);
    let genesis = fx.blockchain.get_block(&fx.blockchain.get_tip_hash().unwrap()).unwrap();
    assert!(genesis.is_genesis());
    assert!(ProofOfWork::validate(&genesis));
    assert_eq!(balance(&utxo_set, &fx.genesis_address), SUBSIDY);
    assert_eq!(utxo_set.count_transactions().unwrap(), 1);
}

#[test]
fn test_send_updates_balances() {
    let mut fx = setup();
    let bob = fx.wallets.create_wallet().unwrap();
    let utxo_set = UTXOSet::new(fx.blockchain.clone());

    let tx =
        Transaction::new_utxo_transaction(&fx.genesis_address, &bob, 40, &fx.wallets, &utxo_set)
            .unwrap();
    assert_eq!(tx.get_vin().len(), 1);
    assert_eq!(tx.get_vout().len(), 2);
    assert_eq!(tx.get_vout()[0].get_value(), 40);
    assert_eq!(tx.get_vout()[1].get_value(), 60);

    let block = fx.blockchain.mine_block(&[tx]).unwrap();
    assert_eq!(block.get_height(), 1);
    assert!(ProofOfWork::validate(&block));
    assert_eq!(fx.blockchain.get_best_height().unwrap(), 1);

    assert_eq!(balance(&utxo_set, &fx.genesis_address), 60);
    assert_eq!(balance(&utxo_set, &bob), 40);

    let err =
        Transaction::new_utxo_transaction(&bob, &fx.genesis_address, 50, &fx.wallets, &utxo_set)
            .unwrap_err();
    assert_eq!(
        err,
        BlockchainError::InsufficientFunds {
            required: 50,
            available: 40
        }
    );
}

#[test]
fn test_unknown_sender_wallet() {
    let fx = setup();
    let utxo_set = UTXOSet::new(fx.blockchain.clone());
    let stranger = utxo_chain::Wallet::new().unwrap().get_address();

    assert!(matches!(
        Transaction::new_utxo_transaction(
            &stranger,
            &fx.genesis_address,
            1,
            &fx.wallets,
            &utxo_set
        ),
        Err(BlockchainError::Wallet(_))
    ));
}

#[test]
fn test_incremental_updates_match_full_reindex() {
    let mut fx = setup();
    let bob = fx.wallets.create_wallet().unwrap();
    let carol = fx.wallets.create_wallet().unwrap();
    let utxo_set = UTXOSet::new(fx.blockchain.clone());

    let steps = [
        (fx.genesis_address.clone(), bob.clone(), 30),
        (bob.clone(), carol.clone(), 10),
        (fx.genesis_address.clone(), carol.clone(), 70),
        (carol.clone(), bob.clone(), 80),
    ];
    for (from, to, amount) in steps {
        let tx = Transaction::new_utxo_transaction(&from, &to, amount, &fx.wallets, &utxo_set)
            .unwrap();
        let reward = Transaction::new_coinbase_tx(&carol, "").unwrap();
        fx.blockchain.mine_block(&[reward, tx]).unwrap();
    }

    let incremental = utxo_set.snapshot().unwrap();
    utxo_set.reindex().unwrap();
    let rebuilt = utxo_set.snapshot().unwrap();
    assert_eq!(incremental, rebuilt);
    utxo_set.reindex().unwrap();
    assert_eq!(utxo_set.snapshot().unwrap(), rebuilt);

    let total: u64 = [&fx.genesis_address, &bob, &carol]
        .iter()
        .map(|address| balance(&utxo_set, address))
        .sum();
    // Genesis reward plus one reward per mined block
    assert_eq!(total, SUBSIDY * 5);
    assert_eq!(balance(&utxo_set, &fx.genesis_address), 0);
    assert_eq!(balance(&utxo_set, &bob), 100);
}

#[test]
fn test_add_block_is_idempotent() {
    let fx = setup();
    let utxo_set = UTXOSet::new(fx.blockchain.clone());
    let genesis = fx.blockchain.get_block(&fx.blockchain.get_tip_hash().unwrap()).unwrap();

    let block = reward_block(&genesis, &fx.genesis_address);
    assert_eq!(fx.blockchain.add_block(&block).unwrap(), Adoption::Extended);
    let tip = fx.blockchain.get_tip_hash().unwrap();
    let snapshot = utxo_set.snapshot().unwrap();

    assert_eq!(fx.blockchain.add_block(&block).unwrap(), Adoption::Known);
    assert_eq!(fx.blockchain.get_tip_hash().unwrap(), tip);
    assert_eq!(fx.blockchain.get_best_height().unwrap(), 1);
    assert_eq!(utxo_set.snapshot().unwrap(), snapshot);
    assert_eq!(balance(&utxo_set, &fx.genesis_address), SUBSIDY * 2);
}

#[test]
fn test_taller_branch_takes_over() {
    let fx = setup();
    let utxo_set = UTXOSet::new(fx.blockchain.clone());
    let genesis = fx.blockchain.get_block(&fx.blockchain.get_tip_hash().unwrap()).unwrap();
    let other = utxo_chain::Wallet::new().unwrap().get_address();

    let main = reward_block(&genesis, &other);
    assert_eq!(fx.blockchain.add_block(&main).unwrap(), Adoption::Extended);

    let side = reward_block(&genesis, &fx.genesis_address);
    assert_eq!(fx.blockchain.add_block(&side).unwrap(), Adoption::Stored);
    assert_eq!(fx.blockchain.get_tip_hash().unwrap(), main.get_hash());
    // Stored blocks stay retrievable
    assert_eq!(fx.blockchain.get_block(side.get_hash()).unwrap(), side);

    let side_tip = reward_block(&side, &fx.genesis_address);
    assert_eq!(fx.blockchain.add_block(&side_tip).unwrap(), Adoption::Switched);
    assert_eq!(fx.blockchain.get_tip_hash().unwrap(), side_tip.get_hash());
    assert_eq!(fx.blockchain.get_best_height().unwrap(), 2);

    // The abandoned block's reward is gone from the index
    assert_eq!(balance(&utxo_set, &other), 0);
    assert_eq!(balance(&utxo_set, &fx.genesis_address), SUBSIDY * 3);
    let after_switch = utxo_set.snapshot().unwrap();
    utxo_set.reindex().unwrap();
    assert_eq!(utxo_set.snapshot().unwrap(), after_switch);

    let hashes = fx.blockchain.get_block_hashes().unwrap();
    assert_eq!(
        hashes,
        vec![
            side_tip.get_hash().to_vec(),
            side.get_hash().to_vec(),
            genesis.get_hash().to_vec()
        ]
    );
}

#[test]
fn test_add_block_rejects_invalid_blocks() {
    let fx = setup();
    let genesis = fx.blockchain.get_block(&fx.blockchain.get_tip_hash().unwrap()).unwrap();
    let coinbase = Transaction::new_coinbase_tx(&fx.genesis_address, "").unwrap();

    let orphan = Block::new_block(vec![0x42; 32], &[coinbase.clone()], 1).unwrap();
    assert!(matches!(
        fx.blockchain.add_block(&orphan),
        Err(BlockchainError::InvalidBlock(_))
    ));

    let wrong_height = Block::new_block(genesis.get_hash().to_vec(), &[coinbase], 5).unwrap();
    assert!(matches!(
        fx.blockchain.add_block(&wrong_height),
        Err(BlockchainError::InvalidBlock(_))
    ));

    assert_eq!(fx.blockchain.get_best_height().unwrap(), 0);
    assert!(!fx.blockchain.block_exists(orphan.get_hash()).unwrap());
}

#[test]
fn test_spend_from_another_chain_is_missing_reference() {
    let fx = setup();
    let foreign = setup();
    let foreign_utxo = UTXOSet::new(foreign.blockchain.clone());
    let tx = Transaction::new_utxo_transaction(
        &foreign.genesis_address,
        &fx.genesis_address,
        10,
        &foreign.wallets,
        &foreign_utxo,
    )
    .unwrap();
    assert!(foreign.blockchain.verify_transaction(&tx).unwrap());

    assert!(matches!(
        fx.blockchain.verify_transaction(&tx),
        Err(BlockchainError::MissingReferencedTransaction(_))
    ));
    assert!(matches!(
        fx.blockchain.mine_block(&[tx]),
        Err(BlockchainError::MissingReferencedTransaction(_))
    ));
}

#[test]
fn test_chain_survives_reopen() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("blocks");
    let mut wallets = Wallets::open(temp_dir.path().join("wallet.dat")).unwrap();
    let address = wallets.create_wallet().unwrap();

    let (tip, snapshot) = {
        let blockchain = Blockchain::open_or_init(&address, &db_path).unwrap();
        blockchain.mine_block(&[Transaction::new_coinbase_tx(&address, "").unwrap()]).unwrap();
        blockchain.flush().unwrap();
        let snapshot = UTXOSet::new(blockchain.clone()).snapshot().unwrap();
        (blockchain.get_tip_hash().unwrap(), snapshot)
    };

    let reopened = Blockchain::open(&db_path).unwrap();
    assert_eq!(reopened.get_tip_hash().unwrap(), tip);
    assert_eq!(reopened.get_best_height().unwrap(), 1);
    assert_eq!(UTXOSet::new(reopened).snapshot().unwrap(), snapshot);

    let wallets = Wallets::open(temp_dir.path().join("wallet.dat")).unwrap();
    assert_eq!(wallets.get_addresses(), vec![address]);
}

#[test]
fn test_open_without_chain_is_not_found() {
    let temp_dir = tempdir().unwrap();
    assert!(matches!(
        Blockchain::open(temp_dir.path().join("empty")),
        Err(BlockchainError::NotFound(_))
    ));
}

#[test]
fn test_block_and_transaction_round_trip() {
    let mut fx = setup();
    let bob = fx.wallets.create_wallet().unwrap();
    let utxo_set = UTXOSet::new(fx.blockchain.clone());
    let tx =
        Transaction::new_utxo_transaction(&fx.genesis_address, &bob, 25, &fx.wallets, &utxo_set)
            .unwrap();
    let block = fx.blockchain.mine_block(&[tx.clone()]).unwrap();

    assert_eq!(Block::deserialize(&block.serialize().unwrap()).unwrap(), block);
    assert_eq!(Transaction::deserialize(&tx.serialize().unwrap()).unwrap(), tx);
    assert_eq!(fx.blockchain.get_block(block.get_hash()).unwrap(), block);
    assert_eq!(fx.blockchain.find_transaction(tx.get_id()).unwrap(), tx);

    let proof = block.generate_merkle_proof(0).unwrap();
    assert!(block.verify_merkle_proof(&proof));
}

#[test]
fn test_iteration_walks_back_to_genesis() {
    let fx = setup();
    for _ in 0..3 {
        fx.blockchain.mine_block(&[]).unwrap();
    }

    let heights: Vec<usize> = fx
        .blockchain
        .iterator()
        .unwrap()
        .map(|block| block.unwrap().get_height())
        .collect();
    assert_eq!(heights, vec![3, 2, 1, 0]);
    assert_eq!(fx.blockchain.get_block_hashes().unwrap().len(), 4);
    assert!(matches!(
        fx.blockchain.get_block(&[0u8; 32]),
        Err(BlockchainError::NotFound(_))
    ));
}

#[test]
fn test_cancelled_mining_leaves_chain_untouched() {
    let fx = setup();
    let cancel = AtomicBool::new(true);
    match fx.blockchain.mine_block_with_cancel(&[], &cancel) {
        Err(BlockchainError::Mining(_)) => assert_eq!(fx.blockchain.get_best_height().unwrap(), 0),
        // A winning first nonce is accepted before the flag is read
        Ok(block) => assert_eq!(block.get_nonce(), 0),
        Err(other) => panic!("unexpected error: {other}"),
    }
}
