use clap::Parser;
use data_encoding::HEXLOWER;
use log::{error, info, LevelFilter};
use std::process;
use utxo_chain::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Blockchain,
    BlockchainError, Command, Config, Opt, Transaction, UTXOSet, Wallets,
};

fn main() {
    // RUST_LOG still overrides the default level
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();

    if let Err(e) = run_command(opt.command) {
        if e.is_fatal() {
            error!("Fatal: {e}");
        } else {
            error!("Error: {e}");
        }
        process::exit(1);
    }
}

fn require_valid(address: &str, role: &str) -> Result<(), BlockchainError> {
    if validate_address(address) {
        Ok(())
    } else {
        Err(BlockchainError::InvalidAddress(format!(
            "Invalid {role} address: {address}"
        )))
    }
}

fn run_command(command: Command) -> Result<(), BlockchainError> {
    let config = Config::from_env()?;

    match command {
        Command::Createblockchain { address } => {
            require_valid(&address, "genesis")?;
            let blockchain = Blockchain::open_or_init(&address, config.db_path())?;
            info!("Chain tip: {}", HEXLOWER.encode(&blockchain.get_tip_hash()?));
            println!("Done!");
        }
        Command::Createwallet => {
            let mut wallets = Wallets::open(config.wallet_path())?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::GetBalance { address } => {
            require_valid(&address, "wallet")?;
            let pub_key_hash = address_to_pub_key_hash(&address)?;

            let blockchain = Blockchain::open(config.db_path())?;
            let balance = UTXOSet::new(blockchain).get_balance(&pub_key_hash)?;
            println!("Balance of {address}: {balance}");
        }
        Command::ListAddresses => {
            let wallets = Wallets::open(config.wallet_path())?;
            for address in wallets.get_addresses() {
                println!("{address}")
            }
        }
        Command::Send { from, to, amount } => {
            require_valid(&from, "sender")?;
            require_valid(&to, "recipient")?;

            let wallets = Wallets::open(config.wallet_path())?;
            let blockchain = Blockchain::open(config.db_path())?;
            let utxo_set = UTXOSet::new(blockchain.clone());

            let transaction =
                Transaction::new_utxo_transaction(&from, &to, amount, &wallets, &utxo_set)?;
            let block = blockchain.mine_block(&[transaction])?;
            info!(
                "Transaction mined in block {} at height {}",
                HEXLOWER.encode(block.get_hash()),
                block.get_height()
            );
            println!("Success!")
        }
        Command::Printchain => {
            let blockchain = Blockchain::open(config.db_path())?;
            for block in blockchain.iterator()? {
                let block = block?;
                println!("Height: {}", block.get_height());
                println!("Prev block hash: {}", HEXLOWER.encode(block.get_prev_block_hash()));
                println!("Cur block hash: {}", HEXLOWER.encode(block.get_hash()));
                println!("Merkle root: {}", HEXLOWER.encode(block.get_merkle_root()));
                println!("Timestamp: {}  Nonce: {}", block.get_time(), block.get_nonce());

                for tx in block.get_transactions() {
                    println!("- Transaction txid_hex: {}", HEXLOWER.encode(tx.get_id()));

                    if !tx.is_coinbase() {
                        for input in tx.get_vin() {
                            let pub_key_hash = hash_pub_key(input.get_pub_key());
                            println!(
                                "-- Input txid = {}, vout = {}, from = {}",
                                HEXLOWER.encode(input.get_txid()),
                                input.get_vout(),
                                convert_address(pub_key_hash.as_slice()),
                            )
                        }
                    }
                    for output in tx.get_vout() {
                        println!(
                            "-- Output value = {}, to = {}",
                            output.get_value(),
                            convert_address(output.get_pub_key_hash()),
                        )
                    }
                }
                println!()
            }
        }
        Command::Reindexutxo => {
            let blockchain = Blockchain::open(config.db_path())?;
            let count = UTXOSet::new(blockchain).reindex()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
        Command::GetBestHeight => {
            let blockchain = Blockchain::open(config.db_path())?;
            println!("{}", blockchain.get_best_height()?);
        }
    }
    Ok(())
}
