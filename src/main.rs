// Key-history index inspector
// Reads the history index and block store of a ledger data directory

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ledger_history_index::{
    BlockStore, BlockStoreProvider, HistoryDbProvider, KeyModification, LedgerConfig,
};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "kvhistory")]
struct Cli {
    /// Ledger configuration file (JSON); overrides --data-dir
    #[arg(short, long, global = true)]
    config: Option<String>,
    /// Data directory holding the block store and history index
    #[arg(short, long, global = true, default_value = "./data")]
    data_dir: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List ledgers found in the history index or the block store
    Ledgers,
    /// Show the last block indexed into history
    Savepoint {
        #[arg(short, long)]
        ledger: String,
    },
    /// Print every value ever written to a key
    History {
        #[arg(short, long)]
        ledger: String,
        #[arg(short, long)]
        namespace: String,
        #[arg(short, long)]
        key: String,
        /// Most recent write first
        #[arg(long)]
        newest_first: bool,
        /// One JSON object per line instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Re-index blocks the history index is missing
    Recover {
        #[arg(short, long)]
        ledger: String,
    },
    /// List the most recent blocks in the block store
    Blocks {
        #[arg(short, long)]
        ledger: String,
        #[arg(long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
        limit: u64,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => LedgerConfig::from_file(path)?,
        None => LedgerConfig::with_fs_path(&cli.data_dir),
    };
    info!("Using ledger data in {}", config.fs_path.display());

    let history = HistoryDbProvider::open(config.history_path(), config.history_config())
        .context("opening history database")?;
    let blocks = BlockStoreProvider::open(config.block_store_path(), config.block_store.clone())
        .context("opening block store")?;

    match cli.command {
        Commands::Ledgers => {
            let mut ledgers = history.list_ledgers();
            ledgers.extend(blocks.list_ledgers());
            ledgers.sort();
            ledgers.dedup();

            let state = if history.config().is_enabled() { "enabled" } else { "disabled" };
            println!("🗂️  {} ledgers (history {})", ledgers.len(), state);
            for ledger in &ledgers {
                let db = history.get_db_handle(ledger)?;
                println!(
                    "   {:<20} savepoint {}",
                    db.ledger_id(),
                    db.get_block_num_from_savepoint()?
                );
            }
        }
        Commands::Savepoint { ledger } => {
            let db = history.get_db_handle(&ledger)?;
            let savepoint = db.get_block_num_from_savepoint()?;
            let tip = blocks.open_block_store(&ledger)?.last_block_number()?;
            println!("📌 Ledger {}", ledger);
            println!("   History savepoint: block {}", savepoint);
            match tip {
                Some(tip) => println!("   Block store tip:   block {}", tip),
                None => println!("   Block store tip:   (empty)"),
            }
            println!("   Index entries:     {}", db.entry_count()?);
            let stats = history.stats()?;
            println!(
                "   History database:  {} ledgers, {} bytes on disk",
                stats.trees, stats.size_on_disk
            );
        }
        Commands::History {
            ledger,
            namespace,
            key,
            newest_first,
            json,
        } => {
            let db = history.get_db_handle(&ledger)?;
            let block_store: Arc<dyn BlockStore> = blocks.open_block_store(&ledger)?;
            let executor = db.new_history_query_executor(block_store);
            let scanner = executor.get_history_for_key(&namespace, &key)?;

            let records: Vec<KeyModification> = if newest_first {
                scanner.newest_first()?
            } else {
                scanner.collect::<Result<_, _>>()?
            };

            if json {
                for record in &records {
                    println!("{}", serde_json::to_string(record)?);
                }
            } else {
                print_history(&namespace, &key, &records);
            }
        }
        Commands::Recover { ledger } => {
            let db = history.get_db_handle(&ledger)?;
            let block_store = blocks.open_block_store(&ledger)?;
            let recovered = db.recover_from(block_store.as_ref())?;
            println!(
                "🔧 Re-indexed {} blocks, savepoint now at block {}",
                recovered,
                db.get_block_num_from_savepoint()?
            );
        }
        Commands::Blocks { ledger, limit } => {
            let block_store = blocks.open_block_store(&ledger)?;
            match block_store.last_block_number()? {
                Some(tip) => {
                    println!(
                        "📦 Recent blocks of ledger {} ({} stored)",
                        block_store.ledger_id(),
                        block_store.height()
                    );
                    let first = tip.saturating_sub(limit.saturating_sub(1));
                    for number in (first..=tip).rev() {
                        match block_store.retrieve_block_by_number(number) {
                            Ok(block) => println!(
                                "   #{:<8} {} txs  hash {}",
                                number,
                                block.transactions.len(),
                                block.hash()
                            ),
                            Err(e) => println!("   #{:<8} unreadable: {}", number, e),
                        }
                    }
                }
                None => println!("📦 Ledger {} has no blocks", ledger),
            }
        }
    }

    history.close()?;
    blocks.flush()?;
    Ok(())
}

fn print_history(namespace: &str, key: &str, records: &[KeyModification]) {
    println!("📜 History of {}:{} ({} writes)", namespace, key, records.len());
    for record in records {
        let value = if record.is_delete {
            "<deleted>".to_string()
        } else {
            match std::str::from_utf8(&record.value) {
                Ok(text) => text.to_string(),
                Err(_) => hex::encode(&record.value),
            }
        };
        println!(
            "   {}  tx {}  {}",
            record.timestamp.to_rfc3339(),
            record.tx_id,
            value
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let parsed =
            Cli::try_parse_from(["kvhistory", "blocks", "--ledger", "ch1", "--limit", "0"]);
        assert!(parsed.is_err());

        let cli = Cli::try_parse_from(["kvhistory", "blocks", "--ledger", "ch1"]).unwrap();
        assert!(matches!(cli.command, Commands::Blocks { limit: 10, .. }));

        let cli = Cli::try_parse_from(["kvhistory", "-d", "/tmp/ledgers", "ledgers"]).unwrap();
        assert!(matches!(cli.command, Commands::Ledgers));
        assert_eq!(cli.data_dir, "/tmp/ledgers");
    }
}
