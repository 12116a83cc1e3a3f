use std::sync::Arc;
use anyhow::{Context, Result};
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;

use stratusdb::common::types::BUFFER_POOL_SIZE;
use stratusdb::storage::buffer::{BufferPoolManager, ParallelBufferPool};
use stratusdb::storage::disk::DiskManager;

const HISTORY_FILE: &str = ".stratusdb_history";

#[derive(Parser)]
#[command(author, version, about = "StratusDB shell - echoes input lines")]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "database.db")]
    db_path: String,

    /// Frames per buffer pool instance
    #[arg(short, long, default_value_t = BUFFER_POOL_SIZE)]
    pool_size: usize,

    /// Number of buffer pool instances
    #[arg(short, long, default_value_t = 4)]
    instances: usize,
}

fn run_shell(buffer_pool: &ParallelBufferPool) -> Result<()> {
    println!(
        "StratusDB shell ({} instances x {} frames). Type 'exit' to quit.",
        buffer_pool.num_instances(),
        buffer_pool.pool_size() / buffer_pool.num_instances()
    );

    let mut rl = Editor::<(), DefaultHistory>::new()?;
    let _ = rl.load_history(HISTORY_FILE);

    loop {
        match rl.readline("stratusdb> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);
                match line.to_lowercase().as_str() {
                    "exit" | "quit" => break,
                    _ => println!("{}", line),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {}", err);
                break;
            }
        }
    }

    buffer_pool.flush_all_pages()?;
    let _ = rl.save_history(HISTORY_FILE);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let disk_manager = Arc::new(
        DiskManager::new(&cli.db_path)
            .with_context(|| format!("failed to open database at {}", cli.db_path))?,
    );
    let buffer_pool = ParallelBufferPool::new(cli.instances, cli.pool_size, disk_manager);

    run_shell(&buffer_pool)
}
