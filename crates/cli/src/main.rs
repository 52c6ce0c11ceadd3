//! # txnutil — transaction log maintenance tool
//!
//! Standalone companion to the storage engine: inspects and cleans the
//! transaction logs of a table directory without starting the engine.
//!
//! ```text
//! txnutil list      <dir>   List transaction log files
//! txnutil list-temp <dir>   List temporary files (owned by an incomplete
//!                           or pending-cleanup transaction)
//! txnutil cleanup   <dir>   Replay residual logs and remove leftovers,
//!                           exactly as engine startup would
//! ```
//!
//! Logging goes to stderr and is controlled with `RUST_LOG` (default: warn).

use std::path::PathBuf;

use anyhow::{bail, Result};

const USAGE: &str = "usage: txnutil <list|list-temp|cleanup> <directory>";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, dir) = match args.as_slice() {
        [command, dir] => (command.as_str(), PathBuf::from(dir)),
        _ => bail!(USAGE),
    };

    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }

    match command {
        "list" => print_sorted(txnlog::log_files(&dir)),
        "list-temp" => print_sorted(txnlog::temporary_files(&dir)),
        "cleanup" => {
            txnlog::remove_unfinished_leftovers(&dir);
            txnlog::wait_for_deletions();
            println!("cleanup complete: {}", dir.display());
        }
        other => bail!("unknown command '{other}'\n{USAGE}"),
    }

    Ok(())
}

fn print_sorted(files: std::collections::HashSet<PathBuf>) {
    let mut files: Vec<_> = files.into_iter().collect();
    files.sort();
    for file in files {
        println!("{}", file.display());
    }
}
