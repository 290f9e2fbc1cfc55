//! Tagcache - inspect and manage the cached tag group lookup response
//!
//! Opens the persistent lookup cache (in the XDG cache directory unless
//! `--dir` is given) and runs a single command against it.

use std::io;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tagcache::cache::{FileStore, LookupResponseCache};
use tagcache::cli::{self, Cli};

/// Installs a stderr log subscriber filtered by `RUST_LOG` (default `warn`)
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli = Cli::parse();

    let store = match &cli.dir {
        Some(dir) => FileStore::with_dir(dir.clone()),
        None => FileStore::new().ok_or("Could not determine a cache directory; pass --dir")?,
    };
    tracing::debug!(dir = %store.dir().display(), "Opening lookup cache");

    let cache: LookupResponseCache = LookupResponseCache::with_store(Arc::new(store));
    cli::run(&cli.command, &cache, &mut io::stdout().lock())?;

    Ok(())
}
