use anyhow::{Context, Result};
use clap::Parser;
use lastore::{build_index_file, store_paths, PileIndex};

/// Builds the pile index of one or more overlap stores
#[derive(Parser)]
struct Args {
    /// Overlap stores to index (`name` or `name.las`)
    #[clap(required = true)]
    sources: Vec<String>,

    /// Report progress
    #[clap(short, long)]
    verbose: bool,

    /// Print existing indices instead of building them
    #[clap(short, long)]
    print: bool,

    /// Read window in MiB
    #[clap(long, default_value_t = 16)]
    buffer_mb: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    for source in &args.sources {
        let (las_path, idx_path) = store_paths(source);
        if args.print {
            let index = PileIndex::from_path(&idx_path, &las_path)
                .with_context(|| format!("loading index of {source}"))?;
            index.pprint();
        } else {
            build_index_file(&las_path, &idx_path, args.buffer_mb << 20)
                .with_context(|| format!("indexing {source}"))?;
        }
    }
    Ok(())
}
