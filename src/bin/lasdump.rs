use std::io::{self, BufWriter};

use anyhow::{bail, Context, Result};
use clap::Parser;
use lastore::{
    is_range_token, store_paths, DumpConfig, LasDumper, LengthTable, ReadDatabase, ReadRanges,
    TrueOverlapFilter,
};

/// Dumps the overlaps of a store, optionally restricted to a set of a-reads
///
/// Reads are selected with 1-based ids and ranges (`7`, `10-20`, `100-$`, `$`), or
/// with a single file of ids. Without a selection every record is dumped.
#[derive(Parser)]
struct Args {
    /// Overlap store (`name` or `name.las`)
    #[clap(required = true)]
    las: String,

    /// Read ids and ranges, or one file of read ids
    reads: Vec<String>,

    /// Only dump true overlaps (needs --db)
    #[clap(short = 'o', long)]
    overlaps_only: bool,

    /// Show alignment coordinates
    #[clap(short = 'c', long)]
    coordinates: bool,

    /// Show the number of differences
    #[clap(short = 'd', long)]
    diffs: bool,

    /// Show the trace (implies -c)
    #[clap(short = 't', long)]
    trace: bool,

    /// Read lengths of the a-reads, one per line
    #[clap(long)]
    db: Option<String>,

    /// Read lengths of the b-reads when they come from another database
    #[clap(long, requires = "db")]
    db2: Option<String>,

    /// Minimum length of a read kept when trimming the databases
    #[clap(long, default_value_t = 0)]
    cutoff: i32,

    /// Read window in MiB
    #[clap(long, default_value_t = 16)]
    buffer_mb: usize,

    /// Report progress
    #[clap(short, long)]
    verbose: bool,
}

fn open_db(path: &str, cutoff: i32) -> Result<LengthTable> {
    let mut db = LengthTable::open(path)
        .with_context(|| format!("opening read database {path}"))?
        .with_cutoff(cutoff);
    db.trim();
    Ok(db)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if args.overlaps_only && args.db.is_none() {
        bail!("-o needs a read database (--db)");
    }
    let db1 = args
        .db
        .as_deref()
        .map(|path| open_db(path, args.cutoff))
        .transpose()?;
    let db2 = args
        .db2
        .as_deref()
        .map(|path| open_db(path, args.cutoff))
        .transpose()?;

    let last_read = db1.as_ref().map(|db| db.num_reads() as u64);
    let ranges = match args.reads.as_slice() {
        [path] if !is_range_token(path) => ReadRanges::from_id_file(path)?,
        tokens => ReadRanges::from_tokens(tokens, last_read)?,
    };

    let filter = match (&db1, &db2) {
        (Some(a_reads), Some(b_reads)) => Some(TrueOverlapFilter::new(a_reads, b_reads)),
        (Some(reads), None) => Some(TrueOverlapFilter::single(reads)),
        _ => None,
    };
    let config = DumpConfig::new()
        .overlaps_only(args.overlaps_only)
        .coordinates(args.coordinates)
        .diffs(args.diffs)
        .trace(args.trace)
        .buffer_capacity(args.buffer_mb << 20);

    let (las_path, _) = store_paths(&args.las);
    let mut dumper = LasDumper::open(&las_path, &ranges, filter, config)
        .with_context(|| format!("opening {}", las_path.display()))?;
    let mut out = BufWriter::new(io::stdout().lock());
    dumper.run(&mut out)?;
    Ok(())
}
