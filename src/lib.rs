//! Streaming access to `.las` overlap stores
//!
//! A store is a header followed by overlap records sorted by a-read. This crate
//! reads and writes stores ([`StreamReader`], [`LasWriter`]), builds and loads the
//! pile index kept next to a store ([`build_index_file`], [`PileIndex`]), and dumps
//! a store restricted to a selection of a-reads ([`ReadRanges`], [`LasDumper`]).

mod db;
mod dump;
mod error;
mod header;
mod index;
mod range;
mod reader;
mod record;
mod writer;

pub use db::{LengthTable, ReadDatabase};
pub use dump::{DumpConfig, DumpStats, LasDumper, Selector, TrueOverlapFilter};
pub use error::{
    DatabaseError, Error, HeaderError, IndexError, RangeError, ReadError, Result, WriteError,
};
pub use header::{StoreHeader, TraceWidth, SIZE_HEADER, TRACE_XOVR};
pub use index::{
    build_index, build_index_file, store_paths, IndexStats, PileIndex, SIZE_INDEX_HEADER,
};
pub use range::{is_range_token, parse_token, RangeCursor, ReadRanges, LAST_READ_SYMBOL};
pub use reader::{StreamReader, DEFAULT_BUFFER_CAPACITY};
pub use record::{decode_trace, encode_trace, AlignmentPath, OverlapRecord, COMP_FLAG, SIZE_RECORD};
pub use writer::{LasWriter, LasWriterBuilder, DEFAULT_TRACE_SPACING};
