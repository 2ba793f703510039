//! Scan and dump engine
//!
//! A dump makes two passes over a store. The first skips every trace and only
//! gathers statistics over the selected records, so the summary can be printed ahead
//! of the records. The second rereads the store from the top and renders each
//! selected record. Both passes decide selection through the same [`Selector`], so
//! they always agree on which records are selected.
//!
//! Output format:
//!
//! ```text
//! + P <selected records>
//! % P <max selected records of one a-read>
//! + T <total trace points>
//! % T <max trace points of one a-read>
//! @ T <max trace points of one record>
//! P <a-read> <b-read> <c|n>
//! C <a_begin> <a_end> <b_begin> <b_end>
//! D <diffs>
//! T <trace points>
//!  <diff> <position>
//! ```

use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;

use log::warn;

use crate::db::ReadDatabase;
use crate::error::{DatabaseError, Result};
use crate::index::{IndexStats, PileTally};
use crate::range::{RangeCursor, ReadRanges};
use crate::reader::{StreamReader, DEFAULT_BUFFER_CAPACITY};
use crate::record::OverlapRecord;

/// Options of a dump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpConfig {
    /// Keep only true overlaps (requires a read database)
    pub overlaps_only: bool,
    /// Render the `C` line
    pub coordinates: bool,
    /// Render the `D` line
    pub diffs: bool,
    /// Render the `T` line and the trace
    pub trace: bool,
    /// Size of the read window
    pub buffer_capacity: usize,
}
impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            overlaps_only: false,
            coordinates: false,
            diffs: false,
            trace: false,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}
impl DumpConfig {
    /// Creates a configuration that lists every selected record as a `P` line only
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps only true overlaps
    ///
    /// A dumper built with this option needs a [`TrueOverlapFilter`].
    #[must_use]
    pub fn overlaps_only(mut self, overlaps_only: bool) -> Self {
        self.overlaps_only = overlaps_only;
        self
    }
    /// Renders the `C` line with the alignment extent on both reads
    #[must_use]
    pub fn coordinates(mut self, coordinates: bool) -> Self {
        self.coordinates = coordinates;
        self
    }
    /// Renders the `D` line with the number of differences
    #[must_use]
    pub fn diffs(mut self, diffs: bool) -> Self {
        self.diffs = diffs;
        self
    }
    /// Enables the trace display, which also turns on coordinates
    ///
    /// ```
    /// use lastore::DumpConfig;
    ///
    /// let config = DumpConfig::new().trace(true);
    /// assert!(config.coordinates);
    /// ```
    #[must_use]
    pub fn trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self.coordinates |= trace;
        self
    }
    /// Sets the size of the read window in bytes
    ///
    /// # Arguments
    ///
    /// * `buffer_capacity` - Initial window size; the window still grows when a single
    ///   record needs more room
    #[must_use]
    pub fn buffer_capacity(mut self, buffer_capacity: usize) -> Self {
        self.buffer_capacity = buffer_capacity;
        self
    }
}

/// Accepts only alignments that reach an end of a read at both extremities
///
/// The start must touch position 0 of the a-read or of the b-read, and independently
/// the end must touch the full length of the a-read or of the b-read.
#[derive(Debug, Clone)]
pub struct TrueOverlapFilter<D: ReadDatabase> {
    a_reads: D,
    b_reads: D,
}
impl<D: ReadDatabase> TrueOverlapFilter<D> {
    /// Creates a filter looking up a-reads and b-reads in their own databases
    ///
    /// # Arguments
    ///
    /// * `a_reads` - Database giving the length of each a-read
    /// * `b_reads` - Database giving the length of each b-read
    pub fn new(a_reads: D, b_reads: D) -> Self {
        Self { a_reads, b_reads }
    }

    /// Evaluates the filter on one record
    ///
    /// # Returns
    ///
    /// `true` if the alignment touches a read start and a read end
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::ReadOutOfRange`] if either read is not in its database.
    pub fn accepts(&self, record: &OverlapRecord) -> Result<bool> {
        if !record.touches_start() {
            return Ok(false);
        }
        let a_len = self.a_reads.read_length(record.a_id as usize)?;
        let b_len = self.b_reads.read_length(record.b_id as usize)?;
        Ok(record.touches_end(a_len, b_len))
    }
}
impl<D: ReadDatabase + Clone> TrueOverlapFilter<D> {
    /// Creates a filter using one database for both reads
    pub fn single(reads: D) -> Self {
        Self::new(reads.clone(), reads)
    }
}

/// Selection predicate shared by both passes of a dump
pub struct Selector<'a, D: ReadDatabase> {
    cursor: RangeCursor<'a>,
    filter: Option<&'a TrueOverlapFilter<D>>,
}
impl<'a, D: ReadDatabase> Selector<'a, D> {
    /// Creates a selector positioned before the first record of a store
    ///
    /// # Arguments
    ///
    /// * `ranges` - Selected a-reads (1-based)
    /// * `filter` - True-overlap filter applied to records inside the ranges, if any
    #[must_use]
    pub fn new(ranges: &'a ReadRanges, filter: Option<&'a TrueOverlapFilter<D>>) -> Self {
        Self {
            cursor: ranges.cursor(),
            filter,
        }
    }

    /// Decides whether a record is selected
    ///
    /// Records must be presented in store order.
    ///
    /// # Errors
    ///
    /// Propagates lookup failures of the filter's databases.
    pub fn select(&mut self, record: &OverlapRecord) -> Result<bool> {
        if !self.cursor.contains(record.a_id as u64 + 1) {
            return Ok(false);
        }
        match self.filter {
            Some(filter) => filter.accepts(record),
            None => Ok(true),
        }
    }
}

/// Statistics of the selected records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpStats {
    /// Number of selected records
    pub selected: i64,
    /// Pile aggregates computed over the selected records only
    pub piles: IndexStats,
}
impl DumpStats {
    /// Writes the five summary lines (`+ P`, `% P`, `+ T`, `% T`, `@ T`)
    ///
    /// # Errors
    ///
    /// Returns an I/O error if `out` cannot be written.
    pub fn write_summary<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "+ P {}", self.selected)?;
        writeln!(out, "% P {}", self.piles.max_overlaps_per_read)?;
        writeln!(out, "+ T {}", self.piles.total_trace_points)?;
        writeln!(out, "% T {}", self.piles.max_trace_points_per_read)?;
        writeln!(out, "@ T {}", self.piles.max_trace_points_per_record)?;
        Ok(())
    }
}

/// Two-pass dump over one store
pub struct LasDumper<'a, R: Read + Seek, D: ReadDatabase> {
    reader: StreamReader<R>,
    ranges: &'a ReadRanges,
    filter: Option<TrueOverlapFilter<D>>,
    config: DumpConfig,
    trace: Vec<u16>,
}

impl<'a, D: ReadDatabase> LasDumper<'a, File, D> {
    /// Opens the store at `path` for dumping
    ///
    /// # Arguments
    ///
    /// * `path` - Path of the `.las` store
    /// * `ranges` - Selected a-reads
    /// * `filter` - True-overlap filter, required when `config.overlaps_only` is set
    /// * `config` - Display options and read window size
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::Open`](crate::ReadError::Open) if the store cannot be
    /// opened, a header error if it does not start with a valid header, and
    /// [`DatabaseError::Missing`] as for [`new`](Self::new).
    pub fn open<P: AsRef<Path>>(
        path: P,
        ranges: &'a ReadRanges,
        filter: Option<TrueOverlapFilter<D>>,
        config: DumpConfig,
    ) -> Result<Self> {
        let reader = StreamReader::from_path(path, config.buffer_capacity)?;
        Self::new(reader, ranges, filter, config)
    }
}

impl<'a, R: Read + Seek, D: ReadDatabase> LasDumper<'a, R, D> {
    /// Creates a dumper
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Missing`] if true overlaps are requested without a
    /// filter to decide them.
    pub fn new(
        reader: StreamReader<R>,
        ranges: &'a ReadRanges,
        filter: Option<TrueOverlapFilter<D>>,
        config: DumpConfig,
    ) -> Result<Self> {
        if config.overlaps_only && filter.is_none() {
            return Err(DatabaseError::Missing.into());
        }
        Ok(Self {
            reader,
            ranges,
            filter: filter.filter(|_| config.overlaps_only),
            config,
            trace: Vec::new(),
        })
    }

    /// First pass: statistics over the selected records, traces skipped
    ///
    /// Starts from the first record whatever the reader's position. Data after the
    /// last declared record is logged and otherwise ignored.
    ///
    /// # Errors
    ///
    /// Any read error of the store, or a failed database lookup of the filter.
    pub fn scan(&mut self) -> Result<DumpStats> {
        self.reader.rewind()?;
        let mut selector = Selector::new(self.ranges, self.filter.as_ref());
        let mut tally = PileTally::default();
        let mut selected = 0;
        while let Some(record) = self.reader.next_record_seek()? {
            if !selector.select(&record)? {
                continue;
            }
            selected += 1;
            tally.observe(record.a_id, i64::from(record.path.trace_len));
        }
        if !self.reader.is_exhausted()? {
            warn!(
                "ignoring data after the last declared record at byte {}",
                self.reader.offset()
            );
        }
        Ok(DumpStats {
            selected,
            piles: tally.finish(),
        })
    }

    /// Second pass: renders every selected record
    ///
    /// # Returns
    ///
    /// The number of records rendered, which equals the count from [`scan`](Self::scan)
    ///
    /// # Errors
    ///
    /// Any read error of the store, a failed database lookup, or an I/O error on `out`.
    pub fn dump<W: Write>(&mut self, out: &mut W) -> Result<i64> {
        self.reader.rewind()?;
        let mut selector = Selector::new(self.ranges, self.filter.as_ref());
        let mut ibuf = itoa::Buffer::new();
        let mut rendered = 0;
        while let Some(record) = self.reader.read_fixed()? {
            if !selector.select(&record)? {
                self.reader.seek_trace()?;
                continue;
            }
            if self.config.trace {
                self.reader.read_trace(&mut self.trace)?;
            } else {
                self.reader.seek_trace()?;
            }
            render_record(out, &record, &self.trace, &self.config, &mut ibuf)?;
            rendered += 1;
        }
        Ok(rendered)
    }

    /// Runs both passes, writing the summary followed by the selected records
    ///
    /// # Returns
    ///
    /// The statistics printed in the summary
    ///
    /// # Errors
    ///
    /// See [`scan`](Self::scan) and [`dump`](Self::dump).
    pub fn run<W: Write>(&mut self, out: &mut W) -> Result<DumpStats> {
        let stats = self.scan()?;
        stats.write_summary(out)?;
        let rendered = self.dump(out)?;
        debug_assert_eq!(
            rendered, stats.selected,
            "statistics and display passes selected different records"
        );
        out.flush()?;
        Ok(stats)
    }
}

fn render_record<W: Write>(
    out: &mut W,
    record: &OverlapRecord,
    trace: &[u16],
    config: &DumpConfig,
    ibuf: &mut itoa::Buffer,
) -> Result<()> {
    out.write_all(b"P ")?;
    out.write_all(ibuf.format(i64::from(record.a_id) + 1).as_bytes())?;
    out.write_all(b" ")?;
    out.write_all(ibuf.format(i64::from(record.b_id) + 1).as_bytes())?;
    out.write_all(if record.is_complement() { b" c\n" } else { b" n\n" })?;

    let path = &record.path;
    if config.coordinates || config.trace {
        writeln!(
            out,
            "C {} {} {} {}",
            path.a_begin, path.a_end, path.b_begin, path.b_end
        )?;
    }
    if config.diffs {
        writeln!(out, "D {}", path.diffs)?;
    }
    if config.trace {
        writeln!(out, "T {}", path.trace_len >> 1)?;
        for pair in trace.chunks_exact(2) {
            writeln!(out, " {:>3} {:>3}", pair[0], pair[1])?;
        }
    }
    Ok(())
}
