//! Pile index
//!
//! A sorted store groups its records into piles, one per distinct a-read. The index
//! file next to a store records four aggregate statistics followed by the byte offset
//! of every pile and a terminal offset equal to the size of the store:
//!
//! | Offset | Size (bytes) | Name                        | Type  |
//! | ------ | ------------ | --------------------------- | ----- |
//! | 0      | 8            | max overlaps per read       | int64 |
//! | 8      | 8            | total trace points          | int64 |
//! | 16     | 8            | max trace points per read   | int64 |
//! | 24     | 8            | max trace points per record | int64 |
//! | 32     | 8 * (n + 1)  | pile offsets                | int64 |

use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};
use memmap2::Mmap;

use crate::error::{IndexError, ReadError, Result};
use crate::header::SIZE_HEADER;
use crate::reader::StreamReader;

/// Size of the aggregate block at the start of an index file
pub const SIZE_INDEX_HEADER: usize = 32;

/// Aggregate statistics over the piles of a store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Largest number of records sharing one a-read
    pub max_overlaps_per_read: i64,
    /// Sum of `trace_len` over all records
    pub total_trace_points: i64,
    /// Largest sum of `trace_len` over the records of one a-read
    pub max_trace_points_per_read: i64,
    /// Largest `trace_len` of a single record
    pub max_trace_points_per_record: i64,
}
impl IndexStats {
    /// Decodes the aggregate block at the start of an index file
    ///
    /// # Arguments
    ///
    /// * `buffer` - The first [`SIZE_INDEX_HEADER`] bytes of the index
    #[must_use]
    pub fn from_bytes(buffer: &[u8; SIZE_INDEX_HEADER]) -> Self {
        Self {
            max_overlaps_per_read: LittleEndian::read_i64(&buffer[0..8]),
            total_trace_points: LittleEndian::read_i64(&buffer[8..16]),
            max_trace_points_per_read: LittleEndian::read_i64(&buffer[16..24]),
            max_trace_points_per_record: LittleEndian::read_i64(&buffer[24..32]),
        }
    }

    /// Serializes the aggregates into their on-disk representation
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SIZE_INDEX_HEADER] {
        let mut buffer = [0u8; SIZE_INDEX_HEADER];
        LittleEndian::write_i64(&mut buffer[0..8], self.max_overlaps_per_read);
        LittleEndian::write_i64(&mut buffer[8..16], self.total_trace_points);
        LittleEndian::write_i64(&mut buffer[16..24], self.max_trace_points_per_read);
        LittleEndian::write_i64(&mut buffer[24..32], self.max_trace_points_per_record);
        buffer
    }

    /// Writes the aggregate block to a writer
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the writer fails.
    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }
}

/// Running per-pile counters
///
/// Records are observed in store order; a change of a-read closes the current pile.
#[derive(Debug, Default)]
pub(crate) struct PileTally {
    current: Option<i32>,
    overlaps: i64,
    trace_points: i64,
    stats: IndexStats,
}
impl PileTally {
    /// Counts one record, returning true if it opens a new pile
    pub(crate) fn observe(&mut self, a_id: i32, trace_len: i64) -> bool {
        let opens = self.current != Some(a_id);
        if opens {
            self.close_pile();
            self.current = Some(a_id);
        }
        self.stats.total_trace_points += trace_len;
        self.stats.max_trace_points_per_record =
            self.stats.max_trace_points_per_record.max(trace_len);
        self.overlaps += 1;
        self.trace_points += trace_len;
        opens
    }

    /// The a-read of the pile being counted
    pub(crate) fn current(&self) -> Option<i32> {
        self.current
    }

    fn close_pile(&mut self) {
        self.stats.max_overlaps_per_read = self.stats.max_overlaps_per_read.max(self.overlaps);
        self.stats.max_trace_points_per_read =
            self.stats.max_trace_points_per_read.max(self.trace_points);
        self.overlaps = 0;
        self.trace_points = 0;
    }

    /// Closes the last pile and returns the aggregates
    pub(crate) fn finish(mut self) -> IndexStats {
        self.close_pile();
        self.stats
    }
}

/// Builds the index of a store in one forward pass
///
/// Space for the aggregates is reserved at the writer's current position, pile offsets
/// are streamed out as piles are found, and the aggregates are written over the
/// reserved space at the end. On error the destination is left in an undefined state.
///
/// # Errors
///
/// * Any read error of the store, notably [`ReadError::HeaderMismatch`] if fewer
///   records than declared can be read and [`ReadError::TrailingBytes`] if more
///   data follows them
/// * I/O errors writing the destination
pub fn build_index<R: Read, W: Write + Seek>(
    reader: &mut StreamReader<R>,
    writer: &mut W,
) -> Result<IndexStats> {
    let start = writer.stream_position()?;
    writer.write_all(&[0u8; SIZE_INDEX_HEADER])?;

    let mut tally = PileTally::default();
    let mut n_piles = 0usize;
    loop {
        let record_start = reader.offset();
        let Some(record) = reader.read_fixed()? else {
            break;
        };
        let previous = tally.current();
        if tally.observe(record.a_id, i64::from(record.path.trace_len)) {
            if previous.is_some_and(|a_id| a_id > record.a_id) {
                warn!(
                    "a-read {} follows a-read {} at byte {record_start}: store is not sorted",
                    record.a_id,
                    previous.unwrap_or_default()
                );
            }
            writer.write_all(&(record_start as i64).to_le_bytes())?;
            n_piles += 1;
        }
        reader.skip_trace()?;
    }
    if !reader.is_exhausted()? {
        return Err(ReadError::TrailingBytes(reader.offset()).into());
    }
    writer.write_all(&(reader.offset() as i64).to_le_bytes())?;
    debug!("indexed {n_piles} piles");

    let stats = tally.finish();
    let end = writer.stream_position()?;
    writer.seek(SeekFrom::Start(start))?;
    stats.write_bytes(writer)?;
    writer.seek(SeekFrom::Start(end))?;
    writer.flush()?;
    Ok(stats)
}

/// Resolves a store argument to its `.las` path and its sibling index path
///
/// `dir/name` and `dir/name.las` both give `dir/name.las` and `dir/.name.las.idx`.
#[must_use]
pub fn store_paths<P: AsRef<Path>>(source: P) -> (PathBuf, PathBuf) {
    let source = source.as_ref();
    let name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let root = name.strip_suffix(".las").unwrap_or(&name);
    let dir = source.parent().unwrap_or_else(|| Path::new(""));
    (
        dir.join(format!("{root}.las")),
        dir.join(format!(".{root}.las.idx")),
    )
}

/// Builds the index of the store at `las_path` and publishes it at `idx_path`
///
/// The index is written to `<idx_path>.tmp` and renamed into place on success, so an
/// existing index is only ever replaced by a complete one. The temporary file is
/// removed whenever a step fails.
///
/// # Arguments
///
/// * `las_path` - Path of the store
/// * `idx_path` - Destination of the index, see [`store_paths`]
/// * `buffer_capacity` - Initial size of the read window in bytes
///
/// # Returns
///
/// The aggregates written to the index
///
/// # Errors
///
/// Returns [`ReadError::Open`] if the store cannot be opened, any error of
/// [`build_index`], and I/O errors creating or renaming the index.
pub fn build_index_file<P: AsRef<Path>, Q: AsRef<Path>>(
    las_path: P,
    idx_path: Q,
    buffer_capacity: usize,
) -> Result<IndexStats> {
    let las_path = las_path.as_ref();
    let idx_path = idx_path.as_ref();
    let mut reader = StreamReader::from_path(las_path, buffer_capacity)?;
    info!(
        "Indexing {}: {} records",
        las_path.display(),
        reader.header().record_count
    );

    let mut tmp_path = idx_path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);
    let mut writer = File::create(&tmp_path).map(BufWriter::new)?;
    let published = build_index(&mut reader, &mut writer).and_then(|stats| {
        writer
            .into_inner()
            .map_err(std::io::IntoInnerError::into_error)?;
        fs::rename(&tmp_path, idx_path)?;
        Ok(stats)
    });
    let stats = match published {
        Ok(stats) => stats,
        Err(e) => {
            fs::remove_file(&tmp_path).ok();
            return Err(e);
        }
    };
    info!("{} trace points", stats.total_trace_points);
    Ok(stats)
}

/// A loaded pile index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PileIndex {
    /// Aggregate statistics of the store
    stats: IndexStats,

    /// Pile offsets followed by the terminal offset
    offsets: Vec<i64>,
}
impl PileIndex {
    /// Decodes an index from its on-disk bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is not an aggregate block followed by at least
    /// one offset, or if the offsets decrease.
    pub fn from_bytes(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < SIZE_INDEX_HEADER + 8 || (buffer.len() - SIZE_INDEX_HEADER) % 8 != 0 {
            return Err(IndexError::InvalidSize(buffer.len()).into());
        }
        let mut header = [0u8; SIZE_INDEX_HEADER];
        header.copy_from_slice(&buffer[..SIZE_INDEX_HEADER]);
        let body = &buffer[SIZE_INDEX_HEADER..];
        let mut offsets = vec![0i64; body.len() / 8];
        LittleEndian::read_i64_into(body, &mut offsets);
        if let Some(pos) = offsets.windows(2).position(|w| w[0] > w[1]) {
            return Err(IndexError::NonMonotonicOffsets(pos + 1).into());
        }
        Ok(Self {
            stats: IndexStats::from_bytes(&header),
            offsets,
        })
    }

    /// Loads the index at `idx_path` and checks it against the store at `las_path`
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ByteSizeMismatch`] if the terminal offset is not the
    /// current size of the store.
    pub fn from_path<P: AsRef<Path>, Q: AsRef<Path>>(idx_path: P, las_path: Q) -> Result<Self> {
        let idx_path = idx_path.as_ref();
        let las_path = las_path.as_ref();
        let file = File::open(idx_path).map_err(|source| ReadError::Open {
            path: idx_path.display().to_string(),
            source,
        })?;
        let store_size = fs::metadata(las_path)
            .map_err(|source| ReadError::Open {
                path: las_path.display().to_string(),
                source,
            })?
            .len();

        // Safety: the index is treated as immutable once written
        let mmap = unsafe { Mmap::map(&file)? };
        let index = Self::from_bytes(&mmap)?;
        let terminal = index.terminal_offset();
        if terminal != store_size {
            return Err(IndexError::ByteSizeMismatch(store_size, terminal).into());
        }
        Ok(index)
    }

    /// Loads the index of a store named as on the command line (`dir/name[.las]`)
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::MissingUpstreamFile`] if the store does not exist, and any
    /// error of [`from_path`](Self::from_path).
    pub fn for_store<P: AsRef<Path>>(source: P) -> Result<Self> {
        let (las_path, idx_path) = store_paths(source);
        if !las_path.exists() {
            return Err(IndexError::MissingUpstreamFile(idx_path.display().to_string()).into());
        }
        Self::from_path(idx_path, las_path)
    }

    /// Aggregate statistics of the store
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    /// Raw offset table, terminal offset included
    #[must_use]
    pub fn offsets(&self) -> &[i64] {
        &self.offsets
    }

    /// Number of piles in the store
    #[must_use]
    pub fn n_piles(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Byte size of the store the index was built for
    #[must_use]
    pub fn terminal_offset(&self) -> u64 {
        self.offsets.last().copied().unwrap_or_default() as u64
    }

    /// Byte range of each pile in the store
    pub fn piles(&self) -> impl Iterator<Item = Range<u64>> + '_ {
        self.offsets
            .windows(2)
            .map(|w| (w[0] as u64)..(w[1] as u64))
    }

    /// Returns true if the first pile starts directly after the store header
    #[must_use]
    pub fn starts_after_header(&self) -> bool {
        self.offsets.first() == Some(&(SIZE_HEADER as i64))
    }

    /// Prints the aggregates and one `pile<TAB>offset<TAB>size` line per pile to stdout
    pub fn pprint(&self) {
        println!("max overlaps per read\t{}", self.stats.max_overlaps_per_read);
        println!("total trace points\t{}", self.stats.total_trace_points);
        println!(
            "max trace points per read\t{}",
            self.stats.max_trace_points_per_read
        );
        println!(
            "max trace points per record\t{}",
            self.stats.max_trace_points_per_record
        );
        self.piles().enumerate().for_each(|(i, range)| {
            println!("{i}\t{}\t{}", range.start, range.end - range.start);
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::Cursor;

    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::*;
    use crate::error::Error;
    use crate::record::SIZE_RECORD;
    use crate::testing::{overlap, random_store, store_bytes};

    fn index_bytes(store: Vec<u8>) -> Result<(IndexStats, Vec<u8>)> {
        let mut reader = StreamReader::with_capacity(Cursor::new(store), 128)?;
        let mut out = Cursor::new(Vec::new());
        let stats = build_index(&mut reader, &mut out)?;
        Ok((stats, out.into_inner()))
    }

    #[test]
    fn test_three_record_scenario() -> Result<()> {
        let records = vec![
            (overlap(0, 1, 0), vec![1u16; 4]),
            (overlap(0, 2, 0), vec![1u16; 2]),
            (overlap(2, 0, 0), vec![1u16; 6]),
        ];
        let store = store_bytes(100, &records)?;
        let store_len = store.len() as i64;
        let (stats, bytes) = index_bytes(store)?;
        let index = PileIndex::from_bytes(&bytes)?;

        assert_eq!(index.stats(), stats);
        assert_eq!(stats.max_overlaps_per_read, 2);
        assert_eq!(stats.total_trace_points, 12);
        assert_eq!(stats.max_trace_points_per_read, 6);
        assert_eq!(stats.max_trace_points_per_record, 6);

        let first = SIZE_HEADER as i64;
        let third = first + 2 * SIZE_RECORD as i64 + 6;
        assert_eq!(index.offsets(), &[first, third, store_len]);
        assert_eq!(index.n_piles(), 2);
        assert!(index.starts_after_header());
        Ok(())
    }

    #[test]
    fn test_empty_store() -> Result<()> {
        let (stats, bytes) = index_bytes(store_bytes(100, &[])?)?;
        assert_eq!(stats, IndexStats::default());
        let index = PileIndex::from_bytes(&bytes)?;
        assert_eq!(index.offsets(), &[SIZE_HEADER as i64]);
        assert_eq!(index.n_piles(), 0);
        Ok(())
    }

    #[test]
    fn test_random_stores_match_reference() -> Result<()> {
        let mut rng = SmallRng::seed_from_u64(42);
        for _ in 0..25 {
            let records = random_store(&mut rng, 60);
            let store = store_bytes(100, &records)?;
            let store_len = store.len() as i64;
            let (stats, bytes) = index_bytes(store)?;
            let index = PileIndex::from_bytes(&bytes)?;

            let mut per_read: BTreeMap<i32, (i64, i64)> = BTreeMap::new();
            for (record, trace) in &records {
                let entry = per_read.entry(record.a_id).or_default();
                entry.0 += 1;
                entry.1 += trace.len() as i64;
            }
            let expected = IndexStats {
                max_overlaps_per_read: per_read.values().map(|v| v.0).max().unwrap_or(0),
                total_trace_points: records.iter().map(|(_, t)| t.len() as i64).sum(),
                max_trace_points_per_read: per_read.values().map(|v| v.1).max().unwrap_or(0),
                max_trace_points_per_record: records
                    .iter()
                    .map(|(_, t)| t.len() as i64)
                    .max()
                    .unwrap_or(0),
            };
            assert_eq!(stats, expected);
            assert_eq!(index.n_piles(), per_read.len());
            assert!(index.starts_after_header());
            assert_eq!(*index.offsets().last().unwrap(), store_len);
            assert!(index.offsets().windows(2).all(|w| w[0] <= w[1]));
        }
        Ok(())
    }

    #[test]
    fn test_aggregates_at_writer_position() -> Result<()> {
        let store = store_bytes(100, &[(overlap(0, 1, 0), vec![3, 4])])?;
        let mut reader = StreamReader::new(Cursor::new(store))?;
        let mut out = Cursor::new(vec![9u8; 8]);
        out.seek(SeekFrom::End(0))?;
        build_index(&mut reader, &mut out)?;
        let bytes = out.into_inner();
        assert_eq!(&bytes[..8], &[9u8; 8]);
        let index = PileIndex::from_bytes(&bytes[8..])?;
        assert_eq!(index.stats().total_trace_points, 2);
        Ok(())
    }

    #[test]
    fn test_trailing_bytes_rejected() -> Result<()> {
        let mut store = store_bytes(100, &[(overlap(0, 1, 0), vec![])])?;
        store.push(0);
        let err = index_bytes(store).unwrap_err();
        assert!(matches!(err, Error::ReadError(ReadError::TrailingBytes(_))));
        Ok(())
    }

    #[test]
    fn test_invalid_index_bytes() {
        assert!(PileIndex::from_bytes(&[0u8; 20]).is_err());
        assert!(PileIndex::from_bytes(&[0u8; SIZE_INDEX_HEADER + 12]).is_err());

        let mut bytes = vec![0u8; SIZE_INDEX_HEADER];
        bytes.extend_from_slice(&100i64.to_le_bytes());
        bytes.extend_from_slice(&50i64.to_le_bytes());
        assert!(matches!(
            PileIndex::from_bytes(&bytes),
            Err(Error::IndexError(IndexError::NonMonotonicOffsets(1)))
        ));
    }

    #[test]
    fn test_store_paths() {
        let (las, idx) = store_paths("data/reads.las");
        assert_eq!(las, PathBuf::from("data/reads.las"));
        assert_eq!(idx, PathBuf::from("data/.reads.las.idx"));
        assert_eq!(store_paths("data/reads"), (las, idx));
    }

    #[test]
    fn test_index_file_round_trip() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("lastore-index-{}", std::process::id()));
        fs::create_dir_all(&dir)?;
        let (las_path, idx_path) = store_paths(dir.join("sample"));
        let records = vec![
            (overlap(0, 1, 0), vec![1u16; 4]),
            (overlap(5, 2, 0), vec![1u16; 2]),
        ];
        fs::write(&las_path, store_bytes(100, &records)?)?;

        let stats = build_index_file(&las_path, &idx_path, 64)?;
        let index = PileIndex::for_store(dir.join("sample.las"))?;
        assert_eq!(index.stats(), stats);
        assert_eq!(index.n_piles(), 2);

        // a store that changed size invalidates its index
        fs::write(&las_path, store_bytes(100, &records[..1])?)?;
        let err = PileIndex::from_path(&idx_path, &las_path).unwrap_err();
        assert!(matches!(err, Error::IndexError(e) if e.is_mismatch()));

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn test_failed_publish_removes_tmp() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("lastore-publish-{}", std::process::id()));
        fs::create_dir_all(&dir)?;
        let (las_path, idx_path) = store_paths(dir.join("blocked"));
        fs::write(&las_path, store_bytes(100, &[(overlap(0, 1, 0), vec![1, 2])])?)?;
        // a directory in place of the index makes the final rename fail
        fs::create_dir_all(idx_path.join("occupied"))?;

        let err = build_index_file(&las_path, &idx_path, 64).unwrap_err();
        assert!(matches!(err, Error::IoError(_)));
        let mut tmp_path = idx_path.as_os_str().to_owned();
        tmp_path.push(".tmp");
        assert!(!PathBuf::from(tmp_path).exists());

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn test_failed_build_removes_tmp() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("lastore-trailing-{}", std::process::id()));
        fs::create_dir_all(&dir)?;
        let (las_path, idx_path) = store_paths(dir.join("trailing"));
        let mut store = store_bytes(100, &[(overlap(0, 1, 0), vec![])])?;
        store.push(0);
        fs::write(&las_path, store)?;

        assert!(build_index_file(&las_path, &idx_path, 64).is_err());
        let entries = fs::read_dir(&dir)?.count();
        assert_eq!(entries, 1);

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn test_missing_store() {
        let err = build_index_file("no/such/store.las", "no/such/.store.las.idx", 64).unwrap_err();
        assert!(matches!(err, Error::ReadError(ReadError::Open { .. })));
    }
}
