//! Chunked stream reader
//!
//! Presents a store as a sequence of [`OverlapRecord`]s without mapping the whole
//! file into memory. The reader owns a fixed-size byte window over its source. Any
//! span that runs past the end of the window (a record's fixed part or its trace) is
//! handled by moving the unread remainder to the front of the window and refilling
//! the rest from the source, so records may straddle refills freely.
//!
//! Every record is read in two steps: [`StreamReader::read_fixed`] decodes the fixed
//! part, then the trace is either decoded ([`StreamReader::read_trace`]), stepped
//! over through the window ([`StreamReader::skip_trace`]), or for seekable sources
//! jumped over without reading ([`StreamReader::seek_trace`]).

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use log::debug;

use crate::error::{HeaderError, ReadError, Result};
use crate::header::{StoreHeader, SIZE_HEADER};
use crate::record::{decode_trace, OverlapRecord, SIZE_RECORD};

/// Default size of the byte window (16 MiB)
pub const DEFAULT_BUFFER_CAPACITY: usize = 16 * 1024 * 1024;

/// A reader for streaming overlap records from any source that implements Read
///
/// The source must be positioned at the start of the store header.
pub struct StreamReader<R: Read> {
    /// The source reader for overlap data
    reader: R,

    /// Header of the store, read on construction
    header: StoreHeader,

    /// Byte window over the source
    buffer: Vec<u8>,

    /// Current position in the buffer
    buffer_pos: usize,

    /// Length of valid data in the buffer
    buffer_len: usize,

    /// Store offset of `buffer[buffer_pos]`
    offset: u64,

    /// Number of records whose fixed part has been decoded
    n_processed: i64,

    /// Trace bytes of the current record not yet consumed
    pending: usize,

    /// Byte length of the source, learned on the first positional skip
    stream_len: Option<u64>,
}

impl StreamReader<File> {
    /// Opens a store on disk
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::Open`] if the path cannot be opened and a header error if
    /// the file does not start with a valid store header.
    pub fn from_path<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ReadError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Self::with_capacity(file, capacity)
    }
}

impl<R: Read> StreamReader<R> {
    /// Creates a new `StreamReader` with the default window size
    pub fn new(reader: R) -> Result<Self> {
        Self::with_capacity(reader, DEFAULT_BUFFER_CAPACITY)
    }

    /// Creates a new `StreamReader` with a specified window size and reads the header
    ///
    /// The window grows on demand if a single record needs more room.
    pub fn with_capacity(reader: R, capacity: usize) -> Result<Self> {
        let capacity = capacity.max(SIZE_HEADER);
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(capacity)?;
        buffer.resize(capacity, 0);

        let mut stream = Self {
            reader,
            header: StoreHeader::new(0, 1),
            buffer,
            buffer_pos: 0,
            buffer_len: 0,
            offset: 0,
            n_processed: 0,
            pending: 0,
            stream_len: None,
        };
        stream.read_header()?;
        Ok(stream)
    }

    /// Returns the store header
    #[must_use]
    pub fn header(&self) -> StoreHeader {
        self.header
    }

    /// Store offset of the next unread byte
    ///
    /// Directly after [`read_fixed`](Self::read_fixed) this is the start of the
    /// record's trace, otherwise it is the start of the next record.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of records read so far
    #[must_use]
    pub fn records_read(&self) -> i64 {
        self.n_processed
    }

    /// Current size of the byte window
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn available(&self) -> usize {
        self.buffer_len - self.buffer_pos
    }

    fn consume(&mut self, n: usize) {
        self.buffer_pos += n;
        self.offset += n as u64;
    }

    fn read_header(&mut self) -> Result<()> {
        if !self.ensure(SIZE_HEADER)? {
            return Err(HeaderError::InvalidSize(self.available(), SIZE_HEADER).into());
        }
        self.header = StoreHeader::from_buffer(&self.buffer[self.buffer_pos..self.buffer_len])?;
        self.consume(SIZE_HEADER);
        self.n_processed = 0;
        self.pending = 0;
        Ok(())
    }

    /// Moves the unread remainder to the front of the window and reads more data
    ///
    /// Returns the number of bytes read, zero at the end of the source.
    fn fill_buffer(&mut self) -> Result<usize> {
        if self.buffer_pos > 0 {
            self.buffer.copy_within(self.buffer_pos..self.buffer_len, 0);
            self.buffer_len -= self.buffer_pos;
            self.buffer_pos = 0;
        }
        loop {
            match self.reader.read(&mut self.buffer[self.buffer_len..]) {
                Ok(bytes_read) => {
                    self.buffer_len += bytes_read;
                    return Ok(bytes_read);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Grows the window so that it can hold `size` bytes
    fn grow(&mut self, size: usize) -> Result<()> {
        debug!("growing read window from {} to {} bytes", self.buffer.len(), size);
        self.buffer.try_reserve_exact(size - self.buffer.len())?;
        self.buffer.resize(size, 0);
        Ok(())
    }

    /// Ensures at least `n` unread bytes are in the window, refilling as needed
    ///
    /// The window only grows once it is full of unread bytes, doubling up to `n`, so a
    /// span declared larger than the source never allocates much more than the
    /// source holds. Returns `false` if the source ends first.
    fn ensure(&mut self, n: usize) -> Result<bool> {
        while self.available() < n {
            if self.buffer_pos == 0 && self.buffer_len == self.buffer.len() {
                let size = self.buffer.len().saturating_mul(2).min(n);
                self.grow(size)?;
            }
            if self.fill_buffer()? == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Decodes the fixed part of the next record
    ///
    /// Returns `Ok(None)` once every record declared by the header has been read. If
    /// the trace of the previous record was left unread it is skipped first.
    ///
    /// # Errors
    ///
    /// * [`ReadError::HeaderMismatch`] if the source ends on a record boundary before
    ///   the declared number of records
    /// * [`ReadError::TruncatedRecord`] if it ends inside a fixed part
    /// * [`ReadError::InvalidTraceLength`] / [`ReadError::InvalidReadId`] for records
    ///   that cannot be valid
    pub fn read_fixed(&mut self) -> Result<Option<OverlapRecord>> {
        if self.pending > 0 {
            self.skip_trace()?;
        }
        if self.n_processed >= self.header.record_count {
            return Ok(None);
        }
        if !self.ensure(SIZE_RECORD)? {
            let available = self.available();
            if available == 0 {
                return Err(ReadError::HeaderMismatch {
                    declared: self.header.record_count,
                    found: self.n_processed,
                }
                .into());
            }
            return Err(ReadError::TruncatedRecord {
                offset: self.offset,
                available,
                required: SIZE_RECORD,
            }
            .into());
        }

        let record = OverlapRecord::decode_fixed(&self.buffer[self.buffer_pos..self.buffer_len])?;
        let tlen = record.path.trace_len;
        if tlen < 0 || tlen % 2 != 0 {
            return Err(ReadError::InvalidTraceLength {
                record: self.n_processed,
                len: tlen,
            }
            .into());
        }
        if let Some(id) = [record.a_id, record.b_id].into_iter().find(|&id| id < 0) {
            return Err(ReadError::InvalidReadId {
                record: self.n_processed,
                id,
            }
            .into());
        }

        self.consume(SIZE_RECORD);
        self.n_processed += 1;
        self.pending = record.trace_bytes(self.header.trace_width());
        Ok(Some(record))
    }

    /// Decodes the trace of the record last returned by [`read_fixed`](Self::read_fixed)
    ///
    /// Values are widened to `u16`; `trace` is cleared first and only ever grows.
    pub fn read_trace(&mut self, trace: &mut Vec<u16>) -> Result<()> {
        let nbytes = self.pending;
        if !self.ensure(nbytes)? {
            let available = self.available();
            return Err(ReadError::UnexpectedEof {
                offset: self.offset + available as u64,
                needed: nbytes - available,
            }
            .into());
        }
        let width = self.header.trace_width();
        decode_trace(
            &self.buffer[self.buffer_pos..self.buffer_pos + nbytes],
            width,
            nbytes / width.bytes(),
            trace,
        )?;
        self.consume(nbytes);
        self.pending = 0;
        Ok(())
    }

    /// Steps over the trace of the current record without decoding it
    pub fn skip_trace(&mut self) -> Result<()> {
        let mut remaining = self.pending;
        while remaining > 0 {
            if self.available() == 0 && self.fill_buffer()? == 0 {
                return Err(ReadError::UnexpectedEof {
                    offset: self.offset,
                    needed: remaining,
                }
                .into());
            }
            let step = remaining.min(self.available());
            self.consume(step);
            remaining -= step;
        }
        self.pending = 0;
        Ok(())
    }

    /// Reads the next record together with its trace
    pub fn next_record(&mut self, trace: &mut Vec<u16>) -> Result<Option<OverlapRecord>> {
        let Some(record) = self.read_fixed()? else {
            return Ok(None);
        };
        self.read_trace(trace)?;
        Ok(Some(record))
    }

    /// Returns true if no bytes follow the current position
    ///
    /// Meaningful once every declared record has been read.
    pub fn is_exhausted(&mut self) -> Result<bool> {
        Ok(self.pending == 0 && !self.ensure(1)?)
    }

    /// Consumes the stream reader and returns the inner reader
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read + Seek> StreamReader<R> {
    /// Skips the trace of the current record with a relative seek
    ///
    /// Bytes already in the window are consumed in place; only the part of the trace
    /// beyond the window is skipped on the source.
    pub fn seek_trace(&mut self) -> Result<()> {
        let nbytes = self.pending;
        let available = self.available();
        if nbytes <= available {
            self.consume(nbytes);
            self.pending = 0;
            return Ok(());
        }

        self.consume(available);
        self.buffer_pos = 0;
        self.buffer_len = 0;
        let skip = (nbytes - available) as u64;
        let pos = self.reader.seek(SeekFrom::Current(skip as i64))?;
        let end = match self.stream_len {
            Some(end) => end,
            None => {
                let end = self.reader.seek(SeekFrom::End(0))?;
                self.reader.seek(SeekFrom::Start(pos))?;
                self.stream_len = Some(end);
                end
            }
        };
        if pos > end {
            let needed = pos - end;
            return Err(ReadError::UnexpectedEof {
                offset: self.offset + skip - needed,
                needed: needed as usize,
            }
            .into());
        }
        self.offset += skip;
        self.pending = 0;
        Ok(())
    }

    /// Reads the next record's fixed part and seeks past its trace
    pub fn next_record_seek(&mut self) -> Result<Option<OverlapRecord>> {
        let Some(record) = self.read_fixed()? else {
            return Ok(None);
        };
        self.seek_trace()?;
        Ok(Some(record))
    }

    /// Returns to the first record of the store
    pub fn rewind(&mut self) -> Result<()> {
        let back = self.offset + self.available() as u64;
        self.reader.seek(SeekFrom::Current(-(back as i64)))?;
        self.buffer_pos = 0;
        self.buffer_len = 0;
        self.offset = 0;
        self.read_header()
    }
}
