//! Overlap store writer
//!
//! The producer side of the format. A placeholder header is written up front and
//! the record count is patched in by [`LasWriter::finish`], so the number of
//! records does not need to be known in advance.

use std::io::{Seek, SeekFrom, Write};

use crate::error::{Result, WriteError};
use crate::header::{StoreHeader, TraceWidth};
use crate::record::{encode_trace, OverlapRecord};

/// Trace spacing used when none is configured (the aligner's default)
pub const DEFAULT_TRACE_SPACING: i32 = 100;

/// Builder for [`LasWriter`]
#[derive(Debug, Clone, Copy, Default)]
pub struct LasWriterBuilder {
    trace_spacing: Option<i32>,
}
impl LasWriterBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    #[must_use]
    pub fn trace_spacing(mut self, trace_spacing: i32) -> Self {
        self.trace_spacing = Some(trace_spacing);
        self
    }
    pub fn build<W: Write + Seek>(self, inner: W) -> Result<LasWriter<W>> {
        LasWriter::new(
            inner,
            self.trace_spacing.unwrap_or(DEFAULT_TRACE_SPACING),
        )
    }
}

/// Writer for overlap stores
///
/// # Type Parameters
///
/// * `W` - The underlying writer, which must be seekable so the header can be patched
pub struct LasWriter<W: Write + Seek> {
    /// The underlying writer for output
    inner: W,

    /// Header as it will be written on finish
    header: StoreHeader,

    /// Stream position of the header
    start: u64,

    /// Reusable buffer for encoded trace bytes
    tbuf: Vec<u8>,
}
impl<W: Write + Seek> LasWriter<W> {
    /// Creates a writer and reserves the header at the current stream position
    pub fn new(mut inner: W, trace_spacing: i32) -> Result<Self> {
        let start = inner.stream_position()?;
        let header = StoreHeader::new(0, trace_spacing);
        header.write_bytes(&mut inner)?;
        Ok(Self {
            inner,
            header,
            start,
            tbuf: Vec::new(),
        })
    }

    /// Width used for every trace written by this writer
    #[must_use]
    pub fn trace_width(&self) -> TraceWidth {
        self.header.trace_width()
    }

    /// Number of records written so far
    #[must_use]
    pub fn num_records(&self) -> i64 {
        self.header.record_count
    }

    /// Appends one record and its trace
    ///
    /// The record's `trace_len` is taken from `trace`, whatever the record holds.
    /// Nothing is written if validation fails.
    pub fn write_record(&mut self, record: &OverlapRecord, trace: &[u16]) -> Result<()> {
        for (field, value) in [("a_id", record.a_id), ("b_id", record.b_id)] {
            if value < 0 {
                return Err(WriteError::NegativeField { field, value }.into());
            }
        }
        self.tbuf.clear();
        encode_trace(trace, self.trace_width(), &mut self.tbuf)?;

        let mut record = *record;
        record.path.trace_len = trace.len() as i32;
        record.encode_fixed(&mut self.inner)?;
        self.inner.write_all(&self.tbuf)?;
        self.header.record_count += 1;
        Ok(())
    }

    /// Patches the record count into the header and returns the inner writer
    pub fn finish(mut self) -> Result<W> {
        let end = self.inner.stream_position()?;
        self.inner.seek(SeekFrom::Start(self.start))?;
        self.header.write_bytes(&mut self.inner)?;
        self.inner.seek(SeekFrom::Start(end))?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}
