//! Header module for the lastore library
//!
//! Every `.las` store starts with a 12 byte header giving the number of overlap
//! records and the trace spacing used by the aligner. The spacing fixes the width
//! of every trace value in the file.

use byteorder::{ByteOrder, LittleEndian};
use std::io::{Read, Write};

use crate::error::{HeaderError, Result};

/// Trace spacing at or below which trace values fit in a single byte
pub const TRACE_XOVR: i32 = 125;

/// Size of the header in bytes
///
/// 8 bytes of record count followed by 4 bytes of trace spacing.
pub const SIZE_HEADER: usize = 12;

/// Width of a single trace value on disk
///
/// Decided once per store by its trace spacing and never changes within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceWidth {
    /// One byte per value (`trace_spacing <= TRACE_XOVR`)
    U8,
    /// Two bytes per value
    U16,
}
impl TraceWidth {
    /// Selects the width implied by a trace spacing
    #[must_use]
    pub fn from_spacing(trace_spacing: i32) -> Self {
        if trace_spacing <= TRACE_XOVR {
            Self::U8
        } else {
            Self::U16
        }
    }

    /// Number of bytes per trace value
    #[must_use]
    pub fn bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
        }
    }

    /// Largest value representable at this width
    #[must_use]
    pub fn max_value(self) -> u16 {
        match self {
            Self::U8 => u16::from(u8::MAX),
            Self::U16 => u16::MAX,
        }
    }
}

/// Header structure for overlap stores
///
/// The total size of this structure on disk is 12 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreHeader {
    /// Number of overlap records following the header
    ///
    /// 8 bytes
    pub record_count: i64,

    /// Spacing of trace points along the a-read
    ///
    /// 4 bytes
    pub trace_spacing: i32,
}
impl StoreHeader {
    /// Creates a new header
    #[must_use]
    pub fn new(record_count: i64, trace_spacing: i32) -> Self {
        Self {
            record_count,
            trace_spacing,
        }
    }

    /// Width of every trace value in the store
    #[must_use]
    pub fn trace_width(&self) -> TraceWidth {
        TraceWidth::from_spacing(self.trace_spacing)
    }

    /// Parses a header from a fixed-size byte array
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The record count is negative
    /// * The trace spacing is not positive
    pub fn from_bytes(buffer: &[u8; SIZE_HEADER]) -> Result<Self> {
        let record_count = LittleEndian::read_i64(&buffer[0..8]);
        if record_count < 0 {
            return Err(HeaderError::InvalidRecordCount(record_count).into());
        }
        let trace_spacing = LittleEndian::read_i32(&buffer[8..12]);
        if trace_spacing <= 0 {
            return Err(HeaderError::InvalidTraceSpacing(trace_spacing).into());
        }
        Ok(Self {
            record_count,
            trace_spacing,
        })
    }

    /// Parses a header from the start of an arbitrarily sized buffer
    pub fn from_buffer(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < SIZE_HEADER {
            return Err(HeaderError::InvalidSize(buffer.len(), SIZE_HEADER).into());
        }
        let mut bytes = [0u8; SIZE_HEADER];
        bytes.copy_from_slice(&buffer[..SIZE_HEADER]);
        Self::from_bytes(&bytes)
    }

    /// Serializes the header into its 12 byte representation
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SIZE_HEADER] {
        let mut buffer = [0u8; SIZE_HEADER];
        LittleEndian::write_i64(&mut buffer[0..8], self.record_count);
        LittleEndian::write_i32(&mut buffer[8..12], self.trace_spacing);
        buffer
    }

    /// Writes the header to a writer
    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Reads a header from a reader
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buffer = [0u8; SIZE_HEADER];
        reader.read_exact(&mut buffer)?;
        Self::from_bytes(&buffer)
    }
}
