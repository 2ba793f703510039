//! Record codec
//!
//! An overlap record is a fixed 36 byte part followed by `trace_len` trace values
//! of the store's [`TraceWidth`]. Trace values are always handed out as `u16`,
//! single-byte stores are widened on decode.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::io::Write;

use crate::error::{ReadError, Result, WriteError};
use crate::header::TraceWidth;

/// Size of the fixed part of a record in bytes
pub const SIZE_RECORD: usize = 36;

/// Flag bit set when the b-read is reverse-complemented relative to the a-read
pub const COMP_FLAG: u32 = 0x1;

/// Alignment extent and trace summary of an overlap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlignmentPath {
    /// Number of differences in the alignment
    pub diffs: i32,
    /// Start of the alignment on the a-read (0-based)
    pub a_begin: i32,
    /// End of the alignment on the a-read
    pub a_end: i32,
    /// Start of the alignment on the b-read (0-based)
    pub b_begin: i32,
    /// End of the alignment on the b-read
    pub b_end: i32,
    /// Number of trace values, two per trace point
    pub trace_len: i32,
}

/// The fixed part of one overlap record
///
/// The trace is not owned by the record. Readers decode it into a buffer supplied
/// by the caller so one allocation can be reused across the whole store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlapRecord {
    /// 0-based id of the a-read (primary sort key of a store)
    pub a_id: i32,
    /// 0-based id of the b-read
    pub b_id: i32,
    /// Flag bits, see [`COMP_FLAG`]
    pub flags: u32,
    /// Alignment extent
    pub path: AlignmentPath,
}
impl OverlapRecord {
    /// Returns true if the b-read is reverse-complemented
    #[must_use]
    pub fn is_complement(&self) -> bool {
        self.flags & COMP_FLAG != 0
    }

    /// Number of trace values that follow the fixed part
    #[must_use]
    pub fn trace_len(&self) -> usize {
        self.path.trace_len.max(0) as usize
    }

    /// Number of trace bytes that follow the fixed part
    #[must_use]
    pub fn trace_bytes(&self, width: TraceWidth) -> usize {
        self.trace_len() * width.bytes()
    }

    /// Returns true if the alignment starts at the first base of either read
    #[must_use]
    pub fn touches_start(&self) -> bool {
        self.path.a_begin == 0 || self.path.b_begin == 0
    }

    /// Returns true if the alignment ends at the last base of either read
    #[must_use]
    pub fn touches_end(&self, a_len: i32, b_len: i32) -> bool {
        self.path.a_end == a_len || self.path.b_end == b_len
    }

    /// Decodes the fixed part of a record from an exact buffer
    #[must_use]
    pub fn from_bytes(buffer: &[u8; SIZE_RECORD]) -> Self {
        Self {
            a_id: LittleEndian::read_i32(&buffer[0..4]),
            b_id: LittleEndian::read_i32(&buffer[4..8]),
            flags: LittleEndian::read_u32(&buffer[8..12]),
            path: AlignmentPath {
                diffs: LittleEndian::read_i32(&buffer[12..16]),
                a_begin: LittleEndian::read_i32(&buffer[16..20]),
                a_end: LittleEndian::read_i32(&buffer[20..24]),
                b_begin: LittleEndian::read_i32(&buffer[24..28]),
                b_end: LittleEndian::read_i32(&buffer[28..32]),
                trace_len: LittleEndian::read_i32(&buffer[32..36]),
            },
        }
    }

    /// Decodes the fixed part of a record from the start of a buffer
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::TruncatedRecord`] if fewer than [`SIZE_RECORD`] bytes are
    /// available.
    pub fn decode_fixed(buffer: &[u8]) -> Result<Self> {
        let Some(bytes) = buffer.get(..SIZE_RECORD) else {
            return Err(ReadError::TruncatedRecord {
                offset: 0,
                available: buffer.len(),
                required: SIZE_RECORD,
            }
            .into());
        };
        let mut fixed = [0u8; SIZE_RECORD];
        fixed.copy_from_slice(bytes);
        Ok(Self::from_bytes(&fixed))
    }

    /// Serializes the fixed part of the record
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SIZE_RECORD] {
        let mut buffer = [0u8; SIZE_RECORD];
        LittleEndian::write_i32(&mut buffer[0..4], self.a_id);
        LittleEndian::write_i32(&mut buffer[4..8], self.b_id);
        LittleEndian::write_u32(&mut buffer[8..12], self.flags);
        LittleEndian::write_i32(&mut buffer[12..16], self.path.diffs);
        LittleEndian::write_i32(&mut buffer[16..20], self.path.a_begin);
        LittleEndian::write_i32(&mut buffer[20..24], self.path.a_end);
        LittleEndian::write_i32(&mut buffer[24..28], self.path.b_begin);
        LittleEndian::write_i32(&mut buffer[28..32], self.path.b_end);
        LittleEndian::write_i32(&mut buffer[32..36], self.path.trace_len);
        buffer
    }

    /// Writes the fixed part of the record
    pub fn encode_fixed<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }
}

/// Decodes `len` trace values of the given width into `trace`
///
/// The buffer is cleared and refilled; its capacity only ever grows. Single-byte
/// values are zero-extended to `u16`.
///
/// # Errors
///
/// Returns [`ReadError::UnexpectedEof`] if `bytes` holds fewer than `len` values and
/// an allocation failure if `trace` cannot grow.
pub fn decode_trace(
    bytes: &[u8],
    width: TraceWidth,
    len: usize,
    trace: &mut Vec<u16>,
) -> Result<()> {
    let nbytes = len * width.bytes();
    if bytes.len() < nbytes {
        return Err(ReadError::UnexpectedEof {
            offset: bytes.len() as u64,
            needed: nbytes - bytes.len(),
        }
        .into());
    }
    trace.clear();
    trace.try_reserve(len)?;
    match width {
        TraceWidth::U8 => trace.extend(bytes[..len].iter().map(|&b| u16::from(b))),
        TraceWidth::U16 => {
            trace.resize(len, 0);
            LittleEndian::read_u16_into(&bytes[..nbytes], trace);
        }
    }
    Ok(())
}

/// Encodes trace values at the given width
///
/// Values are written straight to `writer`; nothing is written if validation fails.
///
/// # Errors
///
/// Returns an error if the trace has odd length or a value does not fit the width.
pub fn encode_trace<W: Write>(trace: &[u16], width: TraceWidth, writer: &mut W) -> Result<()> {
    if trace.len() % 2 != 0 {
        return Err(WriteError::OddTraceLength(trace.len()).into());
    }
    if let Some(&value) = trace.iter().find(|&&v| v > width.max_value()) {
        return Err(WriteError::TraceValueOverflow {
            value,
            width: width.bytes(),
        }
        .into());
    }
    for &value in trace {
        match width {
            TraceWidth::U8 => writer.write_u8(value as u8)?,
            TraceWidth::U16 => writer.write_u16::<LittleEndian>(value)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(trace_len: i32) -> OverlapRecord {
        OverlapRecord {
            a_id: 7,
            b_id: 1_000_003,
            flags: COMP_FLAG,
            path: AlignmentPath {
                diffs: 12,
                a_begin: 0,
                a_end: 4_500,
                b_begin: 311,
                b_end: 4_790,
                trace_len,
            },
        }
    }

    #[test]
    fn test_fixed_round_trip() -> Result<()> {
        for trace_len in [0, 2, 90] {
            let rec = record(trace_len);
            let mut out = Vec::new();
            rec.encode_fixed(&mut out)?;
            assert_eq!(out.len(), SIZE_RECORD);
            assert_eq!(OverlapRecord::decode_fixed(&out)?, rec);
        }
        Ok(())
    }

    #[test]
    fn test_decode_fixed_truncated() {
        let bytes = record(4).to_bytes();
        let err = OverlapRecord::decode_fixed(&bytes[..20]).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::ReadError(ReadError::TruncatedRecord { available: 20, .. })
        ));
    }

    #[test]
    fn test_trace_round_trip_both_widths() -> Result<()> {
        let values: Vec<u16> = vec![3, 100, 0, 98, 255, 101, 17, 100];
        for width in [TraceWidth::U8, TraceWidth::U16] {
            for len in (0..=values.len()).step_by(2) {
                let mut bytes = Vec::new();
                encode_trace(&values[..len], width, &mut bytes)?;
                assert_eq!(bytes.len(), len * width.bytes());

                let mut trace = Vec::new();
                decode_trace(&bytes, width, len, &mut trace)?;
                assert_eq!(trace, &values[..len]);
            }
        }
        Ok(())
    }

    #[test]
    fn test_trace_buffer_never_shrinks() -> Result<()> {
        let mut trace = Vec::new();
        decode_trace(&[1u8; 64], TraceWidth::U8, 64, &mut trace)?;
        let capacity = trace.capacity();
        decode_trace(&[2u8; 4], TraceWidth::U8, 4, &mut trace)?;
        assert_eq!(trace, vec![2, 2, 2, 2]);
        assert!(trace.capacity() >= capacity);
        Ok(())
    }

    #[test]
    fn test_narrow_trace_overflow() {
        let mut bytes = Vec::new();
        let err = encode_trace(&[1, 256], TraceWidth::U8, &mut bytes).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::WriteError(WriteError::TraceValueOverflow { value: 256, width: 1 })
        ));
    }

    #[test]
    fn test_encode_into_fixed_slice() -> Result<()> {
        let mut out = [0u8; 4];
        encode_trace(&[1, 0x0203], TraceWidth::U16, &mut out.as_mut_slice())?;
        assert_eq!(out, [1, 0, 3, 2]);

        let mut out = [0u8; 2];
        encode_trace(&[7, 200], TraceWidth::U8, &mut out.as_mut_slice())?;
        assert_eq!(out, [7, 200]);

        // rejected traces leave the destination untouched
        let mut bytes = Vec::new();
        assert!(encode_trace(&[5, 256], TraceWidth::U8, &mut bytes).is_err());
        assert!(bytes.is_empty());
        Ok(())
    }

    #[test]
    fn test_odd_trace_rejected() {
        let mut bytes = Vec::new();
        assert!(encode_trace(&[1, 2, 3], TraceWidth::U16, &mut bytes).is_err());
    }

    #[test]
    fn test_touch_predicates() {
        let rec = record(0);
        assert!(rec.touches_start());
        assert!(rec.touches_end(4_500, 10_000));
        assert!(!rec.touches_end(4_501, 10_000));
        assert!(rec.is_complement());
    }
}
