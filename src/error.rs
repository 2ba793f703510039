/// Custom Result type for lastore operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the lastore library, encompassing all possible error cases
/// that can occur while reading, indexing, or dumping overlap stores.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub enum Error {
    /// Errors related to store header processing
    HeaderError(#[from] HeaderError),
    /// Errors that occur during read operations
    ReadError(#[from] ReadError),
    /// Errors that occur during write operations
    WriteError(#[from] WriteError),
    /// Errors related to pile index files
    IndexError(#[from] IndexError),
    /// Errors in read-id selections
    RangeError(#[from] RangeError),
    /// Errors from the read database collaborator
    DatabaseError(#[from] DatabaseError),
    /// A buffer could not be grown to the requested size
    AllocationFailure(#[from] std::collections::TryReserveError),
    /// Standard I/O errors from the Rust standard library
    IoError(#[from] std::io::Error),
}
impl Error {
    /// Checks if the error signals that the store ended before a required span
    ///
    /// Useful to distinguish a damaged store from an unrelated I/O failure.
    #[must_use]
    pub fn is_truncation(&self) -> bool {
        matches!(
            self,
            Self::ReadError(
                ReadError::UnexpectedEof { .. }
                    | ReadError::TruncatedRecord { .. }
                    | ReadError::HeaderMismatch { .. }
                    | ReadError::TrailingBytes(_)
            )
        )
    }
}

/// Errors specific to processing and validating store headers
#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    /// The declared record count is negative
    ///
    /// # Arguments
    /// * `i64` - The record count found in the header
    #[error("Invalid record count: {0}")]
    InvalidRecordCount(i64),

    /// The declared trace spacing is not positive
    ///
    /// # Arguments
    /// * `i32` - The trace spacing found in the header
    #[error("Invalid trace spacing: {0}")]
    InvalidTraceSpacing(i32),

    /// The size of the data does not match what is required for a header
    ///
    /// # Arguments
    /// * First `usize` - The actual number of bytes provided
    /// * Second `usize` - The expected number of bytes
    #[error("Invalid number of bytes provided: {0}. Expected: {1}")]
    InvalidSize(usize, usize),
}

/// Errors that can occur while reading overlap stores
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    /// The store (or index) path could not be opened
    #[error("Cannot open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Fewer bytes were available than the fixed part of a record requires
    #[error("Truncated record at byte {offset}: {available} of {required} bytes available")]
    TruncatedRecord {
        offset: u64,
        available: usize,
        required: usize,
    },

    /// The store ended before a required span was complete
    #[error("Unexpected end of file at byte {offset}: needed {needed} more bytes")]
    UnexpectedEof { offset: u64, needed: usize },

    /// The number of records in the file disagrees with the header
    #[error("Header declares {declared} records but {found} could be read")]
    HeaderMismatch { declared: i64, found: i64 },

    /// A record declared a negative or odd trace length
    #[error("Invalid trace length {len} in record {record}")]
    InvalidTraceLength { record: i64, len: i32 },

    /// A record carries a negative read id
    #[error("Invalid read id {id} in record {record}")]
    InvalidReadId { record: i64, id: i32 },

    /// Bytes remain after the number of records declared by the header
    #[error("Unexpected data after the last declared record at byte {0}")]
    TrailingBytes(u64),
}

/// Errors that can occur while writing overlap stores
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// Trace vectors hold (diff, position) pairs and must have even length
    #[error("Trace length must be even, got {0}")]
    OddTraceLength(usize),

    /// A trace value does not fit in the store's trace width
    #[error("Trace value {value} does not fit in {width} byte(s)")]
    TraceValueOverflow { value: u16, width: usize },

    /// A field that must be non-negative on disk is negative
    #[error("Field {field} must be non-negative, got {value}")]
    NegativeField { field: &'static str, value: i32 },
}

/// Errors related to pile index files
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// The index file is too short or not a whole number of offsets
    #[error("Invalid index size: {0} bytes")]
    InvalidSize(usize),

    /// The index was built for a store of a different size
    ///
    /// # Arguments
    /// * First `u64` - The current byte size of the store
    /// * Second `u64` - The byte size recorded by the terminal index offset
    #[error("Store is {0} bytes but index ends at {1} - index is stale")]
    ByteSizeMismatch(u64, u64),

    /// Pile offsets decrease somewhere in the table
    #[error("Pile offsets are not monotonic at position {0}")]
    NonMonotonicOffsets(usize),

    /// The index path does not name a store it could belong to
    #[error("Cannot determine the store for index path: {0}")]
    MissingUpstreamFile(String),
}

impl IndexError {
    /// Checks if this error means the index no longer matches its store
    #[must_use]
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Self::ByteSizeMismatch(_, _))
    }
}

/// Errors in user supplied read-id selections
#[derive(thiserror::Error, Debug)]
pub enum RangeError {
    /// The token is not a read id or a read range, or its bounds are inverted
    #[error("Argument '{0}' is not an integer range")]
    InvalidRange(String),

    /// An item of an id file is not a positive integer
    #[error("{item}'th item of input file {path} is not a positive integer")]
    InvalidId { item: usize, path: String },

    /// `$` was used without a database to say which read is last
    #[error("Argument '{0}' refers to the last read but no read database is open")]
    UnknownLastRead(String),
}

/// Errors from the read database collaborator
#[derive(thiserror::Error, Debug)]
pub enum DatabaseError {
    /// The database path does not exist or cannot be read
    #[error("Read database not found: {0}")]
    NotFound(String),

    /// A line of the database is not a non-negative read length
    #[error("Invalid read length on line {line}: '{value}'")]
    InvalidLength { line: usize, value: String },

    /// A record refers to a read that the database does not contain
    #[error("Read {id} is out of range for a database of {num_reads} reads")]
    ReadOutOfRange { id: usize, num_reads: usize },

    /// True-overlap filtering was requested without a database of read lengths
    #[error("Filtering true overlaps requires a read database")]
    Missing,
}
