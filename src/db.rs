//! Read database collaborator
//!
//! The overlap tools only need read lengths from the sequence database, so the
//! database is consumed through the narrow [`ReadDatabase`] trait. [`LengthTable`] is
//! the implementation used by the command line tools: a plain file of read lengths.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use auto_impl::auto_impl;
use log::debug;

use crate::error::{DatabaseError, Error, Result};

/// Read lengths by 0-based read id
#[auto_impl(&, Box, Arc)]
pub trait ReadDatabase {
    /// Number of reads in the (trimmed) database
    fn num_reads(&self) -> usize;

    /// Length of read `id`
    fn read_length(&self, id: usize) -> Result<i32>;
}

/// In-memory table of read lengths
///
/// Loaded from a text file with one non-negative length per line; blank lines and
/// lines starting with `#` are ignored. Read ids are line ranks, starting at 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LengthTable {
    lengths: Vec<i32>,
    cutoff: i32,
    trimmed: bool,
}
impl LengthTable {
    #[must_use]
    pub fn new(lengths: Vec<i32>) -> Self {
        Self {
            lengths,
            cutoff: 0,
            trimmed: false,
        }
    }

    /// Sets the minimum read length kept by [`trim`](Self::trim)
    #[must_use]
    pub fn with_cutoff(mut self, cutoff: i32) -> Self {
        self.cutoff = cutoff;
        self
    }

    /// Opens a length table
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::NotFound`] if the file does not exist,
    /// [`DatabaseError::InvalidLength`] for a line that is not a length, and an I/O
    /// error for any other read failure (including text that is not UTF-8).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => DatabaseError::NotFound(path.display().to_string()).into(),
            _ => Error::from(e),
        })?;
        let mut lengths = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.parse::<i32>() {
                Ok(len) if len >= 0 => lengths.push(len),
                _ => {
                    return Err(DatabaseError::InvalidLength {
                        line: i + 1,
                        value: line.to_string(),
                    }
                    .into())
                }
            }
        }
        debug!("loaded {} read lengths from {}", lengths.len(), path.display());
        Ok(Self::new(lengths))
    }

    /// Drops reads shorter than the cutoff and renumbers the rest
    ///
    /// Overlap stores refer to reads of the trimmed database. Trimming twice has no
    /// further effect.
    pub fn trim(&mut self) {
        if self.trimmed {
            return;
        }
        let cutoff = self.cutoff;
        self.lengths.retain(|&len| len >= cutoff);
        self.trimmed = true;
    }

    /// Returns true once [`trim`](Self::trim) has been applied
    #[must_use]
    pub fn is_trimmed(&self) -> bool {
        self.trimmed
    }
}

impl ReadDatabase for LengthTable {
    fn num_reads(&self) -> usize {
        self.lengths.len()
    }

    fn read_length(&self, id: usize) -> Result<i32> {
        self.lengths.get(id).copied().ok_or_else(|| {
            DatabaseError::ReadOutOfRange {
                id,
                num_reads: self.lengths.len(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_renumbers() -> Result<()> {
        let mut db = LengthTable::new(vec![500, 90, 1200, 40, 800]).with_cutoff(100);
        db.trim();
        assert_eq!(db.num_reads(), 3);
        assert_eq!(db.read_length(1)?, 1200);
        db.trim();
        assert_eq!(db.num_reads(), 3);
        assert!(db.is_trimmed());
        Ok(())
    }

    #[test]
    fn test_out_of_range() {
        let db = LengthTable::new(vec![10]);
        assert!(matches!(
            db.read_length(1),
            Err(Error::DatabaseError(DatabaseError::ReadOutOfRange { id: 1, num_reads: 1 }))
        ));
    }

    #[test]
    fn test_open() -> Result<()> {
        let path = std::env::temp_dir().join(format!("lastore-db-{}.txt", std::process::id()));
        fs::write(&path, "# lengths\n100\n\n250\n")?;
        let db = LengthTable::open(&path)?;
        assert_eq!(db.num_reads(), 2);
        assert_eq!((&db).read_length(1)?, 250);

        fs::write(&path, "100\n-4\n")?;
        assert!(matches!(
            LengthTable::open(&path),
            Err(Error::DatabaseError(DatabaseError::InvalidLength { line: 2, .. }))
        ));
        fs::remove_file(&path)?;

        assert!(matches!(
            LengthTable::open(&path),
            Err(Error::DatabaseError(DatabaseError::NotFound(_)))
        ));
        Ok(())
    }

    #[test]
    fn test_open_unreadable_is_io_error() -> Result<()> {
        let path = std::env::temp_dir().join(format!("lastore-db-bin-{}.txt", std::process::id()));
        fs::write(&path, [0x31, 0x30, 0xff, 0xfe, b'\n'])?;
        let result = LengthTable::open(&path);
        fs::remove_file(&path)?;
        assert!(matches!(result, Err(Error::IoError(_))));
        Ok(())
    }
}
