//! Read-id selection
//!
//! A selection is a sorted list of closed, disjoint, non-adjacent ranges of 1-based
//! a-read ids, closed off by a sentinel range at [`ReadRanges::MAX`]. Because stores
//! are sorted by a-read, membership is decided by a [`RangeCursor`] that only moves
//! forward, one linear merge of the record stream against the range list.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{RangeError, ReadError, Result};

/// Symbol standing for the last read of the database
pub const LAST_READ_SYMBOL: char = '$';

/// A merged, sentinel-terminated list of 1-based read-id ranges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRanges {
    pairs: Vec<(u64, u64)>,
}
impl Default for ReadRanges {
    fn default() -> Self {
        Self::all()
    }
}
impl ReadRanges {
    /// Upper bound of open ranges and bounds of the sentinel
    pub const MAX: u64 = u64::MAX;

    /// Selects every read
    #[must_use]
    pub fn all() -> Self {
        Self::from_pairs(vec![(1, Self::MAX)])
    }

    /// Sorts and merges ranges, joining ranges that overlap or touch
    ///
    /// Pairs are expected to be valid (`1 <= lo <= hi`).
    #[must_use]
    pub fn from_pairs(mut pairs: Vec<(u64, u64)>) -> Self {
        pairs.retain(|&(lo, _)| lo != Self::MAX);
        pairs.sort_unstable_by_key(|&(lo, _)| lo);
        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(pairs.len() + 1);
        for (lo, hi) in pairs {
            match merged.last_mut() {
                Some(last) if lo <= last.1.saturating_add(1) => last.1 = last.1.max(hi),
                _ => merged.push((lo, hi)),
            }
        }
        merged.push((Self::MAX, Self::MAX));
        Self { pairs: merged }
    }

    /// Parses selection tokens
    ///
    /// With no tokens every read is selected. `last_read` is the number of reads in the
    /// database and is only needed by tokens using [`LAST_READ_SYMBOL`].
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S], last_read: Option<u64>) -> Result<Self> {
        if tokens.is_empty() {
            return Ok(Self::all());
        }
        let pairs = tokens
            .iter()
            .map(|token| parse_token(token.as_ref(), last_read))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_pairs(pairs))
    }

    /// Reads whitespace separated read ids, each selecting a single read
    pub fn from_id_reader<R: BufRead>(reader: R, name: &str) -> Result<Self> {
        let mut pairs = Vec::new();
        for line in reader.lines() {
            for item in line?.split_whitespace() {
                match item.parse::<i64>() {
                    Ok(id) if id > 0 => pairs.push((id as u64, id as u64)),
                    _ => {
                        return Err(RangeError::InvalidId {
                            item: pairs.len() + 1,
                            path: name.to_string(),
                        }
                        .into())
                    }
                }
            }
        }
        Ok(Self::from_pairs(pairs))
    }

    /// Reads an id file, see [`from_id_reader`](Self::from_id_reader)
    pub fn from_id_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let file = File::open(path).map_err(|source| ReadError::Open {
            path: name.clone(),
            source,
        })?;
        Self::from_id_reader(BufReader::new(file), &name)
    }

    /// The merged ranges, sentinel excluded
    #[must_use]
    pub fn ranges(&self) -> &[(u64, u64)] {
        &self.pairs[..self.pairs.len() - 1]
    }

    /// Starts a forward membership scan
    #[must_use]
    pub fn cursor(&self) -> RangeCursor<'_> {
        RangeCursor {
            pairs: &self.pairs,
            pair: 0,
            in_range: false,
        }
    }
}

/// Forward-only membership test against a [`ReadRanges`]
///
/// Ids passed to [`contains`](Self::contains) must be non-decreasing.
#[derive(Debug, Clone)]
pub struct RangeCursor<'a> {
    pairs: &'a [(u64, u64)],
    /// Index of the first range whose upper bound is not behind the last id
    pair: usize,
    in_range: bool,
}
impl RangeCursor<'_> {
    /// Reports whether `id` is selected, advancing past ranges now behind it
    pub fn contains(&mut self, id: u64) -> bool {
        // the sentinel's upper bound is never behind an id
        while id > self.pairs[self.pair].1 {
            self.pair += 1;
        }
        self.in_range = id >= self.pairs[self.pair].0;
        self.in_range
    }

    /// Membership of the last id passed to [`contains`](Self::contains)
    #[must_use]
    pub fn in_range(&self) -> bool {
        self.in_range
    }

    /// Lower bound of the next range boundary ahead of the cursor
    #[must_use]
    pub fn next_boundary(&self) -> u64 {
        let (lo, hi) = self.pairs[self.pair];
        if self.in_range {
            hi
        } else {
            lo
        }
    }
}

fn parse_bound(text: &str, token: &str) -> Result<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::InvalidRange(token.to_string()).into());
    }
    match text.parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(RangeError::InvalidRange(token.to_string()).into()),
    }
}

/// Parses one selection token into a closed range
///
/// Accepted forms are `n`, `lo-hi`, `lo-$` (to the end), `$` (the last read) and
/// `$-hi`. Ids are 1-based.
pub fn parse_token(token: &str, last_read: Option<u64>) -> Result<(u64, u64)> {
    let (first, rest) = match token.split_once('-') {
        Some((first, rest)) => (first, Some(rest)),
        None => (token, None),
    };
    let last = || {
        last_read
            .filter(|&n| n > 0)
            .ok_or_else(|| RangeError::UnknownLastRead(token.to_string()))
    };

    let lo = if first.len() == 1 && first.starts_with(LAST_READ_SYMBOL) {
        last()?
    } else {
        parse_bound(first, token)?
    };
    let hi = match rest {
        None => lo,
        Some(rest) if rest.len() == 1 && rest.starts_with(LAST_READ_SYMBOL) => ReadRanges::MAX,
        Some(rest) => parse_bound(rest, token)?,
    };
    if lo > hi {
        return Err(RangeError::InvalidRange(token.to_string()).into());
    }
    Ok((lo, hi))
}

/// Returns true if `token` has the shape of a selection token
///
/// Every bound must be a positive id or [`LAST_READ_SYMBOL`]; the order of the bounds
/// is not checked. Used to tell a lone range argument from the path of an id file.
#[must_use]
pub fn is_range_token(token: &str) -> bool {
    let is_bound = |text: &str| {
        (text.len() == 1 && text.starts_with(LAST_READ_SYMBOL)) || parse_bound(text, token).is_ok()
    };
    match token.split_once('-') {
        Some((lo, hi)) => is_bound(lo) && is_bound(hi),
        None => is_bound(token),
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::error::Error;

    #[test]
    fn test_parse_forms() -> Result<()> {
        assert_eq!(parse_token("17", None)?, (17, 17));
        assert_eq!(parse_token("3-9", None)?, (3, 9));
        assert_eq!(parse_token("3-$", None)?, (3, ReadRanges::MAX));
        assert_eq!(parse_token("$", Some(500))?, (500, 500));
        assert_eq!(parse_token("$-$", Some(500))?, (500, ReadRanges::MAX));
        Ok(())
    }

    #[test]
    fn test_parse_errors() {
        for token in ["0", "-3", "a", "3-", "3-x", "3-0", "", "4.5", "+3"] {
            assert!(
                matches!(
                    parse_token(token, Some(10)),
                    Err(Error::RangeError(RangeError::InvalidRange(_)))
                ),
                "{token}"
            );
        }
        // inverted bounds name the token
        assert!(matches!(
            parse_token("9-3", None),
            Err(Error::RangeError(RangeError::InvalidRange(token))) if token == "9-3"
        ));
        assert!(matches!(
            parse_token("$", None),
            Err(Error::RangeError(RangeError::UnknownLastRead(_)))
        ));
    }

    #[test]
    fn test_merge_adjacent_and_overlapping() -> Result<()> {
        let ranges = ReadRanges::from_tokens(&["5-9", "1-5"], None)?;
        assert_eq!(ranges.ranges(), &[(1, 9)]);

        let ranges = ReadRanges::from_tokens(&["20", "1-3", "4", "10-12", "11-15", "7"], None)?;
        assert_eq!(ranges.ranges(), &[(1, 4), (7, 7), (10, 15), (20, 20)]);
        Ok(())
    }

    #[test]
    fn test_merge_idempotent() -> Result<()> {
        let ranges = ReadRanges::from_tokens(&["8-$", "2-4", "3-6", "12"], None)?;
        let again = ReadRanges::from_pairs(ranges.ranges().to_vec());
        assert_eq!(again, ranges);
        assert_eq!(ranges.ranges(), &[(2, 6), (8, ReadRanges::MAX)]);
        Ok(())
    }

    #[test]
    fn test_default_selects_everything() -> Result<()> {
        let ranges = ReadRanges::from_tokens::<&str>(&[], None)?;
        assert_eq!(ranges, ReadRanges::all());
        let mut cursor = ranges.cursor();
        assert!(cursor.contains(1));
        assert!(cursor.contains(1 << 40));
        Ok(())
    }

    #[test]
    fn test_last_read_only() -> Result<()> {
        let ranges = ReadRanges::from_tokens(&["$"], Some(500))?;
        let mut cursor = ranges.cursor();
        let selected: Vec<u64> = (1..=500).filter(|&id| cursor.contains(id)).collect();
        assert_eq!(selected, vec![500]);
        Ok(())
    }

    #[test]
    fn test_cursor_matches_brute_force() {
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..200 {
            let n_ranges = rng.random_range(0..6);
            let pairs: Vec<(u64, u64)> = (0..n_ranges)
                .map(|_| {
                    let lo = rng.random_range(1..60);
                    (lo, lo + rng.random_range(0..8))
                })
                .collect();
            let ranges = ReadRanges::from_pairs(pairs.clone());

            let mut ids: Vec<u64> = (0..80).map(|_| rng.random_range(1..80)).collect();
            ids.sort_unstable();

            let mut cursor = ranges.cursor();
            for id in ids {
                let expected = pairs.iter().any(|&(lo, hi)| lo <= id && id <= hi);
                assert_eq!(cursor.contains(id), expected, "id {id} in {pairs:?}");
                assert_eq!(cursor.in_range(), expected);
            }
        }
    }

    #[test]
    fn test_cursor_boundaries() {
        let ranges = ReadRanges::from_pairs(vec![(3, 4), (8, 8)]);
        let mut cursor = ranges.cursor();
        assert!(!cursor.contains(1));
        assert_eq!(cursor.next_boundary(), 3);
        assert!(cursor.contains(3));
        assert_eq!(cursor.next_boundary(), 4);
        assert!(cursor.contains(4));
        assert!(!cursor.contains(5));
        assert_eq!(cursor.next_boundary(), 8);
        assert!(cursor.contains(8));
        assert!(!cursor.contains(9));
        assert_eq!(cursor.next_boundary(), ReadRanges::MAX);
    }

    #[test]
    fn test_id_reader() -> Result<()> {
        let input = "12\n3 4\n\n7\n3\n";
        let ranges = ReadRanges::from_id_reader(input.as_bytes(), "ids.txt")?;
        assert_eq!(ranges.ranges(), &[(3, 4), (7, 7), (12, 12)]);

        let err = ReadRanges::from_id_reader("5\n6\nseven\n".as_bytes(), "ids.txt").unwrap_err();
        assert!(matches!(
            err,
            Error::RangeError(RangeError::InvalidId { item: 3, .. })
        ));
        assert!(ReadRanges::from_id_reader("0\n".as_bytes(), "ids.txt").is_err());
        Ok(())
    }

    #[test]
    fn test_is_range_token() {
        assert!(is_range_token("12"));
        assert!(is_range_token("$"));
        assert!(is_range_token("9-3"));
        assert!(is_range_token("4-$"));
        assert!(!is_range_token("reads.txt"));
        assert!(!is_range_token("0"));
        assert!(!is_range_token("3-4-5"));
        assert!(!is_range_token("-"));
    }
}
