//! Page range expressions
//!
//! Parses strings like `"1-3, 5, 8-10"` into a [`PageSelection`] of
//! zero-based page indices. The grammar is
//!
//! ```text
//! RANGE := TOKEN (',' TOKEN)*
//! TOKEN := NUMBER | NUMBER '-' NUMBER
//! ```
//!
//! Page numbers are 1-based and inclusive. The parser takes no page
//! count, so a selection can name pages a document does not have; callers
//! clamp with [`PageSelection::within`] and report the rest with
//! [`PageSelection::out_of_range`].

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("page range is empty")]
    Empty,

    #[error("empty entry in page range at position {position}")]
    EmptyToken { position: usize },

    #[error("missing page number in '{token}'")]
    MissingNumber { token: String },

    #[error("'{field}' is not a page number (in '{token}')")]
    NotANumber { token: String, field: String },

    #[error("page number {field} is too large")]
    TooLarge { field: String },

    #[error("page numbers start at 1 (in '{token}')")]
    ZeroPage { token: String },

    #[error("start {start} > end {end}")]
    Reversed { start: usize, end: usize },
}

/// A set of zero-based page indices.
///
/// Stored as sorted, non-overlapping, non-adjacent inclusive spans so that a
/// range like `1-1000000` costs one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSelection {
    spans: Vec<(usize, usize)>,
}

impl PageSelection {
    /// Selection covering every index in `0..page_count`.
    pub fn all(page_count: usize) -> Self {
        if page_count == 0 {
            return Self::default();
        }
        Self {
            spans: vec![(0, page_count - 1)],
        }
    }

    pub fn from_indices<I: IntoIterator<Item = usize>>(indices: I) -> Self {
        let spans = indices.into_iter().map(|i| (i, i)).collect();
        Self::normalized(spans)
    }

    fn normalized(mut spans: Vec<(usize, usize)>) -> Self {
        spans.sort_unstable();
        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
        for (start, end) in spans {
            match merged.last_mut() {
                Some(last) if start <= last.1.saturating_add(1) => {
                    last.1 = last.1.max(end);
                }
                _ => merged.push((start, end)),
            }
        }
        Self { spans: merged }
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Number of distinct indices in the selection.
    pub fn len(&self) -> usize {
        self.spans
            .iter()
            .fold(0usize, |acc, (s, e)| acc.saturating_add(e - s + 1))
    }

    pub fn contains(&self, index: usize) -> bool {
        self.spans
            .binary_search_by(|&(start, end)| {
                if end < index {
                    std::cmp::Ordering::Less
                } else if start > index {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// All indices, ascending.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.spans.iter().flat_map(|&(s, e)| s..=e)
    }

    /// Indices that exist in a document of `page_count` pages, ascending.
    pub fn within(&self, page_count: usize) -> impl Iterator<Item = usize> + '_ {
        self.spans
            .iter()
            .take_while(move |&&(start, _)| start < page_count)
            .flat_map(move |&(start, end)| start..=end.min(page_count - 1))
    }

    /// 1-based page spans that fall beyond a document of `page_count` pages.
    pub fn out_of_range(&self, page_count: usize) -> Vec<RangeInclusive<usize>> {
        self.spans
            .iter()
            .filter(|&&(_, end)| end >= page_count)
            .map(|&(start, end)| (start.max(page_count) + 1)..=(end + 1))
            .collect()
    }
}

impl FromIterator<usize> for PageSelection {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self::from_indices(iter)
    }
}

impl FromStr for PageSelection {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_ranges(s)
    }
}

/// Canonical 1-based form, e.g. `1,3-5,8`.
impl fmt::Display for PageSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, &(start, end)) in self.spans.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if start == end {
                write!(f, "{}", start + 1)?;
            } else {
                write!(f, "{}-{}", start + 1, end + 1)?;
            }
        }
        Ok(())
    }
}

/// Parse a page range string like "1-3, 5, 8-10" into zero-based indices.
///
/// The first malformed token, scanning left to right, is reported; no
/// partial selection is ever returned.
pub fn parse_ranges(input: &str) -> Result<PageSelection, RangeError> {
    if input.trim().is_empty() {
        return Err(RangeError::Empty);
    }

    let mut spans = Vec::new();

    for (position, part) in input.split(',').enumerate() {
        let part = part.trim();
        if part.is_empty() {
            return Err(RangeError::EmptyToken {
                position: position + 1,
            });
        }

        if let Some((start, end)) = part.split_once('-') {
            let start = parse_page_number(start, part)?;
            let end = parse_page_number(end, part)?;

            if start > end {
                return Err(RangeError::Reversed { start, end });
            }

            spans.push((start - 1, end - 1));
        } else {
            let page = parse_page_number(part, part)?;
            spans.push((page - 1, page - 1));
        }
    }

    Ok(PageSelection::normalized(spans))
}

fn parse_page_number(field: &str, token: &str) -> Result<usize, RangeError> {
    let field = field.trim();
    if field.is_empty() {
        return Err(RangeError::MissingNumber {
            token: token.to_string(),
        });
    }
    if !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::NotANumber {
            token: token.to_string(),
            field: field.to_string(),
        });
    }

    let page: usize = field.parse().map_err(|_| RangeError::TooLarge {
        field: field.to_string(),
    })?;
    if page == 0 {
        return Err(RangeError::ZeroPage {
            token: token.to_string(),
        });
    }
    Ok(page)
}
