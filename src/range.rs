//! Playlist item selection (`"1-5,7,10-"`)
//!
//! Indices are 1-based, matching yt-dlp's `--playlist-items`. A segment with no end
//! (`"10-"`) selects everything from that index onward.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One inclusive segment of a [`RangeSpec`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeSegment {
    /// First selected index
    pub start: usize,
    /// Last selected index (None = open-ended)
    pub end: Option<usize>,
}

impl RangeSegment {
    fn contains(&self, index: usize) -> bool {
        index >= self.start && self.end.is_none_or(|end| index <= end)
    }
}

/// Parsed playlist item selection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RangeSpec {
    segments: Vec<RangeSegment>,
}

impl RangeSpec {
    /// Parse a comma separated list of indices and ranges
    pub fn parse(spec: &str) -> Result<Self> {
        let mut segments = Vec::new();
        for part in spec.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(invalid(spec, "empty segment"));
            }
            let segment = match part.split_once('-') {
                Some((start, end)) => {
                    let start = parse_index(spec, start)?;
                    let end = end.trim();
                    let end = if end.is_empty() {
                        None
                    } else {
                        Some(parse_index(spec, end)?)
                    };
                    if end.is_some_and(|end| end < start) {
                        return Err(invalid(spec, &format!("range {part} is reversed")));
                    }
                    RangeSegment { start, end }
                }
                None => {
                    let index = parse_index(spec, part)?;
                    RangeSegment {
                        start: index,
                        end: Some(index),
                    }
                }
            };
            segments.push(segment);
        }
        Ok(Self { segments })
    }

    /// Whether the 1-based `index` is selected
    pub fn contains(&self, index: usize) -> bool {
        self.segments.iter().any(|s| s.contains(index))
    }

    /// Parsed segments in the order they were written
    pub fn segments(&self) -> &[RangeSegment] {
        &self.segments
    }
}

fn parse_index(spec: &str, raw: &str) -> Result<usize> {
    let value: usize = raw
        .trim()
        .parse()
        .map_err(|_| invalid(spec, &format!("'{}' is not a positive index", raw.trim())))?;
    if value == 0 {
        return Err(invalid(spec, "indices start at 1"));
    }
    Ok(value)
}

fn invalid(spec: &str, reason: &str) -> Error {
    Error::config(
        format!("invalid playlist range '{spec}': {reason}"),
        "range",
    )
}

impl std::str::FromStr for RangeSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RangeSpec {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<RangeSpec> for String {
    fn from(spec: RangeSpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match segment.end {
                Some(end) if end == segment.start => write!(f, "{}", segment.start)?,
                Some(end) => write!(f, "{}-{}", segment.start, end)?,
                None => write!(f, "{}-", segment.start)?,
            }
        }
        Ok(())
    }
}
