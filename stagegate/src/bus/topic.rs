//! Hierarchical topic patterns.
//!
//! Topics are dot-separated segments. Patterns may use `*` to match exactly
//! one segment and `#` (last segment only) to match zero or more trailing
//! segments.

use crate::errors::GateError;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

const SINGLE_WILDCARD: &str = "*";
const MULTI_WILDCARD: &str = "#";

#[allow(clippy::expect_used)]
fn literal_segment_regex() -> &'static Regex {
    static LITERAL: OnceLock<Regex> = OnceLock::new();
    LITERAL.get_or_init(|| Regex::new(r"^[^*#\s]+$").expect("literal segment regex is valid"))
}

/// Returns true if `segment` can sit between two dots of a topic: non-empty,
/// with no dot, wildcard or whitespace.
#[must_use]
pub fn is_topic_segment(segment: &str) -> bool {
    !segment.contains('.') && literal_segment_regex().is_match(segment)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Single,
    Multi,
}

/// A parsed subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl TopicPattern {
    /// Parses a pattern such as `status.*` or `controlpoint.opened.#`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidTopicPattern`] for empty patterns, empty
    /// segments, a `#` that is not the final segment, or literal segments
    /// containing wildcard characters or whitespace.
    pub fn parse(pattern: &str) -> Result<Self, GateError> {
        let invalid = |reason: &str| GateError::InvalidTopicPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if pattern.is_empty() {
            return Err(invalid("pattern is empty"));
        }

        let parts: Vec<&str> = pattern.split('.').collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());

        for (index, part) in parts.iter().enumerate() {
            let segment = match *part {
                "" => return Err(invalid("empty segment")),
                SINGLE_WILDCARD => Segment::Single,
                MULTI_WILDCARD if index == last => Segment::Multi,
                MULTI_WILDCARD => return Err(invalid("'#' must be the last segment")),
                literal if literal_segment_regex().is_match(literal) => {
                    Segment::Literal(literal.to_string())
                }
                _ => return Err(invalid("wildcards must occupy a whole segment")),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// Returns the pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if the pattern contains no wildcards.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }

    /// Returns true if `topic` matches this pattern.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        let parts: Vec<&str> = topic.split('.').collect();
        let mut position = 0;

        for segment in &self.segments {
            match segment {
                Segment::Multi => return true,
                Segment::Single => {
                    if position >= parts.len() {
                        return false;
                    }
                }
                Segment::Literal(literal) => {
                    if parts.get(position) != Some(&literal.as_str()) {
                        return false;
                    }
                }
            }
            position += 1;
        }

        position == parts.len()
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for TopicPattern {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
