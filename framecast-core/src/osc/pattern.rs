//! Address pattern matching for handler registration.
//!
//! Patterns look like addresses with `*` wildcards: `/camera/*` or
//! `/rig/*/reset`. A `*` in the middle of a pattern matches exactly one
//! path segment; a trailing `*` matches the whole remainder of the
//! address, so `/camera/*` matches both `/camera/zoom` and
//! `/camera/lens/zoom`.

use crate::error::FramecastError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard,
}

/// A compiled address pattern.
#[derive(Debug, Clone)]
pub struct AddressPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl AddressPattern {
    /// Compile a pattern string.
    ///
    /// Patterns follow address syntax: ASCII, starting with `/`, with `*`
    /// only as a full segment (`/a/*/b`, not `/a/fo*`).
    pub fn parse(pattern: &str) -> Result<Self, FramecastError> {
        let invalid = || FramecastError::InvalidPattern(pattern.to_string());

        if !pattern.starts_with('/') || !pattern.is_ascii() || pattern.contains('\0') {
            return Err(invalid());
        }

        let mut segments = Vec::new();
        for part in pattern[1..].split('/') {
            if part.is_empty() {
                return Err(invalid());
            }
            segments.push(match part {
                "*" => Segment::Wildcard,
                literal if literal.contains('*') => return Err(invalid()),
                literal => Segment::Literal(literal.to_string()),
            });
        }
        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// The pattern source text.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `address` matches this pattern.
    pub fn matches(&self, address: &str) -> bool {
        let Some(path) = address.strip_prefix('/') else {
            return false;
        };
        let mut parts = path.split('/');

        for (i, segment) in self.segments.iter().enumerate() {
            let trailing = i == self.segments.len() - 1;
            let Some(part) = parts.next() else {
                return false;
            };
            match segment {
                // A trailing wildcard swallows the rest of the address.
                Segment::Wildcard if trailing => return true,
                Segment::Wildcard => {}
                Segment::Literal(lit) => {
                    if lit != part {
                        return false;
                    }
                }
            }
        }
        parts.next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pat(s: &str) -> AddressPattern {
        AddressPattern::parse(s).unwrap()
    }

    #[test]
    fn literal_patterns_match_exactly() {
        let p = pat("/camera/exposure");
        assert!(p.matches("/camera/exposure"));
        assert!(!p.matches("/camera/exposur"));
        assert!(!p.matches("/camera/exposure/lock"));
        assert!(!p.matches("/camera"));
    }

    #[test]
    fn mid_pattern_wildcard_matches_one_segment() {
        let p = pat("/rig/*/reset");
        assert!(p.matches("/rig/cam1/reset"));
        assert!(p.matches("/rig/cam2/reset"));
        assert!(!p.matches("/rig/reset"));
        assert!(!p.matches("/rig/a/b/reset"));
    }

    #[test]
    fn trailing_wildcard_matches_remainder() {
        let p = pat("/camera/*");
        assert!(p.matches("/camera/zoom"));
        assert!(p.matches("/camera/lens/zoom"));
        assert!(!p.matches("/camera"));
        assert!(!p.matches("/lights/zoom"));
    }

    #[test]
    fn bare_wildcard_matches_everything() {
        let p = pat("/*");
        assert!(p.matches("/a"));
        assert!(p.matches("/a/b/c"));
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        assert!(AddressPattern::parse("camera").is_err());
        assert!(AddressPattern::parse("/").is_err());
        assert!(AddressPattern::parse("/a//b").is_err());
        assert!(AddressPattern::parse("/a/fo*").is_err());
        assert!(AddressPattern::parse("/caméra/*").is_err());
    }

    #[test]
    fn raw_text_is_preserved() {
        assert_eq!(pat("/camera/*").as_str(), "/camera/*");
    }
}
