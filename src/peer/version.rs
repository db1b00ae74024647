use std::cmp::Ordering;
use std::fmt;

use serde::Deserialize;

/// Version token issued by the event source for a peer object.
///
/// Tokens are opaque strings. How two tokens relate is decided by a
/// [`VersionOrdering`], never by the token type itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Version(String);

impl Version {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for Version {
    fn from(v: u64) -> Self {
        Self(v.to_string())
    }
}

/// Comparator contract used by the staleness guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionOrdering {
    /// Unsigned integer comparison when both tokens are numeric,
    /// otherwise the same as [`VersionOrdering::Opaque`].
    #[default]
    Numeric,
    /// Byte-wise string comparison.
    Lexical,
    /// Equality only: any different token is newer.
    Opaque,
}

impl VersionOrdering {
    /// Returns the canonical config/log label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Lexical => "lexical",
            Self::Opaque => "opaque",
        }
    }

    /// Returns true if `candidate` supersedes `current`.
    pub fn is_newer(self, current: &Version, candidate: &Version) -> bool {
        match self {
            Self::Numeric => match (parse_numeric(current), parse_numeric(candidate)) {
                (Some(a), Some(b)) => b > a,
                _ => current != candidate,
            },
            Self::Lexical => candidate.as_str().cmp(current.as_str()) == Ordering::Greater,
            Self::Opaque => current != candidate,
        }
    }
}

fn parse_numeric(v: &Version) -> Option<u64> {
    let s = v.as_str();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
