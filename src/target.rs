//! Probe target naming.
//!
//! A target identifier is the eight identity fields of a (self, peer) pair
//! joined by a single space, in [`LABEL_NAMES`] order. The same string is
//! handed to the probing engine when a target is created and comes back as
//! the key of its exported statistics, so it must decode to the same fields.

use std::fmt;

use thiserror::Error;

use crate::peer::Peer;

/// Separator between identity fields.
pub const SEPARATOR: char = ' ';

/// Number of identity fields in a target identifier.
pub const FIELD_COUNT: usize = 8;

/// Label names, in encoding order.
pub const LABEL_NAMES: [&str; FIELD_COUNT] = [
    "src_pod",
    "src_node",
    "src_pod_ip",
    "src_host_ip",
    "dst_pod",
    "dst_node",
    "dst_pod_ip",
    "dst_host_ip",
];

/// Errors decoding a target identifier.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TargetIdError {
    #[error("malformed target id {id:?}: expected 8 fields, got {fields}")]
    Malformed { id: String, fields: usize },
}

/// Stable identifier of a probe target from `src` to `dst`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(String);

impl TargetId {
    /// Derive the identifier for probing `dst` from `src`.
    pub fn new(src: &Peer, dst: &Peer) -> Self {
        let fields = [
            src.name.as_str(),
            src.node.as_str(),
            src.probe_address.as_str(),
            src.host_address.as_str(),
            dst.name.as_str(),
            dst.node.as_str(),
            dst.probe_address.as_str(),
            dst.host_address.as_str(),
        ];

        let mut buf = String::with_capacity(fields.iter().map(|f| f.len() + 1).sum());
        for (i, f) in fields.iter().enumerate() {
            if i > 0 {
                buf.push(SEPARATOR);
            }
            buf.push_str(f);
        }

        Self(buf)
    }

    /// Wrap a raw identifier as received from the probing engine.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the identity fields, rejecting keys with fewer than eight.
    ///
    /// The last field keeps any remaining separators, mirroring how the
    /// fields were joined.
    pub fn labels(&self) -> Result<TargetLabels<'_>, TargetIdError> {
        let mut values = [""; FIELD_COUNT];
        let mut n = 0;
        for (slot, part) in values.iter_mut().zip(self.0.splitn(FIELD_COUNT, SEPARATOR)) {
            *slot = part;
            n += 1;
        }

        if n < FIELD_COUNT {
            return Err(TargetIdError::Malformed {
                id: self.0.clone(),
                fields: n,
            });
        }

        Ok(TargetLabels { values })
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Label values decoded from a [`TargetId`], in [`LABEL_NAMES`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetLabels<'a> {
    values: [&'a str; FIELD_COUNT],
}

impl<'a> TargetLabels<'a> {
    pub fn values(&self) -> &[&'a str; FIELD_COUNT] {
        &self.values
    }

    pub fn src_pod(&self) -> &'a str {
        self.values[0]
    }

    pub fn dst_pod(&self) -> &'a str {
        self.values[4]
    }

    pub fn dst_pod_ip(&self) -> &'a str {
        self.values[6]
    }
}
