use crate::store::StoreError;
use std::fmt::{Display, Formatter};

/// A stream entry id: lexical form `<ms>-<seq>`, ordered as the integer
/// pair, never as strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct EntryId {
    pub ms: u64,
    pub seq: u64,
}

impl EntryId {
    pub const MIN: EntryId = EntryId { ms: 0, seq: 0 };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Parse `<ms>-<seq>`; a bare `<ms>` means sequence 0.
    pub fn parse(text: &str) -> Result<Self, StoreError> {
        match text.split_once('-') {
            Some((ms, seq)) => {
                let ms = ms.parse().map_err(|_| StoreError::InvalidStreamId)?;
                let seq = seq.parse().map_err(|_| StoreError::InvalidStreamId)?;
                Ok(Self { ms, seq })
            }
            None => {
                let ms = text.parse().map_err(|_| StoreError::InvalidStreamId)?;
                Ok(Self { ms, seq: 0 })
            }
        }
    }
}

impl Display for EntryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// The id argument accepted by XADD.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdPattern {
    /// `*` — current wall-clock milliseconds, sequence 0.
    Auto,
    /// `<ms>-*` — caller-provided milliseconds, generated sequence.
    AutoSeq(u64),
    /// `<ms>-<seq>` — fully explicit.
    Explicit(EntryId),
}

impl IdPattern {
    pub fn parse(text: &str) -> Result<Self, StoreError> {
        if text == "*" {
            return Ok(Self::Auto);
        }

        match text.strip_suffix("-*") {
            Some(ms) => {
                let ms = ms.parse().map_err(|_| StoreError::InvalidStreamId)?;
                Ok(Self::AutoSeq(ms))
            }
            None => Ok(Self::Explicit(EntryId::parse(text)?)),
        }
    }

    /// Resolve to a concrete id given the last entry of the target stream.
    /// A generated sequence continues the last entry's run within the same
    /// millisecond; otherwise it starts at 0, except that millisecond 0
    /// starts at 1 so `0-0` is never produced.
    pub fn resolve(self, last: Option<EntryId>, now_ms: u64) -> EntryId {
        match self {
            Self::Explicit(id) => id,
            Self::Auto => EntryId::new(now_ms, 0),
            Self::AutoSeq(ms) => match last {
                Some(last) if last.ms == ms => EntryId::new(ms, last.seq + 1),
                _ if ms == 0 => EntryId::new(0, 1),
                _ => EntryId::new(ms, 0),
            },
        }
    }
}

/// One bound of an XRANGE query. A bound given without a `-seq` part
/// compares on the millisecond half alone: the start excludes that whole
/// millisecond, the end includes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeBound {
    Unbounded,
    MsOnly(u64),
    Exact(EntryId),
}

impl RangeBound {
    pub fn parse_start(text: &str) -> Result<Self, StoreError> {
        Self::parse(text, "-")
    }

    pub fn parse_end(text: &str) -> Result<Self, StoreError> {
        Self::parse(text, "+")
    }

    fn parse(text: &str, sentinel: &str) -> Result<Self, StoreError> {
        if text == sentinel {
            return Ok(Self::Unbounded);
        }

        if text.contains('-') {
            Ok(Self::Exact(EntryId::parse(text)?))
        } else {
            let ms = text.parse().map_err(|_| StoreError::InvalidStreamId)?;
            Ok(Self::MsOnly(ms))
        }
    }

    pub fn admits_from_start(&self, id: EntryId) -> bool {
        match self {
            Self::Unbounded => true,
            Self::MsOnly(ms) => id.ms > *ms,
            Self::Exact(bound) => id >= *bound,
        }
    }

    pub fn admits_until_end(&self, id: EntryId) -> bool {
        match self {
            Self::Unbounded => true,
            Self::MsOnly(ms) => id.ms <= *ms,
            Self::Exact(bound) => id <= *bound,
        }
    }
}

/// Immutable once appended. `arrival_ms` is the wall-clock append time,
/// used by blocking reads to recognize entries newer than their start.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamEntry {
    pub id: EntryId,
    pub fields: Vec<(String, String)>,
    pub arrival_ms: u64,
}
