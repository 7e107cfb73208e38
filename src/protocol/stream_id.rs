use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::protocol::frame::Reply;
use crate::value::Value;

/// Identifier of one entry in a server-side stream: the entry's
/// millisecond timestamp and a sequence number within that millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    pub unix_ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub fn new(unix_ms: u64, seq: u64) -> Self {
        Self { unix_ms, seq }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.unix_ms, self.seq)
    }
}

impl FromStr for StreamId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || Error::InvalidState(format!("malformed stream id '{s}'"));
        match s.split_once('-') {
            Some((ms, seq)) => Ok(Self {
                unix_ms: ms.parse().map_err(|_| malformed())?,
                seq: seq.parse().map_err(|_| malformed())?,
            }),
            // The server also accepts a bare millisecond value.
            None => Ok(Self {
                unix_ms: s.parse().map_err(|_| malformed())?,
                seq: 0,
            }),
        }
    }
}

/// An entry-id argument to a stream command, covering the sentinel
/// forms next to concrete ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryId {
    /// A concrete `ms-seq` id
    Id(StreamId),
    /// `*` — let the server assign the id (XADD)
    Auto,
    /// `-` — smallest id in range queries
    RangeMin,
    /// `+` — largest id in range queries
    RangeMax,
    /// `$` — current tail; only entries arriving afterwards (XREAD)
    Tail,
    /// `>` — entries never delivered to this consumer group
    Undelivered,
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryId::Id(id) => id.fmt(f),
            EntryId::Auto => f.write_str("*"),
            EntryId::RangeMin => f.write_str("-"),
            EntryId::RangeMax => f.write_str("+"),
            EntryId::Tail => f.write_str("$"),
            EntryId::Undelivered => f.write_str(">"),
        }
    }
}

impl From<StreamId> for EntryId {
    fn from(id: StreamId) -> Self {
        EntryId::Id(id)
    }
}

impl From<EntryId> for Value {
    fn from(id: EntryId) -> Self {
        Value::Text(id.to_string())
    }
}

/// One decoded stream entry: its id and the field-value pairs in
/// server order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(String, String)>,
}

impl StreamEntry {
    /// Decode one `[id, [field, value, ...]]` reply element.
    pub fn from_reply(reply: Reply) -> Result<Self> {
        let mut parts = reply.into_array()?.into_iter();
        let (id, fields) = match (parts.next(), parts.next()) {
            (Some(id), Some(fields)) => (id, fields),
            _ => {
                return Err(Error::InvalidState(
                    "stream entry is not an [id, fields] pair".to_string(),
                ));
            }
        };

        let id: StreamId = id.into_text()?.parse()?;

        let flat = fields.into_array()?;
        if flat.len() % 2 != 0 {
            return Err(Error::InvalidState(
                "stream entry has odd field-value count".to_string(),
            ));
        }
        let mut pairs = Vec::with_capacity(flat.len() / 2);
        let mut iter = flat.into_iter();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            pairs.push((field.into_text()?, value.into_text()?));
        }

        Ok(Self { id, fields: pairs })
    }
}
