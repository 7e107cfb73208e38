use std::collections::HashMap;

use crate::error::{Error, Result};

/// A decoded RESP2 reply frame.
///
/// Server error lines (`-ERR ...`) never appear here; the decoder
/// raises them as [`Error::ErrorReply`] so that only well-formed data
/// reaches the accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK\r\n` style line, no CR or LF in the body
    SimpleString(String),
    /// `:42\r\n`
    Integer(i64),
    /// `$5\r\nhello\r\n`, or null when the length is -1
    Bulk(Option<Vec<u8>>),
    /// `*2\r\n...`, or null when the count is -1
    Array(Option<Vec<Reply>>),
}

impl Reply {
    /// Sentinel used by the pipeline for submissions that have been
    /// queued but not yet flushed.
    pub(crate) fn queued_ok() -> Self {
        Reply::SimpleString("OK".to_string())
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Bulk(None) | Reply::Array(None))
    }

    /// View as text. Accepts a simple string or a non-null UTF-8 bulk.
    pub fn as_str(&self) -> Result<&str> {
        match self {
            Reply::SimpleString(s) => Ok(s),
            Reply::Bulk(Some(bytes)) => std::str::from_utf8(bytes)
                .map_err(|_| Error::InvalidState("bulk payload is not UTF-8".to_string())),
            other => Err(other.wrong_shape("text")),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Reply::Integer(n) => Ok(*n),
            other => Err(other.wrong_shape("integer")),
        }
    }

    pub fn into_text(self) -> Result<String> {
        match self {
            Reply::SimpleString(s) => Ok(s),
            Reply::Bulk(Some(bytes)) => String::from_utf8(bytes)
                .map_err(|_| Error::InvalidState("bulk payload is not UTF-8".to_string())),
            other => Err(other.wrong_shape("text")),
        }
    }

    /// Consume as a bulk payload; a null bulk becomes `None`.
    pub fn into_opt_bytes(self) -> Result<Option<Vec<u8>>> {
        match self {
            Reply::Bulk(bytes) => Ok(bytes),
            Reply::SimpleString(s) => Ok(Some(s.into_bytes())),
            other => Err(other.wrong_shape("bulk")),
        }
    }

    /// Consume as text; a null bulk becomes `None`.
    pub fn into_opt_text(self) -> Result<Option<String>> {
        match self.into_opt_bytes()? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| Error::InvalidState("bulk payload is not UTF-8".to_string())),
            None => Ok(None),
        }
    }

    pub fn into_array(self) -> Result<Vec<Reply>> {
        match self {
            Reply::Array(Some(items)) => Ok(items),
            other => Err(other.wrong_shape("array")),
        }
    }

    /// Consume as an array; a null array becomes `None`.
    pub fn into_opt_array(self) -> Result<Option<Vec<Reply>>> {
        match self {
            Reply::Array(items) => Ok(items),
            other => Err(other.wrong_shape("array")),
        }
    }

    /// Flatten an array of bulks into strings. Null elements decode to
    /// empty strings only for callers that opted in via
    /// [`Reply::into_opt_text_vec`]; here they are a shape error.
    pub fn into_text_vec(self) -> Result<Vec<String>> {
        self.into_array()?
            .into_iter()
            .map(Reply::into_text)
            .collect()
    }

    /// Array of nullable bulks, as MGET returns.
    pub fn into_opt_text_vec(self) -> Result<Vec<Option<String>>> {
        self.into_array()?
            .into_iter()
            .map(Reply::into_opt_text)
            .collect()
    }

    /// Flat field-value array (HGETALL style) into a map.
    pub fn into_text_map(self) -> Result<HashMap<String, String>> {
        let items = self.into_array()?;
        if items.len() % 2 != 0 {
            return Err(Error::InvalidState(
                "field-value array has odd length".to_string(),
            ));
        }
        let mut map = HashMap::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            map.insert(field.into_text()?, value.into_text()?);
        }
        Ok(map)
    }

    fn wrong_shape(&self, wanted: &str) -> Error {
        let got = match self {
            Reply::SimpleString(_) => "simple string",
            Reply::Integer(_) => "integer",
            Reply::Bulk(Some(_)) => "bulk",
            Reply::Bulk(None) => "null bulk",
            Reply::Array(Some(_)) => "array",
            Reply::Array(None) => "null array",
        };
        Error::InvalidState(format!("expected {wanted} reply, got {got}"))
    }
}
