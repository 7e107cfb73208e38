use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Line- and length-delimited framing over an async byte stream.
///
/// Holds a growable read buffer that is refilled in chunks; any bytes
/// past the delivered line or exact read stay buffered for the next
/// call. The wrapped stream is reachable through [`FrameReader::get_mut`]
/// so a connection can write requests through the same object.
#[derive(Debug)]
pub struct FrameReader<S> {
    stream: S,
    buffer: BytesMut,
    /// How far the CRLF scan has progressed into `buffer`; avoids
    /// rescanning the prefix after every refill.
    scanned: usize,
}

const READ_CHUNK: usize = 4 * 1024;

impl<S: AsyncRead + Unpin> FrameReader<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            scanned: 0,
        }
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Bytes up to (excluding) the next CRLF, or `None` on clean EOF.
    ///
    /// A stray CR not followed by LF is not a terminator. EOF with a
    /// partial line buffered is [`Error::Eof`].
    pub async fn read_line(&mut self) -> Result<Option<Bytes>> {
        loop {
            // Scan for the 13,10 pair; resume where the last pass left off.
            let start = self.scanned.saturating_sub(1);
            if let Some(pos) = find_crlf(&self.buffer[..], start) {
                let mut line = self.buffer.split_to(pos + 2);
                line.truncate(pos);
                self.scanned = 0;
                return Ok(Some(line.freeze()));
            }
            self.scanned = self.buffer.len();

            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(Error::Eof);
            }
        }
    }

    /// Exactly `n` bytes, or [`Error::Eof`] if the stream ends first.
    pub async fn read_exact(&mut self, n: usize) -> Result<Bytes> {
        while self.buffer.len() < n {
            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Err(Error::Eof);
            }
        }
        self.scanned = 0;
        Ok(self.buffer.split_to(n).freeze())
    }

    /// Up to `n` leading bytes without consuming them. Returns fewer
    /// only when the stream ends before `n` bytes arrive.
    pub async fn peek(&mut self, n: usize) -> Result<&[u8]> {
        while self.buffer.len() < n {
            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                break;
            }
        }
        Ok(&self.buffer[..self.buffer.len().min(n)])
    }
}

fn find_crlf(haystack: &[u8], start: usize) -> Option<usize> {
    let mut i = start;
    while i + 1 < haystack.len() {
        if haystack[i] == b'\r' && haystack[i + 1] == b'\n' {
            return Some(i);
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lines_and_leftovers() {
        let mut reader = FrameReader::new(&b"+OK\r\n:42\r\n"[..]);
        assert_eq!(reader.read_line().await.unwrap().unwrap(), &b"+OK"[..]);
        assert_eq!(reader.read_line().await.unwrap().unwrap(), &b":42"[..]);
        assert_eq!(reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn stray_cr_is_not_a_terminator() {
        let mut reader = FrameReader::new(&b"+a\rb\r\n"[..]);
        assert_eq!(reader.read_line().await.unwrap().unwrap(), &b"+a\rb"[..]);
    }

    #[tokio::test]
    async fn eof_mid_line() {
        let mut reader = FrameReader::new(&b"+OK"[..]);
        assert!(matches!(reader.read_line().await, Err(Error::Eof)));
    }

    #[tokio::test]
    async fn exact_preserves_remainder() {
        let mut reader = FrameReader::new(&b"hello\r\nrest"[..]);
        assert_eq!(reader.read_exact(5).await.unwrap(), &b"hello"[..]);
        assert_eq!(reader.read_exact(2).await.unwrap(), &b"\r\n"[..]);
        assert_eq!(reader.read_exact(4).await.unwrap(), &b"rest"[..]);
    }

    #[tokio::test]
    async fn exact_truncation_is_eof() {
        let mut reader = FrameReader::new(&b"abc"[..]);
        assert!(matches!(reader.read_exact(5).await, Err(Error::Eof)));
    }

    #[tokio::test]
    async fn peek_does_not_consume() {
        let mut reader = FrameReader::new(&b"$3\r\nfoo\r\n"[..]);
        assert_eq!(reader.peek(1).await.unwrap(), b"$");
        assert_eq!(reader.peek(4).await.unwrap(), b"$3\r\n");
        assert_eq!(reader.read_line().await.unwrap().unwrap(), &b"$3"[..]);
    }

    #[tokio::test]
    async fn peek_past_eof_returns_short() {
        let mut reader = FrameReader::new(&b"ab"[..]);
        assert_eq!(reader.peek(8).await.unwrap(), b"ab");
    }
}
