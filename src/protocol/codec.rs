use std::future::Future;
use std::pin::Pin;

use tokio::io::AsyncRead;

use crate::error::{Error, Result};
use crate::protocol::frame::Reply;
use crate::protocol::reader::FrameReader;
use crate::value::Value;

/// Encode one request frame into `buf`: an array of bulk strings, the
/// command name first. The buffer is assembled completely so the caller
/// can hand it to the socket in a single write; `Nil` arguments are
/// filtered before the element count is computed.
pub fn encode_command(buf: &mut Vec<u8>, command: &str, args: &[Value]) {
    let count = 1 + args.iter().filter(|arg| **arg != Value::Nil).count();

    buf.push(b'*');
    buf.extend_from_slice(count.to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");

    write_bulk(buf, command.as_bytes());
    for arg in args {
        match arg {
            Value::Text(s) => write_bulk(buf, s.as_bytes()),
            Value::Int(n) => write_bulk(buf, n.to_string().as_bytes()),
            Value::Bytes(b) => write_bulk(buf, b),
            Value::Nil => {}
        }
    }
}

fn write_bulk(buf: &mut Vec<u8>, payload: &[u8]) {
    buf.push(b'$');
    buf.extend_from_slice(payload.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(payload);
    buf.extend_from_slice(b"\r\n");
}

/// Decode one reply frame, dispatching on the leading byte.
///
/// Server `-` lines come back as `Err(ErrorReply)`. End-of-stream
/// before a complete frame is `Err(Eof)`; an unknown leading byte is
/// `Err(InvalidState)`.
pub async fn read_reply<S>(reader: &mut FrameReader<S>) -> Result<Reply>
where
    S: AsyncRead + Unpin + Send,
{
    read_reply_rec(reader).await
}

// Arrays nest, so the decoder recurses through a boxed future.
fn read_reply_rec<'a, S>(
    reader: &'a mut FrameReader<S>,
) -> Pin<Box<dyn Future<Output = Result<Reply>> + Send + 'a>>
where
    S: AsyncRead + Unpin + Send,
{
    Box::pin(async move {
        let line = reader.read_line().await?.ok_or(Error::Eof)?;
        let (tag, body) = match line.split_first() {
            Some((tag, body)) => (*tag, body),
            None => return Err(Error::InvalidState("empty reply line".to_string())),
        };

        match tag {
            b'+' => Ok(Reply::SimpleString(utf8(body)?)),
            b'-' => Err(Error::ErrorReply(utf8(body)?)),
            b':' => Ok(Reply::Integer(parse_int(body)?)),
            b'$' => {
                let len = parse_int(body)?;
                if len == -1 {
                    return Ok(Reply::Bulk(None));
                }
                let len = usize::try_from(len).map_err(|_| {
                    Error::InvalidState(format!("negative bulk length {len}"))
                })?;
                let payload = reader.read_exact(len).await?;
                let terminator = reader.read_exact(2).await?;
                if &terminator[..] != b"\r\n" {
                    return Err(Error::InvalidState(
                        "missing CRLF after bulk payload".to_string(),
                    ));
                }
                Ok(Reply::Bulk(Some(payload.to_vec())))
            }
            b'*' => {
                let count = parse_int(body)?;
                if count == -1 {
                    return Ok(Reply::Array(None));
                }
                let count = usize::try_from(count).map_err(|_| {
                    Error::InvalidState(format!("negative array length {count}"))
                })?;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(read_reply_rec(reader).await?);
                }
                Ok(Reply::Array(Some(items)))
            }
            other => Err(Error::InvalidState(format!(
                "unknown reply tag 0x{other:02x}"
            ))),
        }
    })
}

fn utf8(body: &[u8]) -> Result<String> {
    String::from_utf8(body.to_vec())
        .map_err(|_| Error::InvalidState("reply line is not UTF-8".to_string()))
}

fn parse_int(body: &[u8]) -> Result<i64> {
    std::str::from_utf8(body)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            Error::InvalidState(format!(
                "malformed integer line: {:?}",
                String::from_utf8_lossy(body)
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decode(wire: &[u8]) -> Result<Reply> {
        let mut reader = FrameReader::new(wire);
        read_reply(&mut reader).await
    }

    #[test]
    fn encodes_command_as_bulk_array() {
        let mut buf = Vec::new();
        encode_command(&mut buf, "SET", &["key".into(), "value".into()]);
        assert_eq!(buf, b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n");
    }

    #[test]
    fn encodes_integer_and_bytes_args() {
        let mut buf = Vec::new();
        let raw: Value = (&b"\x00\xff"[..]).into();
        encode_command(&mut buf, "SETEX", &["k".into(), Value::Int(-42), raw]);
        assert_eq!(
            buf,
            b"*4\r\n$5\r\nSETEX\r\n$1\r\nk\r\n$3\r\n-42\r\n$2\r\n\x00\xff\r\n"
        );
    }

    #[test]
    fn nil_args_are_dropped_before_counting() {
        let mut buf = Vec::new();
        encode_command(
            &mut buf,
            "SET",
            &["k".into(), "v".into(), Value::Nil, Value::Nil],
        );
        assert_eq!(buf, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }

    #[tokio::test]
    async fn decodes_simple_string() {
        assert_eq!(
            decode(b"+OK\r\n").await.unwrap(),
            Reply::SimpleString("OK".into())
        );
    }

    #[tokio::test]
    async fn decodes_integer() {
        assert_eq!(decode(b":-42\r\n").await.unwrap(), Reply::Integer(-42));
    }

    #[tokio::test]
    async fn error_line_raises_error_reply() {
        let err = decode(b"-ERR unknown command\r\n").await.unwrap_err();
        match err {
            Error::ErrorReply(msg) => assert_eq!(msg, "ERR unknown command"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn null_bulk_vs_empty_bulk() {
        assert_eq!(decode(b"$-1\r\n").await.unwrap(), Reply::Bulk(None));
        assert_eq!(
            decode(b"$0\r\n\r\n").await.unwrap(),
            Reply::Bulk(Some(Vec::new()))
        );
    }

    #[tokio::test]
    async fn bulk_payload_may_contain_crlf() {
        assert_eq!(
            decode(b"$4\r\na\r\nb\r\n").await.unwrap(),
            Reply::Bulk(Some(b"a\r\nb".to_vec()))
        );
    }

    #[tokio::test]
    async fn missing_crlf_after_bulk_is_rejected() {
        let err = decode(b"$3\r\nfooXX").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn nested_arrays() {
        let reply = decode(b"*2\r\n*2\r\n:1\r\n:2\r\n$3\r\nfoo\r\n")
            .await
            .unwrap();
        assert_eq!(
            reply,
            Reply::Array(Some(vec![
                Reply::Array(Some(vec![Reply::Integer(1), Reply::Integer(2)])),
                Reply::Bulk(Some(b"foo".to_vec())),
            ]))
        );
    }

    #[tokio::test]
    async fn null_array() {
        assert_eq!(decode(b"*-1\r\n").await.unwrap(), Reply::Array(None));
    }

    #[tokio::test]
    async fn unknown_tag_is_invalid_state() {
        let err = decode(b"!boom\r\n").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn eof_mid_frame() {
        assert!(matches!(decode(b"$10\r\nshort").await, Err(Error::Eof)));
        assert!(matches!(decode(b"*2\r\n:1\r\n").await, Err(Error::Eof)));
    }

    #[tokio::test]
    async fn round_trip_through_decoder() {
        let mut buf = Vec::new();
        encode_command(
            &mut buf,
            "XADD",
            &["log".into(), "*".into(), "k".into(), Value::Int(7)],
        );
        // A request frame is itself a RESP array and must decode back
        // to the command followed by its non-nil args.
        let reply = decode(&buf).await.unwrap();
        let items = reply.into_array().unwrap();
        let texts: Vec<String> = items
            .into_iter()
            .map(|item| item.into_text().unwrap())
            .collect();
        assert_eq!(texts, ["XADD", "log", "*", "k", "7"]);
    }
}
