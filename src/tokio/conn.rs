use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::codec;
use crate::protocol::frame::Reply;
use crate::protocol::reader::FrameReader;
use crate::tokio::stream::Stream;
use crate::value::Value;

/// A Redis connection session.
///
/// Owns the socket (reader and writer halves behind one buffered
/// stream), the `closed`/`connected` liveness flags, and the retry
/// counter used during establishment. Constructed disconnected;
/// [`Conn::connect`] dials and runs the handshake (AUTH, SELECT,
/// CLIENT SETNAME), retrying transport faults with the configured
/// backoff up to `max_retry_count`.
///
/// A `Conn` is mutably owned by exactly one executor at a time; all
/// reads and writes are serialized through `&mut self`, so no two
/// reads can ever be in flight on one socket.
#[derive(Debug)]
pub struct Conn {
    opts: Opts,
    reader: Option<FrameReader<Stream>>,
    /// User requested shutdown; never auto-reconnect once set.
    closed: bool,
    /// Link currently usable.
    connected: bool,
    /// Establishment attempts so far; reset once a dial succeeds or
    /// the budget is spent.
    retry_count: u32,
    /// Reusable buffer for assembling outgoing request frames.
    write_buffer: Vec<u8>,
}

impl Conn {
    /// Create a disconnected session from connection options.
    pub fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts: Opts = opts.try_into()?;
        Ok(Self {
            opts,
            reader: None,
            closed: false,
            connected: false,
            retry_count: 0,
            write_buffer: Vec::new(),
        })
    }

    /// Create and connect in one step.
    ///
    /// ```rs
    /// let conn = Conn::open("redis://:password@localhost:6379/2").await?;
    /// ```
    pub async fn open<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let mut conn = Self::new(opts)?;
        conn.connect().await?;
        Ok(conn)
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Establish the socket and run the handshake.
    ///
    /// Transport errors during establishment sleep for
    /// `backoff(attempt)` and try again, up to `max_retry_count`, after
    /// which the last error surfaces and the counter resets. A refused
    /// AUTH is terminal and bypasses the retry loop entirely.
    #[instrument(skip_all)]
    pub async fn connect(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        loop {
            match self.establish().await {
                Ok(()) => {
                    self.retry_count = 0;
                    self.connected = true;
                    return Ok(());
                }
                Err(err @ (Error::Authentication(_) | Error::ConnectionClosed)) => {
                    self.retry_count = 0;
                    return Err(err);
                }
                // Any transport fault during establishment is worth the
                // backoff loop, not just the executor-retriable kinds.
                Err(err) if matches!(err, Error::Io(_) | Error::Eof) => {
                    let attempt = self.retry_count;
                    if attempt >= self.opts.max_retry_count {
                        self.retry_count = 0;
                        return Err(err);
                    }
                    self.retry_count += 1;
                    let delay = (self.opts.backoff)(attempt);
                    warn!(attempt, ?delay, "connect failed: {err}; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    self.retry_count = 0;
                    return Err(err);
                }
            }
        }
    }

    async fn establish(&mut self) -> Result<()> {
        let stream = Stream::connect(&self.opts.host, self.opts.port, self.opts.tcp_nodelay).await?;

        #[cfg(feature = "tls")]
        let stream = if self.opts.tls {
            stream.upgrade_to_tls(&self.opts.host).await?
        } else {
            stream
        };
        #[cfg(not(feature = "tls"))]
        if self.opts.tls {
            return Err(Error::BadConfig(
                "TLS requested but the 'tls' feature is not enabled".to_string(),
            ));
        }

        self.reader = Some(FrameReader::new(stream));
        debug!(host = %self.opts.host, port = self.opts.port, "connected");

        if let Some(password) = self.opts.password.clone() {
            let args = match self.opts.username.clone() {
                Some(username) => vec![Value::Text(username), Value::Text(password)],
                None => vec![Value::Text(password)],
            };
            match self.command("AUTH", &args).await {
                Ok(_) => {}
                Err(Error::ErrorReply(msg)) => {
                    self.drop_socket().await;
                    return Err(Error::Authentication(msg));
                }
                Err(err) => return Err(err),
            }
        }

        if self.opts.db != 0 {
            self.command("SELECT", &[Value::Int(i64::from(self.opts.db))])
                .await?;
        }

        if let Some(name) = self.opts.name.clone() {
            self.command("CLIENT", &["SETNAME".into(), Value::Text(name)])
                .await?;
        }

        Ok(())
    }

    /// Probe the link with PING; if the probe fails, drop the socket
    /// and re-establish from scratch (which itself may retry).
    #[instrument(skip_all)]
    pub async fn reconnect(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        if self.reader.is_some() {
            match self.command("PING", &[]).await {
                Ok(_) => {
                    self.connected = true;
                    return Ok(());
                }
                Err(err) => {
                    debug!("reconnect probe failed: {err}");
                }
            }
        }

        self.connected = false;
        self.drop_socket().await;
        self.connect().await
    }

    /// Mark the session closed and shut the socket down. Idempotent;
    /// a closed session rejects all further work and never reconnects.
    pub async fn close(&mut self) {
        self.closed = true;
        self.connected = false;
        self.drop_socket().await;
    }

    async fn drop_socket(&mut self) {
        if let Some(reader) = self.reader.take() {
            // Already-closed transport faults are expected here.
            let mut stream = reader.into_inner();
            let _ = stream.shutdown().await;
        }
    }

    /// Send one command frame. The frame is assembled into the reusable
    /// write buffer and handed to the socket in a single write.
    pub(crate) async fn send(&mut self, command: &str, args: &[Value]) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        self.write_buffer.clear();
        codec::encode_command(&mut self.write_buffer, command, args);

        let io_result = {
            let reader = match self.reader.as_mut() {
                Some(reader) => reader,
                None => return Err(not_connected()),
            };
            let stream = reader.get_mut();
            match stream.write_all(&self.write_buffer).await {
                Ok(()) => stream.flush().await,
                Err(err) => Err(err),
            }
        };
        io_result.map_err(|err| self.fault(err))
    }

    /// Read one reply frame.
    pub(crate) async fn recv(&mut self) -> Result<Reply> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        let reader = self.reader.as_mut().ok_or_else(not_connected)?;
        match codec::read_reply(reader).await {
            Ok(reply) => Ok(reply),
            Err(err @ Error::ErrorReply(_)) => Err(err),
            Err(err) => {
                // Transport or decode failure; the stream position is
                // no longer trustworthy, so the socket goes away and
                // later use has to reconnect.
                self.connected = false;
                self.drop_socket().await;
                Err(err)
            }
        }
    }

    /// Send one command and await its reply.
    pub async fn command(&mut self, command: &str, args: &[Value]) -> Result<Reply> {
        self.send(command, args).await?;
        self.recv().await
    }

    /// Issue an ordered batch. The result has one entry per command, in
    /// submission order; a server error-reply at position `i` is
    /// captured as `Err` at position `i` rather than aborting the
    /// batch. Transport failures abort and propagate.
    ///
    /// Commands are sent and read sequentially so that replies can
    /// never misalign with requests on a half-open socket.
    pub async fn send_commands(
        &mut self,
        commands: &[(String, Vec<Value>)],
    ) -> Result<Vec<Result<Reply>>> {
        let mut replies = Vec::with_capacity(commands.len());
        for (command, args) in commands {
            self.send(command, args).await?;
            match self.recv().await {
                Ok(reply) => replies.push(Ok(reply)),
                Err(err @ Error::ErrorReply(_)) => replies.push(Err(err)),
                Err(err) => return Err(err),
            }
        }
        Ok(replies)
    }

    fn fault(&mut self, err: std::io::Error) -> Error {
        self.connected = false;
        Error::Io(err)
    }
}

fn not_connected() -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "connection is not established",
    ))
}
