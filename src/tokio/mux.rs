use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tracing::debug;

use crate::commands::Executor;
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::frame::Reply;
use crate::tokio::conn::Conn;
use crate::value::Value;

/// The default executor for ad-hoc commands on a shared connection.
///
/// Concurrent callers enqueue into a FIFO; a single cooperative drain
/// serializes them onto the connection, so replies resolve in exactly
/// the order commands were submitted. Cloning is cheap and shares the
/// same connection and queue.
///
/// On a retriable transport fault the drain reconnects and resends the
/// in-flight command, up to `max_retry_count` times. A command whose
/// previous outcome is unknown may therefore execute twice; callers
/// needing exactly-once must not rely on transport-level retry.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<MuxInner>,
}

struct MuxInner {
    conn: AsyncMutex<Conn>,
    queue: std::sync::Mutex<VecDeque<QueuedCommand>>,
    /// Exactly one drain runs at a time; reentrant starts noop.
    draining: AtomicBool,
    closed: AtomicBool,
    max_retry_count: u32,
}

/// One submission waiting in the FIFO, paired with the channel that
/// resolves its caller.
struct QueuedCommand {
    command: String,
    args: Vec<Value>,
    tx: oneshot::Sender<Result<Reply>>,
}

impl Multiplexer {
    /// Wrap an established connection.
    pub fn new(conn: Conn) -> Self {
        let max_retry_count = conn.opts().max_retry_count;
        Self {
            inner: Arc::new(MuxInner {
                conn: AsyncMutex::new(conn),
                queue: std::sync::Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                max_retry_count,
            }),
        }
    }

    /// Connect and wrap in one step.
    pub async fn connect<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        Ok(Self::new(Conn::open(opts).await?))
    }

    /// Close the underlying connection. Queued and future submissions
    /// fail with `ConnectionClosed`; the session never reconnects.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.conn.lock().await.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl Executor for Multiplexer {
    async fn raw_command(&self, command: &str, args: Vec<Value>) -> Result<Reply> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut queue = self.inner.queue.lock().expect("mux queue poisoned");
            queue.push_back(QueuedCommand {
                command: command.to_string(),
                args,
                tx,
            });
        }

        if !self.inner.draining.swap(true, Ordering::AcqRel) {
            // The drain runs as its own task so it keeps emptying the
            // FIFO even if this caller is cancelled mid-await.
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.drain().await });
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionClosed),
        }
    }
}

impl MuxInner {
    async fn drain(&self) {
        loop {
            let head = self.queue.lock().expect("mux queue poisoned").pop_front();
            let Some(head) = head else {
                self.draining.store(false, Ordering::Release);
                // A submitter may have enqueued after the final pop but
                // before the flag cleared; reclaim the drain if so.
                let lost_wakeup = !self.queue.lock().expect("mux queue poisoned").is_empty();
                if !lost_wakeup || self.draining.swap(true, Ordering::AcqRel) {
                    return;
                }
                continue;
            };

            let result = self.issue(&head.command, &head.args).await;
            // The caller may have abandoned its await; that must not
            // stall the queue behind it.
            let _ = head.tx.send(result);
        }
    }

    /// Send one command and await its reply, reconnecting and
    /// resending the same command on retriable faults while budget
    /// remains.
    async fn issue(&self, command: &str, args: &[Value]) -> Result<Reply> {
        let mut conn = self.conn.lock().await;
        let mut attempt = 0u32;
        loop {
            match conn.command(command, args).await {
                Ok(reply) => return Ok(reply),
                Err(err)
                    if err.is_retriable()
                        && attempt < self.max_retry_count
                        && !self.closed.load(Ordering::Acquire) =>
                {
                    attempt += 1;
                    debug!(command, attempt, "retriable fault: {err}; reconnecting");
                    conn.reconnect().await?;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
