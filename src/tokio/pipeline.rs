use tokio::sync::Mutex as AsyncMutex;

use crate::commands::Executor;
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::frame::Reply;
use crate::tokio::conn::Conn;
use crate::value::Value;

/// A deferred-submission executor: commands accumulate instead of
/// being sent, and one [`Pipeline::flush`] ships them as a batch.
///
/// Submissions resolve immediately with a sentinel `+OK` so the same
/// typed command wrappers work against a pipeline without awaiting
/// real replies; the real replies come back, in submission order, from
/// `flush`. Per-command server errors are values in the flush result,
/// not failures of the flush itself.
///
/// In transaction mode the batch is framed with `MULTI`/`EXEC`, which
/// the server buffers and executes atomically. A plain flush is not
/// atomic on the server.
pub struct Pipeline {
    conn: AsyncMutex<Conn>,
    queue: std::sync::Mutex<Vec<(String, Vec<Value>)>>,
    tx_mode: bool,
}

impl Pipeline {
    /// Wrap an established connection in a non-transactional pipeline.
    pub fn new(conn: Conn) -> Self {
        Self {
            conn: AsyncMutex::new(conn),
            queue: std::sync::Mutex::new(Vec::new()),
            tx_mode: false,
        }
    }

    /// Wrap an established connection in a MULTI/EXEC transaction
    /// pipeline.
    pub fn transaction(conn: Conn) -> Self {
        Self {
            tx_mode: true,
            ..Self::new(conn)
        }
    }

    /// Connect and wrap in one step.
    pub async fn connect<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        Ok(Self::new(Conn::open(opts).await?))
    }

    pub fn is_transaction(&self) -> bool {
        self.tx_mode
    }

    /// Number of commands queued for the next flush.
    pub fn len(&self) -> usize {
        self.queue.lock().expect("pipeline queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ship the queued batch and collect per-command outcomes, in
    /// submission order. The queue is cleared up front, so after a
    /// transport failure the pipeline is empty and reusable. Flushing
    /// an empty pipeline returns an empty vector without touching the
    /// connection.
    pub async fn flush(&self) -> Result<Vec<Result<Reply>>> {
        let queued = {
            let mut queue = self.queue.lock().expect("pipeline queue poisoned");
            std::mem::take(&mut *queue)
        };
        if queued.is_empty() {
            return Ok(Vec::new());
        }

        let mut commands = queued;
        if self.tx_mode {
            commands.insert(0, ("MULTI".to_string(), Vec::new()));
            commands.push(("EXEC".to_string(), Vec::new()));
        }

        self.conn.lock().await.send_commands(&commands).await
    }

    /// Close the underlying connection.
    pub async fn close(&self) {
        self.conn.lock().await.close().await;
    }
}

impl Executor for Pipeline {
    async fn raw_command(&self, command: &str, args: Vec<Value>) -> Result<Reply> {
        let mut queue = self.queue.lock().expect("pipeline queue poisoned");
        queue.push((command.to_string(), args));
        Ok(Reply::queued_ok())
    }
}
