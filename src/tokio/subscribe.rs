use std::collections::{HashSet, VecDeque};

use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::frame::Reply;
use crate::tokio::conn::Conn;
use crate::value::Value;

/// One server-pushed pub/sub message.
///
/// `pattern` is set when the message arrived through a PSUBSCRIBE
/// pattern. The payload is raw bytes; [`Message::text`] decodes it for
/// callers that want UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub pattern: Option<String>,
    pub channel: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload)
            .map_err(|_| Error::InvalidState("message payload is not UTF-8".to_string()))
    }
}

/// A connection dedicated to pub/sub.
///
/// Owning the connection exclusively keeps server-pushed frames from
/// ever colliding with command replies, so this type deliberately
/// exposes no general command entry point. The subscribed channel and
/// pattern sets are replayed wholesale after a reconnect.
pub struct Subscriber {
    conn: Conn,
    channels: HashSet<String>,
    patterns: HashSet<String>,
    /// Messages that arrived interleaved with subscribe/unsubscribe
    /// acknowledgments, waiting for the next iteration step.
    pending: VecDeque<Message>,
}

impl Subscriber {
    /// Dedicate an established connection to pub/sub.
    pub fn new(conn: Conn) -> Self {
        Self {
            conn,
            channels: HashSet::new(),
            patterns: HashSet::new(),
            pending: VecDeque::new(),
        }
    }

    /// Connect and wrap in one step.
    pub async fn connect<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        Ok(Self::new(Conn::open(opts).await?))
    }

    pub fn channels(&self) -> &HashSet<String> {
        &self.channels
    }

    pub fn patterns(&self) -> &HashSet<String> {
        &self.patterns
    }

    /// Subscribe to exact channels. Returns once the server has
    /// acknowledged every channel; the local state set is only mutated
    /// on acknowledgment.
    pub async fn subscribe(&mut self, channels: &[&str]) -> Result<()> {
        self.control("SUBSCRIBE", channels).await?;
        self.channels.extend(channels.iter().map(|s| s.to_string()));
        Ok(())
    }

    /// Subscribe to patterns (`news.*` style).
    pub async fn psubscribe(&mut self, patterns: &[&str]) -> Result<()> {
        self.control("PSUBSCRIBE", patterns).await?;
        self.patterns.extend(patterns.iter().map(|s| s.to_string()));
        Ok(())
    }

    pub async fn unsubscribe(&mut self, channels: &[&str]) -> Result<()> {
        self.control("UNSUBSCRIBE", channels).await?;
        for channel in channels {
            self.channels.remove(*channel);
        }
        Ok(())
    }

    pub async fn punsubscribe(&mut self, patterns: &[&str]) -> Result<()> {
        self.control("PUNSUBSCRIBE", patterns).await?;
        for pattern in patterns {
            self.patterns.remove(*pattern);
        }
        Ok(())
    }

    /// Send one subscription command and wait for its per-name
    /// acknowledgments. Pushed messages that arrive interleaved are
    /// buffered for the iterator instead of being dropped.
    async fn control(&mut self, command: &str, names: &[&str]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let args: Vec<Value> = names.iter().map(|name| Value::from(*name)).collect();
        self.conn.send(command, &args).await?;

        let mut acked = 0usize;
        while acked < names.len() {
            match self.step().await? {
                Step::Ack => acked += 1,
                Step::Message(msg) => self.pending.push_back(msg),
                Step::Closed => return Err(Error::SubscriptionClosed),
            }
        }
        Ok(())
    }

    /// The next pushed message, or `None` once the session is closed.
    ///
    /// On a retriable transport fault the session reconnects and
    /// replays every channel and pattern still in its state sets, then
    /// resumes transparently. Messages the server published between
    /// the failure and the replay are lost; callers that cannot accept
    /// that gap should use the stream data type instead of pub/sub.
    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        loop {
            if let Some(msg) = self.pending.pop_front() {
                return Ok(Some(msg));
            }
            if self.conn.is_closed() {
                return Ok(None);
            }

            match self.step().await {
                Ok(Step::Message(msg)) => return Ok(Some(msg)),
                // Late unsubscribe acks ride the same channel.
                Ok(Step::Ack) => {}
                Ok(Step::Closed) => return Ok(None),
                Err(err) if err.is_retriable() && !self.conn.is_closed() => {
                    warn!("subscription fault: {err}; reconnecting");
                    self.conn.reconnect().await?;
                    self.resubscribe().await?;
                }
                Err(Error::ConnectionClosed) => return Ok(None),
                Err(err) => return Err(err),
            }
        }
    }

    /// Replay the full subscription state onto a fresh connection.
    #[instrument(skip_all)]
    async fn resubscribe(&mut self) -> Result<()> {
        let channels: Vec<String> = self.channels.iter().cloned().collect();
        let patterns: Vec<String> = self.patterns.iter().cloned().collect();
        debug!(
            channels = channels.len(),
            patterns = patterns.len(),
            "replaying subscriptions"
        );

        if !channels.is_empty() {
            let names: Vec<&str> = channels.iter().map(String::as_str).collect();
            self.control("SUBSCRIBE", &names).await?;
        }
        if !patterns.is_empty() {
            let names: Vec<&str> = patterns.iter().map(String::as_str).collect();
            self.control("PSUBSCRIBE", &names).await?;
        }
        Ok(())
    }

    /// Read and classify one server frame.
    async fn step(&mut self) -> Result<Step> {
        let reply = match self.conn.recv().await {
            Ok(reply) => reply,
            Err(Error::ConnectionClosed) => return Ok(Step::Closed),
            Err(err) => return Err(err),
        };

        let mut items = reply.into_array()?.into_iter();
        let kind = items
            .next()
            .ok_or_else(|| Error::InvalidState("empty push frame".to_string()))?
            .into_text()?;

        match kind.as_str() {
            "message" => {
                let channel = next_text(&mut items)?;
                let payload = next_bytes(&mut items)?;
                Ok(Step::Message(Message {
                    pattern: None,
                    channel,
                    payload,
                }))
            }
            "pmessage" => {
                let pattern = next_text(&mut items)?;
                let channel = next_text(&mut items)?;
                let payload = next_bytes(&mut items)?;
                Ok(Step::Message(Message {
                    pattern: Some(pattern),
                    channel,
                    payload,
                }))
            }
            "subscribe" | "psubscribe" | "unsubscribe" | "punsubscribe" => Ok(Step::Ack),
            other => Err(Error::InvalidState(format!(
                "unexpected push frame kind '{other}'"
            ))),
        }
    }

    /// Close the session; any pending iteration terminates.
    pub async fn close(&mut self) {
        self.conn.close().await;
    }
}

enum Step {
    Message(Message),
    Ack,
    Closed,
}

fn next_text(items: &mut std::vec::IntoIter<Reply>) -> Result<String> {
    items
        .next()
        .ok_or_else(|| Error::InvalidState("truncated push frame".to_string()))?
        .into_text()
}

fn next_bytes(items: &mut std::vec::IntoIter<Reply>) -> Result<Vec<u8>> {
    let bytes = items
        .next()
        .ok_or_else(|| Error::InvalidState("truncated push frame".to_string()))?
        .into_opt_bytes()?;
    bytes.ok_or_else(|| Error::InvalidState("null message payload".to_string()))
}
