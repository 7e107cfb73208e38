use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::protocol::frame::Reply;
use crate::protocol::stream_id::{EntryId, StreamEntry, StreamId};
use crate::value::Value;

/// One command in, one reply out.
///
/// Implemented by the multiplexer (sends immediately, resolves with the
/// server's reply) and the pipeline (queues, resolves with a sentinel
/// `+OK` until flushed). The typed wrappers in [`Commands`] are written
/// against this seam so both executors share them.
#[allow(async_fn_in_trait)]
#[auto_impl::auto_impl(&, Box, Arc)]
pub trait Executor {
    async fn raw_command(&self, command: &str, args: Vec<Value>) -> Result<Reply>;
}

/// Options for `SET`: expiry and existence conditions.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// EX — expire after this many seconds
    pub ex_secs: Option<u64>,
    /// PX — expire after this many milliseconds
    pub px_ms: Option<u64>,
    /// NX — only set if the key does not exist
    pub nx: bool,
    /// XX — only set if the key already exists
    pub xx: bool,
}

/// The typed command surface, available on every [`Executor`].
///
/// Each wrapper translates its arguments into `(name, args)`, leaves
/// optional suffixes as `Nil` for the encoder to drop, and decodes the
/// reply into its natural Rust shape.
#[allow(async_fn_in_trait)]
pub trait Commands: Executor {
    // strings and keys

    async fn set(&self, key: &str, value: &str) -> Result<String> {
        self.raw_command("SET", vec![key.into(), value.into()])
            .await?
            .into_text()
    }

    /// `SET` with expiry/condition options. Returns `None` when an
    /// NX/XX condition was not met.
    async fn set_with(&self, key: &str, value: &str, options: &SetOptions) -> Result<Option<String>> {
        let args = vec![
            key.into(),
            value.into(),
            Value::from(options.ex_secs.map(|_| "EX")),
            Value::from(options.ex_secs.map(|secs| secs as i64)),
            Value::from(options.px_ms.map(|_| "PX")),
            Value::from(options.px_ms.map(|ms| ms as i64)),
            if options.nx { "NX".into() } else { Value::Nil },
            if options.xx { "XX".into() } else { Value::Nil },
        ];
        self.raw_command("SET", args).await?.into_opt_text()
    }

    async fn setex(&self, key: &str, seconds: u64, value: &str) -> Result<String> {
        self.raw_command(
            "SETEX",
            vec![key.into(), Value::Int(seconds as i64), value.into()],
        )
        .await?
        .into_text()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.raw_command("GET", vec![key.into()])
            .await?
            .into_opt_text()
    }

    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.raw_command("GET", vec![key.into()])
            .await?
            .into_opt_bytes()
    }

    async fn getset(&self, key: &str, value: &str) -> Result<Option<String>> {
        self.raw_command("GETSET", vec![key.into(), value.into()])
            .await?
            .into_opt_text()
    }

    async fn append(&self, key: &str, value: &str) -> Result<i64> {
        self.raw_command("APPEND", vec![key.into(), value.into()])
            .await?
            .as_int()
    }

    async fn strlen(&self, key: &str) -> Result<i64> {
        self.raw_command("STRLEN", vec![key.into()]).await?.as_int()
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.raw_command("INCR", vec![key.into()]).await?.as_int()
    }

    async fn incrby(&self, key: &str, delta: i64) -> Result<i64> {
        self.raw_command("INCRBY", vec![key.into(), delta.into()])
            .await?
            .as_int()
    }

    async fn decr(&self, key: &str) -> Result<i64> {
        self.raw_command("DECR", vec![key.into()]).await?.as_int()
    }

    async fn decrby(&self, key: &str, delta: i64) -> Result<i64> {
        self.raw_command("DECRBY", vec![key.into(), delta.into()])
            .await?
            .as_int()
    }

    async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        self.raw_command("MGET", text_args(keys))
            .await?
            .into_opt_text_vec()
    }

    async fn mset(&self, pairs: &[(&str, &str)]) -> Result<String> {
        let mut args = Vec::with_capacity(pairs.len() * 2);
        for (key, value) in pairs {
            args.push(Value::from(*key));
            args.push(Value::from(*value));
        }
        self.raw_command("MSET", args).await?.into_text()
    }

    async fn del(&self, keys: &[&str]) -> Result<i64> {
        self.raw_command("DEL", text_args(keys)).await?.as_int()
    }

    async fn exists(&self, keys: &[&str]) -> Result<i64> {
        self.raw_command("EXISTS", text_args(keys)).await?.as_int()
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        let reply = self
            .raw_command("EXPIRE", vec![key.into(), Value::Int(seconds as i64)])
            .await?;
        Ok(reply.as_int()? != 0)
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        self.raw_command("TTL", vec![key.into()]).await?.as_int()
    }

    async fn persist(&self, key: &str) -> Result<bool> {
        Ok(self.raw_command("PERSIST", vec![key.into()]).await?.as_int()? != 0)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.raw_command("KEYS", vec![pattern.into()])
            .await?
            .into_text_vec()
    }

    async fn key_type(&self, key: &str) -> Result<String> {
        self.raw_command("TYPE", vec![key.into()]).await?.into_text()
    }

    async fn rename(&self, key: &str, new_key: &str) -> Result<String> {
        self.raw_command("RENAME", vec![key.into(), new_key.into()])
            .await?
            .into_text()
    }

    // hashes

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<i64> {
        self.raw_command("HSET", vec![key.into(), field.into(), value.into()])
            .await?
            .as_int()
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.raw_command("HGET", vec![key.into(), field.into()])
            .await?
            .into_opt_text()
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<i64> {
        let mut args = vec![Value::from(key)];
        args.extend(fields.iter().map(|f| Value::from(*f)));
        self.raw_command("HDEL", args).await?.as_int()
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        let reply = self
            .raw_command("HEXISTS", vec![key.into(), field.into()])
            .await?;
        Ok(reply.as_int()? != 0)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.raw_command("HGETALL", vec![key.into()])
            .await?
            .into_text_map()
    }

    async fn hkeys(&self, key: &str) -> Result<Vec<String>> {
        self.raw_command("HKEYS", vec![key.into()])
            .await?
            .into_text_vec()
    }

    async fn hvals(&self, key: &str) -> Result<Vec<String>> {
        self.raw_command("HVALS", vec![key.into()])
            .await?
            .into_text_vec()
    }

    async fn hlen(&self, key: &str) -> Result<i64> {
        self.raw_command("HLEN", vec![key.into()]).await?.as_int()
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>> {
        let mut args = vec![Value::from(key)];
        args.extend(fields.iter().map(|f| Value::from(*f)));
        self.raw_command("HMGET", args).await?.into_opt_text_vec()
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.raw_command("HINCRBY", vec![key.into(), field.into(), delta.into()])
            .await?
            .as_int()
    }

    // lists

    async fn lpush(&self, key: &str, values: &[&str]) -> Result<i64> {
        let mut args = vec![Value::from(key)];
        args.extend(values.iter().map(|v| Value::from(*v)));
        self.raw_command("LPUSH", args).await?.as_int()
    }

    async fn rpush(&self, key: &str, values: &[&str]) -> Result<i64> {
        let mut args = vec![Value::from(key)];
        args.extend(values.iter().map(|v| Value::from(*v)));
        self.raw_command("RPUSH", args).await?.as_int()
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        self.raw_command("LPOP", vec![key.into()])
            .await?
            .into_opt_text()
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>> {
        self.raw_command("RPOP", vec![key.into()])
            .await?
            .into_opt_text()
    }

    async fn llen(&self, key: &str) -> Result<i64> {
        self.raw_command("LLEN", vec![key.into()]).await?.as_int()
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.raw_command("LRANGE", vec![key.into(), start.into(), stop.into()])
            .await?
            .into_text_vec()
    }

    async fn lindex(&self, key: &str, index: i64) -> Result<Option<String>> {
        self.raw_command("LINDEX", vec![key.into(), index.into()])
            .await?
            .into_opt_text()
    }

    async fn lset(&self, key: &str, index: i64, value: &str) -> Result<String> {
        self.raw_command("LSET", vec![key.into(), index.into(), value.into()])
            .await?
            .into_text()
    }

    async fn lrem(&self, key: &str, count: i64, value: &str) -> Result<i64> {
        self.raw_command("LREM", vec![key.into(), count.into(), value.into()])
            .await?
            .as_int()
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<String> {
        self.raw_command("LTRIM", vec![key.into(), start.into(), stop.into()])
            .await?
            .into_text()
    }

    async fn rpoplpush(&self, source: &str, destination: &str) -> Result<Option<String>> {
        self.raw_command("RPOPLPUSH", vec![source.into(), destination.into()])
            .await?
            .into_opt_text()
    }

    // sets

    async fn sadd(&self, key: &str, members: &[&str]) -> Result<i64> {
        let mut args = vec![Value::from(key)];
        args.extend(members.iter().map(|m| Value::from(*m)));
        self.raw_command("SADD", args).await?.as_int()
    }

    async fn srem(&self, key: &str, members: &[&str]) -> Result<i64> {
        let mut args = vec![Value::from(key)];
        args.extend(members.iter().map(|m| Value::from(*m)));
        self.raw_command("SREM", args).await?.as_int()
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.raw_command("SMEMBERS", vec![key.into()])
            .await?
            .into_text_vec()
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let reply = self
            .raw_command("SISMEMBER", vec![key.into(), member.into()])
            .await?;
        Ok(reply.as_int()? != 0)
    }

    async fn scard(&self, key: &str) -> Result<i64> {
        self.raw_command("SCARD", vec![key.into()]).await?.as_int()
    }

    async fn spop(&self, key: &str) -> Result<Option<String>> {
        self.raw_command("SPOP", vec![key.into()])
            .await?
            .into_opt_text()
    }

    async fn sunion(&self, keys: &[&str]) -> Result<Vec<String>> {
        self.raw_command("SUNION", text_args(keys))
            .await?
            .into_text_vec()
    }

    async fn sinter(&self, keys: &[&str]) -> Result<Vec<String>> {
        self.raw_command("SINTER", text_args(keys))
            .await?
            .into_text_vec()
    }

    async fn sdiff(&self, keys: &[&str]) -> Result<Vec<String>> {
        self.raw_command("SDIFF", text_args(keys))
            .await?
            .into_text_vec()
    }

    // sorted sets

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<i64> {
        self.raw_command("ZADD", vec![key.into(), score.into(), member.into()])
            .await?
            .as_int()
    }

    async fn zadd_multi(&self, key: &str, entries: &[(f64, &str)]) -> Result<i64> {
        let mut args = vec![Value::from(key)];
        for (score, member) in entries {
            args.push(Value::from(*score));
            args.push(Value::from(*member));
        }
        self.raw_command("ZADD", args).await?.as_int()
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let text = self
            .raw_command("ZSCORE", vec![key.into(), member.into()])
            .await?
            .into_opt_text()?;
        text.map(|s| parse_score(&s)).transpose()
    }

    async fn zincrby(&self, key: &str, delta: f64, member: &str) -> Result<f64> {
        let text = self
            .raw_command("ZINCRBY", vec![key.into(), delta.into(), member.into()])
            .await?
            .into_text()?;
        parse_score(&text)
    }

    async fn zcard(&self, key: &str) -> Result<i64> {
        self.raw_command("ZCARD", vec![key.into()]).await?.as_int()
    }

    /// `min`/`max` take the server's score-range syntax, including
    /// `-inf`, `+inf` and exclusive bounds like `(1.5`.
    async fn zcount(&self, key: &str, min: &str, max: &str) -> Result<i64> {
        self.raw_command("ZCOUNT", vec![key.into(), min.into(), max.into()])
            .await?
            .as_int()
    }

    async fn zrank(&self, key: &str, member: &str) -> Result<Option<i64>> {
        let reply = self
            .raw_command("ZRANK", vec![key.into(), member.into()])
            .await?;
        match reply {
            Reply::Bulk(None) | Reply::Array(None) => Ok(None),
            other => other.as_int().map(Some),
        }
    }

    async fn zrem(&self, key: &str, members: &[&str]) -> Result<i64> {
        let mut args = vec![Value::from(key)];
        args.extend(members.iter().map(|m| Value::from(*m)));
        self.raw_command("ZREM", args).await?.as_int()
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.raw_command("ZRANGE", vec![key.into(), start.into(), stop.into()])
            .await?
            .into_text_vec()
    }

    async fn zrange_withscores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<(String, f64)>> {
        let flat = self
            .raw_command(
                "ZRANGE",
                vec![key.into(), start.into(), stop.into(), "WITHSCORES".into()],
            )
            .await?
            .into_text_vec()?;
        scored_pairs(flat)
    }

    async fn zrangebyscore(&self, key: &str, min: &str, max: &str) -> Result<Vec<String>> {
        self.raw_command(
            "ZRANGEBYSCORE",
            vec![key.into(), min.into(), max.into()],
        )
        .await?
        .into_text_vec()
    }

    // streams

    /// Append an entry; pass [`EntryId::Auto`] to let the server pick
    /// the id. Returns the id actually assigned.
    async fn xadd(&self, key: &str, id: EntryId, fields: &[(&str, &str)]) -> Result<StreamId> {
        let mut args = vec![Value::from(key), Value::from(id)];
        for (field, value) in fields {
            args.push(Value::from(*field));
            args.push(Value::from(*value));
        }
        let text = self.raw_command("XADD", args).await?.into_text()?;
        text.parse()
    }

    async fn xlen(&self, key: &str) -> Result<i64> {
        self.raw_command("XLEN", vec![key.into()]).await?.as_int()
    }

    async fn xrange(&self, key: &str, start: EntryId, end: EntryId) -> Result<Vec<StreamEntry>> {
        let reply = self
            .raw_command("XRANGE", vec![key.into(), start.into(), end.into()])
            .await?;
        reply
            .into_array()?
            .into_iter()
            .map(StreamEntry::from_reply)
            .collect()
    }

    async fn xrevrange(&self, key: &str, end: EntryId, start: EntryId) -> Result<Vec<StreamEntry>> {
        let reply = self
            .raw_command("XREVRANGE", vec![key.into(), end.into(), start.into()])
            .await?;
        reply
            .into_array()?
            .into_iter()
            .map(StreamEntry::from_reply)
            .collect()
    }

    async fn xdel(&self, key: &str, ids: &[StreamId]) -> Result<i64> {
        let mut args = vec![Value::from(key)];
        args.extend(ids.iter().map(|id| Value::Text(id.to_string())));
        self.raw_command("XDEL", args).await?.as_int()
    }

    // server and connection

    async fn ping(&self) -> Result<String> {
        self.raw_command("PING", Vec::new()).await?.into_text()
    }

    async fn echo(&self, message: &str) -> Result<String> {
        self.raw_command("ECHO", vec![message.into()])
            .await?
            .into_text()
    }

    async fn select(&self, db: u32) -> Result<String> {
        self.raw_command("SELECT", vec![Value::Int(i64::from(db))])
            .await?
            .into_text()
    }

    async fn flushdb(&self) -> Result<String> {
        self.raw_command("FLUSHDB", Vec::new()).await?.into_text()
    }

    async fn dbsize(&self) -> Result<i64> {
        self.raw_command("DBSIZE", Vec::new()).await?.as_int()
    }

    /// Number of subscribers the message was delivered to.
    async fn publish(&self, channel: &str, message: &str) -> Result<i64> {
        self.raw_command("PUBLISH", vec![channel.into(), message.into()])
            .await?
            .as_int()
    }
}

impl<T: Executor> Commands for T {}

fn text_args(items: &[&str]) -> Vec<Value> {
    items.iter().map(|item| Value::from(*item)).collect()
}

fn parse_score(text: &str) -> Result<f64> {
    match text {
        "inf" | "+inf" => Ok(f64::INFINITY),
        "-inf" => Ok(f64::NEG_INFINITY),
        other => other
            .parse()
            .map_err(|_| Error::InvalidState(format!("malformed score '{other}'"))),
    }
}

fn scored_pairs(flat: Vec<String>) -> Result<Vec<(String, f64)>> {
    if flat.len() % 2 != 0 {
        return Err(Error::InvalidState(
            "member-score array has odd length".to_string(),
        ));
    }
    let mut pairs = Vec::with_capacity(flat.len() / 2);
    let mut iter = flat.into_iter();
    while let (Some(member), Some(score)) = (iter.next(), iter.next()) {
        pairs.push((member, parse_score(&score)?));
    }
    Ok(pairs)
}
