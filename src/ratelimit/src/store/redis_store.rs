//! Remote store on a shared Redis connection
//!
//! Every key is prefixed; the connection itself is owned by the host's
//! connection manager, so `close` here is a no-op. Missing keys read as
//! empty/zero on the typed read paths, mirroring the in-process store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::trace;

use crate::error::Result;
use crate::store::Store;

/// Remote [`Store`] implementation with prefixed keys
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisStore {
    /// Wrap a shared connection; `prefix` is prepended to every key
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn ttl_seconds(ttl: Duration) -> u64 {
        // Round fractional TTLs up so they do not vanish immediately.
        ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get_string(&self, key: &str) -> Result<String> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(value.unwrap_or_default())
    }

    async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        if ttl.is_zero() {
            redis::cmd("SET")
                .arg(&key)
                .arg(value)
                .query_async::<_, ()>(&mut conn)
                .await?;
        } else {
            redis::cmd("SET")
                .arg(&key)
                .arg(value)
                .arg("EX")
                .arg(Self::ttl_seconds(ttl))
                .query_async::<_, ()>(&mut conn)
                .await?;
        }
        Ok(())
    }

    async fn get_int(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = redis::cmd("GET")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(value.unwrap_or(0))
    }

    async fn set_int(&self, key: &str, value: i64, ttl: Duration) -> Result<()> {
        self.set_string(key, &value.to_string(), ttl).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        Ok(redis::cmd("INCRBY")
            .arg(self.key(key))
            .arg(delta)
            .query_async(&mut conn)
            .await?)
    }

    async fn decr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        Ok(redis::cmd("DECRBY")
            .arg(self.key(key))
            .arg(delta)
            .query_async(&mut conn)
            .await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let applied: i64 = redis::cmd("EXPIRE")
            .arg(self.key(key))
            .arg(Self::ttl_seconds(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn.clone();
        let seconds: i64 = redis::cmd("TTL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        // -2 missing key, -1 no expiry.
        if seconds < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_secs(seconds as u64)))
        }
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(self.key(key))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let found: i64 = redis::cmd("EXISTS")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(found == 1)
    }

    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("ZADD")
            .arg(self.key(key))
            .arg(score)
            .arg(member)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, min: i64, max: i64) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(redis::cmd("ZREMRANGEBYSCORE")
            .arg(self.key(key))
            .arg(min)
            .arg(max)
            .query_async(&mut conn)
            .await?)
    }

    async fn zcount(&self, key: &str, min: i64, max: i64) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(redis::cmd("ZCOUNT")
            .arg(self.key(key))
            .arg(min)
            .arg(max)
            .query_async(&mut conn)
            .await?)
    }

    async fn eval(
        &self,
        script: &str,
        keys: &[&str],
        args: &[&str],
    ) -> Result<serde_json::Value> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(script).arg(keys.len());
        for key in keys {
            cmd.arg(self.key(key));
        }
        for arg in args {
            cmd.arg(*arg);
        }
        let value: redis::Value = cmd.query_async(&mut conn).await?;
        Ok(redis_value_to_json(value))
    }

    async fn close(&self) -> Result<()> {
        // The connection belongs to the host's connection manager.
        trace!("redis store close is a no-op");
        Ok(())
    }
}

/// Map a Redis reply into JSON for the script escape hatch
fn redis_value_to_json(value: redis::Value) -> serde_json::Value {
    match value {
        redis::Value::Nil => serde_json::Value::Null,
        redis::Value::Int(n) => serde_json::Value::from(n),
        redis::Value::Data(bytes) => {
            serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
        redis::Value::Bulk(items) => {
            serde_json::Value::Array(items.into_iter().map(redis_value_to_json).collect())
        }
        redis::Value::Status(s) => serde_json::Value::String(s),
        redis::Value::Okay => serde_json::Value::String("OK".to_string()),
    }
}
