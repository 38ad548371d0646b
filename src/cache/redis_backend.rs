//! Redis shared backend
//!
//! Uses a [`ConnectionManager`] so dropped connections are re-established
//! transparently. Pattern deletion walks the keyspace with `SCAN MATCH`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::shared::{SharedBackend, SharedItem, SharedValue};
use crate::error::Result;

/// Keys fetched per `SCAN` round trip
const SCAN_COUNT: usize = 500;

/// Redis-backed shared tier
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Connect and verify with `PING`
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = client.get_connection_manager().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        tracing::info!("Redis shared backend connected to {}", url);
        Ok(Self { conn })
    }
}

/// Redis rejects `PX 0`
#[inline]
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl SharedBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<SharedValue>> {
        let mut conn = self.conn.clone();
        let (value, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
            .cmd("GET")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await?;

        Ok(value.map(|bytes| SharedValue {
            bytes: Bytes::from(bytes),
            // -1 means no expiry, -2 means the key vanished between commands
            ttl_remaining: (pttl >= 0).then(|| Duration::from_millis(pttl as u64)),
        }))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value.as_ref())
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<SharedValue>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.cmd("MGET").arg(keys);
        for key in keys {
            pipe.cmd("PTTL").arg(key);
        }
        let replies: Vec<redis::Value> = pipe.query_async(&mut conn).await?;
        let Some((values, ttls)) = replies.split_first() else {
            return Ok(vec![None; keys.len()]);
        };

        let values: Vec<Option<Vec<u8>>> = redis::from_redis_value(values)?;
        let mut out = Vec::with_capacity(values.len());
        for (value, pttl) in values.into_iter().zip(ttls) {
            let pttl: i64 = redis::from_redis_value(pttl)?;
            out.push(value.map(|bytes| SharedValue {
                bytes: Bytes::from(bytes),
                ttl_remaining: (pttl >= 0).then(|| Duration::from_millis(pttl as u64)),
            }));
        }
        Ok(out)
    }

    async fn mset(&self, items: &[SharedItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for item in items {
            pipe.cmd("SET")
                .arg(&item.key)
                .arg(item.bytes.as_ref())
                .arg("PX")
                .arg(ttl_millis(item.ttl))
                .ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn scan_delete(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut total_deleted = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: u64 = conn.del(&keys).await?;
                total_deleted += deleted;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        tracing::debug!("Redis scan-delete {} removed {} keys", pattern, total_deleted);
        Ok(total_deleted)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
