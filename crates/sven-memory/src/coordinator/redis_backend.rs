// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Production [`Coordinator`] backed by a real Redis deployment.
//!
//! Everything maps onto a single primitive command except [`pop_head`],
//! which must read and trim a list as one atomic step — two round trips
//! would let a concurrent absorb cycle observe (or re-pop) the same
//! messages. That one is a small Lua script, registered once and invoked by
//! SHA with a plain `EVAL` fallback on `NOSCRIPT`, the same shape the
//! original's `atomic_pop_messages` used server-side.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::Duration;

use super::Coordinator;
use crate::error::{MemoryError, Result};

const POP_HEAD_SCRIPT: &str = r#"
local items = redis.call('LRANGE', KEYS[1], 0, ARGV[1] - 1)
redis.call('LTRIM', KEYS[1], ARGV[1], -1)
return items
"#;

fn wrap(err: redis::RedisError) -> MemoryError {
    MemoryError::Coordinator(err.to_string())
}

pub struct RedisCoordinator {
    conn: ConnectionManager,
    pop_head_script: Script,
}

impl RedisCoordinator {
    /// Connects to `redis_url` (e.g. `redis://127.0.0.1/`) and registers the
    /// `pop_head` script. The [`ConnectionManager`] reconnects transparently
    /// on its own, so callers never need to re-dial after a blip.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(wrap)?;
        let conn = client.get_connection_manager().await.map_err(wrap)?;
        Ok(Self { conn, pop_head_script: Script::new(POP_HEAD_SCRIPT) })
    }
}

#[async_trait]
impl Coordinator for RedisCoordinator {
    async fn append(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(key, value).await.map_err(wrap)
    }

    async fn range(&self, key: &str, start: isize, end: isize) -> Result<Vec<Vec<u8>>> {
        let mut conn = self.conn.clone();
        conn.lrange(key, start as isize, end as isize).await.map_err(wrap)
    }

    async fn ltrim(&self, key: &str, start: isize, end: isize) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.ltrim::<_, ()>(key, start as isize, end as isize).await.map_err(wrap)
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        conn.llen(key).await.map_err(wrap)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(key, ttl.as_secs() as i64).await.map_err(wrap)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(wrap)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(wrap)
    }

    async fn setex(&self, key: &str, ttl: Duration, value: Vec<u8>) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await.map_err(wrap)
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(wrap)?;
        Ok(reply.is_some())
    }

    async fn pop_head(&self, key: &str, n: usize) -> Result<Vec<Vec<u8>>> {
        let mut conn = self.conn.clone();
        self.pop_head_script
            .key(key)
            .arg(n)
            .invoke_async(&mut conn)
            .await
            .map_err(wrap)
    }
}
