// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The Shared Coordinator client — a thin, typed façade over a Redis-like
//! key/value + list + scripting store (spec §4.1).
//!
//! `Coordinator` is a trait rather than a concrete client so the core can be
//! exercised against an in-memory double in tests without a running Redis,
//! while [`redis_backend::RedisCoordinator`] is the production
//! implementation. This is the direct re-architecture of the original's
//! module-level `get_redis_client()` singleton (spec §9) into an injected
//! dependency.

mod keys;
mod memory;
mod redis_backend;

pub use keys::CoordinatorKeys;
pub use memory::InMemoryCoordinator;
pub use redis_backend::RedisCoordinator;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Cross-pod shared state: lists, strings with TTL, and one atomic script.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// RPUSH — append one element to the tail of a list.
    async fn append(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// LRANGE [start, end] inclusive; `end = -1` means "to the tail".
    async fn range(&self, key: &str, start: isize, end: isize) -> Result<Vec<Vec<u8>>>;

    /// LTRIM — keep only [start, end] inclusive, discarding the rest.
    async fn ltrim(&self, key: &str, start: isize, end: isize) -> Result<()>;

    /// LLEN.
    async fn llen(&self, key: &str) -> Result<usize>;

    /// EXPIRE — (re)set a key's TTL.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// DEL.
    async fn del(&self, key: &str) -> Result<()>;

    /// GET.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// SETEX — set a string value with a TTL.
    async fn setex(&self, key: &str, ttl: Duration, value: Vec<u8>) -> Result<()>;

    /// SET NX EX — set only if absent, with a TTL. Returns `true` iff this
    /// call created the key.
    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool>;

    /// Atomically return and remove up to `n` elements from the head of the
    /// list at `key`, as a single server-side step (spec §4.1's `pop_head`).
    async fn pop_head(&self, key: &str, n: usize) -> Result<Vec<Vec<u8>>>;
}
