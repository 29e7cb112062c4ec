// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! In-memory [`Coordinator`] double used throughout the test suite and by
//! anything exercising the core without a live Redis.
//!
//! Lazily expires entries on access, matching Redis's own "expired keys
//! vanish at the next touch" behavior closely enough for our purposes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::Coordinator;
use crate::error::Result;

enum Entry {
    List(Vec<Vec<u8>>),
    Str(Vec<u8>),
}

struct Slot {
    entry: Entry,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self) -> bool {
        self.expires_at.map(|at| Instant::now() < at).unwrap_or(true)
    }
}

/// A single-process stand-in for the Redis-backed coordinator.
///
/// All state lives behind one `Mutex<HashMap<..>>` — correct and simple at
/// the scale a test double needs; the production path uses real Redis, whose
/// server-side atomicity this type only needs to approximate for single-pod
/// (in-test) concurrency.
#[derive(Default)]
pub struct InMemoryCoordinator {
    store: Mutex<HashMap<String, Slot>>,
}

impl InMemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Coordinator for InMemoryCoordinator {
    async fn append(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut store = self.store.lock().await;
        match store.get_mut(key).filter(|s| s.is_live()) {
            Some(Slot { entry: Entry::List(list), .. }) => list.push(value),
            _ => {
                store.insert(
                    key.to_string(),
                    Slot { entry: Entry::List(vec![value]), expires_at: None },
                );
            }
        }
        Ok(())
    }

    async fn range(&self, key: &str, start: isize, end: isize) -> Result<Vec<Vec<u8>>> {
        let store = self.store.lock().await;
        let Some(slot) = store.get(key).filter(|s| s.is_live()) else {
            return Ok(Vec::new());
        };
        let Entry::List(list) = &slot.entry else { return Ok(Vec::new()) };
        Ok(slice_inclusive(list, start, end).to_vec())
    }

    async fn ltrim(&self, key: &str, start: isize, end: isize) -> Result<()> {
        let mut store = self.store.lock().await;
        if let Some(slot) = store.get_mut(key).filter(|s| s.is_live()) {
            if let Entry::List(list) = &mut slot.entry {
                *list = slice_inclusive(list, start, end).to_vec();
            }
        }
        Ok(())
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        let store = self.store.lock().await;
        Ok(match store.get(key).filter(|s| s.is_live()) {
            Some(Slot { entry: Entry::List(list), .. }) => list.len(),
            _ => 0,
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut store = self.store.lock().await;
        if let Some(slot) = store.get_mut(key) {
            slot.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.store.lock().await.remove(key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let store = self.store.lock().await;
        Ok(match store.get(key).filter(|s| s.is_live()) {
            Some(Slot { entry: Entry::Str(v), .. }) => Some(v.clone()),
            _ => None,
        })
    }

    async fn setex(&self, key: &str, ttl: Duration, value: Vec<u8>) -> Result<()> {
        let mut store = self.store.lock().await;
        store.insert(
            key.to_string(),
            Slot { entry: Entry::Str(value), expires_at: Some(Instant::now() + ttl) },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool> {
        let mut store = self.store.lock().await;
        let occupied = store.get(key).filter(|s| s.is_live()).is_some();
        if occupied {
            return Ok(false);
        }
        store.insert(
            key.to_string(),
            Slot { entry: Entry::Str(value), expires_at: Some(Instant::now() + ttl) },
        );
        Ok(true)
    }

    async fn pop_head(&self, key: &str, n: usize) -> Result<Vec<Vec<u8>>> {
        // This is the single-process analog of the Lua `pop_head` script:
        // the read and the trim happen while holding the same mutex guard,
        // so no other call can observe a partially-popped list.
        let mut store = self.store.lock().await;
        let Some(slot) = store.get_mut(key).filter(|s| s.is_live()) else {
            return Ok(Vec::new());
        };
        let Entry::List(list) = &mut slot.entry else { return Ok(Vec::new()) };
        let take = n.min(list.len());
        let popped: Vec<_> = list.drain(0..take).collect();
        Ok(popped)
    }
}

/// Redis-style inclusive range with negative indices counting from the tail
/// (`-1` = last element).
fn slice_inclusive(list: &[Vec<u8>], start: isize, end: isize) -> &[Vec<u8>] {
    let len = list.len() as isize;
    if len == 0 {
        return &[];
    }
    let norm = |i: isize| -> isize {
        if i < 0 { (len + i).max(0) } else { i }
    };
    let start = norm(start).min(len);
    let end = norm(end).min(len - 1);
    if start > end || start >= len {
        return &[];
    }
    &list[start as usize..=(end as usize)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_and_range_preserve_fifo_order() {
        let c = InMemoryCoordinator::new();
        for v in ["a", "b", "c"] {
            c.append("k", v.as_bytes().to_vec()).await.unwrap();
        }
        let got = c.range("k", 0, -1).await.unwrap();
        assert_eq!(got, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[tokio::test]
    async fn ltrim_negative_range_keeps_most_recent() {
        let c = InMemoryCoordinator::new();
        for i in 0..10 {
            c.append("k", i.to_string().into_bytes()).await.unwrap();
        }
        c.ltrim("k", -3, -1).await.unwrap();
        let got = c.range("k", 0, -1).await.unwrap();
        assert_eq!(got, vec![b"7".to_vec(), b"8".to_vec(), b"9".to_vec()]);
    }

    #[tokio::test]
    async fn pop_head_removes_exactly_n_from_the_head() {
        let c = InMemoryCoordinator::new();
        for i in 0..5 {
            c.append("k", i.to_string().into_bytes()).await.unwrap();
        }
        let popped = c.pop_head("k", 3).await.unwrap();
        assert_eq!(popped, vec![b"0".to_vec(), b"1".to_vec(), b"2".to_vec()]);
        assert_eq!(c.llen("k").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn set_if_absent_only_succeeds_once() {
        let c = InMemoryCoordinator::new();
        assert!(c.set_if_absent("lock", b"1".to_vec(), Duration::from_secs(30)).await.unwrap());
        assert!(!c.set_if_absent("lock", b"1".to_vec(), Duration::from_secs(30)).await.unwrap());
        c.del("lock").await.unwrap();
        assert!(c.set_if_absent("lock", b"1".to_vec(), Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn expired_string_key_reads_as_absent() {
        let c = InMemoryCoordinator::new();
        c.setex("k", Duration::from_millis(10), b"v".to_vec()).await.unwrap();
        assert_eq!(c.get("k").await.unwrap(), Some(b"v".to_vec()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(c.get("k").await.unwrap(), None);
    }
}
