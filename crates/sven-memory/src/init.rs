// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! First-contact, exactly-once user initialization (spec §4.5).
//!
//! Idempotency is SETNX-shaped: the `init_done` flag is the durable record
//! of "this user has been initialized"; the `init_lock` only protects the
//! narrow window while that flag is being established, so two pods racing
//! on the same brand-new user never both run setup.

use std::future::Future;
use std::time::Duration;

use crate::config::CoreConfig;
use crate::coordinator::{Coordinator, CoordinatorKeys};
use crate::error::{MemoryError, Result};

/// Polling interval while spin-waiting on another pod's init lock. Short
/// enough that a winning pod's ~instant init doesn't cost waiters much
/// latency, long enough not to hammer the coordinator.
const SPIN_WAIT_INTERVAL: Duration = Duration::from_millis(50);

/// Runs `init` at most once per `user_id`, across however many pods call
/// this concurrently. Returns `Ok(true)` iff this call was the one that ran
/// `init`; `Ok(false)` means the user was already initialized by this call
/// or by a pod this call waited on.
///
/// When another pod holds the init lock, this spin-waits (spec §4.5) rather
/// than backing off immediately: it polls until either `init_done` appears
/// (the lock holder finished) or the lock itself disappears (the holder
/// died or finished without a visible `init_done`, e.g. a coordinator fault
/// right before `setex`), at which point it re-checks `init_done` and, if
/// still missing, retries acquisition itself.
pub async fn ensure_user_initialized<F, Fut>(
    coordinator: &dyn Coordinator,
    config: &CoreConfig,
    user_id: &str,
    init: F,
) -> Result<bool>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    if user_id.trim().is_empty() {
        return Err(MemoryError::Validation("user_id must not be empty".to_string()));
    }

    let done_key = CoordinatorKeys::init_done(user_id);
    let lock_key = CoordinatorKeys::init_lock(user_id);

    let mut init = Some(init);
    loop {
        if coordinator.get(&done_key).await?.is_some() {
            return Ok(false);
        }

        let acquired = coordinator
            .set_if_absent(&lock_key, b"1".to_vec(), config.init_lock_ttl)
            .await?;
        if !acquired {
            spin_wait_for_resolution(coordinator, &done_key, &lock_key, config).await?;
            continue;
        }

        // Re-check after winning the lock: another pod may have finished
        // initialization and released it between our two checks above.
        if coordinator.get(&done_key).await?.is_some() {
            coordinator.del(&lock_key).await?;
            return Ok(false);
        }

        let init = init.take().expect("loop body runs init at most once");
        let result = init().await;
        coordinator.del(&lock_key).await?;
        result?;

        coordinator
            .setex(&done_key, config.init_done_ttl, b"1".to_vec())
            .await?;
        return Ok(true);
    }
}

/// Polls until either `done_key` appears or `lock_key` disappears, then
/// returns so the caller can re-check `done_key` and decide what to do.
async fn spin_wait_for_resolution(
    coordinator: &dyn Coordinator,
    done_key: &str,
    lock_key: &str,
    config: &CoreConfig,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + config.init_lock_ttl;
    loop {
        if coordinator.get(done_key).await?.is_some() {
            return Ok(());
        }
        if coordinator.get(lock_key).await?.is_none() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            // The lock has outlived its own TTL in this view (a
            // coordinator hiccup delaying expiry) — stop waiting and let
            // the caller re-check/retry rather than spin forever.
            return Ok(());
        }
        tokio::time::sleep(SPIN_WAIT_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::InMemoryCoordinator;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn rejects_empty_user_id() {
        let coordinator = InMemoryCoordinator::new();
        let config = CoreConfig::default();
        let err = ensure_user_initialized(&coordinator, &config, "  ", || async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
    }

    #[tokio::test]
    async fn first_call_runs_init_and_marks_done() {
        let coordinator = InMemoryCoordinator::new();
        let config = CoreConfig::default();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);

        let did_init = ensure_user_initialized(&coordinator, &config, "u1", move || {
            let ran = Arc::clone(&ran2);
            async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

        assert!(did_init);
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        let done_key = CoordinatorKeys::init_done("u1");
        assert!(coordinator.get(&done_key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn second_call_is_a_no_op() {
        let coordinator = InMemoryCoordinator::new();
        let config = CoreConfig::default();
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let ran2 = Arc::clone(&ran);
            ensure_user_initialized(&coordinator, &config, "u1", move || {
                let ran = Arc::clone(&ran2);
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();
        }

        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_racers_only_one_runs_init() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let config = Arc::new(CoreConfig::default());
        let ran = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = Arc::clone(&coordinator);
            let config = Arc::clone(&config);
            let ran = Arc::clone(&ran);
            handles.push(tokio::spawn(async move {
                ensure_user_initialized(coordinator.as_ref(), &config, "racer", move || {
                    let ran = Arc::clone(&ran);
                    async move {
                        ran.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .await
            }));
        }

        let mut init_count = 0;
        for h in handles {
            if h.await.unwrap().unwrap() {
                init_count += 1;
            }
        }
        assert_eq!(init_count, 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lock_is_released_even_when_init_fails() {
        let coordinator = InMemoryCoordinator::new();
        let config = CoreConfig::default();

        let err = ensure_user_initialized(&coordinator, &config, "u1", || async {
            Err(MemoryError::Validation("setup exploded".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));

        let lock_key = CoordinatorKeys::init_lock("u1");
        assert!(coordinator.get(&lock_key).await.unwrap().is_none());
    }
}
