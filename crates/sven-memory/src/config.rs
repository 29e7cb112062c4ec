// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Environment-sourced tunables for the ingestion/dispatch core.
//!
//! Config-file parsing is explicitly out of scope for this service — every
//! knob here is read straight from the process environment, falling back to
//! the defaults the original implementation shipped with.

use std::time::Duration;

/// All tunables named in the external-interfaces section of the spec.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Messages to accumulate before `should_absorb` returns a candidate prefix.
    pub threshold: usize,
    /// TTL refreshed on every append to `messages(user_id)`.
    pub message_ttl: Duration,
    /// TTL refreshed on every append to `conversations(user_id)`.
    pub conversation_ttl: Duration,
    /// Capacity cap for `messages(user_id)`; oldest entries are trimmed.
    pub max_messages: usize,
    /// Capacity cap for `conversations(user_id)`. Must be <= `max_messages`.
    pub max_conversations: usize,
    /// TTL of the per-user absorption lock.
    pub absorb_lock_ttl: Duration,
    /// TTL of the per-user initialization lock.
    pub init_lock_ttl: Duration,
    /// TTL of the per-user `init_done` flag.
    pub init_done_ttl: Duration,
    /// TTL of upload status records.
    pub upload_status_ttl: Duration,
    /// Bounded worker-pool width for direct-mode dispatch fan-out.
    pub dispatch_concurrency: usize,
    /// Bounded worker-pool width for the upload manager's background uploads.
    pub upload_concurrency: usize,
    /// `true` selects direct fan-out to all six memory agents; `false` routes
    /// through a single meta-memory agent that decides which to invoke.
    pub skip_meta_coordinator: bool,
    /// Whether images must be resolved to pre-uploaded remote references
    /// before a message is considered ready (mirrors the original's
    /// per-model-family `needs_upload` flag).
    pub requires_upload: bool,
    /// Recency window for `get_recent_images`.
    pub recent_image_window: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            message_ttl: Duration::from_secs(60 * 60),
            conversation_ttl: Duration::from_secs(10 * 60),
            max_messages: 100,
            max_conversations: 50,
            absorb_lock_ttl: Duration::from_secs(30),
            init_lock_ttl: Duration::from_secs(30),
            init_done_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            upload_status_ttl: Duration::from_secs(60 * 60),
            dispatch_concurrency: 6,
            upload_concurrency: 8,
            skip_meta_coordinator: false,
            requires_upload: true,
            recent_image_window: Duration::from_secs(60),
        }
    }
}

impl CoreConfig {
    /// Read every tunable from the environment, falling back to defaults for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            threshold: env_usize("MEMORY_THRESHOLD", defaults.threshold),
            message_ttl: env_secs("MEMORY_MESSAGE_TTL_SECS", defaults.message_ttl),
            conversation_ttl: env_secs("MEMORY_CONVERSATION_TTL_SECS", defaults.conversation_ttl),
            max_messages: env_usize("MEMORY_MAX_MESSAGES", defaults.max_messages),
            max_conversations: env_usize("MEMORY_MAX_CONVERSATIONS", defaults.max_conversations),
            absorb_lock_ttl: env_secs("MEMORY_ABSORB_LOCK_TTL_SECS", defaults.absorb_lock_ttl),
            init_lock_ttl: env_secs("MEMORY_INIT_LOCK_TTL_SECS", defaults.init_lock_ttl),
            init_done_ttl: env_secs("MEMORY_INIT_DONE_TTL_SECS", defaults.init_done_ttl),
            upload_status_ttl: env_secs("MEMORY_UPLOAD_STATUS_TTL_SECS", defaults.upload_status_ttl),
            dispatch_concurrency: env_usize("MEMORY_DISPATCH_CONCURRENCY", defaults.dispatch_concurrency),
            upload_concurrency: env_usize("MEMORY_UPLOAD_CONCURRENCY", defaults.upload_concurrency),
            skip_meta_coordinator: env_bool("MEMORY_SKIP_META_COORDINATOR", defaults.skip_meta_coordinator),
            requires_upload: env_bool("MEMORY_REQUIRES_UPLOAD", defaults.requires_upload),
            recent_image_window: env_secs("MEMORY_RECENT_IMAGE_WINDOW_SECS", defaults.recent_image_window),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
