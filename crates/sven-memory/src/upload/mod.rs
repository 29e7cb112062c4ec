// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Out-of-band upload of large media to durable remote storage (spec §4.2).
//!
//! Two seams, both injected:
//! - [`UploadBackend`] does the actual bytes-to-remote-URI work.
//!   [`HttpUploadBackend`] is the production implementation (one
//!   `multipart/form-data` POST via `reqwest`); swappable per deployment
//!   without touching the scheduling code.
//! - [`UploadManager`] owns *when* and *how many at once*: the original
//!   spawned one unbounded `threading.Thread` per file (spec §9's flagged
//!   anti-pattern); [`task_pool::TaskPoolUploadManager`] replaces that with a
//!   `Semaphore`-gated pool.

mod fake;
mod http_backend;
mod task_pool;

pub use fake::{FakeOutcome, FakeUploadManager};
pub use http_backend::HttpUploadBackend;
pub use task_pool::TaskPoolUploadManager;

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::model::ImageRef;

/// Performs one upload of a local file to durable remote storage.
#[async_trait]
pub trait UploadBackend: Send + Sync {
    async fn upload(&self, path: &Path) -> Result<ImageRef>;
}

/// Schedules uploads and publishes their outcome to the coordinator's
/// `upload_status(upload_id)` key. `submit` returns as soon as the job is
/// queued — callers poll status via the coordinator, same as the original.
#[async_trait]
pub trait UploadManager: Send + Sync {
    async fn submit(&self, upload_id: String, path: std::path::PathBuf, delete_after_upload: bool);
}
