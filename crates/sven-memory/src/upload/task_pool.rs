// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Bounded-concurrency [`UploadManager`] backed by a real [`UploadBackend`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::{UploadBackend, UploadManager};
use crate::coordinator::{Coordinator, CoordinatorKeys};
use crate::model::{UploadResultWire, UploadStatusWire};

/// Upload jobs run as bounded background tasks; each one publishes its
/// terminal status to the coordinator itself so it survives independently
/// of whoever called `submit`.
pub struct TaskPoolUploadManager {
    coordinator: Arc<dyn Coordinator>,
    backend: Arc<dyn UploadBackend>,
    permits: Arc<Semaphore>,
    status_ttl: Duration,
}

impl TaskPoolUploadManager {
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        backend: Arc<dyn UploadBackend>,
        concurrency: usize,
        status_ttl: Duration,
    ) -> Self {
        Self {
            coordinator,
            backend,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            status_ttl,
        }
    }

    async fn publish_pending(&self, upload_id: &str, filename: &str) {
        let wire = UploadStatusWire {
            status: "pending".to_string(),
            filename: Some(filename.to_string()),
            timestamp: unix_timestamp(),
            result: None,
        };
        self.store(upload_id, &wire).await;
    }

    async fn store(&self, upload_id: &str, wire: &UploadStatusWire) {
        let Ok(bytes) = serde_json::to_vec(wire) else { return };
        let key = CoordinatorKeys::upload_status(upload_id);
        if let Err(err) = self.coordinator.setex(&key, self.status_ttl, bytes).await {
            tracing::warn!(upload_id, error = %err, "failed to publish upload status");
        }
    }
}

#[async_trait]
impl UploadManager for TaskPoolUploadManager {
    async fn submit(&self, upload_id: String, path: PathBuf, delete_after_upload: bool) {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.publish_pending(&upload_id, &filename).await;

        let coordinator = Arc::clone(&self.coordinator);
        let backend = Arc::clone(&self.backend);
        let permits = Arc::clone(&self.permits);
        let status_ttl = self.status_ttl;

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };

            let outcome = backend.upload(&path).await;
            let wire = match &outcome {
                Ok(crate::model::ImageRef::Remote { uri, name, create_time }) => UploadStatusWire {
                    status: "completed".to_string(),
                    filename: Some(filename.clone()),
                    timestamp: unix_timestamp(),
                    result: Some(UploadResultWire::GoogleCloud {
                        uri: uri.clone(),
                        name: name.clone(),
                        create_time: create_time.clone(),
                    }),
                },
                Ok(crate::model::ImageRef::Local { path }) => UploadStatusWire {
                    status: "completed".to_string(),
                    filename: Some(filename.clone()),
                    timestamp: unix_timestamp(),
                    result: Some(UploadResultWire::Other { value: path.clone() }),
                },
                Ok(crate::model::ImageRef::Pending { .. }) | Err(_) => UploadStatusWire {
                    status: "failed".to_string(),
                    filename: Some(filename.clone()),
                    timestamp: unix_timestamp(),
                    result: None,
                },
            };

            if let Err(err) = &outcome {
                tracing::warn!(upload_id, error = %err, "upload failed");
            }

            let key = CoordinatorKeys::upload_status(&upload_id);
            if let Ok(bytes) = serde_json::to_vec(&wire) {
                let _ = coordinator.setex(&key, status_ttl, bytes).await;
            }

            if outcome.is_ok() && delete_after_upload {
                delete_local_file_with_retries(&path).await;
            }
        });
    }
}

fn unix_timestamp() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Best-effort cleanup of the local temp file once its bytes are durable
/// elsewhere. Windows-style file locks and antivirus scanners can hold a
/// brief exclusive lock right after a file is written, so a handful of
/// short retries beats failing outright — mirrors the original's delete
/// loop for the same reason.
async fn delete_local_file_with_retries(path: &Path) {
    const ATTEMPTS: u32 = 10;
    const BACKOFF: Duration = Duration::from_millis(100);

    for attempt in 0..ATTEMPTS {
        match tokio::fs::remove_file(path).await {
            Ok(()) => return,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
            Err(err) if attempt + 1 == ATTEMPTS => {
                tracing::warn!(path = %path.display(), error = %err, "giving up deleting local file");
                return;
            }
            Err(_) => tokio::time::sleep(BACKOFF).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::InMemoryCoordinator;
    use crate::model::ImageRef;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysSucceeds(Arc<AtomicUsize>);

    #[async_trait]
    impl UploadBackend for AlwaysSucceeds {
        async fn upload(&self, path: &Path) -> crate::error::Result<ImageRef> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ImageRef::Remote {
                uri: format!("gs://bucket/{}", path.display()),
                name: path.display().to_string(),
                create_time: None,
            })
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl UploadBackend for AlwaysFails {
        async fn upload(&self, _path: &Path) -> crate::error::Result<ImageRef> {
            Err(crate::error::MemoryError::Upload("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn successful_upload_publishes_completed_status() {
        let coordinator: Arc<dyn Coordinator> = Arc::new(InMemoryCoordinator::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let backend: Arc<dyn UploadBackend> = Arc::new(AlwaysSucceeds(Arc::clone(&calls)));
        let mgr = TaskPoolUploadManager::new(
            Arc::clone(&coordinator),
            backend,
            2,
            Duration::from_secs(60),
        );

        mgr.submit("up-1".to_string(), PathBuf::from("/tmp/shot.png"), false).await;

        let key = CoordinatorKeys::upload_status("up-1");
        let mut status = coordinator.get(&key).await.unwrap();
        for _ in 0..50 {
            if status.as_ref().map(|b| b.windows(9).any(|w| w == b"completed")).unwrap_or(false) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = coordinator.get(&key).await.unwrap();
        }
        let wire: UploadStatusWire = serde_json::from_slice(&status.unwrap()).unwrap();
        assert_eq!(wire.status, "completed");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_upload_publishes_failed_status() {
        let coordinator: Arc<dyn Coordinator> = Arc::new(InMemoryCoordinator::new());
        let backend: Arc<dyn UploadBackend> = Arc::new(AlwaysFails);
        let mgr = TaskPoolUploadManager::new(
            Arc::clone(&coordinator),
            backend,
            2,
            Duration::from_secs(60),
        );

        mgr.submit("up-2".to_string(), PathBuf::from("/tmp/shot.png"), false).await;

        let key = CoordinatorKeys::upload_status("up-2");
        let mut status = coordinator.get(&key).await.unwrap();
        for _ in 0..50 {
            if status.as_ref().map(|b| b.windows(6).any(|w| w == b"failed")).unwrap_or(false) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = coordinator.get(&key).await.unwrap();
        }
        let wire: UploadStatusWire = serde_json::from_slice(&status.unwrap()).unwrap();
        assert_eq!(wire.status, "failed");
    }
}
