// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Synchronous [`UploadManager`] test double: `submit` resolves immediately
//! against a preconfigured outcome instead of spawning background work.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::UploadManager;
use crate::coordinator::{Coordinator, CoordinatorKeys};
use crate::model::{ImageRef, UploadResultWire, UploadStatusWire};

#[derive(Clone)]
pub enum FakeOutcome {
    Completed(ImageRef),
    Failed,
    /// Leaves the status untouched, simulating an upload that never resolves.
    NeverResolves,
}

pub struct FakeUploadManager {
    coordinator: Arc<dyn Coordinator>,
    outcome: FakeOutcome,
    status_ttl: Duration,
    pub submitted: Mutex<Vec<(String, PathBuf, bool)>>,
}

impl FakeUploadManager {
    pub fn new(coordinator: Arc<dyn Coordinator>, outcome: FakeOutcome) -> Self {
        Self {
            coordinator,
            outcome,
            status_ttl: Duration::from_secs(3600),
            submitted: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl UploadManager for FakeUploadManager {
    async fn submit(&self, upload_id: String, path: PathBuf, delete_after_upload: bool) {
        self.submitted.lock().unwrap().push((upload_id.clone(), path, delete_after_upload));

        let wire = match &self.outcome {
            FakeOutcome::NeverResolves => return,
            FakeOutcome::Failed => UploadStatusWire {
                status: "failed".to_string(),
                filename: None,
                timestamp: 0.0,
                result: None,
            },
            FakeOutcome::Completed(ImageRef::Remote { uri, name, create_time }) => UploadStatusWire {
                status: "completed".to_string(),
                filename: None,
                timestamp: 0.0,
                result: Some(UploadResultWire::GoogleCloud {
                    uri: uri.clone(),
                    name: name.clone(),
                    create_time: create_time.clone(),
                }),
            },
            FakeOutcome::Completed(ImageRef::Local { path }) => UploadStatusWire {
                status: "completed".to_string(),
                filename: None,
                timestamp: 0.0,
                result: Some(UploadResultWire::Other { value: path.clone() }),
            },
            FakeOutcome::Completed(ImageRef::Pending { .. }) => UploadStatusWire {
                status: "failed".to_string(),
                filename: None,
                timestamp: 0.0,
                result: None,
            },
        };

        if let Ok(bytes) = serde_json::to_vec(&wire) {
            let key = CoordinatorKeys::upload_status(&upload_id);
            let _ = self.coordinator.setex(&key, self.status_ttl, bytes).await;
        }
    }
}
