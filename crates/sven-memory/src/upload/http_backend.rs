// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Production [`UploadBackend`]: streams a local file to an external
//! object-store / model-file API over HTTP (spec §4.2's "external object
//! store / model-file API").
//!
//! This is the one piece of the upload path that actually talks to a
//! third-party service; everything else in [`crate::upload`] is scheduling.
//! Deliberately minimal — one `multipart/form-data` POST, one JSON response
//! shape — because the wire contract of whichever store a deployment points
//! this at is itself out of scope for this crate (spec §1).

use async_trait::async_trait;
use std::path::Path;

use super::UploadBackend;
use crate::error::{MemoryError, Result};
use crate::model::ImageRef;

#[derive(serde::Deserialize)]
struct UploadResponse {
    uri: String,
    name: String,
    #[serde(default)]
    create_time: Option<String>,
}

/// POSTs file bytes to `{base_url}/files` as multipart form data and expects
/// back a JSON body matching [`UploadResponse`].
pub struct HttpUploadBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUploadBackend {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into() }
    }
}

#[async_trait]
impl UploadBackend for HttpUploadBackend {
    async fn upload(&self, path: &Path) -> Result<ImageRef> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| MemoryError::Upload(format!("failed to read {}: {e}", path.display())))?;

        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.clone());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/files", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| MemoryError::Upload(format!("upload request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(MemoryError::Upload(format!(
                "upload of {filename} failed with status {}",
                response.status()
            )));
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| MemoryError::Upload(format!("malformed upload response: {e}")))?;

        Ok(ImageRef::Remote { uri: body.uri, name: body.name, create_time: body.create_time })
    }
}
