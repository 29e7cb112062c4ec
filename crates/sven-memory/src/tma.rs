// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The `TemporaryMessageAccumulator`: staging, absorption-readiness, and the
//! absorb cycle itself (spec §4.3).
//!
//! `append` and `append_conversation` are the hot path and stay cheap.
//! `should_absorb` and `absorb` are the parts worth reading closely:
//! absorption only ever considers a *prefix* of the staged queue, and it
//! stops at the first image that hasn't finished uploading yet, so a batch
//! never reaches a memory agent referencing an image that doesn't resolve
//! to anything.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::coordinator::{Coordinator, CoordinatorKeys};
use crate::dispatcher::{Dispatcher, DispatchResult};
use crate::error::{MemoryError, Result};
use crate::model::{ConversationPair, ImageRef, StagedMessage, UploadStatus, UploadStatusWire};
use crate::upload::UploadManager;

/// One image as handed to [`TemporaryMessageAccumulator::stage`], before the
/// upload decision in spec §4.3.1 step 2 has been made.
pub enum RawImage {
    /// A local file that should go through the Upload Manager when
    /// [`CoreConfig::requires_upload`] is set; kept as an inline
    /// [`ImageRef::Local`] otherwise.
    LocalPath(PathBuf),
    /// Already resolved — passed through untouched (the producer uploaded it
    /// itself, or it's a `Remote` reference from a prior turn).
    Resolved(ImageRef),
}

/// Holds the per-user absorb lock for as long as this value is alive and
/// releases it on drop, including on an early return or a panic unwind —
/// the async equivalent of the original's `try/finally`.
///
/// `Drop` can't await, so release spawns a detached task. That task racing
/// the next `should_absorb` check is harmless: worst case a subsequent
/// absorb attempt waits out the lock's TTL instead of the (much faster)
/// explicit delete.
struct AbsorbLockGuard {
    coordinator: Arc<dyn Coordinator>,
    key: String,
}

impl AbsorbLockGuard {
    fn new(coordinator: Arc<dyn Coordinator>, key: String) -> Self {
        Self { coordinator, key }
    }
}

impl Drop for AbsorbLockGuard {
    fn drop(&mut self) {
        let coordinator = Arc::clone(&self.coordinator);
        let key = self.key.clone();
        tokio::spawn(async move {
            if let Err(err) = coordinator.del(&key).await {
                tracing::warn!(error = %err, "failed to release absorb lock");
            }
        });
    }
}

pub struct TemporaryMessageAccumulator {
    coordinator: Arc<dyn Coordinator>,
    dispatcher: Arc<Dispatcher>,
    upload_manager: Arc<dyn UploadManager>,
    config: CoreConfig,
}

impl TemporaryMessageAccumulator {
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        dispatcher: Arc<Dispatcher>,
        upload_manager: Arc<dyn UploadManager>,
        config: CoreConfig,
    ) -> Self {
        Self { coordinator, dispatcher, upload_manager, config }
    }

    /// Full staging procedure of spec §4.3.1: resolves each image (submitting
    /// out-of-band uploads where the backend requires pre-uploaded
    /// references), normalizes the audio count, and appends the resulting
    /// [`StagedMessage`].
    ///
    /// `sources`, if given, should line up one-to-one with `images` — a
    /// mismatch is tolerated (spec §3) and resolved to a generic label at
    /// prompt-assembly time, not rejected here.
    pub async fn stage(
        &self,
        user_id: &str,
        timestamp: impl Into<String>,
        text: Option<String>,
        images: Vec<RawImage>,
        sources: Option<Vec<String>>,
        audio_segment_count: usize,
        delete_after_upload: bool,
    ) -> Result<()> {
        require_user_id(user_id)?;

        let mut image_refs = Vec::with_capacity(images.len());
        for image in images {
            let resolved = match image {
                RawImage::Resolved(image_ref) => image_ref,
                RawImage::LocalPath(path) if self.config.requires_upload => {
                    let upload_uuid = Uuid::new_v4();
                    let filename = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| path.to_string_lossy().into_owned());
                    self.upload_manager
                        .submit(upload_uuid.to_string(), path, delete_after_upload)
                        .await;
                    ImageRef::Pending { upload_uuid, filename }
                }
                RawImage::LocalPath(path) => ImageRef::Local { path: path.to_string_lossy().into_owned() },
            };
            image_refs.push(resolved);
        }

        let mut message = StagedMessage::new(timestamp.into());
        message.text = text;
        message.image_refs = image_refs;
        message.sources = sources;
        message.audio_segment_count = audio_segment_count;
        message.delete_after_upload = delete_after_upload;

        self.append(user_id, message).await
    }

    /// Stages one already-assembled message for `user_id`, refreshing the
    /// queue's TTL and trimming it to `max_messages` if it's grown past the
    /// cap. Lower-level than [`Self::stage`] — useful when the caller has
    /// already resolved every image reference itself.
    pub async fn append(&self, user_id: &str, message: StagedMessage) -> Result<()> {
        require_user_id(user_id)?;
        let key = CoordinatorKeys::messages(user_id);
        let bytes = message
            .to_wire_bytes()
            .map_err(|e| MemoryError::Validation(format!("failed to encode staged message: {e}")))?;
        self.coordinator.append(&key, bytes).await?;
        self.coordinator.expire(&key, self.config.message_ttl).await?;
        self.trim_to_cap(&key, self.config.max_messages).await?;
        Ok(())
    }

    /// Stages one conversation turn pair for `user_id`.
    pub async fn append_conversation(&self, user_id: &str, pair: ConversationPair) -> Result<()> {
        require_user_id(user_id)?;
        let key = CoordinatorKeys::conversations(user_id);
        let bytes = pair
            .to_wire_bytes()
            .map_err(|e| MemoryError::Validation(format!("failed to encode conversation pair: {e}")))?;
        self.coordinator.append(&key, bytes).await?;
        self.coordinator.expire(&key, self.config.conversation_ttl).await?;
        self.trim_to_cap(&key, self.config.max_conversations).await?;
        Ok(())
    }

    async fn trim_to_cap(&self, key: &str, cap: usize) -> Result<()> {
        let len = self.coordinator.llen(key).await?;
        if len > cap {
            let drop_count = (len - cap) as isize;
            self.coordinator.ltrim(key, drop_count, -1).await?;
        }
        Ok(())
    }

    async fn load_messages(&self, user_id: &str) -> Result<Vec<StagedMessage>> {
        let key = CoordinatorKeys::messages(user_id);
        let raw = self.coordinator.range(&key, 0, -1).await?;
        Ok(raw
            .iter()
            .filter_map(|bytes| match StagedMessage::from_wire_bytes(bytes) {
                Ok(m) => Some(m),
                Err(err) => {
                    tracing::warn!(user_id, error = %err, "dropping unparsable staged message");
                    None
                }
            })
            .collect())
    }

    /// Non-destructively reads every currently staged conversation pair for
    /// `user_id`. Pairs are only cleared once the batch they accompanied has
    /// been successfully dispatched (spec §4.3.4 steps f/h) — reading them
    /// off the queue must not consume them, or a dispatch failure would lose
    /// conversation context that was never delivered.
    async fn read_conversation_pairs(&self, user_id: &str) -> Result<Vec<ConversationPair>> {
        let key = CoordinatorKeys::conversations(user_id);
        let raw = self.coordinator.range(&key, 0, -1).await?;
        Ok(raw
            .iter()
            .filter_map(|bytes| match ConversationPair::from_wire_bytes(bytes) {
                Ok(p) => Some(p),
                Err(err) => {
                    tracing::warn!(user_id, error = %err, "dropping unparsable conversation pair");
                    None
                }
            })
            .collect())
    }

    /// Resolves every `Pending` image reference in `message` against its
    /// upload status (spec §4.3.3/§4.3.4 step c): `completed` substitutes the
    /// concrete `Remote`/`Local` reference and lets the walk continue,
    /// `failed`/`unknown` drops the image and lets the walk continue, and a
    /// reference still `Pending` is kept as-is and reported so the caller can
    /// halt there. Returns `true` iff no image in this message is still
    /// pending after resolution.
    async fn resolve_pending_images(&self, message: &mut StagedMessage) -> Result<bool> {
        let mut resolved = Vec::with_capacity(message.image_refs.len());
        let mut still_pending = false;
        for image_ref in std::mem::take(&mut message.image_refs) {
            let ImageRef::Pending { upload_uuid, .. } = &image_ref else {
                resolved.push(image_ref);
                continue;
            };
            let key = CoordinatorKeys::upload_status(&upload_uuid.to_string());
            let status = match self.coordinator.get(&key).await? {
                Some(bytes) => {
                    let wire: UploadStatusWire = serde_json::from_slice(&bytes)
                        .map_err(|e| MemoryError::Validation(format!("malformed upload status: {e}")))?;
                    wire.into_domain()
                }
                None => UploadStatus::Unknown,
            };
            match status {
                UploadStatus::Completed(concrete) => resolved.push(concrete),
                UploadStatus::Pending => {
                    still_pending = true;
                    resolved.push(image_ref);
                }
                UploadStatus::Failed | UploadStatus::Unknown => {}
            }
        }
        message.image_refs = resolved;
        Ok(!still_pending)
    }

    /// Returns the leading run of staged messages that are ready to absorb,
    /// if that run has reached `threshold`. Each message's pending image
    /// references are resolved against their upload status as the walk
    /// proceeds; the walk halts at the first message still referencing an
    /// image that is *still* pending after that resolution — everything
    /// after that point stays staged regardless of queue depth.
    pub async fn should_absorb(&self, user_id: &str) -> Result<Option<Vec<StagedMessage>>> {
        require_user_id(user_id)?;
        let messages = self.load_messages(user_id).await?;
        let mut prefix = Vec::new();
        for mut message in messages {
            if !self.resolve_pending_images(&mut message).await? {
                break;
            }
            prefix.push(message);
        }
        if prefix.len() >= self.config.threshold {
            Ok(Some(prefix))
        } else {
            Ok(None)
        }
    }

    /// If a prefix is ready, atomically pops it off the message queue,
    /// resolves any remaining pending image references, assembles a prompt
    /// out of that batch plus every currently staged conversation pair, and
    /// dispatches it to the memory agents. Returns `None` if nothing was
    /// ready or another pod already holds the absorb lock for this user.
    ///
    /// Conversation pairs are read non-destructively and only cleared after
    /// a successful dispatch (spec §4.3.4 steps f/h) — a dispatch failure
    /// leaves them staged so the next absorb cycle can redeliver them rather
    /// than losing them silently.
    ///
    /// Coordinator faults encountered *after* the lock is held are logged
    /// and swallowed rather than propagated — the messages are already
    /// popped at that point, so surfacing the error wouldn't let a caller
    /// retry without either losing or duplicating them.
    pub async fn absorb(&self, user_id: &str) -> Result<Option<Vec<DispatchResult>>> {
        require_user_id(user_id)?;
        let prefix = match self.should_absorb(user_id).await? {
            Some(prefix) => prefix,
            None => return Ok(None),
        };

        let lock_key = CoordinatorKeys::absorb_lock(user_id);
        let acquired = self
            .coordinator
            .set_if_absent(&lock_key, b"1".to_vec(), self.config.absorb_lock_ttl)
            .await?;
        if !acquired {
            return Ok(None);
        }
        let _guard = AbsorbLockGuard::new(Arc::clone(&self.coordinator), lock_key);

        let messages_key = CoordinatorKeys::messages(user_id);
        let mut popped = match self.coordinator.pop_head(&messages_key, prefix.len()).await {
            Ok(raw) => raw
                .iter()
                .filter_map(|bytes| StagedMessage::from_wire_bytes(bytes).ok())
                .collect::<Vec<_>>(),
            Err(err) => {
                tracing::warn!(user_id, error = %err, "absorb: failed to pop staged messages");
                return Ok(None);
            }
        };

        // The prefix popped here is re-read from the coordinator, not reused
        // from `should_absorb`'s in-memory copy, so its pending references
        // must be resolved again before assembly.
        for message in popped.iter_mut() {
            if let Err(err) = self.resolve_pending_images(message).await {
                tracing::warn!(user_id, error = %err, "absorb: failed to resolve pending image references");
            }
        }

        let conversation_pairs = match self.read_conversation_pairs(user_id).await {
            Ok(pairs) => pairs,
            Err(err) => {
                tracing::warn!(user_id, error = %err, "absorb: failed to read conversation pairs");
                Vec::new()
            }
        };

        let prompt = match crate::prompt::assemble(&popped, &conversation_pairs, self.config.skip_meta_coordinator).await {
            Ok(prompt) => prompt,
            Err(err) => {
                tracing::warn!(user_id, error = %err, "absorb: failed to assemble prompt");
                return Ok(None);
            }
        };

        match self.dispatcher.dispatch(&prompt, user_id, self.config.skip_meta_coordinator).await {
            Ok(results) => {
                if !conversation_pairs.is_empty() {
                    if let Err(err) = self.coordinator.del(&CoordinatorKeys::conversations(user_id)).await {
                        tracing::warn!(user_id, error = %err, "absorb: failed to clear conversation queue after dispatch");
                    }
                }
                Ok(Some(results))
            }
            Err(err) => {
                tracing::warn!(user_id, error = %err, "absorb: dispatch failed");
                Ok(None)
            }
        }
    }

    /// Images referenced in the last [`CoreConfig::recent_image_window`] of
    /// staged messages, newest first no longer — restored to chronological
    /// order. A pending image is checked against its upload status once,
    /// without blocking or retrying: resolved to its remote/local reference
    /// if the upload finished, dropped if it failed, left pending
    /// otherwise. Each entry carries its source message's timestamp and, if
    /// present, the per-image source label (spec §4.3.6; mirrors the
    /// original's `(timestamp, file_ref, sources)` return shape).
    pub async fn get_recent_images(&self, user_id: &str) -> Result<Vec<(String, ImageRef, Option<String>)>> {
        require_user_id(user_id)?;
        let messages = self.load_messages(user_id).await?;
        let now = Utc::now();
        let window = chrono::Duration::from_std(self.config.recent_image_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let mut out = Vec::new();
        for message in messages.iter().rev() {
            let Ok(parsed) = DateTime::parse_from_rfc3339(&message.timestamp) else {
                continue;
            };
            if now.signed_duration_since(parsed.with_timezone(&Utc)) > window {
                break;
            }
            for (i, image_ref) in message.image_refs.iter().enumerate() {
                if let Some(resolved) = self.resolve_image_ref_nonblocking(image_ref).await? {
                    let source = message.sources.as_ref().and_then(|s| s.get(i)).cloned();
                    out.push((message.timestamp.clone(), resolved, source));
                }
            }
        }
        out.reverse();
        Ok(out)
    }

    async fn resolve_image_ref_nonblocking(&self, image_ref: &ImageRef) -> Result<Option<ImageRef>> {
        let ImageRef::Pending { upload_uuid, .. } = image_ref else {
            return Ok(Some(image_ref.clone()));
        };
        let key = CoordinatorKeys::upload_status(&upload_uuid.to_string());
        let Some(bytes) = self.coordinator.get(&key).await? else {
            return Ok(Some(image_ref.clone()));
        };
        let wire: UploadStatusWire = serde_json::from_slice(&bytes)
            .map_err(|e| MemoryError::Validation(format!("malformed upload status: {e}")))?;
        Ok(match wire.into_domain() {
            UploadStatus::Completed(resolved) => Some(resolved),
            UploadStatus::Pending => Some(image_ref.clone()),
            UploadStatus::Failed | UploadStatus::Unknown => None,
        })
    }
}

fn require_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(MemoryError::Validation("user_id must not be empty".to_string()));
    }
    Ok(())
}
