// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Core data model: staged messages, image references, upload status and
//! conversation pairs, plus the exact wire shapes of §6.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tagged image reference. See spec §3/§9 — this is the generalization of
/// the original's duck-typed `dict | object | str` image URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageRef {
    /// Large file mid-upload; not yet resolvable to a concrete reference.
    Pending { upload_uuid: Uuid, filename: String },
    /// Already uploaded, referenceable by URI (Google Cloud file, etc).
    #[serde(rename = "google_cloud_file")]
    Remote {
        uri: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        create_time: Option<String>,
    },
    /// Small file consumable in-process (inline base64 encoding).
    #[serde(rename = "local_file")]
    Local { path: String },
}

impl ImageRef {
    pub fn is_pending(&self) -> bool {
        matches!(self, ImageRef::Pending { .. })
    }
}

/// One normalized input record in a user's staging queue.
///
/// Invariant (spec §3): `sources.len()` is either 0 or `image_refs.len()`; a
/// mismatch falls back to a single generic source label at prompt-assembly
/// time rather than being rejected (see `prompt::GENERIC_SOURCE_LABEL`).
#[derive(Debug, Clone, PartialEq)]
pub struct StagedMessage {
    pub timestamp: String,
    pub text: Option<String>,
    pub image_refs: Vec<ImageRef>,
    pub sources: Option<Vec<String>>,
    /// Only the count crosses the coordinator; raw audio never does.
    pub audio_segment_count: usize,
    pub delete_after_upload: bool,
}

impl StagedMessage {
    pub fn new(timestamp: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            text: None,
            image_refs: Vec::new(),
            sources: None,
            audio_segment_count: 0,
            delete_after_upload: false,
        }
    }
}

/// Exact wire shape of a serialized Staged Message (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedMessageWire {
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image_uris: Option<Vec<ImageRef>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sources: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub audio_segments: Option<AudioSegmentsWire>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
    /// Carried alongside the message so the flag survives a pop/re-read
    /// cycle — the original keeps this inside the stored payload too
    /// (`temporary_message_accumulator.py`, non-upload branch).
    #[serde(default)]
    pub delete_after_upload: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AudioSegmentsWire {
    pub count: usize,
}

impl From<&StagedMessage> for StagedMessageWire {
    fn from(m: &StagedMessage) -> Self {
        Self {
            timestamp: m.timestamp.clone(),
            image_uris: if m.image_refs.is_empty() {
                None
            } else {
                Some(m.image_refs.clone())
            },
            sources: m.sources.clone(),
            audio_segments: if m.audio_segment_count > 0 {
                Some(AudioSegmentsWire { count: m.audio_segment_count })
            } else {
                None
            },
            message: m.text.clone(),
            delete_after_upload: m.delete_after_upload,
        }
    }
}

impl From<StagedMessageWire> for StagedMessage {
    fn from(w: StagedMessageWire) -> Self {
        Self {
            timestamp: w.timestamp,
            text: w.message,
            image_refs: w.image_uris.unwrap_or_default(),
            sources: w.sources,
            audio_segment_count: w.audio_segments.map(|a| a.count).unwrap_or(0),
            delete_after_upload: w.delete_after_upload,
        }
    }
}

impl StagedMessage {
    pub fn to_wire_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&StagedMessageWire::from(self))
    }

    pub fn from_wire_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        let wire: StagedMessageWire = serde_json::from_slice(bytes)?;
        Ok(wire.into())
    }
}

/// One `{user_turn, assistant_turn}` pair, serialized as the two-element
/// `[{"role": ..., "content": ...}, ...]` array the spec mandates (§6).
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationPair {
    pub user_turn: String,
    pub assistant_turn: String,
}

#[derive(Serialize, Deserialize)]
struct RoleMessage {
    role: String,
    content: String,
}

impl ConversationPair {
    pub fn to_wire_bytes(&self) -> serde_json::Result<Vec<u8>> {
        let pair = [
            RoleMessage { role: "user".to_string(), content: self.user_turn.clone() },
            RoleMessage { role: "assistant".to_string(), content: self.assistant_turn.clone() },
        ];
        serde_json::to_vec(&pair)
    }

    pub fn from_wire_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        let pair: [RoleMessage; 2] = serde_json::from_slice(bytes)?;
        Ok(Self {
            user_turn: pair[0].content.clone(),
            assistant_turn: pair[1].content.clone(),
        })
    }
}

/// Resolution state of an out-of-band upload, keyed by `upload_id`.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadStatus {
    Pending,
    Completed(ImageRef),
    Failed,
    /// The status key is absent: never created, or evicted past its TTL.
    /// Treated as a terminal failure (spec §3).
    Unknown,
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UploadStatus::Pending)
    }
}

/// Exact wire shape of an Upload Status record (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadStatusWire {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub filename: Option<String>,
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<UploadResultWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadResultWire {
    GoogleCloud {
        uri: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        create_time: Option<String>,
    },
    Other { value: String },
}

impl UploadStatusWire {
    pub fn into_domain(self) -> UploadStatus {
        match self.status.as_str() {
            "pending" => UploadStatus::Pending,
            "failed" => UploadStatus::Failed,
            "completed" => match self.result {
                Some(UploadResultWire::GoogleCloud { uri, name, create_time }) => {
                    UploadStatus::Completed(ImageRef::Remote { uri, name, create_time })
                }
                Some(UploadResultWire::Other { value }) => {
                    UploadStatus::Completed(ImageRef::Local { path: value })
                }
                None => UploadStatus::Failed,
            },
            _ => UploadStatus::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_message_round_trip_preserves_core_fields() {
        let mut m = StagedMessage::new("2026-01-01T00:00:00Z");
        m.text = Some("hello".to_string());
        m.sources = Some(vec!["vscode".to_string()]);
        m.audio_segment_count = 3;
        m.image_refs = vec![ImageRef::Remote {
            uri: "gs://bucket/a.png".to_string(),
            name: "a.png".to_string(),
            create_time: Some("2026-01-01T00:00:01Z".to_string()),
        }];

        let bytes = m.to_wire_bytes().unwrap();
        let round = StagedMessage::from_wire_bytes(&bytes).unwrap();
        assert_eq!(round.timestamp, m.timestamp);
        assert_eq!(round.text, m.text);
        assert_eq!(round.sources, m.sources);
        assert_eq!(round.image_refs, m.image_refs);
        // Audio is reduced to a count — that's the spec-sanctioned lossy part.
        assert_eq!(round.audio_segment_count, m.audio_segment_count);
    }

    #[test]
    fn image_ref_tag_names_match_wire_contract() {
        let pending = ImageRef::Pending {
            upload_uuid: Uuid::nil(),
            filename: "shot.png".to_string(),
        };
        let v = serde_json::to_value(&pending).unwrap();
        assert_eq!(v["type"], "pending");

        let remote = ImageRef::Remote {
            uri: "gs://x".to_string(),
            name: "x".to_string(),
            create_time: None,
        };
        let v = serde_json::to_value(&remote).unwrap();
        assert_eq!(v["type"], "google_cloud_file");

        let local = ImageRef::Local { path: "/tmp/x.png".to_string() };
        let v = serde_json::to_value(&local).unwrap();
        assert_eq!(v["type"], "local_file");
    }

    #[test]
    fn conversation_pair_serializes_as_role_content_array() {
        let pair = ConversationPair {
            user_turn: "hi".to_string(),
            assistant_turn: "hello".to_string(),
        };
        let bytes = pair.to_wire_bytes().unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v[0]["role"], "user");
        assert_eq!(v[1]["role"], "assistant");

        let round = ConversationPair::from_wire_bytes(&bytes).unwrap();
        assert_eq!(round, pair);
    }

    #[test]
    fn upload_status_wire_unknown_on_unrecognized_status() {
        let wire = UploadStatusWire {
            status: "weird".to_string(),
            filename: None,
            timestamp: 0.0,
            result: None,
        };
        assert_eq!(wire.into_domain(), UploadStatus::Unknown);
    }
}
