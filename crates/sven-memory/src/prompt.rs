// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Turns an absorbed prefix of staged messages plus any conversation pairs
//! into the single text batch handed to the memory agents (spec §4.3.5).
//!
//! Images are grouped by source so an agent sees "everything from the
//! screen recorder" as one block rather than interleaved with "everything
//! from the camera". A message whose `sources` doesn't line up one-to-one
//! with its `image_refs` — wrong length, or simply absent — falls back to
//! [`GENERIC_SOURCE_LABEL`] for every image in that message rather than
//! being rejected (spec §3).

use base64::Engine;
use std::collections::BTreeMap;

use crate::error::{MemoryError, Result};
use crate::model::{ConversationPair, ImageRef, StagedMessage};

/// Fallback grouping key when a message's `sources` can't be matched
/// one-to-one against its `image_refs`.
pub const GENERIC_SOURCE_LABEL: &str = "unknown_source";

/// The text batch ready to send to (or fan out across) the memory agents.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPrompt {
    pub body: String,
    pub directive: String,
}

impl AssembledPrompt {
    /// `body` followed by the mode-specific trailing directive, exactly as
    /// an agent would read it.
    pub fn full_text(&self) -> String {
        format!("{}\n\n{}", self.body, self.directive)
    }
}

struct ImageEntry<'a> {
    timestamp: &'a str,
    image_ref: &'a ImageRef,
}

/// Assembles one prompt from an absorbed prefix of staged messages and any
/// conversation pairs accumulated over the same window.
///
/// Reads local image files off disk to inline them as base64; a missing or
/// unreadable local file is a validation failure rather than something
/// `absorb` should retry — the caller decides whether to drop or requeue.
pub async fn assemble(
    messages: &[StagedMessage],
    conversation_pairs: &[ConversationPair],
    skip_meta_coordinator: bool,
) -> Result<AssembledPrompt> {
    let mut body = String::new();

    append_text_and_audio_blocks(&mut body, messages);
    append_image_blocks(&mut body, messages).await?;
    append_conversation_transcript(&mut body, conversation_pairs);

    if body.trim().is_empty() {
        body.push_str("(no content)");
    }

    let directive = if skip_meta_coordinator {
        "Directly incorporate the content above into the appropriate memory \
         store(s); no coordinating agent will re-route this batch."
            .to_string()
    } else {
        "Review the content above and route it to whichever memory agent(s), \
         if any, should act on it."
            .to_string()
    };

    Ok(AssembledPrompt { body, directive })
}

fn append_text_and_audio_blocks(body: &mut String, messages: &[StagedMessage]) {
    for msg in messages {
        if let Some(text) = &msg.text {
            if !text.is_empty() {
                body.push_str(&format!("[{}] {}\n", msg.timestamp, text));
            }
        }
        if msg.audio_segment_count > 0 {
            let noun = if msg.audio_segment_count == 1 { "recording" } else { "recordings" };
            body.push_str(&format!(
                "[{}] {} voice {} attached\n",
                msg.timestamp, msg.audio_segment_count, noun
            ));
        }
    }
}

async fn append_image_blocks(body: &mut String, messages: &[StagedMessage]) -> Result<()> {
    // BTreeMap for deterministic source ordering; insertion order within a
    // source is preserved since each Vec is only ever pushed to.
    let mut by_source: BTreeMap<&str, Vec<ImageEntry>> = BTreeMap::new();

    for msg in messages {
        if msg.image_refs.is_empty() {
            continue;
        }
        let sources_line_up = msg
            .sources
            .as_ref()
            .map(|s| s.len() == msg.image_refs.len())
            .unwrap_or(false);

        for (i, image_ref) in msg.image_refs.iter().enumerate() {
            let source = if sources_line_up {
                msg.sources.as_ref().unwrap()[i].as_str()
            } else {
                GENERIC_SOURCE_LABEL
            };
            by_source
                .entry(source)
                .or_default()
                .push(ImageEntry { timestamp: &msg.timestamp, image_ref });
        }
    }

    for (source, entries) in by_source {
        body.push_str(&format!("Source: {source}\n"));
        for entry in entries {
            let rendered = render_image_ref(entry.image_ref).await?;
            body.push_str(&format!("[{}] {}\n", entry.timestamp, rendered));
        }
    }

    Ok(())
}

async fn render_image_ref(image_ref: &ImageRef) -> Result<String> {
    match image_ref {
        ImageRef::Remote { uri, .. } => Ok(format!("image: {uri}")),
        ImageRef::Local { path } => {
            let bytes = tokio::fs::read(path).await.map_err(|e| {
                MemoryError::Validation(format!("failed to read local image {path}: {e}"))
            })?;
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
            Ok(format!("image (inline base64, {} bytes decoded): {encoded}", encoded.len()))
        }
        ImageRef::Pending { filename, .. } => {
            Err(MemoryError::Validation(format!(
                "image {filename} is still pending upload and cannot be assembled into a prompt"
            )))
        }
    }
}

fn append_conversation_transcript(body: &mut String, pairs: &[ConversationPair]) {
    if pairs.is_empty() {
        return;
    }
    body.push_str("Conversation:\n");
    for pair in pairs {
        body.push_str(&format!("User: {}\n", pair.user_turn));
        body.push_str(&format!("Assistant: {}\n", pair.assistant_turn));
    }
}
