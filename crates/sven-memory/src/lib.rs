// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Ingestion, accumulation and cross-pod dispatch core for the long-term
//! memory service.
//!
//! A per-user staging queue ([`tma::TemporaryMessageAccumulator`]) collects
//! incoming messages behind a [`coordinator::Coordinator`] until enough have
//! landed (and any referenced images have finished uploading) to absorb
//! them as one batch. Absorption assembles a [`prompt::AssembledPrompt`] and
//! hands it to a [`dispatcher::Dispatcher`], which fans it out to whichever
//! of the six long-term memory agents should see it.
//!
//! Every external dependency — the coordinator, the upload backend, the
//! memory agents themselves — is a trait, so the whole pipeline runs against
//! in-memory test doubles with no network or Redis required.

pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod init;
pub mod model;
pub mod prompt;
pub mod tma;
pub mod upload;

pub use config::CoreConfig;
pub use coordinator::{Coordinator, InMemoryCoordinator, RedisCoordinator};
pub use dispatcher::{AgentOutcome, DispatchResult, Dispatcher, MemoryAgent, MemoryAgentKind};
pub use error::{MemoryError, Result};
pub use init::ensure_user_initialized;
pub use model::{ConversationPair, ImageRef, StagedMessage, UploadStatus};
pub use prompt::AssembledPrompt;
pub use tma::{RawImage, TemporaryMessageAccumulator};
pub use upload::{
    FakeOutcome, FakeUploadManager, HttpUploadBackend, TaskPoolUploadManager, UploadBackend, UploadManager,
};
