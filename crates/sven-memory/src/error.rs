// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Errors surfaced across the coordinator / upload-manager / TMA boundary.
///
/// Validation errors never reach the coordinator; coordinator faults inside
/// `absorb` are logged and swallowed rather than propagated (see
/// [`crate::tma`]), so this variant mostly surfaces from `append`-path calls.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("coordinator error: {0}")]
    Coordinator(String),

    #[error("upload error: {0}")]
    Upload(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
