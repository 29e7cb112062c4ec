// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Fan-out from one assembled batch to the memory agents (spec §4.4).
//!
//! Two modes, selected by [`CoreConfig::skip_meta_coordinator`]:
//! - direct: every agent gets the batch concurrently, bounded by
//!   `dispatch_concurrency`. This replaces the original's
//!   `ThreadPoolExecutor(max_workers=6)` — unbounded in spirit, since it
//!   happened to equal the agent count, but wired here as an explicit,
//!   independently tunable limit (spec §9).
//! - routed: a single meta agent sees the batch and decides for itself
//!   which of the six memory stores, if any, to touch.
//!
//! Dispatch is at-most-once by design (spec §7, Open Question): a dropped
//! or failed agent call is logged and does not retry, because retrying
//! would risk a memory store observing the same batch twice with no way to
//! detect the duplicate.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;

use crate::error::{MemoryError, Result};
use crate::prompt::AssembledPrompt;

/// The six long-term memory stores a batch can be routed to, plus the
/// meta-memory agent that routes to them in coordinator mode. `Meta` is
/// never returned by [`MemoryAgentKind::all`] — it identifies the one agent
/// passed to [`Dispatcher::new`] as `meta_agent`, not a seventh store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryAgentKind {
    Core,
    Episodic,
    Semantic,
    Procedural,
    Resource,
    KnowledgeVault,
    Meta,
}

impl MemoryAgentKind {
    pub fn all() -> [MemoryAgentKind; 6] {
        [
            MemoryAgentKind::Core,
            MemoryAgentKind::Episodic,
            MemoryAgentKind::Semantic,
            MemoryAgentKind::Procedural,
            MemoryAgentKind::Resource,
            MemoryAgentKind::KnowledgeVault,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryAgentKind::Core => "core",
            MemoryAgentKind::Episodic => "episodic",
            MemoryAgentKind::Semantic => "semantic",
            MemoryAgentKind::Procedural => "procedural",
            MemoryAgentKind::Resource => "resource",
            MemoryAgentKind::KnowledgeVault => "knowledge_vault",
            MemoryAgentKind::Meta => "meta",
        }
    }
}

/// What one agent did with a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    /// The agent incorporated the batch; `summary` is a short, loggable note
    /// of what changed (not the full memory content).
    Updated { summary: String },
    /// The agent looked at the batch and decided it had nothing to do.
    Skipped { reason: String },
}

/// One of the six long-term memory stores, or the meta agent that routes to
/// them. Implementations call out to whatever backs that store — a vector
/// index, a graph, a plain key/value log — the dispatcher doesn't care.
#[async_trait]
pub trait MemoryAgent: Send + Sync {
    fn kind(&self) -> MemoryAgentKind;
    async fn handle(&self, batch: &AssembledPrompt, user_id: &str) -> Result<AgentOutcome>;
}

/// One agent's result, tagged with which agent produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    pub kind: MemoryAgentKind,
    pub outcome: std::result::Result<AgentOutcome, String>,
}

pub struct Dispatcher {
    direct_agents: Vec<Arc<dyn MemoryAgent>>,
    meta_agent: Option<Arc<dyn MemoryAgent>>,
    concurrency: usize,
}

impl Dispatcher {
    /// `meta_agent` is required only if the caller ever dispatches with
    /// `skip_meta_coordinator = false`; direct-only deployments can pass
    /// `None`.
    pub fn new(
        direct_agents: Vec<Arc<dyn MemoryAgent>>,
        meta_agent: Option<Arc<dyn MemoryAgent>>,
        concurrency: usize,
    ) -> Self {
        Self { direct_agents, meta_agent, concurrency: concurrency.max(1) }
    }

    pub async fn dispatch(
        &self,
        batch: &AssembledPrompt,
        user_id: &str,
        skip_meta_coordinator: bool,
    ) -> Result<Vec<DispatchResult>> {
        if skip_meta_coordinator {
            Ok(self.dispatch_direct(batch, user_id).await)
        } else {
            self.dispatch_routed(batch, user_id).await
        }
    }

    async fn dispatch_direct(&self, batch: &AssembledPrompt, user_id: &str) -> Vec<DispatchResult> {
        stream::iter(self.direct_agents.iter().cloned())
            .map(|agent| async move {
                let kind = agent.kind();
                let outcome = agent.handle(batch, user_id).await.map_err(|e| e.to_string());
                if let Err(err) = &outcome {
                    tracing::warn!(agent = kind.as_str(), user_id, error = %err, "memory agent call failed");
                }
                DispatchResult { kind, outcome }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    async fn dispatch_routed(&self, batch: &AssembledPrompt, user_id: &str) -> Result<Vec<DispatchResult>> {
        let meta = self.meta_agent.as_ref().ok_or_else(|| {
            MemoryError::Validation(
                "routed dispatch requires a meta agent but none was configured".to_string(),
            )
        })?;
        let kind = meta.kind();
        let outcome = meta.handle(batch, user_id).await.map_err(|e| e.to_string());
        if let Err(err) = &outcome {
            tracing::warn!(agent = kind.as_str(), user_id, error = %err, "meta memory agent call failed");
        }
        Ok(vec![DispatchResult { kind, outcome }])
    }
}
