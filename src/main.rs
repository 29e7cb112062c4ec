// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Manual smoke-test binary for the ingestion/dispatch core.
//!
//! Wires a real [`RedisCoordinator`] and a handful of logging stand-in
//! memory agents together, stages a few messages for one user, and absorbs
//! them once the threshold is met. Not a product surface — the real HTTP
//! front door and the real agent implementations live outside this crate
//! (spec §1).

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use sven_memory::{
    AgentOutcome, ConversationPair, CoreConfig, Dispatcher, FakeOutcome, FakeUploadManager, MemoryAgent,
    MemoryAgentKind, RedisCoordinator, Result as MemoryResult, StagedMessage, TemporaryMessageAccumulator,
};

/// Logs what it received and claims to have updated its store. Stands in
/// for the real per-kind memory agents, which are external collaborators
/// (spec §4.5/§6) with no implementation in this crate.
struct LoggingAgent(MemoryAgentKind);

#[async_trait]
impl MemoryAgent for LoggingAgent {
    fn kind(&self) -> MemoryAgentKind {
        self.0
    }

    async fn handle(&self, batch: &sven_memory::AssembledPrompt, user_id: &str) -> MemoryResult<AgentOutcome> {
        tracing::info!(
            agent = self.0.as_str(),
            user_id,
            bytes = batch.body.len(),
            "memory agent received batch"
        );
        Ok(AgentOutcome::Updated { summary: format!("{} bytes processed", batch.body.len()) })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let redis_url = std::env::var("MEMORY_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
    let mut config = CoreConfig::from_env();
    // This demo has no meta-memory agent to route through, only the six
    // direct logging stand-ins — force direct-mode fan-out regardless of
    // what the environment set.
    config.skip_meta_coordinator = true;

    let coordinator = Arc::new(
        RedisCoordinator::connect(&redis_url)
            .await
            .with_context(|| format!("connecting to coordinator at {redis_url}"))?,
    ) as Arc<dyn sven_memory::Coordinator>;

    let agents: Vec<Arc<dyn MemoryAgent>> = MemoryAgentKind::all()
        .into_iter()
        .map(|kind| Arc::new(LoggingAgent(kind)) as Arc<dyn MemoryAgent>)
        .collect();
    let dispatcher = Arc::new(Dispatcher::new(agents, None, config.dispatch_concurrency));

    // No real object-store endpoint configured for this smoke test — every
    // upload resolves to "failed" immediately so images never block
    // absorption. Point `HttpUploadBackend` + `TaskPoolUploadManager` at a
    // real endpoint for an end-to-end run.
    let upload_manager = Arc::new(FakeUploadManager::new(Arc::clone(&coordinator), FakeOutcome::Failed));

    let tma = TemporaryMessageAccumulator::new(
        Arc::clone(&coordinator),
        Arc::clone(&dispatcher),
        upload_manager,
        config.clone(),
    );

    let user_id = std::env::var("MEMORY_DEMO_USER").unwrap_or_else(|_| "demo-user".to_string());

    sven_memory::ensure_user_initialized(coordinator.as_ref(), &config, &user_id, || async {
        tracing::info!(user_id = %user_id, "running one-time user setup");
        Ok(())
    })
    .await?;

    for i in 0..config.threshold {
        let mut message = StagedMessage::new(chrono::Utc::now().to_rfc3339());
        message.text = Some(format!("demo message #{i}"));
        tma.append(&user_id, message).await?;
    }

    tma.append_conversation(
        &user_id,
        ConversationPair {
            user_turn: "what did I just tell you?".to_string(),
            assistant_turn: "let me check my notes".to_string(),
        },
    )
    .await?;

    match tma.absorb(&user_id).await? {
        Some(results) => {
            for result in results {
                tracing::info!(agent = result.kind.as_str(), outcome = ?result.outcome, "dispatch result");
            }
        }
        None => tracing::warn!("nothing was absorbed — threshold not reached or lock contended"),
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
}
