//! Service object wiring the learning engine and the conversation manager
//!
//! Built once at startup and handed to every consumer by reference. Dropping it
//! after `shutdown` is the whole teardown.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::conversation::ConversationManager;
use crate::learning::LearningEngine;

pub struct MemoryService {
    config: Config,
    learning: Arc<LearningEngine>,
    conversations: ConversationManager,
}

impl MemoryService {
    /// Open the service over the configured data directory
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let data_dir = config.storage.resolve_dir()?;
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let learning = Arc::new(LearningEngine::open(
            config.learning.clone(),
            config.storage.store_paths(&data_dir),
        ));
        let conversations = ConversationManager::new(config.conversation.clone())
            .with_learning(learning.clone())
            .with_persistence(config.storage.sessions_path(&data_dir));

        info!("Memory service opened at {}", data_dir.display());
        Ok(Self {
            config,
            learning,
            conversations,
        })
    }

    /// Service that keeps everything in memory
    pub fn in_memory(config: Config) -> Self {
        let learning = Arc::new(LearningEngine::in_memory(config.learning.clone()));
        let conversations =
            ConversationManager::new(config.conversation.clone()).with_learning(learning.clone());
        Self {
            config,
            learning,
            conversations,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn learning(&self) -> &Arc<LearningEngine> {
        &self.learning
    }

    pub fn conversations(&self) -> &ConversationManager {
        &self.conversations
    }

    /// Flush all state to disk
    pub async fn shutdown(&self) -> Result<()> {
        self.learning.flush().await.context("Failed to save learning state")?;
        self.conversations
            .flush()
            .await
            .context("Failed to save conversation sessions")?;
        info!("Memory service shut down");
        Ok(())
    }
}
