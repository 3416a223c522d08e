//! Metatron Memory - learning-pattern memory and conversation flows
//!
//! Stores what worked in past interactions as learning patterns, ranks them
//! against new situations with a TF-IDF index, adjusts them from user feedback
//! and drives simple multi-step conversation flows on top.
//!
//! # Example
//!
//! ```ignore
//! use metatron_memory::{BrainRegion, Config, Interaction, MemoryService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let service = MemoryService::open(Config::load()?)?;
//!     service
//!         .learning()
//!         .learn(Interaction::new("check the weather", "called the weather api", 0.9, BrainRegion::Cerebellum))
//!         .await?;
//!     let hits = service.learning().retrieve_patterns("weather in Paris", None, None, 3).await;
//!     println!("{} matches", hits.len());
//!     service.shutdown().await
//! }
//! ```

pub mod types;
pub mod error;
pub mod config;
mod persist;
pub mod similarity;
pub mod learning; // Pattern store, feedback ledger and learning engine
pub mod conversation;
pub mod service;
pub mod cli;

pub use config::{Config, ConversationConfig, LearningConfig, StorageConfig};
pub use error::{MemoryError, Result};
pub use types::{BrainRegion, MetaValue, Metadata, Role};

pub use learning::{
    Feedback,
    FeedbackRecord,
    FeedbackType,
    Interaction,
    LearningEngine,
    LearningPattern,
    LearningStats,
    RetrievedPattern,
    Suggestion,
};

pub use conversation::{
    ConversationContext,
    ConversationFlow,
    ConversationManager,
    ConversationState,
    FlowType,
    ProcessResult,
};

pub use service::MemoryService;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Learning-pattern memory library", NAME, VERSION)
}
