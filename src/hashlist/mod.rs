//! Hashlist ingestion engine
//! Walks the hashlist commit history, decodes embedded torrent tables and
//! stores resolved streams

pub mod catalog;
pub mod checkpoint;
pub mod classifier;
pub mod config_loader;
pub mod database;
pub mod github;
pub mod logger;
pub mod lzstring;
pub mod orchestrator;
pub mod payload;
pub mod pipeline;
pub mod resolver;
pub mod streams;
pub mod title_parser;
pub mod walker;

#[cfg(test)]
mod test_support;

// Re-export commonly used types for convenience
pub use config_loader::{AppConfig, ConfigManager};

pub use checkpoint::SqliteCheckpointStore;

pub use catalog::{HttpMetadataSearch, SqliteCatalog};

pub use github::{GithubClient, GithubClientConfig};

pub use orchestrator::{FullIngestionOptions, Orchestrator, PassLimits, RunLock};

pub use resolver::{MetadataResolver, ResolverConfig};

pub use streams::SqliteStreamStore;

pub use walker::{CommitWalker, WalkerConfig};
