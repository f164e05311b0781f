use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Error};
use serde::Serialize;
use tracing::info;

use crate::Command;
use crate::hashlist::database::open_database;
use crate::hashlist::pipeline::EntryPipeline;
use crate::hashlist::{
    AppConfig, CommitWalker, ConfigManager, FullIngestionOptions, GithubClient, GithubClientConfig,
    HttpMetadataSearch, MetadataResolver, Orchestrator, PassLimits, ResolverConfig, RunLock, SqliteCatalog,
    SqliteCheckpointStore, SqliteStreamStore, WalkerConfig,
};

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wires configuration, storage and remote clients together and runs one command.
pub(crate) struct Program {
    config_manager: ConfigManager,
    config: AppConfig,
}

impl Program {
    /// Loads (or creates) the configuration in `config_dir`.
    pub(crate) fn new(config_dir: &Path) -> Result<Self, Error> {
        let config_manager = ConfigManager::new(config_dir)?;
        let config = config_manager.get_app_config()?;
        Ok(Self {
            config_manager,
            config,
        })
    }

    pub(crate) fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Runs a single command to completion.
    pub(crate) async fn run(&self, command: Command) -> Result<(), Error> {
        info!("{} v{} using {}", NAME, VERSION, self.config_manager.config_path().display());

        let orchestrator = self.build_orchestrator()?;
        match command {
            Command::Run => {
                let _lock = RunLock::acquire(&self.config.paths.lock_file)?;
                let stats = orchestrator.run().await?;
                print_json(&stats)?;
            }
            Command::Full {
                max_iterations,
                incremental_commits,
                backfill_commits,
                reset_checkpoints,
            } => {
                let _lock = RunLock::acquire(&self.config.paths.lock_file)?;
                let mut options = FullIngestionOptions::from_app_config(&self.config);
                if let Some(max_iterations) = max_iterations {
                    options.max_iterations = max_iterations;
                }
                if let Some(commits) = incremental_commits {
                    options.limits.incremental_commits = commits;
                }
                if let Some(commits) = backfill_commits {
                    options.limits.backfill_commits = commits;
                }
                options.reset_checkpoints = reset_checkpoints;

                let report = orchestrator.full_ingestion(options).await?;
                print_json(&report)?;
            }
            Command::Status => {
                let status = orchestrator.status().await?;
                print_json(&status)?;
            }
            Command::Reset => {
                let _lock = RunLock::acquire(&self.config.paths.lock_file)?;
                orchestrator.reset().await?;
                println!("Checkpoints cleared");
            }
        }

        Ok(())
    }

    fn build_orchestrator(&self) -> Result<Orchestrator, Error> {
        let config = &self.config;
        let conn = open_database(&config.paths.database_file)
            .with_context(|| format!("Failed to open database {}", config.paths.database_file))?;

        let checkpoints = Arc::new(SqliteCheckpointStore::new(conn.clone()));
        let catalog = Arc::new(SqliteCatalog::new(conn.clone()));
        let streams = Arc::new(SqliteStreamStore::new(conn));
        let search = Arc::new(HttpMetadataSearch::new(
            config.resolver.search_endpoint.clone(),
            &config.source.user_agent,
            Duration::from_secs(config.resolver.search_timeout_secs),
        )?);

        let resolver = MetadataResolver::new(catalog, search, ResolverConfig::from_app_config(config));
        let pipeline = Arc::new(EntryPipeline::new(Arc::new(resolver), streams));
        let source = Arc::new(GithubClient::new(GithubClientConfig::from_app_config(config))?);

        let walker = CommitWalker::new(
            source,
            checkpoints.clone(),
            checkpoints.clone(),
            pipeline,
            WalkerConfig::from_app_config(config),
        );

        Ok(Orchestrator::new(
            walker,
            checkpoints.clone(),
            checkpoints,
            PassLimits::from_app_config(config),
            config.limits.max_commits_per_page,
        ))
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
