//! Snapex export library
//!
//! Bulk snapshot export of a search store into size-bounded, gzip-compressed
//! JSON-lines files with a manifest per entity type.
//!
//! # Overview
//!
//! - **Discovery**: one date histogram per entity type lists its partitions
//! - **Walking**: one [`walker::PartitionWalker`] per partition pages with
//!   `search_after`, running in parallel on a bounded [`pool::WorkerPool`]
//! - **Dedup**: every record id is checked against a run-scoped
//!   [`dedup::DedupStore`] so each record is written at most once per run
//! - **Writing**: [`writer::PartWriter`] rotates part files before they
//!   exceed the configured uncompressed size
//! - **Manifest**: [`manifest::build_manifest`] lists every part file with
//!   its size and record count
//!
//! Output layout:
//!
//! ```text
//! <output>/<entity_type>/updated_date=<YYYY-MM-DD>/part_000.gz
//! <output>/<entity_type>/manifest
//! <output>/run_report.json
//! ```
//!
//! # Example
//!
//! ```no_run
//! use snapex_export::{config::ExportConfig, coordinator::Exporter, dedup, store::ElasticStore};
//! use std::{sync::Arc, time::Duration};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ExportConfig::from_env()?;
//!     let store = ElasticStore::new(&config.store_url, Duration::from_secs(config.request_timeout_secs))?;
//!     let dedup = dedup::connect(config.dedup_backend, &config.redis_url).await?;
//!     let entities = config.select_entities(&[])?;
//!     let report = Exporter::new(config, Arc::new(store), dedup).run(&entities).await;
//!     report.log_summary();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod dedup;
pub mod discovery;
pub mod manifest;
pub mod pool;
pub mod publish;
pub mod record;
pub mod report;
pub mod store;
pub mod walker;
pub mod writer;

// Re-export commonly used types
pub use coordinator::Exporter;
pub use report::{EntityReport, RunReport};
pub use snapex_common::{Result, SnapexError};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Snapex - bulk snapshot export
#[derive(Parser, Debug)]
#[command(name = "snapex-export")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TOML configuration file
    #[arg(short, long, env = "SNAPEX_CONFIG", global = true)]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export entity types and write their manifests
    Run {
        /// Entity types to export (defaults to all configured)
        #[arg(short, long = "entity")]
        entities: Vec<String>,

        /// Output root (defaults to ./data/<YYYY_MM_DD>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Partitions walked in parallel
        #[arg(short, long)]
        workers: Option<usize>,

        /// Documents per page
        #[arg(long)]
        page_size: Option<usize>,

        /// Upload each entity directory to object storage when done
        #[arg(long)]
        upload: bool,
    },

    /// Rebuild manifests from existing output
    Manifest {
        /// Output root holding the entity directories
        #[arg(short, long)]
        output: PathBuf,

        /// Entity types to rebuild (defaults to all configured)
        #[arg(short, long = "entity")]
        entities: Vec<String>,
    },

    /// List the partitions of an entity type
    Partitions {
        /// Entity type
        #[arg(short, long)]
        entity: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from([
            "snapex-export",
            "run",
            "--entity",
            "works",
            "--entity",
            "authors",
            "--workers",
            "8",
            "--upload",
        ]);
        match cli.command {
            Commands::Run {
                entities,
                workers,
                upload,
                ..
            } => {
                assert_eq!(entities, vec!["works", "authors"]);
                assert_eq!(workers, Some(8));
                assert!(upload);
            },
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_manifest_requires_output() {
        assert!(Cli::try_parse_from(["snapex-export", "manifest"]).is_err());
        let cli = Cli::try_parse_from(["snapex-export", "-v", "manifest", "--output", "/tmp/out"]).unwrap();
        assert!(cli.verbose);
    }
}
