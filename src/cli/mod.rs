//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "quarry",
    version,
    about = "Hybrid retrieval knowledge-base engine",
    long_about = "Quarry builds chunked, summary-enriched, dually-indexed corpora from raw \
                  document text, then answers queries by fusing dense (vector) and sparse \
                  (keyword) retrieval signals into a single ranked, deduplicated context."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/quarry/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a fresh corpus version from a directory of text documents
    Build {
        /// Directory of extracted document text (.txt / .md)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Append new documents to the current corpus as a new version
    Append {
        /// Directory of extracted document text (.txt / .md)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Retrieve the top-k fused passages for a query
    Retrieve {
        /// Query text
        query: String,

        /// Maximum number of results to return
        #[arg(short)]
        k: Option<usize>,

        /// Fusion weight: 1.0 = pure dense, 0.0 = pure sparse
        #[arg(short, long)]
        alpha: Option<f32>,

        /// Query a specific corpus version instead of CURRENT
        #[arg(long)]
        version: Option<String>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show corpus versions and current corpus statistics
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
