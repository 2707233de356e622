use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP daemon
    Serve {},

    /// Load issues from a CSV file or a directory of CSV files
    Load {
        /// CSV file or directory
        path: PathBuf,
    },

    /// Rebuild the collection from the configured source directory
    Reindex {},

    /// Find issues similar to a query
    Search {
        query: String,

        /// Number of results
        #[clap(short = 'k', long, default_value = "10")]
        top_k: usize,

        /// Rank by vector similarity only
        #[clap(long, default_value = "false")]
        no_rerank: bool,

        /// Results to keep after reranking (defaults to top-k)
        #[clap(long)]
        rerank_top_k: Option<usize>,

        /// Only return issues with this label (repeatable)
        #[clap(short, long = "label")]
        labels: Vec<String>,

        /// Also print labels suggested by the results
        #[clap(long, default_value = "false")]
        suggest_labels: bool,
    },

    /// Print collection size and model health
    Status {},

    /// Remove every issue from the collection
    Clear {
        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },

    /// Fetch issues from GitHub and index them through a running daemon
    ImportGithub {
        /// Repository owner
        #[clap(long)]
        owner: String,

        /// Repository name
        #[clap(long)]
        repo: String,

        /// GitHub personal access token (recommended for rate limits)
        #[clap(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Maximum number of issues to fetch
        #[clap(long, default_value = "1000")]
        max_issues: usize,

        /// Issue state filter
        #[clap(long, default_value = "all", value_parser = ["open", "closed", "all"])]
        state: String,

        /// Address of the running daemon
        #[clap(long, default_value = "http://localhost:8001")]
        service_url: String,

        /// Issues per request to the daemon
        #[clap(long, default_value = "50")]
        batch_size: usize,
    },
}
