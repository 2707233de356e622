use anyhow::bail;
use clap::Parser;
use inquire::error::InquireResult;
use tracing_subscriber::EnvFilter;

mod app;
mod cli;
mod config;
mod github;
mod identity;
mod issue;
mod labels;
mod loader;
mod lock;
mod semantic;
mod status;
#[cfg(test)]
mod tests;
mod web;

use app::{IndexClient, IssueService};
use config::Config;
use lock::DataDirLock;
use semantic::SearchQuery;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = cli::Args::parse();

    match args.command {
        cli::Command::ImportGithub {
            owner,
            repo,
            token,
            max_issues,
            state,
            service_url,
            batch_size,
        } => {
            let client = IndexClient::new(&service_url);
            let health = client.health()?;
            log::info!(
                "daemon at {service_url} holds {} issues ({})",
                health.report.record_count,
                health.status
            );

            let opts = github::ImportOptions {
                owner,
                repo,
                token,
                max_issues,
                state,
                batch_size,
            };
            let importer = github::GithubImporter::new()?;
            let summary = github::import(&importer, &client, &opts);

            println!(
                "fetched {}, indexed {}, rejected {}, failed batches {}",
                summary.fetched, summary.indexed, summary.errors, summary.failed_batches
            );
        }

        cli::Command::Serve {} => {
            let config = Config::load()?;
            let _lock = DataDirLock::try_acquire(&config.data_path)?;
            let service = IssueService::open(config)?;

            if let Some(report) = service.load_on_startup()? {
                log::info!(
                    "startup load: {} issues loaded, {} errors",
                    report.loaded,
                    report.errors
                );
            }

            web::start_daemon(service)?;
        }

        cli::Command::Load { path } => {
            let config = Config::load()?;
            let _lock = DataDirLock::try_acquire(&config.data_path)?;
            let service = IssueService::open(config)?;

            let report = service.load_path(&path)?;
            print_json(&report)?;
            println!("{} issues in collection", service.size()?);
        }

        cli::Command::Reindex {} => {
            let config = Config::load()?;
            let _lock = DataDirLock::try_acquire(&config.data_path)?;
            let service = IssueService::open(config)?;

            let report = service.reindex()?;
            print_json(&report)?;
            println!("{} issues in collection", service.size()?);
        }

        cli::Command::Search {
            query,
            top_k,
            no_rerank,
            rerank_top_k,
            labels: label_filter,
            suggest_labels,
        } => {
            let config = Config::load()?;
            let service = IssueService::open(config)?;

            let search_query = SearchQuery {
                top_k,
                rerank: !no_rerank,
                rerank_top_k,
                filter_labels: (!label_filter.is_empty()).then_some(label_filter),
                ..SearchQuery::new(query)
            };
            let outcome = service.search(&search_query)?;

            if outcome.empty_collection {
                println!("collection is empty, load some issues first");
                return Ok(());
            }

            for (rank, result) in outcome.results.iter().enumerate() {
                println!(
                    "{:>2}. [{:.3}] {} ({})",
                    rank + 1,
                    result.score,
                    result.title,
                    result.metadata.get("url").map(String::as_str).unwrap_or("-")
                );
                if !result.labels.is_empty() {
                    println!("      labels: {}", result.labels.join(", "));
                }
            }

            if suggest_labels {
                let suggestions =
                    service.suggest_labels(&outcome.results, labels::DEFAULT_MAX_LABELS);
                print_json(&suggestions)?;
            }
        }

        cli::Command::Status {} => {
            let config = Config::load()?;
            let service = IssueService::open(config)?;
            let report = service.status();
            print_json(&report)?;

            if !report.healthy {
                bail!("service is degraded");
            }
        }

        cli::Command::Clear { yes } => {
            let config = Config::load()?;
            let _lock = DataDirLock::try_acquire(&config.data_path)?;
            let service = IssueService::open(config)?;

            if !yes {
                match inquire::prompt_confirmation(format!(
                    "You are about to remove all {} issues from the collection. Are you sure?",
                    service.size()?
                )) {
                    InquireResult::Ok(true) => {}
                    InquireResult::Ok(false) => return Ok(()),
                    InquireResult::Err(err) => bail!("An error occurred: {}", err),
                }
            }

            service.clear()?;
            println!("collection cleared");
        }
    }

    Ok(())
}
