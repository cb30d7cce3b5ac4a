//! Daily news digest pipeline.
//!
//! One run fetches the configured feeds, filters out articles already
//! sent, summarizes the rest into an HTML digest through the Claude API,
//! optionally renders a two-host podcast episode from it, and delivers
//! everything by email. History is only committed after delivery is
//! confirmed, so a failed run retries the same articles next time.

mod config;
mod digest;
mod error;
mod feeds;
mod history;
mod library;
mod mailer;
mod podcast;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::digest::DigestSummarizer;
use crate::feeds::FeedFetcher;
use crate::history::History;
use crate::library::LibraryClient;
use crate::mailer::Mailer;

#[derive(Parser, Debug)]
#[command(name = "news-digest", version, about = "RSS to email digest with an optional podcast episode")]
struct Args {
    /// Path to the YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Shrink prompts and script length for a fast end-to-end check
    #[arg(long)]
    test_mode: bool,

    /// Print the digest instead of emailing it; history is not committed
    #[arg(long)]
    dry_run: bool,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "news_digest=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);
    run(args).await
}

async fn run(args: Args) -> ExitCode {
    let config = Config::load(args.config.as_deref());
    if args.test_mode {
        info!("running in test mode");
    }

    let mailer = if config.email.is_configured() && !args.dry_run {
        match Mailer::new(config.email.clone()) {
            Ok(m) => Some(m),
            Err(e) => {
                error!(error = %e, "could not build SMTP transport");
                None
            }
        }
    } else {
        if args.dry_run {
            info!("dry run, digest will be printed to stdout");
        } else {
            warn!("email is not configured, digest will be printed to stdout");
        }
        None
    };

    let history_path = config.history.resolved_path();
    let now = Utc::now();
    let mut history = History::load(&history_path);
    history.purge(now, config.history.retention_days);

    let fetcher = match FeedFetcher::new(config.feeds.clone()) {
        Ok(f) => f,
        Err(e) => {
            error!(error = %e, "could not build feed fetcher");
            return ExitCode::FAILURE;
        }
    };
    let articles = fetcher.fetch_all().await;
    info!(count = articles.len(), "articles fetched");

    let (new_articles, duplicates) = history.filter_new(&articles);
    if !duplicates.is_empty() {
        info!(count = duplicates.len(), "duplicates suppressed");
    }
    if new_articles.is_empty() {
        let err = error::Error::NoNewArticles;
        error!("{err}");
        notify(&mailer, err.headline(), &err.to_string(), "").await;
        return ExitCode::FAILURE;
    }
    info!(count = new_articles.len(), "new articles to summarize");

    let summarizer = match DigestSummarizer::new(config.claude.clone(), config.interests.clone()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "could not build summarizer");
            return ExitCode::FAILURE;
        }
    };
    let digest_html = match summarizer.summarize(&new_articles).await {
        Ok(html) => html,
        Err(e) => {
            error!(error = %e, "summarization failed");
            notify(&mailer, e.headline(), &e.to_string(), "").await;
            return ExitCode::FAILURE;
        }
    };

    let top_topics = podcast::script::extract_top_topics(&digest_html);

    // The podcast stage never blocks the digest. Failures are reported
    // through the error channel and the email goes out without audio.
    let mut podcast_url = None;
    if config.podcast.enabled() {
        match podcast::generate_episode(&config, &digest_html, args.test_mode).await {
            Ok(episode) => {
                info!(path = %episode.path.display(), "podcast episode ready");
                for notice in &episode.notices {
                    notify(&mailer, "Podcast Model Drift", notice, "").await;
                }
                if config.library.is_configured() {
                    match LibraryClient::new(config.library.clone()) {
                        Ok(library) => {
                            library.trigger_scan().await;
                            podcast_url = Some(library.podcast_url());
                        }
                        Err(e) => warn!(error = %e, "could not build library client"),
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "podcast generation failed, sending digest without audio");
                notify(&mailer, e.headline(), &e.to_string(), "").await;
            }
        }
    }

    match &mailer {
        Some(mailer) => {
            if let Err(e) = mailer
                .send_digest(&digest_html, podcast_url.as_deref(), &top_topics)
                .await
            {
                error!(error = %e, "digest delivery failed, history not committed");
                return ExitCode::FAILURE;
            }
        }
        None => {
            println!("{digest_html}");
            info!("digest printed to stdout, history not committed");
            return ExitCode::SUCCESS;
        }
    }

    history.commit(&new_articles, now);
    history.save(&history_path);
    info!(total = history.len(), "history committed");
    ExitCode::SUCCESS
}

async fn notify(mailer: &Option<Mailer>, kind: &str, message: &str, detail: &str) {
    if let Some(mailer) = mailer {
        mailer.send_error(kind, message, detail).await;
    }
}
