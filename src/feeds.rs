//! Feed fetching.
//!
//! Pulls entries from each configured RSS/Atom feed with a bounded
//! timeout, keeps the last 24 hours, and caps per-source volume. Hacker
//! News comes through its Firebase API instead of RSS so score and
//! comment counts make it into the summary. Every source is
//! best-effort: a dead feed is logged and skipped, never fatal.

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::FeedsConfig;
use crate::history::Article;

const SUMMARY_MAX_CHARS: usize = 500;
const HN_API_BASE: &str = "https://hacker-news.firebaseio.com/v0";
const HN_SOURCE_NAME: &str = "Hacker News (Top)";

pub struct FeedFetcher {
    config: FeedsConfig,
    client: Client,
}

impl FeedFetcher {
    pub fn new(config: FeedsConfig) -> crate::error::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("news-digest-rs/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, client })
    }

    /// Fetch articles from all configured sources, in config order, then
    /// Hacker News over its API when enabled.
    pub async fn fetch_all(&self) -> Vec<Article> {
        let mut all = Vec::new();
        for source in &self.config.sources {
            match self.fetch_feed(&source.name, &source.url).await {
                Ok(articles) => {
                    info!("{}: {} articles", source.name, articles.len());
                    all.extend(articles);
                }
                Err(e) => warn!("Error fetching {}: {e}", source.name),
            }
        }
        if self.config.hacker_news {
            // The API carries score/comment metadata the RSS feed lacks.
            match self.fetch_hacker_news(self.config.max_per_source * 2).await {
                Ok(articles) => {
                    info!("{HN_SOURCE_NAME}: {} articles", articles.len());
                    all.extend(articles);
                }
                Err(e) => warn!("Error fetching {HN_SOURCE_NAME}: {e}"),
            }
        }
        all
    }

    async fn fetch_hacker_news(&self, max_articles: usize) -> crate::error::Result<Vec<Article>> {
        let ids: Vec<u64> = self
            .client
            .get(format!("{HN_API_BASE}/topstories.json"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut articles = Vec::new();
        for id in ids.into_iter().take(max_articles) {
            let story: HnStory = match self.fetch_hn_story(id).await {
                Ok(story) => story,
                Err(e) => {
                    warn!("Error fetching HN story {id}: {e}");
                    continue;
                }
            };
            if let Some(article) = story_to_article(id, story) {
                articles.push(article);
            }
        }
        Ok(articles)
    }

    async fn fetch_hn_story(&self, id: u64) -> crate::error::Result<HnStory> {
        Ok(self
            .client
            .get(format!("{HN_API_BASE}/item/{id}.json"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn fetch_feed(&self, name: &str, url: &str) -> crate::error::Result<Vec<Article>> {
        let bytes = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let feed = feed_rs::parser::parse(&bytes[..])
            .map_err(|e| crate::error::Error::Malformed(format!("{name}: {e}")))?;

        let cutoff = Utc::now() - Duration::days(1);
        let mut articles = Vec::new();

        for entry in feed.entries {
            let published = entry.published.or(entry.updated);
            // Keep undated entries; drop anything confirmed older than 24h.
            if let Some(ts) = published {
                if ts < cutoff {
                    continue;
                }
            }

            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "No title".into());
            let link = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();
            let summary = entry
                .summary
                .map(|s| truncate_chars(&s.content, SUMMARY_MAX_CHARS))
                .unwrap_or_default();

            articles.push(Article {
                title,
                link,
                summary,
                source: name.to_string(),
                published,
            });

            if articles.len() >= self.config.max_per_source {
                break;
            }
        }

        Ok(articles)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HnStory {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub score: u64,
    #[serde(default)]
    pub descendants: u64,
    #[serde(default)]
    pub time: Option<i64>,
}

/// Map one API story onto an `Article`. Untitled stories (deleted or
/// dead items) are dropped; text posts without a URL link back to the
/// comments page.
fn story_to_article(id: u64, story: HnStory) -> Option<Article> {
    let title = story.title?;
    let link = story
        .url
        .unwrap_or_else(|| format!("https://news.ycombinator.com/item?id={id}"));
    Some(Article {
        title,
        link,
        summary: format!("Score: {} | Comments: {}", story.score, story.descendants),
        source: HN_SOURCE_NAME.to_string(),
        published: story.time.and_then(|t| DateTime::<Utc>::from_timestamp(t, 0)),
    })
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}
