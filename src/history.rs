//! Sent-article history for duplicate suppression.
//!
//! A flat JSON file maps content hashes to delivery records. A hash in
//! history means the article went out in a prior digest; entries expire
//! after a retention window. Load and save are never fatal: a corrupt or
//! unwritable file just means duplicates are re-derived next run.

use chrono::{DateTime, Duration, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub link: String,
    pub summary: String,
    pub source: String,
    pub published: Option<DateTime<Utc>>,
}

/// Deterministic 128-bit identity over normalized `title|link`.
///
/// Case and surrounding whitespace never change the hash, so reposted
/// entries with cosmetic differences still count as duplicates.
pub fn article_hash(article: &Article) -> String {
    let unique = format!(
        "{}|{}",
        article.title.trim().to_lowercase(),
        article.link.trim().to_lowercase()
    );
    format!("{:x}", Md5::digest(unique.as_bytes()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub title: String,
    pub link: String,
    pub source: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    #[serde(default)]
    pub sent_articles: HashMap<String, HistoryEntry>,
    #[serde(default)]
    pub last_cleanup: Option<DateTime<Utc>>,
}

impl History {
    /// Load prior state. Absent or corrupt files yield an empty history.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(history) => history,
                Err(e) => {
                    warn!("History file {} is corrupt ({e}), starting fresh", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read history {}: {e}, starting fresh", path.display());
                Self::default()
            }
        }
    }

    /// Drop entries strictly older than the retention window. An entry
    /// sitting exactly on the boundary is retained.
    pub fn purge(&mut self, now: DateTime<Utc>, retention_days: i64) {
        let cutoff = now - Duration::days(retention_days);
        let before = self.sent_articles.len();
        self.sent_articles.retain(|_, entry| entry.sent_at >= cutoff);
        let removed = before - self.sent_articles.len();
        if removed > 0 {
            debug!("Purged {removed} history entries older than {retention_days} days");
        }
        self.last_cleanup = Some(now);
    }

    /// Partition articles into (new, duplicate) without mutating storage.
    pub fn filter_new(&self, articles: &[Article]) -> (Vec<Article>, Vec<Article>) {
        let mut new = Vec::new();
        let mut duplicates = Vec::new();
        for article in articles {
            if self.sent_articles.contains_key(&article_hash(article)) {
                duplicates.push(article.clone());
            } else {
                new.push(article.clone());
            }
        }
        (new, duplicates)
    }

    /// Record articles as delivered. Only called after the email actually
    /// went out, so nothing is marked sent without confirmed delivery.
    pub fn commit(&mut self, articles: &[Article], now: DateTime<Utc>) {
        for article in articles {
            self.sent_articles.insert(
                article_hash(article),
                HistoryEntry {
                    title: article.title.clone(),
                    link: article.link.clone(),
                    source: article.source.clone(),
                    sent_at: now,
                },
            );
        }
    }

    /// Persist state. Failure is logged, not fatal.
    pub fn save(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("Could not create history dir {}: {e}", parent.display());
                return;
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    warn!("Could not save history file {}: {e}", path.display());
                }
            }
            Err(e) => warn!("Could not serialize history: {e}"),
        }
    }

    pub fn len(&self) -> usize {
        self.sent_articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent_articles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(title: &str, link: &str) -> Article {
        Article {
            title: title.into(),
            link: link.into(),
            summary: "summary".into(),
            source: "Test Feed".into(),
            published: None,
        }
    }

    #[test]
    fn hash_is_stable_across_calls() {
        let a = article("Rust 2.0 Released", "https://example.com/rust");
        assert_eq!(article_hash(&a), article_hash(&a));
    }

    #[test]
    fn hash_ignores_case_and_whitespace() {
        let a = article("Rust 2.0 Released", "https://example.com/rust");
        let b = article("  RUST 2.0 RELEASED  ", " HTTPS://EXAMPLE.COM/RUST ");
        assert_eq!(article_hash(&a), article_hash(&b));
    }

    #[test]
    fn hash_differs_for_different_articles() {
        let a = article("Rust 2.0 Released", "https://example.com/rust");
        let b = article("Rust 2.0 Released", "https://example.com/other");
        assert_ne!(article_hash(&a), article_hash(&b));
    }

    #[test]
    fn purge_is_exclusive_on_the_old_side() {
        let now = Utc::now();
        let mut history = History::default();
        history.commit(&[article("old", "https://a")], now - Duration::days(8));
        history.commit(&[article("boundary", "https://b")], now - Duration::days(7));
        history.commit(&[article("fresh", "https://c")], now - Duration::days(1));

        history.purge(now, 7);

        assert_eq!(history.len(), 2);
        assert!(history
            .sent_articles
            .contains_key(&article_hash(&article("boundary", "https://b"))));
        assert!(!history
            .sent_articles
            .contains_key(&article_hash(&article("old", "https://a"))));
        assert_eq!(history.last_cleanup, Some(now));
    }

    #[test]
    fn filter_partitions_without_mutation() {
        let now = Utc::now();
        let sent = article("seen before", "https://seen");
        let mut history = History::default();
        history.commit(&[sent.clone()], now);

        let incoming = vec![sent.clone(), article("brand new", "https://new")];
        let (new, duplicates) = history.filter_new(&incoming);

        assert_eq!(new.len(), 1);
        assert_eq!(new[0].title, "brand new");
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].title, "seen before");
        // filter_new never mutates
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn corrupt_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "{not json at all").unwrap();
        let history = History::load(&path);
        assert!(history.is_empty());
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        let mut history = History::default();
        history.commit(&[article("persisted", "https://p")], Utc::now());
        history.save(&path);

        let reloaded = History::load(&path);
        assert_eq!(reloaded.len(), 1);
        let (new, _) = reloaded.filter_new(&[article("persisted", "https://p")]);
        assert!(new.is_empty());
    }
}
