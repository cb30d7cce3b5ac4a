//! Digest summarization via the Claude API.
//!
//! Wraps the messages endpoint with a tiered model order (sonnet → opus →
//! haiku), bounded retries with exponential backoff on rate-limit and
//! overload responses, and fall-through to the next tier when one model
//! keeps failing. Non-retryable errors propagate immediately so fallback
//! never masks an auth or billing problem.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ClaudeConfig;
use crate::error::{Error, Result};
use crate::history::Article;

const ANTHROPIC_VERSION: &str = "2023-06-01";

const DEFAULT_INTERESTS: &str = "\
## PRIORITY INTERESTS
1. AI/ML & LLMs: new tools, frameworks, funding rounds, breakthrough research
2. Tech job market: companies hiring, startup funding, layoffs, compensation
3. Robotics + AI convergence: humanoid robots, industrial automation
4. Bio-hacking & longevity: GLP-1 research, supplement science, wearables

## HIGH INTEREST
5. Social networks & decentralized platforms
6. Web3 & blockchain (NO price speculation)
7. Automotive innovation: EVs, self-driving, battery tech
8. Climate tech

## MODERATE INTEREST
9. Finance & fintech industry news
10. Tech regulation and legal landscape
11. Entertainment (award-winning film/TV, sci-fi), space, biomedical

## STRICT FILTERS (always exclude)
- Celebrity gossip, crypto price speculation, partisan opinion pieces,
  clickbait, promotional content disguised as news";

// ---------------------------------------------------------------------------
// Backoff + fallback resolver
// ---------------------------------------------------------------------------

/// Retry schedule for one candidate model. The delay for attempt `n`
/// (0-based) is `min(cap, base * 2^n)`, multiplied by a 0.7–1.3 jitter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &ClaudeConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            base: Duration::from_secs(config.backoff_base_secs),
            cap: Duration::from_secs(config.backoff_cap_secs),
        }
    }

    /// Pre-jitter delay for a 0-based attempt index.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.cap)
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        let jitter = rand::thread_rng().gen_range(0.7..1.3);
        base.mul_f64(jitter)
    }
}

/// Try each candidate in order with bounded retries and backoff.
///
/// Transient failures (rate limit, overload, connection) are retried up to
/// `policy.max_retries` times per candidate, then the next candidate is
/// tried. Any other failure propagates immediately without touching the
/// remaining candidates. Success anywhere short-circuits the whole run.
pub async fn resolve_with_fallback<T, F, Fut>(
    candidates: &[String],
    policy: &BackoffPolicy,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_transient: Option<Error> = None;

    for model in candidates {
        for try_idx in 0..policy.max_retries {
            match attempt(model.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    if try_idx + 1 < policy.max_retries {
                        let wait = policy.jittered(try_idx);
                        warn!(
                            "{model} failed transiently ({e}), retrying in {:.1}s (attempt {}/{})",
                            wait.as_secs_f64(),
                            try_idx + 1,
                            policy.max_retries
                        );
                        last_transient = Some(e);
                        tokio::time::sleep(wait).await;
                    } else {
                        warn!(
                            "{model} exhausted {} attempts ({e}), trying next fallback model",
                            policy.max_retries
                        );
                        last_transient = Some(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    Err(last_transient
        .unwrap_or_else(|| Error::Malformed("no candidate models to try".into())))
}

// ---------------------------------------------------------------------------
// Remote model resolution + cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct RemoteModel {
    id: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ModelListResponse {
    #[serde(default)]
    data: Vec<RemoteModel>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ModelCache {
    #[serde(default)]
    last_checked: Option<DateTime<Utc>>,
    #[serde(default)]
    models: HashMap<String, String>,
}

impl ModelCache {
    fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    fn save(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Could not create cache dir {}: {e}", parent.display());
                return;
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    warn!("Could not save model cache {}: {e}", path.display());
                }
            }
            Err(e) => warn!("Could not serialize model cache: {e}"),
        }
    }

    fn is_fresh(&self, now: DateTime<Utc>, refresh_days: i64) -> bool {
        self.last_checked
            .map(|checked| now - checked <= ChronoDuration::days(refresh_days))
            .unwrap_or(false)
    }
}

/// Newest model id in a family: creation timestamp first, lexical id as the
/// tie-break; undated entries lose to dated ones.
fn select_latest(models: &[RemoteModel], family: &str) -> Option<String> {
    let family_lower = family.to_lowercase();
    models
        .iter()
        .filter(|m| m.id.to_lowercase().contains(&family_lower))
        .max_by(|a, b| {
            (a.created_at, &a.id).cmp(&(b.created_at, &b.id))
        })
        .map(|m| m.id.clone())
}

/// Promote an override to the front (keeping fallbacks) and deduplicate
/// while preserving order.
fn build_order(tiers: &[String], primary_override: &str) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    if !primary_override.is_empty() {
        order.push(primary_override.to_string());
    }
    order.extend(tiers.iter().cloned());

    let mut deduped = Vec::new();
    for id in order {
        if !id.is_empty() && !deduped.contains(&id) {
            deduped.push(id);
        }
    }
    deduped
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct DigestSummarizer {
    config: ClaudeConfig,
    client: Client,
    interests: String,
}

impl DigestSummarizer {
    pub fn new(config: ClaudeConfig, interests: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            client,
            interests: interests.unwrap_or_else(|| DEFAULT_INTERESTS.to_string()),
        })
    }

    /// Resolve the model fallback order (sonnet → opus → haiku).
    ///
    /// With `use_latest_models`, the provider's model list is consulted at
    /// most once per `refresh_days` and cached; a failed refresh falls back
    /// to cached or default identifiers rather than aborting the run.
    pub async fn resolve_model_order(&self) -> Vec<String> {
        let tiers = ["sonnet", "opus", "haiku"];
        let defaults: HashMap<&str, &str> = HashMap::from([
            ("sonnet", self.config.sonnet_model.as_str()),
            ("opus", self.config.opus_model.as_str()),
            ("haiku", self.config.haiku_model.as_str()),
        ]);

        let mut resolved: HashMap<String, String> = defaults
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        if self.config.use_latest_models {
            let cache_path = self.config.resolved_cache_path();
            let cache = ModelCache::load(&cache_path);
            let now = Utc::now();

            if cache.is_fresh(now, self.config.refresh_days) && !cache.models.is_empty() {
                debug!("Model cache is fresh ({})", cache_path.display());
                for (tier, id) in &cache.models {
                    if !id.is_empty() {
                        resolved.insert(tier.clone(), id.clone());
                    }
                }
            } else {
                match self.list_models().await {
                    Ok(models) => {
                        for tier in tiers {
                            if let Some(id) = select_latest(&models, tier) {
                                resolved.insert(tier.to_string(), id);
                            }
                        }
                        let updated = ModelCache {
                            last_checked: Some(now),
                            models: resolved.clone(),
                        };
                        updated.save(&cache_path);
                    }
                    Err(e) => {
                        warn!("Failed to refresh model list, using cached/default models: {e}");
                        for (tier, id) in &cache.models {
                            if !id.is_empty() {
                                resolved.insert(tier.clone(), id.clone());
                            }
                        }
                    }
                }
            }
        }

        let tier_order: Vec<String> = tiers
            .iter()
            .filter_map(|t| resolved.get(*t).cloned())
            .collect();
        build_order(&tier_order, &self.config.model_override)
    }

    async fn list_models(&self) -> Result<Vec<RemoteModel>> {
        let url = format!("{}/v1/models", self.config.base_url);
        let resp = self
            .client
            .get(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Api {
                provider: "claude",
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        let list: ModelListResponse = resp.json().await?;
        Ok(list.data)
    }

    /// Produce the digest HTML for a batch of new articles.
    pub async fn summarize(&self, articles: &[Article]) -> Result<String> {
        let model_order = self.resolve_model_order().await;
        info!("Claude model order: {}", model_order.join(", "));

        let prompt = self.build_prompt(articles);
        let policy = BackoffPolicy::from_config(&self.config);

        let html = resolve_with_fallback(&model_order, &policy, |model| {
            let prompt = prompt.clone();
            async move {
                let html = self.request_digest(&model, &prompt).await?;
                info!("Digest generated with model: {model}");
                Ok(html)
            }
        })
        .await?;

        Ok(clean_markdown_to_html(&html))
    }

    async fn request_digest(&self, model: &str, prompt: &str) -> Result<String> {
        let body = json!({
            "model": model,
            "max_tokens": self.config.max_tokens,
            "messages": [
                {"role": "user", "content": prompt}
            ]
        });

        let url = format!("{}/v1/messages", self.config.base_url);
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let message = resp.text().await.unwrap_or_default();
            return Err(classify_api_error(status, message));
        }

        let data: serde_json::Value = resp.json().await?;
        let text = data["content"][0]["text"]
            .as_str()
            .ok_or_else(|| Error::Malformed("messages response had no text block".into()))?;
        Ok(text.to_string())
    }

    fn build_prompt(&self, articles: &[Article]) -> String {
        let mut articles_text = String::new();
        for (i, article) in articles.iter().enumerate() {
            articles_text.push_str(&format!(
                "\n---\nArticle {}:\nSource: {}\nTitle: {}\nLink: {}\nSummary: {}\n",
                i + 1,
                article.source,
                article.title,
                article.link,
                article.summary
            ));
        }

        format!(
            r#"You are creating a personalized daily news digest for a product executive
with a technical background who wants to stay informed on industry trends and
spot opportunities at innovative companies.

## INTERESTS (in priority order):

{interests}

## TODAY'S ARTICLES (pre-filtered to last 24 hours, duplicates removed):

{articles_text}

---

## INSTRUCTIONS

Create a well-organized daily digest email with these sections IN THIS ORDER:
1. "Top Priority" — the 4-6 most significant stories from the priority areas,
   each with a 2-3 sentence summary, why it matters, and the link.
2. "Job Radar" — funding rounds, hiring announcements, executive moves, as a
   quick-scan list with company names bolded.
3. "AI & Robotics" — tools, models, business adoption, robotics breakthroughs.
4. Optional themed sections (health, automotive, climate, finance, legal,
   entertainment/space) only when 2+ quality articles exist for them.
5. "Quick Hits" — up to 5 one-liner mentions.

QUALITY CONTROL:
- When multiple sources cover the same story, pick the BEST one.
- Total digest: 20-30 articles maximum.
- Apply the strict filters from the interest profile.

## OUTPUT FORMAT - CRITICAL

Return ONLY valid HTML (no markdown): <h1> for the title, <h2> for section
headers, <ul>/<li> for article lists, <strong> for emphasis,
<a href="URL">Title</a> for links. Do NOT wrap the output in ```html fences."#,
            interests = self.interests,
            articles_text = articles_text
        )
    }
}

/// Map a non-200 messages response onto the error taxonomy.
fn classify_api_error(status: u16, message: String) -> Error {
    match status {
        401 | 403 => Error::Auth(message),
        400 => {
            // The provider reports exhausted credits as a plain 400; the
            // body text is the only signal available.
            let lower = message.to_lowercase();
            if lower.contains("credit") || lower.contains("billing") {
                Error::Billing(message)
            } else {
                Error::Api {
                    provider: "claude",
                    status,
                    message,
                }
            }
        }
        _ => Error::Api {
            provider: "claude",
            status,
            message,
        },
    }
}

/// Strip ```html fences the model sometimes wraps its output in.
fn strip_code_fences(content: &str) -> String {
    let trimmed = content.trim();
    let without_open = trimmed
        .strip_prefix("```html")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed)
        .trim_start();
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim_end()
        .to_string()
}

/// Normalize the model's reply to HTML when it ignores the HTML-only
/// instruction.
///
/// Output that already opens with an HTML tag gets minimal cleanup
/// (leftover bold and link markdown). Anything else is treated as
/// markdown: headers, bold, links, horizontal rules, and bullet lists
/// are converted and bare text lines are wrapped in paragraphs.
fn clean_markdown_to_html(content: &str) -> String {
    let content = strip_code_fences(content);

    if content.starts_with("<h1>") || content.starts_with("<div") || content.starts_with("<!") {
        return convert_links(&convert_bold(&content));
    }

    let content = convert_links(&convert_bold(&content));
    let mut result: Vec<String> = Vec::new();
    let mut in_list = false;

    for line in content.lines() {
        let stripped = line.trim();

        let bullet = stripped
            .strip_prefix("- ")
            .or_else(|| stripped.strip_prefix("* "));
        if let Some(item) = bullet {
            if !in_list {
                result.push("<ul>".to_string());
                in_list = true;
            }
            result.push(format!("<li>{item}</li>"));
            continue;
        }
        // Any non-bullet content ends the open list.
        if in_list && !stripped.is_empty() && !stripped.starts_with("<li") {
            result.push("</ul>".to_string());
            in_list = false;
        }

        if let Some(rest) = stripped.strip_prefix("### ") {
            result.push(format!("<h3>{rest}</h3>"));
        } else if let Some(rest) = stripped.strip_prefix("## ") {
            result.push(format!("<h2>{rest}</h2>"));
        } else if let Some(rest) = stripped.strip_prefix("# ") {
            result.push(format!("<h1>{rest}</h1>"));
        } else if stripped.len() >= 3 && stripped.chars().all(|c| c == '-') {
            result.push("<hr>".to_string());
        } else if stripped.is_empty() {
            result.push(String::new());
        } else if stripped.starts_with('<') || stripped.ends_with('>') {
            result.push(line.to_string());
        } else {
            result.push(format!("<p>{stripped}</p>"));
        }
    }
    if in_list {
        result.push("</ul>".to_string());
    }

    result.join("\n")
}

/// Replace `**text**` pairs with `<strong>text</strong>`.
fn convert_bold(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(open) = rest.find("**") {
        let after_open = &rest[open + 2..];
        match after_open.find("**") {
            Some(close) if close > 0 => {
                out.push_str(&rest[..open]);
                out.push_str("<strong>");
                out.push_str(&after_open[..close]);
                out.push_str("</strong>");
                rest = &after_open[close + 2..];
            }
            _ => {
                out.push_str(&rest[..open + 2]);
                rest = after_open;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Replace `[text](url)` with `<a href="url">text</a>`.
fn convert_links(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(open) = rest.find('[') {
        let parsed = rest[open + 1..].find(']').and_then(|text_end| {
            let text = &rest[open + 1..open + 1 + text_end];
            let after = &rest[open + 1 + text_end + 1..];
            let url_end = after.strip_prefix('(')?.find(')')?;
            let url = &after[1..1 + url_end];
            if text.is_empty() || url.is_empty() {
                return None;
            }
            Some((text, url, open + 1 + text_end + 1 + 1 + url_end + 1))
        });
        match parsed {
            Some((text, url, consumed)) => {
                out.push_str(&rest[..open]);
                out.push_str(&format!("<a href=\"{url}\">{text}</a>"));
                rest = &rest[consumed..];
            }
            None => {
                out.push_str(&rest[..open + 1]);
                rest = &rest[open + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn zero_policy(max_retries: u32) -> BackoffPolicy {
        BackoffPolicy {
            max_retries,
            base: Duration::ZERO,
            cap: Duration::ZERO,
        }
    }

    #[test]
    fn backoff_schedule_doubles_and_caps() {
        let policy = BackoffPolicy {
            max_retries: 3,
            base: Duration::from_secs(3),
            cap: Duration::from_secs(20),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(3));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(6));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(12));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(20));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(20));
    }

    #[test]
    fn jitter_stays_within_band() {
        let policy = BackoffPolicy {
            max_retries: 3,
            base: Duration::from_secs(10),
            cap: Duration::from_secs(60),
        };
        for _ in 0..50 {
            let d = policy.jittered(0).as_secs_f64();
            assert!((7.0..13.0).contains(&d), "jittered delay {d} out of band");
        }
    }

    #[tokio::test]
    async fn falls_through_to_next_candidate_after_exhausting_retries() {
        let candidates = vec!["m1".to_string(), "m2".to_string()];
        let calls: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let result = resolve_with_fallback(&candidates, &zero_policy(3), |model| {
            let calls = calls.clone();
            async move {
                calls.lock().unwrap().push(model.clone());
                if model == "m1" {
                    Err(Error::Api {
                        provider: "claude",
                        status: 529,
                        message: "overloaded".into(),
                    })
                } else {
                    Ok(format!("answer from {model}"))
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "answer from m2");
        // 3 attempts against m1, then first-try success on m2.
        let calls = calls.lock().unwrap();
        assert_eq!(calls.as_slice(), ["m1", "m1", "m1", "m2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn resolver_sleeps_exactly_between_retries() {
        // Paused clock: elapsed time is exactly the sum of the resolver's
        // sleeps. Three attempts on m1 mean two sleeps (3s and 6s before
        // jitter, each scaled by 0.7..1.3); no sleep before moving to m2
        // and none after its success.
        let candidates = vec!["m1".to_string(), "m2".to_string()];
        let policy = BackoffPolicy {
            max_retries: 3,
            base: Duration::from_secs(3),
            cap: Duration::from_secs(20),
        };
        let start = tokio::time::Instant::now();

        let result = resolve_with_fallback(&candidates, &policy, |model| async move {
            if model == "m1" {
                Err(Error::Api {
                    provider: "claude",
                    status: 529,
                    message: "overloaded".into(),
                })
            } else {
                Ok("ok".to_string())
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        let slept = start.elapsed();
        assert!(
            slept >= Duration::from_secs_f64((3.0 + 6.0) * 0.7),
            "slept only {slept:?}"
        );
        assert!(
            slept <= Duration::from_secs_f64((3.0 + 6.0) * 1.3),
            "slept {slept:?}, more than two jittered backoffs"
        );
    }

    #[tokio::test]
    async fn non_retryable_error_never_reaches_second_candidate() {
        let candidates = vec!["m1".to_string(), "m2".to_string()];
        let calls: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let result: Result<String> = resolve_with_fallback(&candidates, &zero_policy(3), |model| {
            let calls = calls.clone();
            async move {
                calls.lock().unwrap().push(model.clone());
                Err(Error::Auth("invalid api key".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Auth(_))));
        assert_eq!(calls.lock().unwrap().as_slice(), ["m1"]);
    }

    #[tokio::test]
    async fn all_candidates_exhausted_returns_last_transient_error() {
        let candidates = vec!["m1".to_string(), "m2".to_string()];

        let result: Result<String> = resolve_with_fallback(&candidates, &zero_policy(2), |_| async {
            Err(Error::Api {
                provider: "claude",
                status: 429,
                message: "rate limited".into(),
            })
        })
        .await;

        match result {
            Err(Error::Api { status, .. }) => assert_eq!(status, 429),
            other => panic!("expected transient API error, got {other:?}"),
        }
    }

    #[test]
    fn build_order_promotes_override_and_dedups() {
        let tiers = vec!["sonnet-1".to_string(), "opus-1".to_string(), "haiku-1".to_string()];
        assert_eq!(
            build_order(&tiers, "opus-1"),
            vec!["opus-1", "sonnet-1", "haiku-1"]
        );
        assert_eq!(
            build_order(&tiers, ""),
            vec!["sonnet-1", "opus-1", "haiku-1"]
        );
    }

    #[test]
    fn select_latest_prefers_created_at_then_lexical() {
        let models = vec![
            RemoteModel {
                id: "claude-sonnet-4-0".into(),
                created_at: Some("2025-05-01T00:00:00Z".parse().unwrap()),
            },
            RemoteModel {
                id: "claude-sonnet-4-5".into(),
                created_at: Some("2025-09-01T00:00:00Z".parse().unwrap()),
            },
            RemoteModel {
                id: "claude-opus-4-1".into(),
                created_at: Some("2025-12-01T00:00:00Z".parse().unwrap()),
            },
            RemoteModel {
                id: "claude-sonnet-legacy".into(),
                created_at: None,
            },
        ];
        assert_eq!(select_latest(&models, "sonnet").unwrap(), "claude-sonnet-4-5");
        assert_eq!(select_latest(&models, "opus").unwrap(), "claude-opus-4-1");
        assert!(select_latest(&models, "haiku").is_none());
    }

    #[test]
    fn model_cache_save_survives_uncreatable_dir() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let cache = ModelCache {
            last_checked: Some(Utc::now()),
            models: HashMap::from([("sonnet".to_string(), "claude-sonnet-4-5".to_string())]),
        };
        // Parent path runs through a regular file; create_dir_all fails
        // and save must warn and return instead of panicking.
        let path = blocker.join("nested").join("model_cache.json");
        cache.save(&path);
        assert!(!path.exists());
    }

    #[test]
    fn model_cache_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("model_cache.json");
        let cache = ModelCache {
            last_checked: Some(Utc::now()),
            models: HashMap::from([("opus".to_string(), "claude-opus-4-1".to_string())]),
        };
        cache.save(&path);

        let reloaded = ModelCache::load(&path);
        assert_eq!(reloaded.models.get("opus").map(String::as_str), Some("claude-opus-4-1"));
        assert!(reloaded.last_checked.is_some());
    }

    #[test]
    fn strip_code_fences_variants() {
        assert_eq!(strip_code_fences("```html\n<h1>Hi</h1>\n```"), "<h1>Hi</h1>");
        assert_eq!(strip_code_fences("<h1>Hi</h1>"), "<h1>Hi</h1>");
        assert_eq!(strip_code_fences("```\n<p>x</p>\n```"), "<p>x</p>");
    }

    #[test]
    fn markdown_reply_is_converted_to_html() {
        // A model that ignores the HTML-only instruction must not leak
        // raw markdown into the email.
        let reply = "## Top\n- **Item** [x](u)";
        let html = clean_markdown_to_html(reply);
        assert_eq!(
            html,
            "<h2>Top</h2>\n<ul>\n<li><strong>Item</strong> <a href=\"u\">x</a></li>\n</ul>"
        );
        assert!(!html.contains("##"));
        assert!(!html.contains("**"));
    }

    #[test]
    fn html_reply_gets_only_minimal_cleanup() {
        let reply = "<h1>Digest</h1>\n<p>A **bold** [link](https://e.com) remains.</p>";
        let html = clean_markdown_to_html(reply);
        assert_eq!(
            html,
            "<h1>Digest</h1>\n<p>A <strong>bold</strong> \
             <a href=\"https://e.com\">link</a> remains.</p>"
        );
    }

    #[test]
    fn bare_text_and_rules_are_wrapped() {
        let html = clean_markdown_to_html("# Title\nSome intro text.\n---\n* one\n* two");
        assert_eq!(
            html,
            "<h1>Title</h1>\n<p>Some intro text.</p>\n<hr>\n<ul>\n<li>one</li>\n<li>two</li>\n</ul>"
        );
    }

    #[test]
    fn header_after_bullets_closes_the_list() {
        let html = clean_markdown_to_html("- a\n- b\n## Next");
        assert_eq!(html, "<ul>\n<li>a</li>\n<li>b</li>\n</ul>\n<h2>Next</h2>");
    }

    #[test]
    fn unbalanced_markers_pass_through() {
        assert_eq!(convert_bold("a ** b"), "a ** b");
        assert_eq!(convert_links("see [note] only"), "see [note] only");
        assert_eq!(convert_links("empty []() stays"), "empty []() stays");
    }
}
