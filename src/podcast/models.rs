//! Local model inventory and selection for script generation.
//!
//! The configured model name states an intent ("a qwen around 14B");
//! actual availability on the Ollama endpoint decides what runs. The
//! selector lists installed models, keeps the ones in the configured
//! family whose parameter size rounds into a known bucket, and ranks
//! them newest-version-first, then by bucket distance from the
//! configured size. If nothing in the family is installed, the
//! configured model is pulled on demand.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::OllamaConfig;
use crate::error::{Error, Result};

/// An installed model that survived family and size-bucket filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalModel {
    pub name: String,
    pub family: String,
    /// Numeric version parsed from the base name, compared lexicographically.
    pub version: Vec<u32>,
    pub bucket: u32,
}

/// What the selector decided, plus any drift notice worth reporting.
#[derive(Debug, Clone)]
pub struct Selection {
    pub model: String,
    /// Set when the chosen model's size bucket differs from the configured
    /// one, so the operator hears about the substitution out of band.
    pub drift: Option<String>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
    #[serde(default)]
    details: Option<TagDetails>,
}

#[derive(Deserialize)]
struct TagDetails {
    #[serde(default)]
    parameter_size: Option<String>,
}

/// Split a model base name like `qwen2.5` or `llama-3` into its family
/// and numeric version parts.
pub fn parse_family_version(base: &str) -> (String, Vec<u32>) {
    let digit_at = base.find(|c: char| c.is_ascii_digit());
    let (family_raw, version_raw) = match digit_at {
        Some(i) => base.split_at(i),
        None => (base, ""),
    };
    let family = family_raw
        .trim_end_matches(['-', '_', '.'])
        .to_ascii_lowercase();
    let version = version_raw
        .split('.')
        .map_while(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u32>().ok()
        })
        .collect();
    (family, version)
}

/// Find a parameter count like `14b`, `7B` or `13.8B` anywhere in the
/// string and return it in billions.
pub fn parse_param_size(s: &str) -> Option<f64> {
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_ascii_digit() {
            let start = i;
            let mut seen_dot = false;
            while i < chars.len()
                && (chars[i].is_ascii_digit() || (chars[i] == '.' && !seen_dot))
            {
                if chars[i] == '.' {
                    seen_dot = true;
                }
                i += 1;
            }
            let next_is_b = chars.get(i).is_some_and(|c| c.eq_ignore_ascii_case(&'b'));
            let after = chars.get(i + 1);
            let bounded = after.map_or(true, |c| !c.is_ascii_alphanumeric());
            if next_is_b && bounded {
                let number: String = chars[start..i].iter().collect();
                return number.trim_end_matches('.').parse().ok();
            }
        } else {
            i += 1;
        }
    }
    None
}

/// Round a raw parameter size into the nearest configured bucket, or
/// `None` when it lands farther than `tolerance` from every bucket.
pub fn nearest_bucket(size: f64, buckets: &[u32], tolerance: f64) -> Option<u32> {
    buckets
        .iter()
        .copied()
        .map(|b| (b, (size - b as f64).abs()))
        .filter(|&(_, d)| d <= tolerance)
        .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
        .map(|(b, _)| b)
}

/// Buckets ordered by distance from the configured one, nearest first,
/// smaller bucket winning ties.
pub fn bucket_preference(configured: u32, buckets: &[u32]) -> Vec<u32> {
    let mut ordered: Vec<u32> = buckets.to_vec();
    ordered.sort_by_key(|&b| (b.abs_diff(configured), b));
    ordered
}

/// Turn raw tag listings into filtered candidates for `family`.
pub fn normalize(
    entries: &[(String, Option<String>)],
    family: &str,
    buckets: &[u32],
    tolerance: f64,
) -> Vec<LocalModel> {
    entries
        .iter()
        .filter_map(|(name, param_size)| {
            let base = name.split(':').next().unwrap_or(name);
            let (fam, version) = parse_family_version(base);
            if fam != family {
                return None;
            }
            // Prefer the precise metadata size, fall back to the tag.
            let size = param_size
                .as_deref()
                .and_then(parse_param_size)
                .or_else(|| parse_param_size(name))?;
            let bucket = nearest_bucket(size, buckets, tolerance)?;
            Some(LocalModel {
                name: name.clone(),
                family: fam,
                version,
                bucket,
            })
        })
        .collect()
}

/// Order candidates best-first: newest version wins outright, then the
/// bucket closest to the configured size, then name for stability.
pub fn rank(mut candidates: Vec<LocalModel>, configured_bucket: u32, buckets: &[u32]) -> Vec<LocalModel> {
    let preference = bucket_preference(configured_bucket, buckets);
    let pref_idx = |bucket: u32| {
        preference
            .iter()
            .position(|&b| b == bucket)
            .unwrap_or(preference.len())
    };
    candidates.sort_by(|a, b| {
        b.version
            .cmp(&a.version)
            .then_with(|| pref_idx(a.bucket).cmp(&pref_idx(b.bucket)))
            .then_with(|| a.name.cmp(&b.name))
    });
    candidates
}

pub struct LocalModelSelector {
    config: OllamaConfig,
    client: Client,
}

impl LocalModelSelector {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    /// Pick the model to run, pulling the configured one if the family
    /// has no installed members. An unreachable endpoint degrades to the
    /// configured name so the later chat call reports the real failure.
    pub async fn select(&self) -> Result<Selection> {
        let configured = &self.config.model;
        let base = configured.split(':').next().unwrap_or(configured);
        let (family, _) = parse_family_version(base);
        let configured_bucket = parse_param_size(configured)
            .and_then(|s| {
                nearest_bucket(s, &self.config.size_buckets, self.config.size_tolerance)
            })
            .or_else(|| self.config.size_buckets.first().copied())
            .unwrap_or(14);

        let entries = match self.list_installed().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "could not list local models, using configured model as-is");
                return Ok(Selection {
                    model: configured.clone(),
                    drift: None,
                });
            }
        };

        let candidates = normalize(
            &entries,
            &family,
            &self.config.size_buckets,
            self.config.size_tolerance,
        );
        if candidates.is_empty() {
            info!(model = %configured, "no installed model in family, pulling configured model");
            self.pull(configured).await?;
            return Ok(Selection {
                model: configured.clone(),
                drift: None,
            });
        }

        let ranked = rank(candidates, configured_bucket, &self.config.size_buckets);
        let best = &ranked[0];
        if best.name != *configured {
            info!(configured = %configured, chosen = %best.name, "substituting installed model");
        }
        let drift = (best.bucket != configured_bucket).then(|| {
            format!(
                "Podcast model drifted from the configured size: running '{}' ({}B bucket) \
                 instead of a {}B-bucket '{}' model.",
                best.name, best.bucket, configured_bucket, family
            )
        });
        Ok(Selection {
            model: best.name.clone(),
            drift,
        })
    }

    async fn list_installed(&self) -> Result<Vec<(String, Option<String>)>> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.config.host))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                provider: "ollama",
                status: status.as_u16(),
                message,
            });
        }
        let body: TagsResponse = resp.json().await?;
        debug!(count = body.models.len(), "listed installed models");
        Ok(body
            .models
            .into_iter()
            .map(|m| (m.name, m.details.and_then(|d| d.parameter_size)))
            .collect())
    }

    async fn pull(&self, model: &str) -> Result<()> {
        info!(model, "pulling model, this may take a while");
        let resp = self
            .client
            .post(format!("{}/api/pull", self.config.host))
            .json(&json!({"name": model, "stream": false}))
            .send()
            .await
            .map_err(|e| Error::ModelPull(format!("{model}: {e}")))?;
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::ModelPull(format!("{model}: {message}")));
        }
        info!(model, "pull complete");
        Ok(())
    }
}
