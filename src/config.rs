//! Configuration management for news-digest-rs.
//!
//! Loads config from YAML files in standard locations. Every component
//! receives its section by reference; nothing reads ambient environment
//! state after startup.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct FeedEntry {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedsConfig {
    pub sources: Vec<FeedEntry>,
    /// Fetch Hacker News top stories over its API (carries score and
    /// comment metadata the RSS feed lacks).
    pub hacker_news: bool,
    pub max_per_source: usize,
    pub timeout_secs: u64,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        let sources = [
            ("TechCrunch", "https://techcrunch.com/feed/"),
            ("Ars Technica", "https://feeds.arstechnica.com/arstechnica/index"),
            ("The Verge", "https://www.theverge.com/rss/index.xml"),
            ("MIT Tech Review", "https://www.technologyreview.com/feed/"),
            ("IEEE Spectrum Robotics", "https://spectrum.ieee.org/feeds/topic/robotics"),
            ("Electrek", "https://electrek.co/feed/"),
            ("STAT News", "https://www.statnews.com/feed/"),
            ("NASA", "https://www.nasa.gov/rss/dyn/breaking_news.rss"),
        ]
        .into_iter()
        .map(|(name, url)| FeedEntry {
            name: name.into(),
            url: url.into(),
        })
        .collect();

        Self {
            sources,
            hacker_news: true,
            max_per_source: 20,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub path: Option<PathBuf>,
    pub retention_days: i64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            retention_days: 7,
        }
    }
}

impl HistoryConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| state_dir().join("digest_history.json"))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_name: String,
    pub recipients: Vec<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "smtp.gmail.com".into(),
            smtp_port: 465,
            username: String::new(),
            password: String::new(),
            from_name: "News Digest".into(),
            recipients: Vec::new(),
        }
    }
}

impl EmailConfig {
    pub fn is_configured(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty() && !self.recipients.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClaudeConfig {
    pub api_key: String,
    pub base_url: String,
    /// Manual override for the primary model; fallback tiers are kept.
    pub model_override: String,
    /// Tiered defaults, tried in this order.
    pub sonnet_model: String,
    pub opus_model: String,
    pub haiku_model: String,
    /// Resolve the newest model per tier from the provider's model list.
    pub use_latest_models: bool,
    pub refresh_days: i64,
    pub cache_path: Option<PathBuf>,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.anthropic.com".into(),
            model_override: String::new(),
            sonnet_model: "claude-sonnet-4-5".into(),
            opus_model: "claude-opus-4-1".into(),
            haiku_model: "claude-haiku-4-5".into(),
            use_latest_models: false,
            refresh_days: 7,
            cache_path: None,
            max_tokens: 4096,
            timeout_secs: 300,
            max_retries: 3,
            backoff_base_secs: 3,
            backoff_cap_secs: 20,
        }
    }
}

impl ClaudeConfig {
    pub fn resolved_cache_path(&self) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(|| state_dir().join("model_cache.json"))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub host: String,
    /// Default model identifier. Implies the target family and size bucket.
    pub model: String,
    /// Parameter-size classes, in billions.
    pub size_buckets: Vec<u32>,
    /// Max distance (billions) between a reported size and its nearest bucket.
    pub size_tolerance: f64,
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".into(),
            model: "qwen3:14b".into(),
            size_buckets: vec![8, 14, 30],
            size_tolerance: 5.0,
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ElevenLabsConfig {
    pub api_key: String,
    pub base_url: String,
    pub model_id: String,
    /// Pinned voice ids. Leave empty for daily rotation from the curated pools.
    pub voice_alex: String,
    pub voice_sam: String,
    pub timeout_secs: u64,
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.elevenlabs.io".into(),
            model_id: "eleven_multilingual_v2".into(),
            voice_alex: String::new(),
            voice_sam: String::new(),
            timeout_secs: 60,
        }
    }
}

/// Fallback TTS: local OpenAI-compatible speech endpoint (Kokoro-style).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub host: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:8880".into(),
            model: "kokoro".into(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PodcastConfig {
    /// Episode output directory. Unset → podcast pipeline is skipped.
    pub output_dir: Option<PathBuf>,
    pub keep_days: i64,
    pub intro_music: Option<PathBuf>,
    pub outro_music: Option<PathBuf>,
    pub speaker_pause_ms: u64,
}

impl Default for PodcastConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            keep_days: 10,
            intro_music: None,
            outro_music: None,
            speaker_pause_ms: 300,
        }
    }
}

impl PodcastConfig {
    pub fn enabled(&self) -> bool {
        self.output_dir.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub base_url: String,
    pub api_key: String,
    pub library_id: String,
}

impl LibraryConfig {
    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.api_key.is_empty() && !self.library_id.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub feeds: FeedsConfig,
    pub history: HistoryConfig,
    pub email: EmailConfig,
    pub claude: ClaudeConfig,
    pub ollama: OllamaConfig,
    pub elevenlabs: ElevenLabsConfig,
    pub speech: SpeechConfig,
    pub podcast: PodcastConfig,
    pub library: LibraryConfig,
    /// Reader interest profile injected into the summarization prompt.
    pub interests: Option<String>,
}

fn state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".news-digest")
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./news-digest.yaml
    /// 2. ~/.config/news-digest/config.yaml
    /// 3. /etc/news-digest/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("news-digest.yaml")),
                dirs::home_dir().map(|h| h.join(".config/news-digest/config.yaml")),
                Some(PathBuf::from("/etc/news-digest/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match serde_yml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.history.retention_days, 7);
        assert_eq!(config.claude.max_retries, 3);
        assert_eq!(config.ollama.size_buckets, vec![8, 14, 30]);
        assert_eq!(config.podcast.speaker_pause_ms, 300);
        assert!(config.feeds.hacker_news);
        assert!(!config.podcast.enabled());
        assert!(!config.email.is_configured());
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let yaml = r#"
ollama:
  model: "llama3.1:8b"
podcast:
  output_dir: "/tmp/episodes"
"#;
        let config: Config = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.ollama.model, "llama3.1:8b");
        assert_eq!(config.ollama.host, "http://localhost:11434");
        assert!(config.podcast.enabled());
        assert_eq!(config.history.retention_days, 7);
    }

    #[test]
    fn library_configured_requires_all_fields() {
        let mut lib = LibraryConfig::default();
        assert!(!lib.is_configured());
        lib.base_url = "http://localhost:13378".into();
        lib.api_key = "token".into();
        assert!(!lib.is_configured());
        lib.library_id = "lib_abc".into();
        assert!(lib.is_configured());
    }
}
