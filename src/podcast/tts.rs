//! Text-to-speech providers and the episode-level fallback pipeline.
//!
//! Both engines hand back raw 16-bit mono PCM at 44.1 kHz so assembly
//! never has to decode anything. Fallback is all-or-nothing: if the
//! primary engine fails on any segment, its partial output is discarded
//! and the entire script reruns on the fallback so the episode keeps a
//! single consistent voice pair.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::{ElevenLabsConfig, SpeechConfig};
use crate::error::{Error, Result};
use crate::podcast::script::{ScriptSegment, Speaker};
use crate::podcast::voices::VoiceAssignment;

#[async_trait]
pub trait TtsProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Synthesize one dialogue segment to 44.1 kHz mono i16 samples.
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<i16>>;
}

fn pcm_bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub struct ElevenLabsTts {
    config: ElevenLabsConfig,
    client: Client,
}

impl ElevenLabsTts {
    pub fn new(config: ElevenLabsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl TtsProvider for ElevenLabsTts {
    fn name(&self) -> &'static str {
        "elevenlabs"
    }

    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<i16>> {
        if text.trim().is_empty() {
            return Err(Error::Tts("empty dialogue text".into()));
        }
        let url = format!(
            "{}/v1/text-to-speech/{voice_id}?output_format=pcm_44100",
            self.config.base_url
        );
        let resp = self
            .client
            .post(url)
            .header("xi-api-key", &self.config.api_key)
            .json(&json!({
                "text": text,
                "model_id": self.config.model_id,
            }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                provider: "elevenlabs",
                status: status.as_u16(),
                message,
            });
        }
        let bytes = resp.bytes().await?;
        debug!(voice = voice_id, bytes = bytes.len(), "elevenlabs segment synthesized");
        Ok(pcm_bytes_to_samples(&bytes))
    }
}

/// OpenAI-compatible speech endpoint serving Kokoro voices locally.
pub struct LocalSpeechTts {
    config: SpeechConfig,
    client: Client,
}

impl LocalSpeechTts {
    pub fn new(config: SpeechConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl TtsProvider for LocalSpeechTts {
    fn name(&self) -> &'static str {
        "local-speech"
    }

    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<i16>> {
        if text.trim().is_empty() {
            return Err(Error::Tts("empty dialogue text".into()));
        }
        let resp = self
            .client
            .post(format!("{}/v1/audio/speech", self.config.host))
            .json(&json!({
                "model": self.config.model,
                "input": text,
                "voice": voice_id,
                "response_format": "pcm",
                "sample_rate": 44100,
            }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                provider: "local-speech",
                status: status.as_u16(),
                message,
            });
        }
        let bytes = resp.bytes().await?;
        debug!(voice = voice_id, bytes = bytes.len(), "local segment synthesized");
        Ok(pcm_bytes_to_samples(&bytes))
    }
}

/// Runs a whole script through one engine, falling back to the other on
/// any failure. Each engine carries its own voice assignment because the
/// voice id namespaces differ.
pub struct TtsPipeline<'a> {
    primary: Option<(&'a dyn TtsProvider, &'a VoiceAssignment)>,
    fallback: (&'a dyn TtsProvider, &'a VoiceAssignment),
}

impl<'a> TtsPipeline<'a> {
    pub fn new(
        primary: Option<(&'a dyn TtsProvider, &'a VoiceAssignment)>,
        fallback: (&'a dyn TtsProvider, &'a VoiceAssignment),
    ) -> Self {
        Self { primary, fallback }
    }

    pub async fn synthesize_all(
        &self,
        segments: &[ScriptSegment],
    ) -> Result<Vec<(Speaker, Vec<i16>)>> {
        if let Some((provider, voices)) = self.primary {
            match run_batch(provider, voices, segments).await {
                Ok(audio) => return Ok(audio),
                Err(e) => {
                    warn!(
                        provider = provider.name(),
                        error = %e,
                        "primary TTS failed, rerunning full script on fallback"
                    );
                }
            }
        }
        let (provider, voices) = self.fallback;
        run_batch(provider, voices, segments).await
    }
}

async fn run_batch(
    provider: &dyn TtsProvider,
    voices: &VoiceAssignment,
    segments: &[ScriptSegment],
) -> Result<Vec<(Speaker, Vec<i16>)>> {
    let mut audio = Vec::with_capacity(segments.len());
    for (idx, segment) in segments.iter().enumerate() {
        let voice = voices.voice_for(segment.speaker);
        let samples = provider.synthesize(&segment.text, voice).await.map_err(|e| {
            warn!(
                provider = provider.name(),
                segment = idx + 1,
                total = segments.len(),
                "segment synthesis failed"
            );
            e
        })?;
        audio.push((segment.speaker, samples));
    }
    info!(
        provider = provider.name(),
        segments = audio.len(),
        "script synthesized"
    );
    Ok(audio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MockTts {
        marker: i16,
        fail_on: Option<usize>,
        calls: AtomicUsize,
        voices_seen: Mutex<Vec<String>>,
    }

    impl MockTts {
        fn new(marker: i16, fail_on: Option<usize>) -> Self {
            Self {
                marker,
                fail_on,
                calls: AtomicUsize::new(0),
                voices_seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TtsProvider for MockTts {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn synthesize(&self, _text: &str, voice_id: &str) -> Result<Vec<i16>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.voices_seen.lock().unwrap().push(voice_id.to_string());
            if self.fail_on == Some(call) {
                return Err(Error::Tts("synthetic failure".into()));
            }
            Ok(vec![self.marker; 4])
        }
    }

    fn segments(n: usize) -> Vec<ScriptSegment> {
        (0..n)
            .map(|i| ScriptSegment {
                speaker: if i % 2 == 0 { Speaker::Alex } else { Speaker::Sam },
                text: format!("line {i}"),
            })
            .collect()
    }

    fn voices(alex: &str, sam: &str) -> VoiceAssignment {
        VoiceAssignment::pinned(alex, sam)
    }

    #[tokio::test]
    async fn primary_success_never_touches_fallback() {
        let primary = MockTts::new(1, None);
        let fallback = MockTts::new(2, None);
        let pv = voices("p_alex", "p_sam");
        let fv = voices("f_alex", "f_sam");
        let pipeline = TtsPipeline::new(Some((&primary, &pv)), (&fallback, &fv));

        let out = pipeline.synthesize_all(&segments(3)).await.unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|(_, s)| s.iter().all(|&x| x == 1)));
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mid_batch_failure_discards_all_primary_audio() {
        // Fail on the third of five segments: no primary samples may
        // survive, the fallback rerenders every segment.
        let primary = MockTts::new(1, Some(2));
        let fallback = MockTts::new(2, None);
        let pv = voices("p_alex", "p_sam");
        let fv = voices("f_alex", "f_sam");
        let pipeline = TtsPipeline::new(Some((&primary, &pv)), (&fallback, &fv));

        let out = pipeline.synthesize_all(&segments(5)).await.unwrap();
        assert_eq!(out.len(), 5);
        assert!(out.iter().all(|(_, s)| s.iter().all(|&x| x == 2)));
        assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn fallback_uses_its_own_voice_namespace() {
        let primary = MockTts::new(1, Some(0));
        let fallback = MockTts::new(2, None);
        let pv = voices("p_alex", "p_sam");
        let fv = voices("f_alex", "f_sam");
        let pipeline = TtsPipeline::new(Some((&primary, &pv)), (&fallback, &fv));

        pipeline.synthesize_all(&segments(2)).await.unwrap();
        let seen = fallback.voices_seen.lock().unwrap();
        assert_eq!(*seen, vec!["f_alex".to_string(), "f_sam".to_string()]);
    }

    #[tokio::test]
    async fn no_primary_goes_straight_to_fallback() {
        let fallback = MockTts::new(2, None);
        let fv = voices("f_alex", "f_sam");
        let pipeline = TtsPipeline::new(None, (&fallback, &fv));

        let out = pipeline.synthesize_all(&segments(2)).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn both_engines_failing_surfaces_the_error() {
        let primary = MockTts::new(1, Some(0));
        let fallback = MockTts::new(2, Some(1));
        let pv = voices("p_alex", "p_sam");
        let fv = voices("f_alex", "f_sam");
        let pipeline = TtsPipeline::new(Some((&primary, &pv)), (&fallback, &fv));

        let err = pipeline.synthesize_all(&segments(3)).await.unwrap_err();
        assert!(matches!(err, Error::Tts(_)));
    }

    #[test]
    fn pcm_conversion_is_little_endian() {
        assert_eq!(pcm_bytes_to_samples(&[0x01, 0x00, 0xFF, 0xFF]), vec![1, -1]);
    }
}
