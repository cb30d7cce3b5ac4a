//! Optional podcast stage: turn the digest into a two-host audio episode.
//!
//! The whole stage is best-effort relative to email delivery. Any
//! failure in here is reported and the digest still goes out, just
//! without an episode attached.

pub mod audio;
pub mod models;
pub mod script;
pub mod tts;
pub mod voices;

use std::path::PathBuf;

use chrono::Local;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::podcast::models::LocalModelSelector;
use crate::podcast::script::ScriptGenerator;
use crate::podcast::tts::{ElevenLabsTts, LocalSpeechTts, TtsPipeline, TtsProvider};
use crate::podcast::voices::{
    VoiceAssignment, ELEVENLABS_FEMALE_VOICES, ELEVENLABS_MALE_VOICES, KOKORO_FEMALE_VOICES,
    KOKORO_MALE_VOICES,
};

pub struct Episode {
    pub path: PathBuf,
    /// Model-drift notices to forward through the error email channel.
    pub notices: Vec<String>,
}

/// Run the full podcast pipeline: script generation on the local model,
/// synthesis with engine fallback, assembly, cleanup of old episodes.
pub async fn generate_episode(config: &Config, digest_html: &str, test_mode: bool) -> Result<Episode> {
    let Some(output_dir) = config.podcast.output_dir.as_deref() else {
        return Err(crate::error::Error::Malformed(
            "podcast output_dir not configured".into(),
        ));
    };
    let date_key = Local::now().format("%Y-%m-%d").to_string();

    let digest_text = script::extract_text(digest_html, test_mode);
    let selector = LocalModelSelector::new(config.ollama.clone())?;
    let generator = ScriptGenerator::new(config.ollama.clone())?;
    let (raw_script, notices) = generator.generate(&selector, &digest_text, test_mode).await?;
    let segments = script::parse_script(&raw_script)?;
    info!(segments = segments.len(), "script parsed into dialogue segments");

    let elevenlabs_voices = if config.elevenlabs.voice_alex.is_empty()
        || config.elevenlabs.voice_sam.is_empty()
    {
        VoiceAssignment::rotated(ELEVENLABS_MALE_VOICES, ELEVENLABS_FEMALE_VOICES, &date_key)
    } else {
        VoiceAssignment::pinned(&config.elevenlabs.voice_alex, &config.elevenlabs.voice_sam)
    };
    let kokoro_voices = VoiceAssignment::rotated(KOKORO_MALE_VOICES, KOKORO_FEMALE_VOICES, &date_key);
    info!(
        alex = %elevenlabs_voices.alex_name,
        sam = %elevenlabs_voices.sam_name,
        "today's voices"
    );

    let elevenlabs;
    let primary: Option<(&dyn TtsProvider, &VoiceAssignment)> =
        if config.elevenlabs.api_key.is_empty() {
            None
        } else {
            elevenlabs = ElevenLabsTts::new(config.elevenlabs.clone())?;
            Some((&elevenlabs, &elevenlabs_voices))
        };
    let local_speech = LocalSpeechTts::new(config.speech.clone())?;
    let pipeline = TtsPipeline::new(primary, (&local_speech, &kokoro_voices));
    let segment_audio = pipeline.synthesize_all(&segments).await?;

    let opts = audio::AssemblyOptions {
        speaker_pause_ms: config.podcast.speaker_pause_ms,
        intro: config.podcast.intro_music.clone(),
        outro: config.podcast.outro_music.clone(),
    };
    let episode_samples = audio::assemble(&segment_audio, &opts);
    let path = audio::write_episode(output_dir, &date_key, &episode_samples)?;

    audio::cleanup_old_audio(output_dir, config.podcast.keep_days);

    Ok(Episode { path, notices })
}
