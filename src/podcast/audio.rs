//! Episode assembly: stitch the synthesized segments into one WAV file.
//!
//! Everything operates on 16-bit mono samples at 44.1 kHz. Dialogue
//! segments are concatenated with a short pause wherever the speaker
//! changes, optional intro and outro clips are crossfaded in, and the
//! result is written as `digest-YYYY-MM-DD.wav`.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::podcast::script::Speaker;

pub const SAMPLE_RATE: u32 = 44_100;
const CROSSFADE_MS: u64 = 1_000;
const INTRO_FADE_IN_MS: u64 = 1_000;
const EDGE_FADE_MS: u64 = 2_000;

fn ms_to_samples(ms: u64) -> usize {
    (SAMPLE_RATE as u64 * ms / 1_000) as usize
}

/// Concatenate dialogue audio, inserting `pause_ms` of silence between
/// consecutive segments only when the speaker changes. Back-to-back
/// segments from the same host run together.
pub fn join_dialogue(segments: &[(Speaker, Vec<i16>)], pause_ms: u64) -> Vec<i16> {
    let pause = ms_to_samples(pause_ms);
    let mut out = Vec::new();
    let mut previous: Option<Speaker> = None;
    for (speaker, samples) in segments {
        if previous.is_some_and(|p| p != *speaker) {
            out.extend(std::iter::repeat(0).take(pause));
        }
        out.extend_from_slice(samples);
        previous = Some(*speaker);
    }
    out
}

fn fade_in(samples: &mut [i16], ms: u64) {
    let n = ms_to_samples(ms).min(samples.len());
    for (i, sample) in samples.iter_mut().take(n).enumerate() {
        *sample = (*sample as f64 * i as f64 / n as f64) as i16;
    }
}

fn fade_out(samples: &mut [i16], ms: u64) {
    let n = ms_to_samples(ms).min(samples.len());
    let len = samples.len();
    for i in 0..n {
        let gain = (n - i) as f64 / n as f64;
        samples[len - n + i] = (samples[len - n + i] as f64 * gain) as i16;
    }
}

/// Append `b` to `a` with a linear crossfade over the overlap window.
/// The overlap shrinks to fit when either side is shorter than it.
pub fn crossfade_append(a: Vec<i16>, b: &[i16], overlap_ms: u64) -> Vec<i16> {
    let overlap = ms_to_samples(overlap_ms).min(a.len()).min(b.len());
    let mut out = a;
    let tail_start = out.len() - overlap;
    for i in 0..overlap {
        let t = i as f64 / overlap as f64;
        let mixed = out[tail_start + i] as f64 * (1.0 - t) + b[i] as f64 * t;
        out[tail_start + i] = mixed.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
    }
    out.extend_from_slice(&b[overlap..]);
    out
}

/// Read a music clip, accepting only files that match the episode's
/// 44.1 kHz mono 16-bit profile. Mismatched clips are skipped with a
/// warning rather than resampled.
pub fn load_clip(path: &Path) -> Option<Vec<i16>> {
    let reader = match WavReader::open(path) {
        Ok(r) => r,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not open music clip, skipping");
            return None;
        }
    };
    let spec = reader.spec();
    if spec.channels != 1 || spec.sample_rate != SAMPLE_RATE || spec.bits_per_sample != 16 {
        warn!(
            path = %path.display(),
            channels = spec.channels,
            rate = spec.sample_rate,
            "music clip does not match the 44.1kHz mono 16-bit profile, skipping"
        );
        return None;
    }
    match reader.into_samples::<i16>().collect::<std::result::Result<Vec<_>, _>>() {
        Ok(samples) => Some(samples),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read music clip, skipping");
            None
        }
    }
}

pub struct AssemblyOptions {
    pub speaker_pause_ms: u64,
    pub intro: Option<PathBuf>,
    pub outro: Option<PathBuf>,
}

/// Build the final episode waveform: faded intro, crossfade into the
/// dialogue, crossfade into a faded outro.
pub fn assemble(segments: &[(Speaker, Vec<i16>)], opts: &AssemblyOptions) -> Vec<i16> {
    let dialogue = join_dialogue(segments, opts.speaker_pause_ms);

    let mut episode = match opts.intro.as_deref().and_then(load_clip) {
        Some(mut intro) => {
            fade_in(&mut intro, INTRO_FADE_IN_MS);
            fade_out(&mut intro, EDGE_FADE_MS);
            crossfade_append(intro, &dialogue, CROSSFADE_MS)
        }
        None => dialogue,
    };

    if let Some(mut outro) = opts.outro.as_deref().and_then(load_clip) {
        fade_in(&mut outro, EDGE_FADE_MS);
        fade_out(&mut outro, EDGE_FADE_MS);
        episode = crossfade_append(episode, &outro, CROSSFADE_MS);
    }

    episode
}

/// Write the episode to `dir/digest-YYYY-MM-DD.wav` and return the path.
pub fn write_episode(dir: &Path, date_key: &str, samples: &[i16]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("digest-{date_key}.wav"));
    let spec = WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    info!(
        path = %path.display(),
        seconds = samples.len() / SAMPLE_RATE as usize,
        "episode written"
    );
    Ok(path)
}

/// Delete episode files older than `keep_days`, never touching today's.
/// Files whose names do not carry a parseable date are left alone.
pub fn cleanup_old_audio(dir: &Path, keep_days: i64) {
    let today = Local::now().date_naive();
    let cutoff = today - chrono::Duration::days(keep_days);
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "cleanup skipped");
            return;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(date) = episode_date(name) else { continue };
        if date < cutoff && date != today {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => info!(file = name, "removed old episode"),
                Err(e) => warn!(file = name, error = %e, "could not remove old episode"),
            }
        }
    }
}

fn episode_date(file_name: &str) -> Option<NaiveDate> {
    let stem = file_name.strip_prefix("digest-")?.strip_suffix(".wav")?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}
