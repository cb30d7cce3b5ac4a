//! Curated voice pools and the deterministic daily voice picker.
//!
//! Both TTS engines rotate through gender-coded pools so each episode
//! sounds fresh. The pick is a stable hash of (date, role): the same
//! calendar day always yields the same voice across reruns, different
//! days rotate. Disjoint pools per role keep Alex and Sam from landing
//! on the same voice.

use md5::{Digest, Md5};

use crate::podcast::script::Speaker;

pub type VoiceEntry = (&'static str, &'static str); // (display name, voice id)

/// ElevenLabs premade voices suited for news/podcast delivery.
pub const ELEVENLABS_MALE_VOICES: &[VoiceEntry] = &[
    ("Brian", "nPczCjzI2devNBz1zQrb"),
    ("Daniel", "onwK4e9ZLuTAKqWW03F9"),
    ("Drew", "29vD33N1CtxCmqQRPOHJ"),
    ("Charlie", "IKne3meq5aSn9XLyUdCD"),
    ("Chris", "iP95p4xoKVk53GoZ742B"),
    ("Bill", "pqHfZKP75CvOlQylNhV4"),
    ("Josh", "TxGEqnHWrfWFTfGW9XjX"),
    ("Liam", "TX3LPaxmHKxFdv7VOQHJ"),
];

pub const ELEVENLABS_FEMALE_VOICES: &[VoiceEntry] = &[
    ("Alice", "Xb7hH8MSUJpSbSDYk0k2"),
    ("Sarah", "EXAVITQu4vr4xnSDxMaL"),
    ("Matilda", "XrExE9yKIg1WjnnlVkGX"),
    ("Rachel", "21m00Tcm4TlvDq8ikWAM"),
    ("Lily", "pFZP5JQG7iQjIQuC4Bku"),
];

/// Kokoro voices on the local fallback endpoint.
pub const KOKORO_MALE_VOICES: &[VoiceEntry] = &[
    ("Adam", "am_adam"),
    ("Michael", "am_michael"),
    ("Eric", "am_eric"),
    ("Onyx", "am_onyx"),
    ("Liam", "am_liam"),
];

pub const KOKORO_FEMALE_VOICES: &[VoiceEntry] = &[
    ("Heart", "af_heart"),
    ("Bella", "af_bella"),
    ("Nicole", "af_nicole"),
    ("Sarah", "af_sarah"),
];

/// Deterministically pick a voice from a pool based on date and role.
///
/// `index = md5("{date_key}-{role}") mod pool.len()`. Stateless; the same
/// inputs always return the same entry.
pub fn pick_daily_voice(pool: &[VoiceEntry], date_key: &str, role: &str) -> VoiceEntry {
    assert!(!pool.is_empty(), "voice pool must not be empty");
    let digest = Md5::digest(format!("{date_key}-{role}").as_bytes());
    let value = u128::from_be_bytes(
        digest
            .as_slice()
            .try_into()
            .expect("md5 digest is 16 bytes"),
    );
    pool[(value % pool.len() as u128) as usize]
}

/// Per-run mapping from host role to voice id, recomputed each invocation.
#[derive(Debug, Clone)]
pub struct VoiceAssignment {
    pub alex_name: String,
    pub alex_voice: String,
    pub sam_name: String,
    pub sam_voice: String,
}

impl VoiceAssignment {
    pub fn rotated(
        male_pool: &[VoiceEntry],
        female_pool: &[VoiceEntry],
        date_key: &str,
    ) -> Self {
        let (alex_name, alex_voice) = pick_daily_voice(male_pool, date_key, "Alex");
        let (sam_name, sam_voice) = pick_daily_voice(female_pool, date_key, "Sam");
        Self {
            alex_name: alex_name.into(),
            alex_voice: alex_voice.into(),
            sam_name: sam_name.into(),
            sam_voice: sam_voice.into(),
        }
    }

    pub fn pinned(alex_voice: &str, sam_voice: &str) -> Self {
        Self {
            alex_name: "Alex".into(),
            alex_voice: alex_voice.into(),
            sam_name: "Sam".into(),
            sam_voice: sam_voice.into(),
        }
    }

    pub fn voice_for(&self, speaker: Speaker) -> &str {
        match speaker {
            Speaker::Alex => &self.alex_voice,
            Speaker::Sam => &self.sam_voice,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_is_idempotent() {
        let a = pick_daily_voice(ELEVENLABS_MALE_VOICES, "2026-08-30", "Alex");
        let b = pick_daily_voice(ELEVENLABS_MALE_VOICES, "2026-08-30", "Alex");
        assert_eq!(a, b);
    }

    #[test]
    fn pick_varies_across_days() {
        // Over a month of dates the pick must not be constant for an
        // 8-entry pool; a fixed output would mean rotation is broken.
        let picks: std::collections::HashSet<_> = (1..=30)
            .map(|day| pick_daily_voice(ELEVENLABS_MALE_VOICES, &format!("2026-06-{day:02}"), "Alex"))
            .collect();
        assert!(picks.len() > 1);
    }

    #[test]
    fn role_changes_hash_input() {
        // Not guaranteed to differ for any single date, but across many
        // dates the two roles must diverge somewhere.
        let diverges = (1..=30).any(|day| {
            let date = format!("2026-06-{day:02}");
            pick_daily_voice(KOKORO_MALE_VOICES, &date, "Alex")
                != pick_daily_voice(KOKORO_MALE_VOICES, &date, "Sam")
        });
        assert!(diverges);
    }

    #[test]
    fn single_entry_pool_still_returns_it() {
        let pool: &[VoiceEntry] = &[("Only", "only_voice")];
        assert_eq!(pick_daily_voice(pool, "2026-08-30", "Alex"), ("Only", "only_voice"));
        assert_eq!(pick_daily_voice(pool, "2026-08-30", "Sam"), ("Only", "only_voice"));
    }

    #[test]
    fn assignment_maps_roles_to_disjoint_pools() {
        let assignment =
            VoiceAssignment::rotated(KOKORO_MALE_VOICES, KOKORO_FEMALE_VOICES, "2026-08-30");
        assert!(assignment.alex_voice.starts_with("am_"));
        assert!(assignment.sam_voice.starts_with("af_"));
        assert_eq!(assignment.voice_for(Speaker::Alex), assignment.alex_voice);
        assert_eq!(assignment.voice_for(Speaker::Sam), assignment.sam_voice);
    }
}
