//! Typed settings loaded from a JSON config file (C11).
//!
//! Mirrors the source's `StreamingConfig.from_config()`: deserialize once at
//! startup, then apply the stabilization preset overlay as a pure transform
//! before any component sees the settings.

use serde::Deserialize;
use shared_vad::VadConfig;
use streaming_core::StabilizationConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VadSettings {
    pub threshold: f32,
    pub hysteresis: f32,
    pub min_speech_duration: f32,
    pub max_silence_duration: f32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            hysteresis: 0.15,
            min_speech_duration: 0.3,
            max_silence_duration: 0.8,
        }
    }
}

impl VadSettings {
    /// `min_speech_chunks`/`chunks_per_second` aren't exposed as top-level
    /// config (the wire protocol doesn't fix a chunk duration); we keep the
    /// processor's own defaults for those two and overlay the tunable
    /// fields this config section does expose.
    pub fn to_vad_config(&self) -> VadConfig {
        VadConfig {
            threshold: self.threshold,
            hysteresis: self.hysteresis,
            min_speech_duration_s: self.min_speech_duration,
            max_silence_duration_s: self.max_silence_duration,
            ..VadConfig::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    LocalAgreement,
    Chunked,
    Native,
}

impl Default for StrategyKind {
    fn default() -> Self {
        Self::LocalAgreement
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    pub strategy: StrategyKind,
    pub stabilization: Option<String>,
    pub local_agreement_n: usize,
    pub transcribe_interval_seconds: f64,
    pub prompt_suffix_chars: usize,
    pub max_buffer_seconds: f64,
    pub session_timeout_seconds: f64,
    pub max_confirmed_words: usize,
    pub wake_word_preroll_seconds: f64,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            stabilization: None,
            local_agreement_n: 2,
            transcribe_interval_seconds: 2.0,
            prompt_suffix_chars: 200,
            max_buffer_seconds: 30.0,
            session_timeout_seconds: 300.0,
            max_confirmed_words: 500,
            wake_word_preroll_seconds: 1.0,
        }
    }
}

impl StreamingSettings {
    pub fn stabilization_config(&self) -> StabilizationConfig {
        StabilizationConfig {
            local_agreement_n: self.local_agreement_n,
            transcribe_interval_seconds: self.transcribe_interval_seconds,
            prompt_suffix_chars: self.prompt_suffix_chars,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    pub timeout_seconds: f64,
    pub backend: String,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 30.0,
            backend: "stub".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub burst_chunks_per_second: u32,
    pub sustained_chunks_per_second: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            burst_chunks_per_second: 200,
            sustained_chunks_per_second: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub vad: VadSettings,
    pub streaming: StreamingSettings,
    pub transcription: TranscriptionSettings,
    pub rate_limit: RateLimitSettings,
    pub backend_concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vad: VadSettings::default(),
            streaming: StreamingSettings::default(),
            transcription: TranscriptionSettings::default(),
            rate_limit: RateLimitSettings::default(),
            backend_concurrency: 1,
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut settings: Settings = serde_json::from_str(&raw)?;
        settings.apply_stabilization_preset();
        Ok(settings)
    }

    /// `streaming.stabilization`, if set, overwrites `local_agreement_n`,
    /// `transcribe_interval_seconds` and `prompt_suffix_chars` in one shot.
    /// Applied exactly once, immediately after deserialization.
    fn apply_stabilization_preset(&mut self) {
        let Some(preset_name) = self.streaming.stabilization.as_deref() else {
            return;
        };
        if let Some(preset) = StabilizationConfig::from_preset_name(preset_name) {
            self.streaming.local_agreement_n = preset.local_agreement_n;
            self.streaming.transcribe_interval_seconds = preset.transcribe_interval_seconds;
            self.streaming.prompt_suffix_chars = preset.prompt_suffix_chars;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let settings = Settings::default();
        assert_eq!(settings.vad.threshold, 0.5);
        assert_eq!(settings.streaming.local_agreement_n, 2);
        assert_eq!(settings.rate_limit.burst_chunks_per_second, 200);
        assert_eq!(settings.backend_concurrency, 1);
    }

    #[test]
    fn stabilization_preset_overwrites_three_fields_only() {
        let mut settings = Settings::default();
        settings.streaming.stabilization = Some("high".to_string());
        settings.streaming.max_buffer_seconds = 45.0; // untouched by the preset
        settings.apply_stabilization_preset();

        assert_eq!(settings.streaming.local_agreement_n, 3);
        assert_eq!(settings.streaming.transcribe_interval_seconds, 3.0);
        assert_eq!(settings.streaming.prompt_suffix_chars, 300);
        assert_eq!(settings.streaming.max_buffer_seconds, 45.0);
    }

    #[test]
    fn unknown_preset_name_is_ignored() {
        let mut settings = Settings::default();
        settings.streaming.stabilization = Some("extreme".to_string());
        let before = settings.streaming.local_agreement_n;
        settings.apply_stabilization_preset();
        assert_eq!(settings.streaming.local_agreement_n, before);
    }

    #[test]
    fn deserializes_partial_json_with_defaults_elsewhere() {
        let json = r#"{"vad": {"threshold": 0.6}}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.vad.threshold, 0.6);
        assert_eq!(settings.vad.hysteresis, 0.15);
        assert_eq!(settings.streaming.local_agreement_n, 2);
    }
}
