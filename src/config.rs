//! Session configuration: the value object sent to the service in
//! `set_task`, plus its canonical (nested `pipeline`) and flattened wire
//! shapes (§3, §6). Parameter groups are supplemented from the original
//! Python implementation's `config.py`, which the distilled specification
//! elides with `...`.
//!
//! `Config` itself holds only wire data — it derives `Serialize`,
//! `Deserialize`, `Clone`, `PartialEq` so the round-trip property
//! (`parse(serialize(cfg)) == cfg`) is checkable directly. The `Reader`/
//! `Writer`/callback objects a session also needs are not wire data (the
//! original marks them `PrivateAttr`, excluded from `model_dump`) and are
//! held by `Manager` instead, mirroring that exclusion.

use serde::{Deserialize, Serialize};

use crate::error::{PalabraError, Result};

pub const SINGLE_TARGET_SUPPORTED_COUNT: usize = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputStream {
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default = "default_livekit_source")]
    pub source: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputStream {
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default = "default_livekit_target")]
    pub target: serde_json::Value,
}

fn default_content_type() -> String {
    "audio".to_string()
}
fn default_livekit_source() -> serde_json::Value {
    serde_json::json!({"type": "livekit"})
}
fn default_livekit_target() -> serde_json::Value {
    serde_json::json!({"type": "livekit"})
}

impl Default for InputStream {
    fn default() -> Self {
        Self {
            content_type: default_content_type(),
            source: default_livekit_source(),
        }
    }
}
impl Default for OutputStream {
    fn default() -> Self {
        Self {
            content_type: default_content_type(),
            target: default_livekit_target(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preprocessing {
    pub enable_vad: bool,
    pub vad_threshold: f32,
    pub vad_left_padding: i32,
    pub vad_right_padding: i32,
    pub pre_vad_denoise: bool,
    pub pre_vad_dsp: bool,
    pub record_tracks: Vec<String>,
    pub auto_tempo: bool,
}

impl Default for Preprocessing {
    fn default() -> Self {
        Self {
            enable_vad: true,
            vad_threshold: 0.5,
            vad_left_padding: 200,
            vad_right_padding: 200,
            pre_vad_denoise: false,
            pre_vad_dsp: true,
            record_tracks: vec![],
            auto_tempo: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterAdvanced {
    pub min_sentence_characters: i32,
    pub min_sentence_seconds: i32,
    pub min_split_interval: f32,
    pub context_size: i32,
    pub segments_after_restart: i32,
    pub step_size: i32,
    pub max_steps_without_eos: i32,
    pub force_end_of_segment: f32,
}

impl Default for SplitterAdvanced {
    fn default() -> Self {
        Self {
            min_sentence_characters: 80,
            min_sentence_seconds: 4,
            min_split_interval: 0.6,
            context_size: 20,
            segments_after_restart: 3,
            step_size: 5,
            max_steps_without_eos: 10,
            force_end_of_segment: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Splitter {
    pub enabled: bool,
    pub splitter_model: String,
    pub advanced: SplitterAdvanced,
}

impl Default for Splitter {
    fn default() -> Self {
        Self {
            enabled: true,
            splitter_model: "auto".to_string(),
            advanced: SplitterAdvanced::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Verification {
    pub verification_model: String,
    pub allow_verification_glossaries: bool,
    pub auto_transcription_correction: bool,
    pub transcription_correction_style: Option<String>,
}

impl Default for Verification {
    fn default() -> Self {
        Self {
            verification_model: "auto".to_string(),
            allow_verification_glossaries: true,
            auto_transcription_correction: false,
            transcription_correction_style: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FillerPhrases {
    pub enabled: bool,
    pub min_transcription_len: i32,
    pub min_transcription_time: i32,
    pub phrase_chance: f32,
}

impl Default for FillerPhrases {
    fn default() -> Self {
        Self {
            enabled: false,
            min_transcription_len: 50,
            min_transcription_time: 3,
            phrase_chance: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionAdvanced {
    pub filler_phrases: FillerPhrases,
    pub ignore_languages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionParams {
    pub detectable_languages: Vec<String>,
    pub asr_model: String,
    pub denoise: String,
    pub allow_hotwords_glossaries: bool,
    pub supress_numeral_tokens: bool,
    pub diarize_speakers: bool,
    pub priority: String,
    pub min_alignment_score: f32,
    pub max_alignment_cer: f32,
    pub segment_confirmation_silence_threshold: f32,
    pub only_confirm_by_silence: bool,
    pub batched_inference: bool,
    pub force_detect_language: bool,
    pub calculate_voice_loudness: bool,
    pub sentence_splitter: Splitter,
    pub verification: Verification,
    pub advanced: TranscriptionAdvanced,
}

impl Default for TranscriptionParams {
    fn default() -> Self {
        Self {
            detectable_languages: vec![],
            asr_model: "auto".to_string(),
            denoise: "none".to_string(),
            allow_hotwords_glossaries: true,
            supress_numeral_tokens: false,
            diarize_speakers: false,
            priority: "normal".to_string(),
            min_alignment_score: 0.0,
            max_alignment_cer: 1.0,
            segment_confirmation_silence_threshold: 0.3,
            only_confirm_by_silence: false,
            batched_inference: false,
            force_detect_language: false,
            calculate_voice_loudness: false,
            sentence_splitter: Splitter::default(),
            verification: Verification::default(),
            advanced: TranscriptionAdvanced::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimbreDetection {
    pub enabled: bool,
    pub high_timbre_voices: Vec<String>,
    pub low_timbre_voices: Vec<String>,
}

impl Default for TimbreDetection {
    fn default() -> Self {
        Self {
            enabled: false,
            high_timbre_voices: vec!["default_high".to_string()],
            low_timbre_voices: vec!["default_low".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsAdvanced {
    pub f0_variance_factor: f32,
    pub energy_variance_factor: f32,
    pub with_custom_stress: bool,
}

impl Default for TtsAdvanced {
    fn default() -> Self {
        Self {
            f0_variance_factor: 0.0,
            energy_variance_factor: 0.0,
            with_custom_stress: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechGen {
    pub tts_model: String,
    pub voice_cloning: bool,
    pub voice_cloning_mode: String,
    pub denoise_voice_samples: bool,
    pub voice_id: String,
    pub voice_timbre_detection: TimbreDetection,
    pub speech_tempo_auto: bool,
    pub speech_tempo_timings_factor: i32,
    pub speech_tempo_adjustment_factor: f32,
    pub advanced: TtsAdvanced,
}

impl Default for SpeechGen {
    fn default() -> Self {
        Self {
            tts_model: "auto".to_string(),
            voice_cloning: false,
            voice_cloning_mode: "static_10".to_string(),
            denoise_voice_samples: true,
            voice_id: "default_low".to_string(),
            voice_timbre_detection: TimbreDetection::default(),
            speech_tempo_auto: true,
            speech_tempo_timings_factor: 0,
            speech_tempo_adjustment_factor: 1.0,
            advanced: TtsAdvanced::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslationAdvanced {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationParams {
    pub allowed_source_languages: Vec<String>,
    pub translation_model: String,
    pub allow_translation_glossaries: bool,
    pub style: Option<String>,
    pub translate_partial_transcriptions: bool,
    pub speech_generation: SpeechGen,
    pub advanced: TranslationAdvanced,
}

impl Default for TranslationParams {
    fn default() -> Self {
        Self {
            allowed_source_languages: vec![],
            translation_model: "auto".to_string(),
            allow_translation_glossaries: true,
            style: None,
            translate_partial_transcriptions: false,
            speech_generation: SpeechGen::default(),
            advanced: TranslationAdvanced::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub desired_queue_level_ms: u32,
    pub max_queue_level_ms: u32,
    pub auto_tempo: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            desired_queue_level_ms: 8000,
            max_queue_level_ms: 24000,
            auto_tempo: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueConfigs {
    #[serde(rename = "global")]
    pub global_: QueueConfig,
}

/// Source-language half of the session: language code plus transcription
/// parameters. The `Reader` and any `on_transcription` callback live
/// outside this wire struct, on `Manager`/`Transcription`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLang {
    pub lang: String,
    #[serde(default)]
    pub transcription: TranscriptionParams,
}

/// Target-language half: one target is supported (§1 Non-goals).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetLang {
    pub lang: String,
    #[serde(default)]
    pub translation: TranslationParams,
}

/// Session configuration value object. Holds exactly one `SourceLang` and
/// one `TargetLang` by construction, rather than `Vec<TargetLang>` with a
/// runtime length check — §3's `|targets| = 1` invariant is made
/// unrepresentable instead of merely validated (a deliberate REDESIGN
/// choice recorded in DESIGN.md). The canonical wire form still emits a
/// one-element `translations` array, and the parser still accepts a
/// (validated) multi-element array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceLang,
    pub target: TargetLang,
    #[serde(default)]
    pub input_stream: InputStream,
    #[serde(default)]
    pub output_stream: OutputStream,
    #[serde(default)]
    pub preprocessing: Preprocessing,
    #[serde(default)]
    pub translation_queue_configs: QueueConfigs,
    #[serde(default = "default_allowed_message_types")]
    pub allowed_message_types: Vec<String>,
}

fn default_allowed_message_types() -> Vec<String> {
    [
        "set_task",
        "get_task",
        "current_task",
        "end_task",
        "pipeline_timings",
        "queue_status",
        "partial_transcription",
        "validated_transcription",
        "translated_partial_transcription",
        "translated_transcription",
        "output_audio_data",
        "input_audio_data",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Config {
    pub fn new(source_lang: impl Into<String>, target_lang: impl Into<String>) -> Self {
        Self {
            source: SourceLang {
                lang: source_lang.into(),
                transcription: TranscriptionParams::default(),
            },
            target: TargetLang {
                lang: target_lang.into(),
                translation: TranslationParams::default(),
            },
            input_stream: InputStream::default(),
            output_stream: OutputStream::default(),
            preprocessing: Preprocessing::default(),
            translation_queue_configs: QueueConfigs::default(),
            allowed_message_types: default_allowed_message_types(),
        }
    }

    /// Serialize to the canonical wire shape sent in `set_task.data`:
    /// `{input_stream, output_stream, pipeline: {preprocessing,
    /// transcription, translations, translation_queue_configs,
    /// allowed_message_types}}`.
    pub fn to_canonical(&self) -> serde_json::Value {
        let mut transcription = serde_json::to_value(&self.source.transcription).unwrap();
        transcription["source_language"] = serde_json::Value::String(self.source.lang.clone());

        let mut translation = serde_json::to_value(&self.target.translation).unwrap();
        translation["target_language"] = serde_json::Value::String(self.target.lang.clone());

        serde_json::json!({
            "input_stream": self.input_stream,
            "output_stream": self.output_stream,
            "pipeline": {
                "preprocessing": self.preprocessing,
                "transcription": transcription,
                "translations": [translation],
                "translation_queue_configs": self.translation_queue_configs,
                "allowed_message_types": self.allowed_message_types,
            }
        })
    }

    /// Parse either the canonical nested (`pipeline: {...}`) shape or the
    /// flattened internal-construction shape (`source`/`target(s)` at top
    /// level, no `pipeline` wrapper) — §6 "Parsing must also accept the
    /// flattened form".
    pub fn from_wire(value: serde_json::Value) -> Result<Config> {
        let mut value = value;
        if let Some(pipeline) = value.get_mut("pipeline").map(|v| v.take()) {
            if let serde_json::Value::Object(pipeline_obj) = pipeline {
                if let serde_json::Value::Object(ref mut root) = value {
                    root.remove("pipeline");
                    for (k, v) in pipeline_obj {
                        root.insert(k, v);
                    }
                }
            }
        }

        if value.get("source").is_some() && value.get("target").is_some() {
            return serde_json::from_value(value).map_err(Into::into);
        }

        let transcription_raw = value.get("transcription").cloned().unwrap_or_default();
        let source_language = transcription_raw
            .get("source_language")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                PalabraError::Configuration(
                    "source_language must be specified in the transcription section".into(),
                )
            })?
            .to_string();
        let transcription: TranscriptionParams = serde_json::from_value(transcription_raw)?;

        let translations = value
            .get("translations")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        if translations.len() != SINGLE_TARGET_SUPPORTED_COUNT {
            return Err(PalabraError::Configuration(format!(
                "exactly one target language is supported, got {}",
                translations.len()
            )));
        }
        let translation_raw = translations[0].clone();
        let target_language = translation_raw
            .get("target_language")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                PalabraError::Configuration(
                    "target_language must be specified in the translation section".into(),
                )
            })?
            .to_string();
        let translation: TranslationParams = serde_json::from_value(translation_raw)?;

        Ok(Config {
            source: SourceLang {
                lang: source_language,
                transcription,
            },
            target: TargetLang {
                lang: target_language,
                translation,
            },
            input_stream: value
                .get("input_stream")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default(),
            output_stream: value
                .get("output_stream")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default(),
            preprocessing: value
                .get("preprocessing")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default(),
            translation_queue_configs: value
                .get("translation_queue_configs")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default(),
            allowed_message_types: value
                .get("allowed_message_types")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_else(default_allowed_message_types),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_canonical_wire_shape() {
        let cfg = Config::new("en", "es");
        let wire = cfg.to_canonical();
        let parsed = Config::from_wire(wire).unwrap();
        assert_eq!(cfg, parsed);
    }

    #[test]
    fn round_trip_flattened_shape() {
        let cfg = Config::new("ar", "en");
        let flat = serde_json::to_value(&cfg).unwrap();
        let parsed = Config::from_wire(flat).unwrap();
        assert_eq!(cfg, parsed);
    }

    #[test]
    fn missing_source_language_is_configuration_error() {
        let raw = serde_json::json!({
            "pipeline": {
                "transcription": {},
                "translations": [{"target_language": "es"}],
            }
        });
        assert!(Config::from_wire(raw).is_err());
    }

    #[test]
    fn multiple_targets_rejected() {
        let raw = serde_json::json!({
            "pipeline": {
                "transcription": {"source_language": "en"},
                "translations": [
                    {"target_language": "es"},
                    {"target_language": "fr"},
                ],
            }
        });
        assert!(Config::from_wire(raw).is_err());
    }

    #[test]
    fn nested_defaults_applied_when_absent() {
        let raw = serde_json::json!({
            "pipeline": {
                "transcription": {"source_language": "en"},
                "translations": [{"target_language": "es"}],
            }
        });
        let cfg = Config::from_wire(raw).unwrap();
        assert!(cfg.preprocessing.enable_vad);
        assert_eq!(cfg.translation_queue_configs.global_.max_queue_level_ms, 24000);
    }
}
