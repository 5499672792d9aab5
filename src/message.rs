//! Control-channel wire types (§3, §6): `ControlMessage` variants and the
//! transcription payload shapes, plus the deterministic dedup key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single recognized span of speech within a transcription message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    pub text: String,
    pub confidence: f32,
    pub start_s: f64,
    pub end_s: f64,
    pub start_timestamp: f64,
}

/// The four transcription message kinds the control channel carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionKind {
    Partial,
    Validated,
    TranslatedPartial,
    TranslatedValidated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionMessage {
    pub kind: TranscriptionKind,
    pub transcription_id: String,
    pub text: String,
    pub language: String,
    #[serde(default)]
    pub segments: Vec<TranscriptionSegment>,
}

impl TranscriptionMessage {
    /// Deterministic digest of `(transcription_id, text, kind)`, used by
    /// `CappedSet`-based dedup. Two messages with identical key are
    /// considered the same event regardless of segment-level detail.
    pub fn dedup_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.transcription_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.text.as_bytes());
        hasher.update(b"\0");
        hasher.update(format!("{:?}", self.kind).as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Per-language queue depth, as carried by `queue_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatusEntry {
    pub current_queue_level_ms: u32,
    pub max_queue_level_ms: u32,
}

/// `end_task.data`: a forced end-task carries `force: true` during
/// shutdown (internal/ws.py `close()`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EndTaskData {
    #[serde(default)]
    pub force: bool,
}

/// Inbound/outbound frame on the control channel, tagged by
/// `message_type`. Decode failures are not propagated as errors — they
/// become `Unknown`, carrying the raw payload and the decode error for
/// debugging (§7 "Decode").
#[derive(Debug, Clone)]
pub enum ControlMessage {
    SetTask { data: serde_json::Value },
    GetTask,
    CurrentTask { data: serde_json::Value },
    EndTask { data: EndTaskData },
    PipelineTimings { data: serde_json::Value },
    QueueStatus { data: std::collections::HashMap<String, QueueStatusEntry> },
    Transcription(TranscriptionMessage),
    /// Only used when media rides the control channel (§4.7 WS mode).
    OutputAudioData { base64_pcm: String },
    InputAudioData { base64_pcm: String },
    Unknown { raw: String, decode_error: String },
}

#[derive(Serialize, Deserialize)]
struct WireFrame {
    message_type: String,
    data: serde_json::Value,
}

impl ControlMessage {
    /// Parse a raw UTF-8 JSON control frame. Never fails: on any decode
    /// problem, returns `Unknown` with the raw text and the error message.
    pub fn decode(raw: &str) -> ControlMessage {
        match serde_json::from_str::<WireFrame>(raw) {
            Ok(frame) => Self::from_wire(frame, raw),
            Err(e) => ControlMessage::Unknown {
                raw: raw.to_string(),
                decode_error: e.to_string(),
            },
        }
    }

    fn from_wire(frame: WireFrame, raw: &str) -> ControlMessage {
        let result = (|| -> serde_json::Result<ControlMessage> {
            Ok(match frame.message_type.as_str() {
                "set_task" => ControlMessage::SetTask { data: frame.data },
                "get_task" => ControlMessage::GetTask,
                "current_task" => ControlMessage::CurrentTask { data: frame.data },
                "end_task" => ControlMessage::EndTask {
                    data: serde_json::from_value(frame.data)?,
                },
                "pipeline_timings" => ControlMessage::PipelineTimings { data: frame.data },
                "queue_status" => ControlMessage::QueueStatus {
                    data: serde_json::from_value(frame.data)?,
                },
                "partial_transcription" => ControlMessage::Transcription(
                    transcription_from_data(frame.data, TranscriptionKind::Partial)?,
                ),
                "validated_transcription" => ControlMessage::Transcription(
                    transcription_from_data(frame.data, TranscriptionKind::Validated)?,
                ),
                "translated_partial_transcription" => ControlMessage::Transcription(
                    transcription_from_data(frame.data, TranscriptionKind::TranslatedPartial)?,
                ),
                "translated_transcription" => ControlMessage::Transcription(
                    transcription_from_data(frame.data, TranscriptionKind::TranslatedValidated)?,
                ),
                "output_audio_data" => ControlMessage::OutputAudioData {
                    base64_pcm: frame
                        .data
                        .get("data")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                },
                "input_audio_data" => ControlMessage::InputAudioData {
                    base64_pcm: frame
                        .data
                        .get("data")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                },
                other => {
                    return Ok(ControlMessage::Unknown {
                        raw: raw.to_string(),
                        decode_error: format!("unrecognized message_type: {other}"),
                    })
                }
            })
        })();

        result.unwrap_or_else(|e| ControlMessage::Unknown {
            raw: raw.to_string(),
            decode_error: e.to_string(),
        })
    }

    /// Encode to the wire's `{message_type, data}` shape.
    pub fn encode(&self) -> serde_json::Result<String> {
        let (message_type, data) = match self {
            ControlMessage::SetTask { data } => ("set_task", data.clone()),
            ControlMessage::GetTask => ("get_task", serde_json::json!({})),
            ControlMessage::CurrentTask { data } => ("current_task", data.clone()),
            ControlMessage::EndTask { data } => ("end_task", serde_json::to_value(data)?),
            ControlMessage::PipelineTimings { data } => ("pipeline_timings", data.clone()),
            ControlMessage::QueueStatus { data } => ("queue_status", serde_json::to_value(data)?),
            ControlMessage::Transcription(msg) => {
                let mt = match msg.kind {
                    TranscriptionKind::Partial => "partial_transcription",
                    TranscriptionKind::Validated => "validated_transcription",
                    TranscriptionKind::TranslatedPartial => "translated_partial_transcription",
                    TranscriptionKind::TranslatedValidated => "translated_transcription",
                };
                (mt, transcription_to_data(msg))
            }
            ControlMessage::OutputAudioData { base64_pcm } => (
                "output_audio_data",
                serde_json::json!({"data": base64_pcm}),
            ),
            ControlMessage::InputAudioData { base64_pcm } => {
                ("input_audio_data", serde_json::json!({"data": base64_pcm}))
            }
            ControlMessage::Unknown { raw, .. } => return Ok(raw.clone()),
        };
        serde_json::to_string(&WireFrame {
            message_type: message_type.to_string(),
            data,
        })
    }

    /// `true` for the four transcription variants, used by Realtime's
    /// dedup routing (non-transcription messages always pass through).
    pub fn as_transcription(&self) -> Option<&TranscriptionMessage> {
        match self {
            ControlMessage::Transcription(msg) => Some(msg),
            _ => None,
        }
    }
}

fn transcription_from_data(
    data: serde_json::Value,
    kind: TranscriptionKind,
) -> serde_json::Result<TranscriptionMessage> {
    #[derive(Deserialize)]
    struct Wire {
        transcription_id: String,
        text: String,
        language: String,
        #[serde(default)]
        segments: Vec<WireSegment>,
    }
    #[derive(Deserialize)]
    struct WireSegment {
        text: String,
        confidence: f32,
        start: f64,
        end: f64,
        start_timestamp: f64,
    }
    let wire: Wire = serde_json::from_value(data)?;
    Ok(TranscriptionMessage {
        kind,
        transcription_id: wire.transcription_id,
        text: wire.text,
        language: wire.language,
        segments: wire
            .segments
            .into_iter()
            .map(|s| TranscriptionSegment {
                text: s.text,
                confidence: s.confidence,
                start_s: s.start,
                end_s: s.end,
                start_timestamp: s.start_timestamp,
            })
            .collect(),
    })
}

fn transcription_to_data(msg: &TranscriptionMessage) -> serde_json::Value {
    serde_json::json!({
        "transcription_id": msg.transcription_id,
        "language": msg.language,
        "text": msg.text,
        "segments": msg.segments.iter().map(|s| serde_json::json!({
            "text": s.text,
            "confidence": s.confidence,
            "start": s.start_s,
            "end": s.end_s,
            "start_timestamp": s.start_timestamp,
        })).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: TranscriptionKind, id: &str, text: &str) -> TranscriptionMessage {
        TranscriptionMessage {
            kind,
            transcription_id: id.into(),
            text: text.into(),
            language: "en".into(),
            segments: vec![],
        }
    }

    #[test]
    fn dedup_key_stable_for_identical_fields() {
        let a = sample(TranscriptionKind::Partial, "t1", "hello");
        let b = sample(TranscriptionKind::Partial, "t1", "hello");
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn dedup_key_differs_on_kind() {
        let a = sample(TranscriptionKind::Partial, "t1", "hello");
        let b = sample(TranscriptionKind::Validated, "t1", "hello");
        assert_ne!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn decode_unknown_type_does_not_error() {
        let msg = ControlMessage::decode(r#"{"message_type":"mystery","data":{}}"#);
        assert!(matches!(msg, ControlMessage::Unknown { .. }));
    }

    #[test]
    fn decode_malformed_json_becomes_unknown() {
        let msg = ControlMessage::decode("not json at all");
        assert!(matches!(msg, ControlMessage::Unknown { .. }));
    }

    #[test]
    fn decode_validated_transcription_roundtrip() {
        let raw = r#"{"message_type":"validated_transcription","data":{
            "transcription_id":"abc","language":"en","text":"hi",
            "segments":[{"text":"hi","confidence":0.9,"start":0.0,"end":0.5,"start_timestamp":0.0}]
        }}"#;
        let msg = ControlMessage::decode(raw);
        let t = msg.as_transcription().expect("should decode");
        assert_eq!(t.kind, TranscriptionKind::Validated);
        assert_eq!(t.segments.len(), 1);
    }

    #[test]
    fn encode_decode_end_task() {
        let msg = ControlMessage::EndTask {
            data: EndTaskData { force: true },
        };
        let encoded = msg.encode().unwrap();
        let decoded = ControlMessage::decode(&encoded);
        assert!(matches!(
            decoded,
            ControlMessage::EndTask {
                data: EndTaskData { force: true }
            }
        ));
    }

    #[test]
    fn queue_status_decodes_per_language_map() {
        let raw = r#"{"message_type":"queue_status","data":{"es":{"current_queue_level_ms":100,"max_queue_level_ms":500}}}"#;
        let msg = ControlMessage::decode(raw);
        match msg {
            ControlMessage::QueueStatus { data } => {
                assert_eq!(data["es"].current_queue_level_ms, 100);
            }
            _ => panic!("expected QueueStatus"),
        }
    }
}
