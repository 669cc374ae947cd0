//! JSON frames exchanged with the streaming emotion-inference service.
//!
//! Every request carries its own model configuration, so a connection
//! needs no handshake. Responses are keyed by model name.

use serde::{Deserialize, Serialize};

use super::{EmotionScore, Modality};
use crate::error::{Result, SphinxError};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
struct ModelConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    prosody: Option<ProsodyConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<LanguageConfig>,
}

#[derive(Debug, Clone, Default, Serialize)]
struct ProsodyConfig {}

#[derive(Debug, Clone, Serialize)]
struct LanguageConfig {
    granularity: &'static str,
}

impl ModelConfig {
    fn for_modality(modality: Modality) -> Self {
        match modality {
            Modality::Prosody => Self {
                prosody: Some(ProsodyConfig {}),
                language: None,
            },
            Modality::Language => Self {
                prosody: None,
                language: Some(LanguageConfig {
                    granularity: "passage",
                }),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct StreamRequest<'a> {
    data: &'a str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    raw_text: bool,
    models: ModelConfig,
}

/// Request scoring one base64-encoded WAV segment for prosody.
pub fn audio_request(wav_base64: &str) -> Result<String> {
    encode(&StreamRequest {
        data: wav_base64,
        raw_text: false,
        models: ModelConfig::for_modality(Modality::Prosody),
    })
}

/// Request scoring a transcribed passage for language emotion.
pub fn text_request(text: &str) -> Result<String> {
    encode(&StreamRequest {
        data: text,
        raw_text: true,
        models: ModelConfig::for_modality(Modality::Language),
    })
}

fn encode(request: &StreamRequest<'_>) -> Result<String> {
    serde_json::to_string(request)
        .map_err(|e| SphinxError::Transport(format!("encode request: {e}")))
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    prosody: Option<ModelPredictions>,
    #[serde(default)]
    language: Option<ModelPredictions>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelPredictions {
    #[serde(default)]
    predictions: Vec<Prediction>,
    #[serde(default)]
    warning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    emotions: Vec<RawEmotion>,
}

#[derive(Debug, Deserialize)]
struct RawEmotion {
    name: String,
    score: f64,
}

/// Parse one response frame into score batches, one per prediction.
///
/// A service-reported `error` is a [`SphinxError::Transport`]. A missing
/// model section (for instance a "no speech detected" warning) yields no
/// batches.
pub fn parse_response(text: &str, modality: Modality) -> Result<Vec<Vec<EmotionScore>>> {
    let response: StreamResponse = serde_json::from_str(text)
        .map_err(|e| SphinxError::Transport(format!("malformed response: {e}")))?;

    if let Some(error) = response.error {
        return Err(SphinxError::Transport(format!(
            "{} model error: {error}",
            modality.model_key()
        )));
    }

    let section = match modality {
        Modality::Prosody => response.prosody,
        Modality::Language => response.language,
    };
    let Some(section) = section else {
        return Ok(Vec::new());
    };

    if let Some(warning) = &section.warning {
        tracing::warn!(modality = ?modality, warning = %warning, "emotion service warning");
    }

    let batches = section
        .predictions
        .into_iter()
        .map(|p| {
            p.emotions
                .into_iter()
                .map(|e| EmotionScore::new(e.name, e.score as f32))
                .collect::<Vec<_>>()
        })
        .filter(|batch| !batch.is_empty());

    Ok(match modality {
        Modality::Prosody => batches.collect(),
        // Passage granularity: the first prediction covers the whole text.
        Modality::Language => batches.take(1).collect(),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn audio_request_shape() {
        let json: serde_json::Value =
            serde_json::from_str(&audio_request("UklGRg==").unwrap()).unwrap();
        assert_eq!(json["data"], "UklGRg==");
        assert!(json["models"]["prosody"].is_object());
        assert!(json.get("raw_text").is_none());
        assert!(json["models"].get("language").is_none());
    }

    #[test]
    fn text_request_shape() {
        let json: serde_json::Value =
            serde_json::from_str(&text_request("I feel stuck").unwrap()).unwrap();
        assert_eq!(json["data"], "I feel stuck");
        assert_eq!(json["raw_text"], true);
        assert_eq!(json["models"]["language"]["granularity"], "passage");
    }

    #[test]
    fn prosody_response_keeps_every_prediction_in_order() {
        let raw = r#"{"prosody":{"predictions":[
            {"emotions":[{"name":"Joy","score":0.2},{"name":"Fear","score":0.1}]},
            {"emotions":[{"name":"Joy","score":0.8}]}
        ]}}"#;
        let batches = parse_response(raw, Modality::Prosody).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0][0].name, "Joy");
        assert!((batches[1][0].score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn language_response_uses_first_prediction() {
        let raw = r#"{"language":{"predictions":[
            {"emotions":[{"name":"Calm","score":0.4}]},
            {"emotions":[{"name":"Anger","score":0.9}]}
        ]}}"#;
        let batches = parse_response(raw, Modality::Language).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].name, "Calm");
    }

    #[test]
    fn service_error_is_transport() {
        let err = parse_response(r#"{"error":"rate limited"}"#, Modality::Prosody).unwrap_err();
        assert!(matches!(err, SphinxError::Transport(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn warning_without_predictions_yields_nothing() {
        let raw = r#"{"prosody":{"warning":"No speech detected.","code":"W0105"}}"#;
        assert!(parse_response(raw, Modality::Prosody).unwrap().is_empty());
    }

    #[test]
    fn other_model_section_is_ignored() {
        let raw = r#"{"language":{"predictions":[{"emotions":[{"name":"Joy","score":0.5}]}]}}"#;
        assert!(parse_response(raw, Modality::Prosody).unwrap().is_empty());
    }

    #[test]
    fn malformed_frame_is_transport() {
        assert!(matches!(
            parse_response("not json", Modality::Language),
            Err(SphinxError::Transport(_))
        ));
    }
}
