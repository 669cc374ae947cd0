//! Streaming emotion inference and per-utterance fusion.
//!
//! Audio segments and transcripts of one utterance are scored by two
//! independent modalities (voice prosody and language). The
//! [`accumulator`] smooths prosody scores across segments and fuses both
//! modalities into one ranked summary. The [`observer`] runs that pipeline
//! as a background task and publishes [`EmotionSnapshot`]s that the flow
//! engine waits on through an [`EmotionGate`].

pub mod accumulator;
pub mod client;
pub mod observer;
pub mod protocol;
pub mod wav;

use serde::{Deserialize, Serialize};

pub use accumulator::{EmotionAccumulator, fuse, rank, summarize};
pub use client::{EmotionModel, EmotionStreamClient};
pub use observer::{EmotionGate, EmotionObserver, EmotionObserverHandle, GateOutcome};

/// One labelled emotion score in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionScore {
    pub name: String,
    pub score: f32,
}

impl EmotionScore {
    pub fn new(name: impl Into<String>, score: f32) -> Self {
        Self {
            name: name.into(),
            score: sanitize_score(score),
        }
    }
}

/// Clamp a raw service score into `0.0..=1.0`; NaN becomes 0.
pub(crate) fn sanitize_score(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Independent source of emotion scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Voice prosody scored from raw audio segments.
    Prosody,
    /// Linguistic emotion scored from the transcribed passage.
    Language,
}

impl Modality {
    /// Model key used on the wire.
    pub fn model_key(self) -> &'static str {
        match self {
            Self::Prosody => "prosody",
            Self::Language => "language",
        }
    }
}

/// Most recent emotion state of the current utterance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmotionSnapshot {
    /// Utterance this snapshot belongs to (0 before any speech).
    pub utterance: u64,
    /// Smoothed prosody scores (first-seen label order).
    pub prosody: Vec<EmotionScore>,
    /// Passage-level language scores.
    pub language: Vec<EmotionScore>,
    /// Fused scores; `None` until fusion has run for this utterance.
    pub combined: Option<Vec<EmotionScore>>,
    /// Human-readable top labels, e.g. "Joy, Calm and Fear".
    pub summary: String,
    /// Set only once fusion for this utterance completed.
    pub fully_processed: bool,
    /// Fusion ran without the second modality because its wait expired.
    pub partial: bool,
}

impl EmotionSnapshot {
    /// Fresh, not-yet-processed snapshot for a new utterance.
    pub fn started(utterance: u64) -> Self {
        Self {
            utterance,
            ..Self::default()
        }
    }

    /// Snapshot that is already complete with no scores, used when emotion
    /// inference is disabled.
    pub fn ready_empty() -> Self {
        Self {
            combined: Some(Vec::new()),
            fully_processed: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_are_clamped() {
        assert_eq!(EmotionScore::new("Joy", 1.4).score, 1.0);
        assert_eq!(EmotionScore::new("Joy", -0.2).score, 0.0);
        assert_eq!(EmotionScore::new("Joy", f32::NAN).score, 0.0);
    }

    #[test]
    fn started_snapshot_is_not_processed() {
        let snap = EmotionSnapshot::started(4);
        assert_eq!(snap.utterance, 4);
        assert!(!snap.fully_processed);
        assert!(snap.combined.is_none());
    }
}
