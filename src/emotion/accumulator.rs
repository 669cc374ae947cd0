//! Exponential-weighted accumulation and two-modality fusion.
//!
//! Within one utterance every prosody label keeps a running value updated
//! as `alpha * sample + (1 - alpha) * previous`; the first observation of a
//! label seeds the average. Once the utterance is complete, the smoothed
//! prosody list and the passage-level language list are fused:
//!
//! - both modalities non-zero: geometric mean `sqrt(p * l)`
//! - only one modality non-zero: that score times the single-source penalty
//!
//! Labels keep first-seen order throughout so that ranking ties are
//! resolved deterministically.

use super::{EmotionScore, sanitize_score};

/// Running exponential average of per-label scores for one utterance.
#[derive(Debug, Clone)]
pub struct EmotionAccumulator {
    alpha: f32,
    values: Vec<EmotionScore>,
    updates: u32,
}

impl EmotionAccumulator {
    /// Create an accumulator; `alpha` is clamped into `(0, 1]`.
    pub fn new(alpha: f32) -> Self {
        let alpha = if alpha.is_finite() && alpha > 0.0 {
            alpha.min(1.0)
        } else {
            1.0
        };
        Self {
            alpha,
            values: Vec::new(),
            updates: 0,
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Clear all running values (utterance boundary).
    pub fn reset(&mut self) {
        self.values.clear();
        self.updates = 0;
    }

    /// Fold one score batch into the running averages, in order.
    pub fn fold(&mut self, batch: &[EmotionScore]) {
        if batch.is_empty() {
            return;
        }
        self.updates += 1;
        for sample in batch {
            let score = sanitize_score(sample.score);
            match self.values.iter_mut().find(|v| v.name == sample.name) {
                Some(existing) => {
                    existing.score = self.alpha * score + (1.0 - self.alpha) * existing.score;
                }
                None => self.values.push(EmotionScore {
                    name: sample.name.clone(),
                    score,
                }),
            }
        }
    }

    /// Current running value for a label.
    pub fn value(&self, label: &str) -> Option<f32> {
        self.values
            .iter()
            .find(|v| v.name == label)
            .map(|v| v.score)
    }

    /// Number of non-empty batches folded since the last reset.
    pub fn update_count(&self) -> u32 {
        self.updates
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Canonical prosody list (first-seen order).
    pub fn snapshot(&self) -> Vec<EmotionScore> {
        self.values.clone()
    }
}

/// Fuse prosody and language scores into one combined list.
///
/// The union of labels is returned in first-seen order: prosody labels
/// first, then language-only labels.
pub fn fuse(
    prosody: &[EmotionScore],
    language: &[EmotionScore],
    single_source_penalty: f32,
) -> Vec<EmotionScore> {
    let mut labels: Vec<&str> = Vec::with_capacity(prosody.len() + language.len());
    for e in prosody.iter().chain(language.iter()) {
        if !labels.contains(&e.name.as_str()) {
            labels.push(&e.name);
        }
    }

    let lookup = |list: &[EmotionScore], label: &str| {
        list.iter()
            .find(|e| e.name == label)
            .map(|e| sanitize_score(e.score))
            .unwrap_or(0.0)
    };

    labels
        .into_iter()
        .map(|label| {
            let p = lookup(prosody, label);
            let l = lookup(language, label);
            let combined = match (p > 0.0, l > 0.0) {
                (true, true) => (p * l).sqrt(),
                (true, false) => p * single_source_penalty,
                (false, true) => l * single_source_penalty,
                (false, false) => 0.0,
            };
            EmotionScore {
                name: label.to_owned(),
                score: combined.clamp(0.0, 1.0),
            }
        })
        .collect()
}

/// Top `n` entries by descending score; ties keep first-seen order.
pub fn rank(combined: &[EmotionScore], n: usize) -> Vec<&EmotionScore> {
    let mut ranked: Vec<&EmotionScore> = combined.iter().collect();
    // `sort_by` is stable, so equal scores stay in input order.
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(n);
    ranked
}

/// Join labels as natural language: "A", "A and B", "A, B and C".
pub fn summarize<S: AsRef<str>>(labels: &[S]) -> String {
    match labels {
        [] => String::new(),
        [only] => only.as_ref().to_owned(),
        [init @ .., last] => {
            let head: Vec<&str> = init.iter().map(AsRef::as_ref).collect();
            format!("{} and {}", head.join(", "), last.as_ref())
        }
    }
}

/// Summary of the top `n` labels of a combined list.
pub fn summarize_top(combined: &[EmotionScore], n: usize) -> String {
    let names: Vec<&str> = rank(combined, n)
        .into_iter()
        .map(|e| e.name.as_str())
        .collect();
    summarize(&names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(pairs: &[(&str, f32)]) -> Vec<EmotionScore> {
        pairs.iter().map(|(n, s)| EmotionScore::new(*n, *s)).collect()
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn first_sample_seeds_average() {
        let mut acc = EmotionAccumulator::new(0.7);
        acc.fold(&scores(&[("Joy", 0.2)]));
        assert!(approx(acc.value("Joy").unwrap_or_default(), 0.2));
    }

    #[test]
    fn ema_follows_alpha_weighting() {
        let mut acc = EmotionAccumulator::new(0.7);
        acc.fold(&scores(&[("Joy", 0.2)]));
        acc.fold(&scores(&[("Joy", 0.8)]));
        assert!(approx(acc.value("Joy").unwrap_or_default(), 0.62));

        acc.fold(&scores(&[("Joy", 0.0)]));
        assert!(approx(acc.value("Joy").unwrap_or_default(), 0.3 * 0.62));
        assert_eq!(acc.update_count(), 3);
    }

    #[test]
    fn ema_is_order_sensitive() {
        let mut forward = EmotionAccumulator::new(0.7);
        forward.fold(&scores(&[("Fear", 0.1)]));
        forward.fold(&scores(&[("Fear", 0.9)]));

        let mut backward = EmotionAccumulator::new(0.7);
        backward.fold(&scores(&[("Fear", 0.9)]));
        backward.fold(&scores(&[("Fear", 0.1)]));

        assert!(forward.value("Fear") > backward.value("Fear"));
    }

    #[test]
    fn labels_tracked_independently_and_reset_clears() {
        let mut acc = EmotionAccumulator::new(0.7);
        acc.fold(&scores(&[("Joy", 0.5), ("Calm", 0.4)]));
        acc.fold(&scores(&[("Calm", 1.0)]));
        assert!(approx(acc.value("Joy").unwrap_or_default(), 0.5));
        assert!(approx(acc.value("Calm").unwrap_or_default(), 0.82));
        let names: Vec<String> = acc.snapshot().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["Joy", "Calm"]);

        acc.reset();
        assert!(acc.is_empty());
        assert_eq!(acc.update_count(), 0);
        assert!(acc.value("Joy").is_none());
    }

    #[test]
    fn empty_batch_is_not_an_update() {
        let mut acc = EmotionAccumulator::new(0.7);
        acc.fold(&[]);
        assert_eq!(acc.update_count(), 0);
    }

    #[test]
    fn fusion_of_equal_scores_is_identity() {
        for x in [0.0_f32, 0.1, 0.5, 0.93, 1.0] {
            let fused = fuse(&scores(&[("Awe", x)]), &scores(&[("Awe", x)]), 0.7);
            let expected = if x > 0.0 { x } else { 0.0 };
            assert!(approx(fused[0].score, expected), "x = {x}");
        }
    }

    #[test]
    fn fusion_stays_in_unit_interval() {
        let grid = [0.0_f32, 0.05, 0.3, 0.77, 1.0];
        for p in grid {
            for l in grid {
                let fused = fuse(&scores(&[("Joy", p)]), &scores(&[("Joy", l)]), 0.7);
                assert!((0.0..=1.0).contains(&fused[0].score), "p={p} l={l}");
            }
        }
    }

    #[test]
    fn single_source_is_penalized() {
        let fused = fuse(&scores(&[("Doubt", 0.6)]), &[], 0.7);
        assert!(approx(fused[0].score, 0.42));

        let fused = fuse(&[], &scores(&[("Doubt", 0.6)]), 0.7);
        assert!(approx(fused[0].score, 0.42));
    }

    #[test]
    fn zero_in_one_modality_counts_as_single_source() {
        let fused = fuse(&scores(&[("Joy", 0.0)]), &scores(&[("Joy", 0.5)]), 0.7);
        assert!(approx(fused[0].score, 0.35));
    }

    #[test]
    fn joy_calm_fear_scenario() {
        let prosody = scores(&[("Joy", 0.9), ("Fear", 0.1)]);
        let language = scores(&[("Joy", 0.5), ("Calm", 0.4)]);
        let combined = fuse(&prosody, &language, 0.7);

        let get = |label: &str| {
            combined
                .iter()
                .find(|e| e.name == label)
                .map(|e| e.score)
                .unwrap_or(-1.0)
        };
        assert!(approx(get("Joy"), 0.45_f32.sqrt()));
        assert!(approx(get("Fear"), 0.07));
        assert!(approx(get("Calm"), 0.28));
        assert_eq!(summarize_top(&combined, 3), "Joy, Calm and Fear");
    }

    #[test]
    fn ranking_ties_keep_first_seen_order() {
        let combined = scores(&[("B", 0.5), ("A", 0.5), ("C", 0.9), ("D", 0.5)]);
        let top: Vec<&str> = rank(&combined, 3).iter().map(|e| e.name.as_str()).collect();
        assert_eq!(top, vec!["C", "B", "A"]);
    }

    #[test]
    fn summary_joining() {
        assert_eq!(summarize::<&str>(&[]), "");
        assert_eq!(summarize(&["Joy"]), "Joy");
        assert_eq!(summarize(&["Joy", "Calm"]), "Joy and Calm");
        assert_eq!(summarize(&["Joy", "Calm", "Fear"]), "Joy, Calm and Fear");
    }

    #[test]
    fn summary_of_empty_combined_is_empty() {
        assert_eq!(summarize_top(&[], 3), "");
    }

    #[test]
    fn invalid_alpha_falls_back_to_latest_sample() {
        let acc = EmotionAccumulator::new(f32::NAN);
        assert_eq!(acc.alpha(), 1.0);
        let acc = EmotionAccumulator::new(3.0);
        assert_eq!(acc.alpha(), 1.0);
    }
}
