// =============================================================================
// Signal Merger — weighted vote across the four decision layers
// =============================================================================
//
// Each available layer casts a vote with a confidence:
//   strategy  allowed → its direction, denied → WAIT
//   fusion    its direction, confidence = strength
//   timing    fire → endorses the leading direction, hold → WAIT
//   shield    DEFENSIVE → WAIT, otherwise endorses the leading direction
//
// "Endorse" resolves to whichever of LONG/SHORT carries more explicit weight,
// or WAIT when neither leads. Weights of missing layers are redistributed
// proportionally over the layers that are present.
//
// The merged direction is the weighted plurality; any tie at the top
// resolves to WAIT. Confidence is the weighted mean of layer confidences,
// scaled by the fraction of layers agreeing with the merged direction.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::fusion::layers::LayerSnapshot;
use crate::types::{Direction, ShieldState};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Layer {
    Strategy,
    Fusion,
    Timing,
    Shield,
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strategy => write!(f, "STRATEGY"),
            Self::Fusion => write!(f, "FUSION"),
            Self::Timing => write!(f, "TIMING"),
            Self::Shield => write!(f, "SHIELD"),
        }
    }
}

/// Per-layer weights. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergeWeights {
    pub strategy: f64,
    pub fusion: f64,
    pub timing: f64,
    pub shield: f64,
}

impl Default for MergeWeights {
    fn default() -> Self {
        Self {
            strategy: 0.35,
            fusion: 0.30,
            timing: 0.25,
            shield: 0.10,
        }
    }
}

impl MergeWeights {
    pub fn get(&self, layer: Layer) -> f64 {
        match layer {
            Layer::Strategy => self.strategy,
            Layer::Fusion => self.fusion,
            Layer::Timing => self.timing,
            Layer::Shield => self.shield,
        }
    }

    fn set(&mut self, layer: Layer, w: f64) {
        match layer {
            Layer::Strategy => self.strategy = w,
            Layer::Fusion => self.fusion = w,
            Layer::Timing => self.timing = w,
            Layer::Shield => self.shield = w,
        }
    }

    pub fn sum(&self) -> f64 {
        self.strategy + self.fusion + self.timing + self.shield
    }

    pub fn validate(&self) -> CoreResult<()> {
        let all = [self.strategy, self.fusion, self.timing, self.shield];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(CoreError::InvalidWeights(format!(
                "weights must be finite and non-negative: {self:?}"
            )));
        }
        if (self.sum() - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(CoreError::InvalidWeights(format!(
                "weights sum to {:.6}, expected 1.0",
                self.sum()
            )));
        }
        Ok(())
    }
}

/// What a layer voted for, before endorsement is resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
enum RawVote {
    Explicit(Direction),
    Endorse,
}

/// One layer's resolved contribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerVote {
    pub layer: Layer,
    pub vote: Direction,
    pub confidence: f64,
    /// Effective (redistributed) weight.
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alignment {
    /// Per-layer agreement with the merged direction. None when the layer
    /// was unavailable.
    pub strategy: Option<bool>,
    pub fusion: Option<bool>,
    pub timing: Option<bool>,
    pub shield: Option<bool>,
    /// Percentage (0–100) of available layers agreeing.
    pub overall_alignment: f64,
}

/// A pair of layers that voted differently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConflict {
    pub first: Layer,
    pub second: Layer,
    pub first_vote: Direction,
    pub second_vote: Direction,
}

impl std::fmt::Display for LayerConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} vs {} {}",
            self.first, self.first_vote, self.second, self.second_vote
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMergeData {
    pub final_signal: Direction,
    /// 0–100.
    pub confidence: f64,
    /// Effective weights after redistribution (0 for missing layers).
    pub weights: MergeWeights,
    pub alignment: Alignment,
    pub conflicts: Vec<LayerConflict>,
    pub votes: Vec<LayerVote>,
}

#[derive(Debug, Clone)]
pub struct SignalMerger {
    weights: MergeWeights,
}

impl SignalMerger {
    pub fn new(weights: MergeWeights) -> CoreResult<Self> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> MergeWeights {
        self.weights
    }

    /// Merge the current layer outputs. Fails only when no layer is loaded.
    pub fn merge(&self, layers: &LayerSnapshot) -> CoreResult<SignalMergeData> {
        let raw = raw_votes(layers);
        if raw.is_empty() {
            return Err(CoreError::MissingUpstreamLayer(
                "no decision layer available".into(),
            ));
        }

        // ── Redistribute weights over available layers ──────────────────
        let available_weight: f64 = raw.iter().map(|(l, _, _)| self.weights.get(*l)).sum();
        let mut effective = MergeWeights {
            strategy: 0.0,
            fusion: 0.0,
            timing: 0.0,
            shield: 0.0,
        };
        for (layer, _, _) in &raw {
            let w = if available_weight > 0.0 {
                self.weights.get(*layer) / available_weight
            } else {
                // All present layers carry zero weight: treat them equally.
                1.0 / raw.len() as f64
            };
            effective.set(*layer, w);
        }

        // ── Resolve endorsements against the explicit directional lead ──
        let mut long_w = 0.0;
        let mut short_w = 0.0;
        for (layer, vote, _) in &raw {
            match vote {
                RawVote::Explicit(Direction::Long) => long_w += effective.get(*layer),
                RawVote::Explicit(Direction::Short) => short_w += effective.get(*layer),
                _ => {}
            }
        }
        let lead = leading_direction(long_w, short_w);

        let votes: Vec<LayerVote> = raw
            .iter()
            .map(|(layer, vote, confidence)| LayerVote {
                layer: *layer,
                vote: match vote {
                    RawVote::Explicit(d) => *d,
                    RawVote::Endorse => lead,
                },
                confidence: *confidence,
                weight: effective.get(*layer),
            })
            .collect();

        // ── Weighted plurality ──────────────────────────────────────────
        let tally = |d: Direction| -> f64 {
            votes.iter().filter(|v| v.vote == d).map(|v| v.weight).sum()
        };
        let final_signal = plurality(tally(Direction::Long), tally(Direction::Short), tally(Direction::Wait));

        // ── Confidence, alignment, conflicts ────────────────────────────
        let weighted_conf: f64 = votes.iter().map(|v| v.weight * v.confidence).sum();
        let agreeing = votes.iter().filter(|v| v.vote == final_signal).count();
        let agree_frac = agreeing as f64 / votes.len() as f64;
        let confidence = (weighted_conf * agree_frac).clamp(0.0, 100.0);

        let agrees = |layer: Layer| -> Option<bool> {
            votes
                .iter()
                .find(|v| v.layer == layer)
                .map(|v| v.vote == final_signal)
        };
        let alignment = Alignment {
            strategy: agrees(Layer::Strategy),
            fusion: agrees(Layer::Fusion),
            timing: agrees(Layer::Timing),
            shield: agrees(Layer::Shield),
            overall_alignment: agree_frac * 100.0,
        };

        let mut conflicts = Vec::new();
        for (i, a) in votes.iter().enumerate() {
            for b in votes.iter().skip(i + 1) {
                if a.vote != b.vote {
                    conflicts.push(LayerConflict {
                        first: a.layer,
                        second: b.layer,
                        first_vote: a.vote,
                        second_vote: b.vote,
                    });
                }
            }
        }

        debug!(
            final_signal = %final_signal,
            confidence,
            alignment = alignment.overall_alignment,
            conflicts = conflicts.len(),
            layers = votes.len(),
            "layers merged"
        );

        Ok(SignalMergeData {
            final_signal,
            confidence,
            weights: effective,
            alignment,
            conflicts,
            votes,
        })
    }
}

impl Default for SignalMerger {
    fn default() -> Self {
        Self {
            weights: MergeWeights::default(),
        }
    }
}

/// Available layers in fixed order, with their raw vote and confidence.
fn raw_votes(layers: &LayerSnapshot) -> Vec<(Layer, RawVote, f64)> {
    let mut out = Vec::with_capacity(4);

    if let Some(s) = layers.strategy {
        let vote = if s.allowed {
            RawVote::Explicit(s.direction)
        } else {
            RawVote::Explicit(Direction::Wait)
        };
        out.push((Layer::Strategy, vote, pct(s.confidence)));
    }
    if let Some(f) = layers.fusion {
        out.push((Layer::Fusion, RawVote::Explicit(f.direction), pct(f.strength)));
    }
    if let Some(t) = layers.timing {
        let score = pct(t.score);
        if t.fire {
            out.push((Layer::Timing, RawVote::Endorse, score));
        } else {
            out.push((Layer::Timing, RawVote::Explicit(Direction::Wait), 100.0 - score));
        }
    }
    if let Some(shield) = layers.shield {
        let (vote, confidence) = match shield {
            ShieldState::Defensive => (RawVote::Explicit(Direction::Wait), 100.0),
            ShieldState::Protective => (RawVote::Endorse, 50.0),
            ShieldState::AggroObs => (RawVote::Endorse, 75.0),
            ShieldState::Calm => (RawVote::Endorse, 100.0),
        };
        out.push((Layer::Shield, vote, confidence));
    }

    out
}

fn pct(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn leading_direction(long_w: f64, short_w: f64) -> Direction {
    if long_w > short_w + f64::EPSILON {
        Direction::Long
    } else if short_w > long_w + f64::EPSILON {
        Direction::Short
    } else {
        Direction::Wait
    }
}

fn plurality(long_w: f64, short_w: f64, wait_w: f64) -> Direction {
    let eps = 1e-9;
    if long_w > short_w + eps && long_w > wait_w + eps {
        Direction::Long
    } else if short_w > long_w + eps && short_w > wait_w + eps {
        Direction::Short
    } else {
        Direction::Wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::layers::{FusionScore, StrategyDecision, TimingScore};

    fn all_long() -> LayerSnapshot {
        LayerSnapshot {
            strategy: Some(StrategyDecision { direction: Direction::Long, allowed: true, confidence: 80.0 }),
            fusion: Some(FusionScore { direction: Direction::Long, strength: 70.0 }),
            timing: Some(TimingScore { fire: true, score: 90.0 }),
            shield: Some(ShieldState::Calm),
        }
    }

    #[test]
    fn full_agreement_is_weighted_mean() {
        let m = SignalMerger::default().merge(&all_long()).unwrap();
        assert_eq!(m.final_signal, Direction::Long);
        // 0.35*80 + 0.30*70 + 0.25*90 + 0.10*100 = 81.5
        assert!((m.confidence - 81.5).abs() < 1e-9);
        assert!((m.alignment.overall_alignment - 100.0).abs() < 1e-9);
        assert!(m.conflicts.is_empty());
    }

    #[test]
    fn disagreement_scales_confidence_and_lists_pairs() {
        let mut layers = all_long();
        layers.fusion = Some(FusionScore { direction: Direction::Short, strength: 70.0 });
        let m = SignalMerger::default().merge(&layers).unwrap();

        // Long: strategy .35 + timing .25 + shield .10 = .70 vs Short .30
        assert_eq!(m.final_signal, Direction::Long);
        assert!((m.alignment.overall_alignment - 75.0).abs() < 1e-9);
        assert_eq!(m.alignment.fusion, Some(false));
        assert_eq!(m.conflicts.len(), 3);
        assert!((m.confidence - 81.5 * 0.75).abs() < 1e-9);
    }

    #[test]
    fn missing_layer_weight_is_redistributed() {
        let mut layers = all_long();
        layers.shield = None;
        let m = SignalMerger::default().merge(&layers).unwrap();
        assert_eq!(m.alignment.shield, None);
        assert_eq!(m.weights.shield, 0.0);
        assert!((m.weights.sum() - 1.0).abs() < 1e-9);
        assert!((m.weights.strategy - 0.35 / 0.90).abs() < 1e-9);
    }

    #[test]
    fn missing_layer_is_not_counted_as_agreement() {
        let layers = LayerSnapshot {
            strategy: Some(StrategyDecision { direction: Direction::Long, allowed: true, confidence: 60.0 }),
            fusion: Some(FusionScore { direction: Direction::Short, strength: 60.0 }),
            timing: None,
            shield: None,
        };
        let m = SignalMerger::default().merge(&layers).unwrap();
        // 0.35/0.65 long vs 0.30/0.65 short: long leads, half the layers agree.
        assert_eq!(m.final_signal, Direction::Long);
        assert!((m.alignment.overall_alignment - 50.0).abs() < 1e-9);
    }

    #[test]
    fn defensive_shield_and_denied_strategy_wait() {
        let layers = LayerSnapshot {
            strategy: Some(StrategyDecision { direction: Direction::Long, allowed: false, confidence: 90.0 }),
            fusion: Some(FusionScore { direction: Direction::Long, strength: 80.0 }),
            timing: Some(TimingScore { fire: false, score: 30.0 }),
            shield: Some(ShieldState::Defensive),
        };
        let m = SignalMerger::default().merge(&layers).unwrap();
        assert_eq!(m.final_signal, Direction::Wait);
    }

    #[test]
    fn long_short_tie_resolves_to_wait() {
        let weights = MergeWeights { strategy: 0.5, fusion: 0.5, timing: 0.0, shield: 0.0 };
        let merger = SignalMerger::new(weights).unwrap();
        let layers = LayerSnapshot {
            strategy: Some(StrategyDecision { direction: Direction::Long, allowed: true, confidence: 50.0 }),
            fusion: Some(FusionScore { direction: Direction::Short, strength: 50.0 }),
            timing: None,
            shield: None,
        };
        let m = merger.merge(&layers).unwrap();
        assert_eq!(m.final_signal, Direction::Wait);
        assert_eq!(m.alignment.overall_alignment, 0.0);
        assert_eq!(m.confidence, 0.0);
    }

    #[test]
    fn no_layers_is_an_error() {
        let err = SignalMerger::default().merge(&LayerSnapshot::default()).unwrap_err();
        assert!(matches!(err, CoreError::MissingUpstreamLayer(_)));
    }

    #[test]
    fn weights_must_sum_to_one() {
        let bad = MergeWeights { strategy: 0.5, fusion: 0.5, timing: 0.5, shield: 0.0 };
        assert!(matches!(SignalMerger::new(bad), Err(CoreError::InvalidWeights(_))));
        let negative = MergeWeights { strategy: 1.2, fusion: -0.2, timing: 0.0, shield: 0.0 };
        assert!(SignalMerger::new(negative).is_err());
        assert!(MergeWeights::default().validate().is_ok());
    }
}
