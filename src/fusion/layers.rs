// =============================================================================
// Decision Layers — latest snapshot of each independent upstream layer
// =============================================================================
//
// Four layers feed the merger: strategy, fusion score, timing and shield.
// The core only ever reads the current value of each. Any of them may be
// absent; absence is explicit (None) and never treated as agreement.
// =============================================================================

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::{Direction, ShieldState};

/// Directional strategy decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyDecision {
    pub direction: Direction,
    /// Whether the strategy permits acting on its direction at all.
    pub allowed: bool,
    /// 0–100.
    pub confidence: f64,
}

/// Fused indicator score: a direction plus its strength.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionScore {
    pub direction: Direction,
    /// 0–100.
    pub strength: f64,
}

/// Entry-authorization timing verdict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingScore {
    pub fire: bool,
    /// 0–100 readiness.
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerSnapshot {
    #[serde(default)]
    pub strategy: Option<StrategyDecision>,
    #[serde(default)]
    pub fusion: Option<FusionScore>,
    #[serde(default)]
    pub timing: Option<TimingScore>,
    #[serde(default)]
    pub shield: Option<ShieldState>,
}

impl LayerSnapshot {
    pub fn is_empty(&self) -> bool {
        self.strategy.is_none()
            && self.fusion.is_none()
            && self.timing.is_none()
            && self.shield.is_none()
    }

    /// Overlay the layers present in `update`, keeping the others.
    pub fn apply(&mut self, update: LayerSnapshot) {
        if update.strategy.is_some() {
            self.strategy = update.strategy;
        }
        if update.fusion.is_some() {
            self.fusion = update.fusion;
        }
        if update.timing.is_some() {
            self.timing = update.timing;
        }
        if update.shield.is_some() {
            self.shield = update.shield;
        }
    }
}

/// Read accessors for the latest layer outputs.
pub trait LayerSource: Send + Sync {
    fn strategy(&self) -> Option<StrategyDecision>;
    fn fusion(&self) -> Option<FusionScore>;
    fn timing(&self) -> Option<TimingScore>;
    fn shield(&self) -> Option<ShieldState>;

    fn snapshot(&self) -> LayerSnapshot {
        LayerSnapshot {
            strategy: self.strategy(),
            fusion: self.fusion(),
            timing: self.timing(),
            shield: self.shield(),
        }
    }
}

/// In-process layer holder written by upstream producers.
#[derive(Debug, Default)]
pub struct LayerStore {
    inner: RwLock<LayerSnapshot>,
}

impl LayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, update: LayerSnapshot) {
        self.inner.write().apply(update);
    }

    pub fn set_strategy(&self, v: StrategyDecision) {
        self.inner.write().strategy = Some(v);
    }

    pub fn set_fusion(&self, v: FusionScore) {
        self.inner.write().fusion = Some(v);
    }

    pub fn set_timing(&self, v: TimingScore) {
        self.inner.write().timing = Some(v);
    }

    pub fn set_shield(&self, v: ShieldState) {
        self.inner.write().shield = Some(v);
    }

    pub fn clear(&self) {
        *self.inner.write() = LayerSnapshot::default();
    }
}

impl LayerSource for LayerStore {
    fn strategy(&self) -> Option<StrategyDecision> {
        self.inner.read().strategy
    }

    fn fusion(&self) -> Option<FusionScore> {
        self.inner.read().fusion
    }

    fn timing(&self) -> Option<TimingScore> {
        self.inner.read().timing
    }

    fn shield(&self) -> Option<ShieldState> {
        self.inner.read().shield
    }

    // One read lock, so the four layers come from the same moment.
    fn snapshot(&self) -> LayerSnapshot {
        *self.inner.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_update_keeps_other_layers() {
        let store = LayerStore::new();
        store.set_shield(ShieldState::Protective);
        store.update(LayerSnapshot {
            timing: Some(TimingScore { fire: true, score: 72.0 }),
            ..Default::default()
        });
        let snap = store.snapshot();
        assert_eq!(snap.shield, Some(ShieldState::Protective));
        assert_eq!(snap.timing.map(|t| t.fire), Some(true));
        assert!(snap.strategy.is_none());
    }

    #[test]
    fn empty_until_loaded() {
        let store = LayerStore::new();
        assert!(store.snapshot().is_empty());
        store.set_fusion(FusionScore { direction: Direction::Long, strength: 60.0 });
        assert!(!store.snapshot().is_empty());
        store.clear();
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn snapshot_deserialises_partial_json() {
        let snap: LayerSnapshot =
            serde_json::from_str(r#"{ "shield": "CALM", "fusion": { "direction": "SHORT", "strength": 40 } }"#)
                .unwrap();
        assert_eq!(snap.shield, Some(ShieldState::Calm));
        assert_eq!(snap.fusion.map(|f| f.direction), Some(Direction::Short));
        assert!(snap.timing.is_none());
    }
}
