//! Executive control: effort budget, working memory, behavioral rules.

use rand::{Rng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::{PipelineConfig, Tick};

/// Behavioral rule currently steering the agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BehaviorRule {
    /// Seek food.
    #[default]
    Forage,
    /// Seek cover.
    Hide,
    /// Wander for new territory.
    Explore,
    /// Stuck: wanted to switch but could not afford it.
    Stagnant,
    /// Budget exhausted; impulses run unopposed.
    ImpulseDriven,
}

/// Rules eligible for a random switch. `Stagnant` and `ImpulseDriven` are
/// degenerate states, never switch targets.
const SWITCH_CANDIDATES: [BehaviorRule; 3] = [
    BehaviorRule::Forage,
    BehaviorRule::Hide,
    BehaviorRule::Explore,
];

/// One entry of the executive's working memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryTrace {
    /// Stored payload (opaque to the controller).
    pub value: String,
    /// Remaining confidence in (0, 1]; the trace is purged at or below zero.
    pub confidence: f32,
    /// Tick at which the trace was last encoded.
    pub recorded_tick: Tick,
}

/// Top layer of the pipeline: decides whether logic or impulse wins, holds a
/// decaying working memory, and tracks goal stagnation.
///
/// There is no error path anywhere in this type. Running out of effort is
/// not a fault; it shifts every operation into a cheaper degenerate mode
/// (impulses win, memory is lost, the rule machine locks up).
#[derive(Debug, Clone)]
pub struct ExecutiveController {
    config: PipelineConfig,
    effort_budget: f32,
    memory: HashMap<String, MemoryTrace>,
    stagnation_count: u32,
    current_rule: BehaviorRule,
    rng: SmallRng,
}

impl ExecutiveController {
    /// Construct a controller with a full budget and the default rule.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        let rng = config.seeded_rng();
        let effort_budget = config.max_effort;
        Self {
            config,
            effort_budget,
            memory: HashMap::new(),
            stagnation_count: 0,
            current_rule: BehaviorRule::default(),
            rng,
        }
    }

    /// Remaining effort. May dip below zero transiently under memory upkeep.
    #[must_use]
    pub fn effort_budget(&self) -> f32 {
        self.effort_budget
    }

    /// Whether the budget is exhausted and executive control has failed open.
    #[must_use]
    pub fn is_depleted(&self) -> bool {
        self.effort_budget <= 0.0
    }

    /// Fatigue in [0, 1]: 0 at a full budget, 1 at or below empty.
    #[must_use]
    pub fn fatigue_level(&self) -> f32 {
        1.0 - self.effort_budget.max(0.0) / self.config.max_effort
    }

    /// Rule selected by the most recent evaluation.
    #[must_use]
    pub fn current_rule(&self) -> BehaviorRule {
        self.current_rule
    }

    /// Ticks elapsed since the last goal progress or rule switch.
    #[must_use]
    pub fn stagnation_count(&self) -> u32 {
        self.stagnation_count
    }

    /// Look up a working-memory trace.
    #[must_use]
    pub fn recall(&self, key: &str) -> Option<&MemoryTrace> {
        self.memory.get(key)
    }

    /// Number of traces currently held.
    #[must_use]
    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    /// Advance the controller by one tick: decay memory, evaluate the rule,
    /// and wipe all memory if the budget ran out (a breakdown).
    pub fn tick(&mut self, current_tick: Tick, stress_level: f32, goal_achieved: bool) {
        self.decay_memory(stress_level);
        self.evaluate_rule(goal_achieved);

        if self.is_depleted() && !self.memory.is_empty() {
            warn!(
                tick = current_tick.0,
                traces = self.memory.len(),
                "effort budget exhausted; dropping all working memory"
            );
            self.memory.clear();
        }
    }

    /// The inhibition contract: decide whether the impulse or the override
    /// wins, paying effort proportional to the impulse strength.
    ///
    /// When depleted the impulse passes through for free. When the budget
    /// covers the effort, it is spent and the override wins. Otherwise the
    /// full remaining budget is burned and the impulse wins anyway; failed
    /// inhibition is not refunded.
    pub fn modulate<T>(&mut self, impulse: T, impulse_strength: f32, override_value: T) -> T {
        if self.is_depleted() {
            return impulse;
        }

        let effort = self.config.inhibit_cost * impulse_strength;
        if self.effort_budget >= effort {
            self.effort_budget -= effort;
            override_value
        } else {
            self.effort_budget = 0.0;
            impulse
        }
    }

    /// Encode or refresh a working-memory trace at full confidence.
    /// Ignored while depleted.
    pub fn remember(&mut self, key: impl Into<String>, value: impl Into<String>, current_tick: Tick) {
        if self.is_depleted() {
            return;
        }
        self.memory.insert(
            key.into(),
            MemoryTrace {
                value: value.into(),
                confidence: 1.0,
                recorded_tick: current_tick,
            },
        );
        self.effort_budget -= self.config.memory_encode_cost;
    }

    /// Apply one tick of confidence decay and upkeep cost to every trace.
    /// Traces reaching zero confidence are removed immediately.
    pub fn decay_memory(&mut self, stress_level: f32) {
        let rate = self.config.base_decay
            + stress_level * self.config.stress_decay_weight
            + self.fatigue_level() * self.config.fatigue_decay_weight;

        for trace in self.memory.values_mut() {
            trace.confidence -= rate;
            self.effort_budget -= self.config.memory_upkeep_cost;
        }
        self.memory.retain(|_, trace| trace.confidence > 0.0);
    }

    /// Track goal stagnation and switch strategy when it persists.
    ///
    /// Depletion forces `ImpulseDriven`. Reaching the stagnation threshold
    /// with enough budget pays for a uniformly random switch to a different
    /// candidate rule; without the budget the rule degrades to `Stagnant`
    /// and the counter keeps pressing until resources recover.
    pub fn evaluate_rule(&mut self, goal_achieved: bool) -> BehaviorRule {
        if self.is_depleted() {
            self.current_rule = BehaviorRule::ImpulseDriven;
            return self.current_rule;
        }

        if goal_achieved {
            self.stagnation_count = 0;
        } else {
            self.stagnation_count += 1;
        }

        if self.stagnation_count >= self.config.stagnation_threshold {
            if self.effort_budget >= self.config.rule_switch_cost {
                self.effort_budget -= self.config.rule_switch_cost;
                self.stagnation_count = 0;
                let previous = self.current_rule;
                self.current_rule = self.pick_new_rule();
                debug!(?previous, next = ?self.current_rule, "stagnation rule switch");
            } else {
                self.current_rule = BehaviorRule::Stagnant;
            }
        }

        self.current_rule
    }

    /// Restore effort, clamped to the configured ceiling. The only recovery
    /// path; driven on ticks where the agent is otherwise idle.
    pub fn rest(&mut self, amount: f32) {
        self.effort_budget = (self.effort_budget + amount).min(self.config.max_effort);
    }

    fn pick_new_rule(&mut self) -> BehaviorRule {
        let current = self.current_rule;
        let candidates: Vec<BehaviorRule> = SWITCH_CANDIDATES
            .into_iter()
            .filter(|rule| *rule != current)
            .collect();
        candidates[self.rng.random_range(0..candidates.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(seed: u64) -> ExecutiveController {
        ExecutiveController::new(PipelineConfig {
            rng_seed: Some(seed),
            ..PipelineConfig::default()
        })
    }

    #[test]
    fn successful_inhibition_charges_exact_effort() {
        let mut pfc = controller(1);
        let action = pfc.modulate("RUN", 10.0, "HESITATE");
        assert_eq!(action, "HESITATE");
        assert_eq!(pfc.effort_budget(), 50.0);
    }

    #[test]
    fn failed_inhibition_burns_remaining_budget() {
        let mut pfc = controller(2);
        // Two strength-10 impulses cost 50 each; the third cannot be paid.
        assert_eq!(pfc.modulate("RUN", 10.0, "HOLD"), "HOLD");
        assert_eq!(pfc.modulate("RUN", 10.0, "HOLD"), "HOLD");
        assert_eq!(pfc.effort_budget(), 0.0);
        assert!(pfc.is_depleted());

        // Depleted: impulse passes for free.
        assert_eq!(pfc.modulate("RUN", 1.0, "HOLD"), "RUN");
        assert_eq!(pfc.effort_budget(), 0.0);
    }

    #[test]
    fn partial_budget_is_consumed_on_failure() {
        let mut pfc = controller(3);
        assert_eq!(pfc.modulate("RUN", 19.0, "HOLD"), "HOLD");
        assert!(pfc.effort_budget() > 0.0);
        // Costs 50 but only 5 remain: impulse wins, budget pinned to zero.
        assert_eq!(pfc.modulate("RUN", 10.0, "HOLD"), "RUN");
        assert_eq!(pfc.effort_budget(), 0.0);
    }

    #[test]
    fn fatigue_tracks_budget_bounds() {
        let mut pfc = controller(4);
        assert_eq!(pfc.fatigue_level(), 0.0);
        pfc.modulate("A", 10.0, "B");
        let fatigue = pfc.fatigue_level();
        assert!(fatigue > 0.0 && fatigue < 1.0);
        pfc.modulate("A", 20.0, "B");
        assert_eq!(pfc.fatigue_level(), 1.0);
        pfc.rest(1_000.0);
        assert_eq!(pfc.fatigue_level(), 0.0);
        assert_eq!(pfc.effort_budget(), 100.0);
    }

    #[test]
    fn memory_decays_and_purges() {
        let mut pfc = controller(5);
        pfc.remember("THREAT_AT", "(14, 22)", Tick(0));
        assert_eq!(pfc.effort_budget(), 99.0);
        let initial = pfc.recall("THREAT_AT").expect("trace").confidence;
        assert_eq!(initial, 1.0);

        let mut last = initial;
        let mut survived = 0u32;
        for tick in 1..=40 {
            pfc.tick(Tick(tick), 0.8, false);
            match pfc.recall("THREAT_AT") {
                Some(trace) => {
                    assert!(trace.confidence < last, "confidence must strictly decrease");
                    last = trace.confidence;
                    survived += 1;
                }
                None => break,
            }
        }
        // decay ≥ 0.13/tick under stress 0.8, so the trace is gone well
        // before the loop runs out.
        assert!(survived < 10);
        assert_eq!(pfc.memory_len(), 0);
    }

    #[test]
    fn remember_is_ignored_while_depleted() {
        let mut pfc = controller(6);
        pfc.modulate("A", 20.0, "B");
        assert!(pfc.is_depleted());
        pfc.remember("KEY", "VALUE", Tick(3));
        assert_eq!(pfc.memory_len(), 0);
    }

    #[test]
    fn breakdown_wipes_memory() {
        let mut pfc = controller(7);
        pfc.remember("A", "1", Tick(0));
        pfc.remember("B", "2", Tick(0));
        assert_eq!(pfc.memory_len(), 2);
        pfc.modulate("X", 20.0, "Y");
        assert!(pfc.is_depleted());
        pfc.tick(Tick(1), 0.0, false);
        assert_eq!(pfc.memory_len(), 0);
    }

    #[test]
    fn stagnation_switches_rule_when_affordable() {
        let mut pfc = controller(8);
        assert_eq!(pfc.current_rule(), BehaviorRule::Forage);
        for _ in 0..49 {
            assert_eq!(pfc.evaluate_rule(false), BehaviorRule::Forage);
        }
        let rule = pfc.evaluate_rule(false);
        assert_ne!(rule, BehaviorRule::Forage);
        assert!(matches!(rule, BehaviorRule::Hide | BehaviorRule::Explore));
        assert_eq!(pfc.stagnation_count(), 0);
        assert_eq!(pfc.effort_budget(), 85.0);
    }

    #[test]
    fn stagnation_without_budget_sticks() {
        let mut pfc = controller(9);
        pfc.modulate("A", 18.0, "B");
        assert_eq!(pfc.effort_budget(), 10.0);
        for _ in 0..50 {
            pfc.evaluate_rule(false);
        }
        assert_eq!(pfc.current_rule(), BehaviorRule::Stagnant);
        // Counter keeps pressing: next evaluation is stuck again.
        let count = pfc.stagnation_count();
        assert!(count >= 50);
        assert_eq!(pfc.evaluate_rule(false), BehaviorRule::Stagnant);
        assert_eq!(pfc.stagnation_count(), count + 1);

        // After recovery the switch finally goes through.
        pfc.rest(50.0);
        let rule = pfc.evaluate_rule(false);
        assert!(matches!(rule, BehaviorRule::Forage | BehaviorRule::Hide | BehaviorRule::Explore));
        assert_ne!(rule, BehaviorRule::Stagnant);
        assert_eq!(pfc.stagnation_count(), 0);
    }

    #[test]
    fn depletion_forces_impulse_driven_rule() {
        let mut pfc = controller(10);
        pfc.modulate("A", 20.0, "B");
        assert_eq!(pfc.evaluate_rule(true), BehaviorRule::ImpulseDriven);
    }

    #[test]
    fn goal_progress_resets_stagnation() {
        let mut pfc = controller(11);
        for _ in 0..30 {
            pfc.evaluate_rule(false);
        }
        assert_eq!(pfc.stagnation_count(), 30);
        pfc.evaluate_rule(true);
        assert_eq!(pfc.stagnation_count(), 0);
        assert_eq!(pfc.current_rule(), BehaviorRule::Forage);
    }
}
