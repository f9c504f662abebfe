//! Core types shared across the synmotor workspace.
//!
//! The pipeline converts a high-level behavioral goal into a noisy,
//! latency-delayed grid movement under a depletable effort budget. Three
//! components advance once per simulation tick in a fixed order:
//! [`ExecutiveController`] (budget, working memory, behavioral rule),
//! [`PremotorDispatcher`] (macro expansion into timed commands), and
//! [`MotorExecutor`] (tremor, latency, proprioceptive fault detection).
//! [`CognitiveStack`] composes the three for the owning agent.

use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod executive;
mod motor;
mod premotor;
mod stack;

pub use executive::{BehaviorRule, ExecutiveController, MemoryTrace};
pub use motor::{MotorCommand, MotorExecutor, MotorFault};
pub use premotor::{
    CommandSink, MACRO_COMPLEX_EVADE, MACRO_FLEE_SPRINT, MACRO_FREEZE, MACRO_PRECISE_GRASP,
    MacroLibrary, MacroStep, PremotorDispatcher,
};
pub use stack::{CognitiveStack, StackInput, TickReport};

/// High level simulation clock (ticks processed since boot).
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Returns this tick advanced by `ticks`.
    #[must_use]
    pub const fn offset(self, ticks: u64) -> Self {
        Self(self.0 + ticks)
    }
}

/// Discrete grid cell occupied by the agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GridPosition {
    pub x: i32,
    pub y: i32,
}

impl GridPosition {
    /// Construct a new position.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Position reached by applying `step` to this cell.
    #[must_use]
    pub const fn stepped(self, step: GridStep) -> Self {
        Self {
            x: self.x + step.x,
            y: self.y + step.y,
        }
    }
}

/// Integer movement delta resolved by the motor layer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GridStep {
    pub x: i32,
    pub y: i32,
}

impl GridStep {
    /// Construct a new step.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The zero step (no movement).
    #[must_use]
    pub const fn zero() -> Self {
        Self { x: 0, y: 0 }
    }

    /// Whether both axes are zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.x == 0 && self.y == 0
    }
}

impl std::ops::Add for GridStep {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }
}

impl std::ops::AddAssign for GridStep {
    fn add_assign(&mut self, other: Self) {
        self.x += other.x;
        self.y += other.y;
    }
}

/// Ideal (pre-quantization) movement intent carried by a motor command.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct MotorVector {
    pub x: f32,
    pub y: f32,
}

impl MotorVector {
    /// Construct a new vector.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean length.
    #[must_use]
    pub fn length(self) -> f32 {
        self.x.hypot(self.y)
    }
}

/// Actuated body regions recognised by the motor layer.
///
/// The precision table may still lack an entry for a part; that is the
/// "unknown body part" case and falls back to mid-range precision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BodyPart {
    Face,
    Hands,
    Legs,
    Torso,
}

/// Errors surfaced while assembling the pipeline.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Static configuration for one cognitive stack.
///
/// All values are fixed at construction; components copy what they need and
/// never re-read a shared config at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Ceiling of the executive effort budget.
    pub max_effort: f32,
    /// Effort charged per unit of impulse strength when inhibiting.
    pub inhibit_cost: f32,
    /// Effort charged when encoding a new working-memory trace.
    pub memory_encode_cost: f32,
    /// Effort charged per retained memory trace per tick.
    pub memory_upkeep_cost: f32,
    /// Effort charged when switching the behavioral rule.
    pub rule_switch_cost: f32,
    /// Ticks without goal progress before a rule switch is attempted.
    pub stagnation_threshold: u32,
    /// Confidence lost by every memory trace each tick.
    pub base_decay: f32,
    /// Additional decay per unit of stress.
    pub stress_decay_weight: f32,
    /// Additional decay per unit of fatigue.
    pub fatigue_decay_weight: f32,
    /// Effort recovered on ticks where no macro is prepared.
    pub rest_recovery: f32,
    /// Minimum ticks between command dispatch and execution at zero stress.
    pub base_latency: u64,
    /// Ticks of forced immobility after a proprioceptive trip.
    pub trip_recovery_ticks: u32,
    /// Scales stress into tremor magnitude.
    pub tremor_gain: f32,
    /// Stress level at which complex macros collapse to a reflex.
    pub panic_threshold: f32,
    /// Cognitive load above which motor force degrades.
    pub clumsiness_threshold: f32,
    /// Force multiplier applied while clumsy.
    pub clumsiness_factor: f32,
    /// Stress level above which non-initial steps may fire early.
    pub flinch_threshold: f32,
    /// Scales stress into the per-step flinch probability.
    pub flinch_scale: f32,
    /// Observed peers performing a macro before it is mirrored.
    pub empathy_threshold: usize,
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_effort: 100.0,
            inhibit_cost: 5.0,
            memory_encode_cost: 1.0,
            memory_upkeep_cost: 0.5,
            rule_switch_cost: 15.0,
            stagnation_threshold: 50,
            base_decay: 0.05,
            stress_decay_weight: 0.1,
            fatigue_decay_weight: 0.1,
            rest_recovery: 1.0,
            base_latency: 2,
            trip_recovery_ticks: 2,
            tremor_gain: 1.5,
            panic_threshold: 0.9,
            clumsiness_threshold: 0.8,
            clumsiness_factor: 0.5,
            flinch_threshold: 0.7,
            flinch_scale: 0.5,
            empathy_threshold: 2,
            rng_seed: None,
        }
    }
}

impl PipelineConfig {
    /// Checks every invariant the components rely on.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.max_effort > 0.0) {
            return Err(PipelineError::InvalidConfig("max_effort must be positive"));
        }
        for (value, name) in [
            (self.inhibit_cost, "inhibit_cost must be non-negative"),
            (self.memory_encode_cost, "memory_encode_cost must be non-negative"),
            (self.memory_upkeep_cost, "memory_upkeep_cost must be non-negative"),
            (self.rule_switch_cost, "rule_switch_cost must be non-negative"),
            (self.base_decay, "base_decay must be non-negative"),
            (self.stress_decay_weight, "stress_decay_weight must be non-negative"),
            (
                self.fatigue_decay_weight,
                "fatigue_decay_weight must be non-negative",
            ),
            (self.rest_recovery, "rest_recovery must be non-negative"),
            (self.tremor_gain, "tremor_gain must be non-negative"),
        ] {
            if !(value >= 0.0) {
                return Err(PipelineError::InvalidConfig(name));
            }
        }
        for (value, name) in [
            (self.panic_threshold, "panic_threshold must be within [0, 1]"),
            (
                self.clumsiness_threshold,
                "clumsiness_threshold must be within [0, 1]",
            ),
            (self.clumsiness_factor, "clumsiness_factor must be within [0, 1]"),
            (self.flinch_threshold, "flinch_threshold must be within [0, 1]"),
            (self.flinch_scale, "flinch_scale must be within [0, 1]"),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::InvalidConfig(name));
            }
        }
        if self.stagnation_threshold == 0 {
            return Err(PipelineError::InvalidConfig(
                "stagnation_threshold must be at least 1",
            ));
        }
        if self.base_latency == 0 {
            return Err(PipelineError::InvalidConfig("base_latency must be at least 1"));
        }
        if self.trip_recovery_ticks == 0 {
            return Err(PipelineError::InvalidConfig(
                "trip_recovery_ticks must be at least 1",
            ));
        }
        if self.empathy_threshold == 0 {
            return Err(PipelineError::InvalidConfig(
                "empathy_threshold must be at least 1",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    pub(crate) fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(PipelineConfig::default().validate(), Ok(()));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let config = PipelineConfig {
            max_effort: 0.0,
            ..PipelineConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(PipelineError::InvalidConfig("max_effort must be positive"))
        );

        let config = PipelineConfig {
            base_latency: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            panic_threshold: 1.2,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn grid_step_arithmetic() {
        let mut net = GridStep::zero();
        assert!(net.is_zero());
        net += GridStep::new(1, -2);
        net += GridStep::new(-1, 1);
        assert_eq!(net, GridStep::new(0, -1));
        assert_eq!(
            GridPosition::new(4, 4).stepped(net),
            GridPosition::new(4, 3)
        );
    }

    #[test]
    fn config_round_trips_through_serde() {
        let config = PipelineConfig {
            rng_seed: Some(7),
            ..PipelineConfig::default()
        };
        let json = serde_json::to_string(&config).expect("serialize");
        let back: PipelineConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.rng_seed, Some(7));
        assert_eq!(back.base_latency, config.base_latency);
    }
}
