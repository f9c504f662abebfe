//! Premotor dispatch: macro expansion into timed motor commands.

use rand::{Rng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

use crate::{BodyPart, MotorVector, PipelineConfig, Tick};

/// Hardwired reflex: stop every moving part.
pub const MACRO_FREEZE: &str = "FREEZE";
/// Hardwired reflex: sprint away along -y.
pub const MACRO_FLEE_SPRINT: &str = "FLEE_SPRINT";
/// Multi-part evasive maneuver.
pub const MACRO_COMPLEX_EVADE: &str = "COMPLEX_EVADE";
/// Fine hand movement at low force.
pub const MACRO_PRECISE_GRASP: &str = "PRECISE_GRASP";

/// Macros that survive extreme stress. Everything else collapses to
/// [`MACRO_FREEZE`] once stress crosses the panic threshold.
const REFLEX_MACROS: [&str; 2] = [MACRO_FREEZE, MACRO_FLEE_SPRINT];

/// One timed step of a macro sequence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MacroStep {
    /// Ticks after macro start at which this step nominally fires.
    pub tick_offset: u64,
    /// Body part executing the step.
    pub body_part: BodyPart,
    /// Ideal movement vector before noise and quantization.
    pub target: MotorVector,
    /// Force multiplier in [0, 1].
    pub force: f32,
}

impl MacroStep {
    /// Construct a step.
    #[must_use]
    pub const fn new(tick_offset: u64, body_part: BodyPart, target: MotorVector, force: f32) -> Self {
        Self {
            tick_offset,
            body_part,
            target,
            force,
        }
    }
}

type MacroSequence = SmallVec<[MacroStep; 4]>;

/// Named, immutable library of macro sequences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroLibrary {
    macros: HashMap<String, MacroSequence>,
}

impl Default for MacroLibrary {
    fn default() -> Self {
        use BodyPart::{Hands, Legs, Torso};
        let hold = MotorVector::new(0.0, 0.0);
        Self::empty()
            .with_macro(
                MACRO_FREEZE,
                [
                    MacroStep::new(0, Legs, hold, 0.0),
                    MacroStep::new(0, Torso, hold, 0.0),
                ],
            )
            .with_macro(
                MACRO_FLEE_SPRINT,
                [
                    MacroStep::new(0, Legs, MotorVector::new(0.0, -1.0), 1.0),
                    MacroStep::new(1, Legs, MotorVector::new(0.0, -1.0), 1.0),
                    MacroStep::new(2, Legs, MotorVector::new(0.0, -1.0), 1.0),
                ],
            )
            .with_macro(
                MACRO_COMPLEX_EVADE,
                [
                    MacroStep::new(0, Legs, MotorVector::new(-1.0, -1.0), 0.8),
                    MacroStep::new(1, Torso, MotorVector::new(1.0, 0.0), 0.5),
                    MacroStep::new(2, Legs, MotorVector::new(1.0, -1.0), 1.0),
                ],
            )
            .with_macro(
                MACRO_PRECISE_GRASP,
                [
                    MacroStep::new(0, Hands, MotorVector::new(1.0, 0.0), 0.4),
                    MacroStep::new(1, Hands, MotorVector::new(0.0, 1.0), 0.2),
                ],
            )
    }
}

impl MacroLibrary {
    /// A library with no macros at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            macros: HashMap::new(),
        }
    }

    /// Add a macro at construction time, replacing any previous sequence
    /// registered under the same name.
    #[must_use]
    pub fn with_macro(
        mut self,
        name: impl Into<String>,
        steps: impl IntoIterator<Item = MacroStep>,
    ) -> Self {
        self.macros.insert(name.into(), steps.into_iter().collect());
        self
    }

    /// Steps registered under `name`, if any.
    #[must_use]
    pub fn sequence(&self, name: &str) -> Option<&[MacroStep]> {
        self.macros.get(name).map(SmallVec::as_slice)
    }

    /// Whether `name` is a known macro.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    /// Number of registered macros.
    #[must_use]
    pub fn len(&self) -> usize {
        self.macros.len()
    }

    /// Whether the library holds no macros.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}

/// Downstream consumer of expanded motor commands.
///
/// [`crate::MotorExecutor`] is the production implementation; tests swap in
/// a recording sink to observe exactly what the dispatcher emitted.
pub trait CommandSink {
    /// Accept one expanded step. `fire_tick` is the (possibly flinched)
    /// dispatch tick; the sink layers its own latency on top.
    fn receive_command(
        &mut self,
        fire_tick: Tick,
        body_part: BodyPart,
        target: MotorVector,
        force_multiplier: f32,
        stress_level: f32,
    );
}

/// Middle layer of the pipeline: turns a macro name into individual timed
/// commands, degrading the plan under stress and load on the way down.
#[derive(Debug, Clone)]
pub struct PremotorDispatcher {
    config: PipelineConfig,
    library: MacroLibrary,
    mirrored_macro: Option<String>,
    rng: SmallRng,
}

impl PremotorDispatcher {
    /// Construct a dispatcher over the built-in macro library.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_library(config, MacroLibrary::default())
    }

    /// Construct a dispatcher over a caller-supplied library.
    #[must_use]
    pub fn with_library(config: PipelineConfig, library: MacroLibrary) -> Self {
        let rng = config.seeded_rng();
        Self {
            config,
            library,
            mirrored_macro: None,
            rng,
        }
    }

    /// The macro library backing this dispatcher.
    #[must_use]
    pub fn library(&self) -> &MacroLibrary {
        &self.library
    }

    /// Macro most recently adopted through imitation, if any.
    #[must_use]
    pub fn mirrored_macro(&self) -> Option<&str> {
        self.mirrored_macro.as_deref()
    }

    /// Expand `macro_name` into individual commands and forward each to
    /// `sink`. Returns how many commands were dispatched (0 for an unknown
    /// macro, which is ignored rather than treated as an error).
    ///
    /// Three degradations apply on the way down:
    /// - stereotypy: past the panic threshold, any non-reflex macro is
    ///   replaced by [`MACRO_FREEZE`];
    /// - clumsiness: past the load threshold, every force is scaled down;
    /// - flinch: under high stress, a non-initial step may fire at
    ///   `current_tick` instead of its nominal offset. Each step draws once.
    pub fn prepare_macro(
        &mut self,
        macro_name: &str,
        cognitive_load: f32,
        stress_level: f32,
        current_tick: Tick,
        sink: &mut dyn CommandSink,
    ) -> usize {
        let resolved = if stress_level >= self.config.panic_threshold
            && !REFLEX_MACROS.contains(&macro_name)
        {
            debug!(
                requested = macro_name,
                "panic stereotypy; substituting freeze reflex"
            );
            MACRO_FREEZE
        } else {
            macro_name
        };

        let Some(sequence) = self.library.sequence(resolved) else {
            debug!(name = resolved, "unknown macro; nothing dispatched");
            return 0;
        };

        let clumsiness = if cognitive_load > self.config.clumsiness_threshold {
            self.config.clumsiness_factor
        } else {
            1.0
        };

        let mut dispatched = 0;
        for step in sequence {
            let applied_force = step.force * clumsiness;

            let mut fire_tick = current_tick.offset(step.tick_offset);
            if stress_level > self.config.flinch_threshold
                && step.tick_offset > 0
                && self.rng.random::<f32>() < stress_level * self.config.flinch_scale
            {
                trace!(offset = step.tick_offset, "anticipatory flinch; firing early");
                fire_tick = current_tick;
            }

            sink.receive_command(fire_tick, step.body_part, step.target, applied_force, stress_level);
            dispatched += 1;
        }
        dispatched
    }

    /// Tally observed peer macros and adopt one that enough peers perform.
    ///
    /// Ties are broken deterministically: the lexicographically smallest
    /// name reaching the empathy threshold wins. With no observations, or
    /// none at threshold, any previously mirrored macro is cleared.
    pub fn process_mirror_neurons(&mut self, observed_actions: &[String]) -> Option<&str> {
        if observed_actions.is_empty() {
            self.mirrored_macro = None;
            return None;
        }

        let mut tally: BTreeMap<&str, usize> = BTreeMap::new();
        for name in observed_actions {
            *tally.entry(name.as_str()).or_insert(0) += 1;
        }

        let adopted = tally
            .into_iter()
            .find(|(_, count)| *count >= self.config.empathy_threshold)
            .map(|(name, _)| name.to_string());

        match adopted {
            Some(name) => {
                debug!(macro_name = %name, "mirror neurons adopt peer macro");
                self.mirrored_macro = Some(name);
            }
            None => self.mirrored_macro = None,
        }
        self.mirrored_macro.as_deref()
    }
}
