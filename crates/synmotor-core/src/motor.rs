//! Motor execution: tremor noise, dispatch latency, proprioceptive trips.

use rand::{Rng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};
use std::f32::consts::FRAC_PI_4;
use tracing::{debug, trace};

use crate::{BodyPart, CommandSink, GridPosition, GridStep, MotorVector, PipelineConfig, Tick};

/// Precision assumed for a body part missing from the table.
const DEFAULT_PRECISION: f32 = 0.5;

/// A quantized movement order waiting for its execute tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MotorCommand {
    /// Integer grid delta contributed when the command resolves.
    pub vector: GridStep,
    /// Body part the command drives.
    pub body_part: BodyPart,
    /// Force spent when the command resolves.
    pub force: f32,
}

/// Fault state of the executor.
///
/// `Normal → Tripped` on a proprioceptive mismatch (the queue is dropped);
/// the recovery counter then counts down one tick at a time back to
/// `Normal`. No command executes while tripped.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum MotorFault {
    #[default]
    Normal,
    Tripped {
        recovery_left: u32,
    },
}

/// Bottom layer of the pipeline: queues commands behind a reaction latency,
/// perturbs them with stress-scaled tremor, and resolves everything due on
/// a tick into one net movement.
#[derive(Debug, Clone)]
pub struct MotorExecutor {
    config: PipelineConfig,
    precision_table: HashMap<BodyPart, f32>,
    pending: BTreeMap<Tick, SmallVec<[MotorCommand; 2]>>,
    expected_position: Option<GridPosition>,
    fault: MotorFault,
    rng: SmallRng,
}

impl MotorExecutor {
    /// Construct an executor with the default body-part precision table.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_precision_table(config, default_precision_table())
    }

    /// Construct an executor with a caller-supplied precision table.
    /// Parts missing from the table resolve to mid-range precision.
    #[must_use]
    pub fn with_precision_table(
        config: PipelineConfig,
        precision_table: HashMap<BodyPart, f32>,
    ) -> Self {
        let rng = config.seeded_rng();
        Self {
            config,
            precision_table,
            pending: BTreeMap::new(),
            expected_position: None,
            fault: MotorFault::Normal,
            rng,
        }
    }

    /// Precision used for `part`, falling back to the mid-range default.
    #[must_use]
    pub fn precision(&self, part: BodyPart) -> f32 {
        self.precision_table
            .get(&part)
            .copied()
            .unwrap_or(DEFAULT_PRECISION)
    }

    /// Current fault state.
    #[must_use]
    pub fn fault(&self) -> MotorFault {
        self.fault
    }

    /// Whether the executor is recovering from a trip.
    #[must_use]
    pub fn is_tripped(&self) -> bool {
        matches!(self.fault, MotorFault::Tripped { .. })
    }

    /// Number of commands waiting for their execute tick.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(SmallVec::len).sum()
    }

    /// Position the executor expects the agent to occupy next tick.
    #[must_use]
    pub fn expected_position(&self) -> Option<GridPosition> {
        self.expected_position
    }

    /// Quantize a movement intent and queue it behind the reaction latency.
    ///
    /// Tremor rotates the vector by a random angle scaled by stress and the
    /// part's imprecision, preserving its length. After force scaling, each
    /// axis rounds to the nearest grid step; when both axes round away but
    /// force was applied, a unit step in the sign of the pre-rounding value
    /// survives. Stress shortens the latency, floored at one tick.
    pub fn receive_command(
        &mut self,
        current_tick: Tick,
        body_part: BodyPart,
        target_vector: MotorVector,
        force_multiplier: f32,
        stress_level: f32,
    ) {
        let precision = self.precision(body_part);
        let magnitude = stress_level * self.config.tremor_gain * (1.0 - precision);
        let noisy = self.rotate_by_tremor(target_vector, magnitude);

        let scaled_x = noisy.x * force_multiplier;
        let scaled_y = noisy.y * force_multiplier;
        let mut step = GridStep::new(scaled_x.round() as i32, scaled_y.round() as i32);
        if step.is_zero() && force_multiplier > 0.0 {
            step = GridStep::new(unit_sign(scaled_x), unit_sign(scaled_y));
        }

        let reaction = (stress_level * 2.0).floor() as u64;
        let latency = self.config.base_latency.saturating_sub(reaction).max(1);
        let execute_tick = current_tick.offset(latency);

        trace!(
            tick = current_tick.0,
            execute = execute_tick.0,
            ?body_part,
            dx = step.x,
            dy = step.y,
            "queueing motor command"
        );
        self.pending.entry(execute_tick).or_default().push(MotorCommand {
            vector: step,
            body_part,
            force: force_multiplier,
        });
    }

    /// Resolve the tick: recover from trips, check proprioception, and sum
    /// every due command into one net movement.
    ///
    /// Each queued command resolves exactly once; a trip drops the whole
    /// queue instead, and dropped commands are never re-issued here.
    pub fn execute_tick(
        &mut self,
        current_tick: Tick,
        actual_position: GridPosition,
    ) -> (GridStep, f32) {
        if let MotorFault::Tripped { recovery_left } = self.fault {
            let remaining = recovery_left.saturating_sub(1);
            self.fault = if remaining == 0 {
                MotorFault::Normal
            } else {
                MotorFault::Tripped {
                    recovery_left: remaining,
                }
            };
            return (GridStep::zero(), 0.0);
        }

        if let Some(expected) = self.expected_position {
            if expected != actual_position {
                debug!(
                    tick = current_tick.0,
                    expected_x = expected.x,
                    expected_y = expected.y,
                    actual_x = actual_position.x,
                    actual_y = actual_position.y,
                    dropped = self.pending_len(),
                    "proprioceptive mismatch; tripping"
                );
                self.fault = MotorFault::Tripped {
                    recovery_left: self.config.trip_recovery_ticks,
                };
                self.expected_position = Some(actual_position);
                self.pending.clear();
                return (GridStep::zero(), 0.0);
            }
        }

        // Single-pass drain of everything due at or before this tick.
        let kept = self.pending.split_off(&current_tick.next());
        let due = std::mem::replace(&mut self.pending, kept);

        let mut net = GridStep::zero();
        let mut total_force = 0.0;
        for command in due.into_values().flatten() {
            net += command.vector;
            total_force += command.force;
        }

        self.expected_position = Some(if net.is_zero() {
            actual_position
        } else {
            actual_position.stepped(net)
        });

        (net, total_force)
    }

    /// Rotate `vector` by a uniformly random angle in
    /// `[-magnitude * 45°, magnitude * 45°]`, preserving its length.
    fn rotate_by_tremor(&mut self, vector: MotorVector, magnitude: f32) -> MotorVector {
        if magnitude <= 0.0 {
            return vector;
        }
        let length = vector.length();
        if length == 0.0 {
            return vector;
        }
        let spread = magnitude * FRAC_PI_4;
        let angle = vector.y.atan2(vector.x) + self.rng.random_range(-spread..=spread);
        MotorVector::new(angle.cos() * length, angle.sin() * length)
    }
}

impl CommandSink for MotorExecutor {
    fn receive_command(
        &mut self,
        fire_tick: Tick,
        body_part: BodyPart,
        target: MotorVector,
        force_multiplier: f32,
        stress_level: f32,
    ) {
        MotorExecutor::receive_command(
            self,
            fire_tick,
            body_part,
            target,
            force_multiplier,
            stress_level,
        );
    }
}

fn unit_sign(value: f32) -> i32 {
    if value > 0.0 {
        1
    } else if value < 0.0 {
        -1
    } else {
        0
    }
}

fn default_precision_table() -> HashMap<BodyPart, f32> {
    HashMap::from([
        (BodyPart::Face, 0.9),
        (BodyPart::Hands, 0.8),
        (BodyPart::Legs, 0.3),
        (BodyPart::Torso, 0.1),
    ])
}
