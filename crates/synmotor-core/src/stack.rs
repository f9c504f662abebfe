//! Agent-facing composition of the three pipeline layers.

use serde::{Deserialize, Serialize};

use crate::{
    BehaviorRule, ExecutiveController, GridPosition, GridStep, MotorExecutor, PipelineConfig,
    PipelineError, PremotorDispatcher, Tick,
};

/// Everything the environment supplies for one tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StackInput {
    /// Monotonic simulation tick.
    pub tick: Tick,
    /// Arousal scalar in [0, 1].
    pub stress_level: f32,
    /// Attention demand scalar in [0, 1].
    pub cognitive_load: f32,
    /// Whether the current goal made progress since the last tick.
    pub goal_achieved: bool,
    /// Grid cell actually occupied after last tick's movement was applied.
    pub actual_position: GridPosition,
    /// Macro the decision layer wants to run this tick, if any.
    pub requested_macro: Option<String>,
    /// Macro names observed on nearby peers this tick (a snapshot).
    pub observed_macros: Vec<String>,
}

/// Outcome of one stack tick, consumed by the environment driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickReport {
    /// Tick this report describes.
    pub tick: Tick,
    /// Behavioral rule after executive evaluation.
    pub rule: BehaviorRule,
    /// Macro adopted through imitation this tick, if any.
    pub mirrored: Option<String>,
    /// Commands forwarded to the motor layer this tick.
    pub commands_dispatched: usize,
    /// Net grid movement to apply to the agent.
    pub step: GridStep,
    /// Total force expended by resolved commands.
    pub force_spent: f32,
    /// Whether the motor layer is in its trip fault state.
    pub tripped: bool,
}

/// One agent's full cognitive stack, advanced synchronously once per tick
/// in the fixed order controller → dispatcher → executor.
#[derive(Debug, Clone)]
pub struct CognitiveStack {
    config: PipelineConfig,
    controller: ExecutiveController,
    dispatcher: PremotorDispatcher,
    executor: MotorExecutor,
}

impl CognitiveStack {
    /// Build a stack after validating the configuration.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        // Give each component its own RNG stream so their draws never alias.
        let controller = ExecutiveController::new(lane_config(&config, 0));
        let dispatcher = PremotorDispatcher::new(lane_config(&config, 1));
        let executor = MotorExecutor::new(lane_config(&config, 2));
        Ok(Self {
            config,
            controller,
            dispatcher,
            executor,
        })
    }

    /// The configuration this stack was built from.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Executive layer access.
    #[must_use]
    pub fn controller(&self) -> &ExecutiveController {
        &self.controller
    }

    /// Mutable executive layer access (e.g. for `modulate`/`remember` calls
    /// made by the owning agent between ticks).
    pub fn controller_mut(&mut self) -> &mut ExecutiveController {
        &mut self.controller
    }

    /// Premotor layer access.
    #[must_use]
    pub fn dispatcher(&self) -> &PremotorDispatcher {
        &self.dispatcher
    }

    /// Motor layer access.
    #[must_use]
    pub fn executor(&self) -> &MotorExecutor {
        &self.executor
    }

    /// Advance the whole stack by one tick.
    ///
    /// An imitated peer macro overrides the requested one. When no macro is
    /// selected at all the executive rests, the only path by which effort
    /// recovers. The cognitive load seen by the dispatcher is the larger of
    /// the supplied load and the executive's fatigue.
    pub fn step(&mut self, input: StackInput) -> TickReport {
        let StackInput {
            tick,
            stress_level,
            cognitive_load,
            goal_achieved,
            actual_position,
            requested_macro,
            observed_macros,
        } = input;

        self.controller.tick(tick, stress_level, goal_achieved);

        let mirrored = self
            .dispatcher
            .process_mirror_neurons(&observed_macros)
            .map(str::to_string);
        let selected = mirrored.clone().or(requested_macro);

        let commands_dispatched = match selected.as_deref() {
            Some(name) => {
                let load = cognitive_load.max(self.controller.fatigue_level());
                self.dispatcher
                    .prepare_macro(name, load, stress_level, tick, &mut self.executor)
            }
            None => {
                self.controller.rest(self.config.rest_recovery);
                0
            }
        };

        let (step, force_spent) = self.executor.execute_tick(tick, actual_position);

        TickReport {
            tick,
            rule: self.controller.current_rule(),
            mirrored,
            commands_dispatched,
            step,
            force_spent,
            tripped: self.executor.is_tripped(),
        }
    }
}

fn lane_config(config: &PipelineConfig, lane: u64) -> PipelineConfig {
    PipelineConfig {
        rng_seed: config.rng_seed.map(|seed| seed.wrapping_add(lane)),
        ..config.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MACRO_FLEE_SPRINT, MACRO_PRECISE_GRASP};

    fn stack(seed: u64) -> CognitiveStack {
        CognitiveStack::new(PipelineConfig {
            rng_seed: Some(seed),
            ..PipelineConfig::default()
        })
        .expect("stack")
    }

    fn idle_input(tick: u64) -> StackInput {
        StackInput {
            tick: Tick(tick),
            ..StackInput::default()
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = CognitiveStack::new(PipelineConfig {
            max_effort: -1.0,
            ..PipelineConfig::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn idle_ticks_recover_effort() {
        let mut stack = stack(1);
        stack.controller_mut().modulate("A", 10.0, "B");
        assert_eq!(stack.controller().effort_budget(), 50.0);

        let report = stack.step(idle_input(0));
        assert_eq!(report.commands_dispatched, 0);
        assert!(report.step.is_zero());
        assert_eq!(stack.controller().effort_budget(), 51.0);
    }

    #[test]
    fn dispatch_ticks_do_not_rest() {
        let mut stack = stack(2);
        stack.controller_mut().modulate("A", 10.0, "B");
        let before = stack.controller().effort_budget();

        let report = stack.step(StackInput {
            tick: Tick(0),
            requested_macro: Some(MACRO_PRECISE_GRASP.into()),
            ..StackInput::default()
        });
        assert_eq!(report.commands_dispatched, 2);
        assert_eq!(stack.controller().effort_budget(), before);
    }

    #[test]
    fn mirrored_macro_overrides_request() {
        let mut stack = stack(3);
        let report = stack.step(StackInput {
            tick: Tick(0),
            requested_macro: Some(MACRO_PRECISE_GRASP.into()),
            observed_macros: vec![MACRO_FLEE_SPRINT.into(), MACRO_FLEE_SPRINT.into()],
            ..StackInput::default()
        });
        assert_eq!(report.mirrored.as_deref(), Some(MACRO_FLEE_SPRINT));
        // FLEE_SPRINT carries three steps, PRECISE_GRASP only two.
        assert_eq!(report.commands_dispatched, 3);
    }

    #[test]
    fn report_reflects_motor_resolution() {
        let mut stack = stack(4);
        let mut position = GridPosition::new(5, 5);
        let mut reports = Vec::new();
        for tick in 0..6 {
            let input = StackInput {
                tick: Tick(tick),
                actual_position: position,
                requested_macro: (tick == 0).then(|| MACRO_FLEE_SPRINT.to_string()),
                ..StackInput::default()
            };
            let report = stack.step(input);
            position = position.stepped(report.step);
            reports.push(report);
        }

        // Steps fire at ticks 0..=2, each behind the 2-tick latency.
        assert!(reports[0].step.is_zero());
        assert!(reports[1].step.is_zero());
        for report in &reports[2..5] {
            assert_eq!(report.step, GridStep::new(0, -1));
            assert_eq!(report.force_spent, 1.0);
            assert!(!report.tripped);
        }
        assert!(reports[5].step.is_zero());
        assert_eq!(position, GridPosition::new(5, 2));
    }

    #[test]
    fn rule_survives_in_reports() {
        let mut stack = stack(5);
        let report = stack.step(idle_input(0));
        assert_eq!(report.rule, BehaviorRule::Forage);
    }
}
