//! Demo shell: drives one cognitive stack through a scripted episode of
//! calm foraging, rising panic, a herd flight, and an environmental shove.

use anyhow::Result;
use synmotor_core::{
    CognitiveStack, GridPosition, MACRO_COMPLEX_EVADE, MACRO_FLEE_SPRINT, MACRO_PRECISE_GRASP,
    PipelineConfig, StackInput, Tick,
};
use tracing::{debug, info};

const EPISODE_TICKS: u64 = 120;

fn main() -> Result<()> {
    init_tracing();
    let mut stack = bootstrap_stack()?;
    info!("Starting synmotor demo episode");

    let mut position = GridPosition::new(25, 25);
    let mut moved_cells = 0i64;
    let mut force_spent = 0.0f32;
    let mut trips = 0usize;

    for tick in 0..EPISODE_TICKS {
        let mut input = scripted_input(tick);
        input.actual_position = position;

        let report = stack.step(input);

        position = position.stepped(report.step);
        // One off-script shove to provoke a proprioceptive trip.
        if tick == 90 {
            position = GridPosition::new(position.x + 5, position.y);
        }

        if !report.step.is_zero() || report.tripped || report.commands_dispatched > 0 {
            debug!(
                tick = report.tick.0,
                rule = ?report.rule,
                dispatched = report.commands_dispatched,
                dx = report.step.x,
                dy = report.step.y,
                force = report.force_spent,
                tripped = report.tripped,
                "tick resolved"
            );
        }
        moved_cells += i64::from(report.step.x.abs() + report.step.y.abs());
        force_spent += report.force_spent;
        if report.tripped {
            trips += 1;
        }
    }

    info!(
        ticks = EPISODE_TICKS,
        moved_cells,
        force_spent,
        trip_ticks = trips,
        final_x = position.x,
        final_y = position.y,
        effort_left = stack.controller().effort_budget(),
        rule = ?stack.controller().current_rule(),
        "Episode complete"
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn bootstrap_stack() -> Result<CognitiveStack> {
    let config = PipelineConfig {
        rng_seed: Some(0xFACA_DEAF_0123_4567),
        ..PipelineConfig::default()
    };
    Ok(CognitiveStack::new(config)?)
}

/// Four phases: calm grasping, a hard puzzle under load, a panicked herd
/// flight, then exhausted recovery.
fn scripted_input(tick: u64) -> StackInput {
    let phase = tick / 30;
    match phase {
        0 => StackInput {
            tick: Tick(tick),
            stress_level: 0.1,
            cognitive_load: 0.2,
            goal_achieved: tick % 6 == 0,
            requested_macro: (tick % 10 == 0).then(|| MACRO_PRECISE_GRASP.to_string()),
            ..StackInput::default()
        },
        1 => StackInput {
            tick: Tick(tick),
            stress_level: 0.4,
            cognitive_load: 0.9,
            goal_achieved: false,
            requested_macro: (tick % 8 == 0).then(|| MACRO_COMPLEX_EVADE.to_string()),
            ..StackInput::default()
        },
        2 => StackInput {
            tick: Tick(tick),
            stress_level: 0.95,
            cognitive_load: 0.3,
            goal_achieved: false,
            requested_macro: Some(MACRO_COMPLEX_EVADE.to_string()),
            observed_macros: if tick % 3 == 0 {
                vec![MACRO_FLEE_SPRINT.into(), MACRO_FLEE_SPRINT.into()]
            } else {
                Vec::new()
            },
            ..StackInput::default()
        },
        _ => StackInput {
            tick: Tick(tick),
            stress_level: 0.2,
            cognitive_load: 0.1,
            goal_achieved: tick % 4 == 0,
            ..StackInput::default()
        },
    }
}
