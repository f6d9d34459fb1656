#![allow(clippy::type_complexity)]

use bevy::{
    app::{App, Plugin, Update},
    prelude::{Component, Entity, IntoSystemConfigs, Query, Res, Resource},
};
use binaura_core::{Clock, MapFn, SignalSource};
use tracing::warn;
use transcoder::Ensemble;

use probe::record_probes;
use synapses::Connection;
use time::advance_clock;

pub mod builder;
pub mod probe;
pub mod time;

pub use builder::{NetworkBuilder, NodeHandle, ProbeHandle};
pub use probe::{Probe, ProbeKind};

/// Non-spiking pipeline stages, dispatched by the scheduler.
#[derive(Component)]
pub enum Stage {
    /// Polled once per tick; has no incoming connections.
    Source(Box<dyn SignalSource>),
    /// Maps the accumulated input to the stage output.
    Transform(MapFn),
    /// Passes the accumulated input through unchanged.
    Sink,
}

/// Instantaneous output of a component: a spike indicator vector for
/// ensembles, a value vector for stages. Connections read this one tick
/// after it was written for any component updated later in the tick order.
#[derive(Component, Debug)]
pub struct Output(pub Vec<f64>);

/// Summed contributions of all incoming connections this tick.
#[derive(Component, Debug)]
pub struct InputAccum(pub Vec<f64>);

/// Fixed per-tick evaluation order, assembled once at build time from the
/// connection graph. Iterating these lists instead of raw queries keeps
/// replays bit-identical.
///
/// Connections feeding ensembles run before the ensembles step, so they see
/// last tick's spikes; connections feeding stages run after, so a decoded
/// value reaches a stage within the same tick. Either way a value crossing a
/// not-yet-updated component carries exactly one tick of delay.
#[derive(Resource, Debug, Default)]
pub struct ExecOrder {
    pub sources: Vec<Entity>,
    pub ensemble_feeds: Vec<Entity>,
    pub ensembles: Vec<Entity>,
    pub stage_feeds: Vec<Entity>,
    pub stages: Vec<Entity>,
    pub probes: Vec<Entity>,
}

pub struct SimulationPlugin;

impl Plugin for SimulationPlugin {
    fn build(&self, app: &mut App) {
        app.register_type::<Clock>().add_systems(
            Update,
            (
                reset_inputs,
                poll_sources,
                apply_ensemble_feeds,
                step_ensembles,
                apply_stage_feeds,
                eval_stages,
                record_probes,
                advance_clock,
            )
                .chain(),
        );
    }
}

pub(crate) fn reset_inputs(mut inputs: Query<&mut InputAccum>) {
    for mut input in inputs.iter_mut() {
        input.0.fill(0.0);
    }
}

pub(crate) fn poll_sources(
    order: Res<ExecOrder>,
    clock: Res<Clock>,
    mut stages: Query<(&mut Stage, &mut Output)>,
) {
    for &entity in &order.sources {
        let Ok((mut stage, mut output)) = stages.get_mut(entity) else {
            continue;
        };
        if let Stage::Source(source) = stage.as_mut() {
            let value = source.poll(clock.time);
            if value.len() == output.0.len() {
                output.0.copy_from_slice(&value);
            } else {
                warn!(entity = ?entity, "source produced {} values, expected {}", value.len(), output.0.len());
            }
        }
    }
}

pub(crate) fn apply_ensemble_feeds(
    order: Res<ExecOrder>,
    clock: Res<Clock>,
    mut connections: Query<&mut Connection>,
    outputs: Query<&Output>,
    mut inputs: Query<&mut InputAccum>,
) {
    transmit_all(
        &order.ensemble_feeds,
        &clock,
        &mut connections,
        &outputs,
        &mut inputs,
    );
}

pub(crate) fn apply_stage_feeds(
    order: Res<ExecOrder>,
    clock: Res<Clock>,
    mut connections: Query<&mut Connection>,
    outputs: Query<&Output>,
    mut inputs: Query<&mut InputAccum>,
) {
    transmit_all(
        &order.stage_feeds,
        &clock,
        &mut connections,
        &outputs,
        &mut inputs,
    );
}

fn transmit_all(
    entities: &[Entity],
    clock: &Clock,
    connections: &mut Query<&mut Connection>,
    outputs: &Query<&Output>,
    inputs: &mut Query<&mut InputAccum>,
) {
    for &entity in entities {
        let Ok(mut connection) = connections.get_mut(entity) else {
            continue;
        };
        let Ok(source_output) = outputs.get(connection.source) else {
            warn!("connection `{}` lost its source", connection.label);
            continue;
        };
        let contribution = connection.transmit(&source_output.0, clock.dt).to_vec();
        let Ok(mut input) = inputs.get_mut(connection.target) else {
            warn!("connection `{}` lost its target", connection.label);
            continue;
        };
        for (accumulated, value) in input.0.iter_mut().zip(&contribution) {
            *accumulated += value;
        }
    }
}

pub(crate) fn step_ensembles(
    order: Res<ExecOrder>,
    clock: Res<Clock>,
    mut ensembles: Query<(&mut Ensemble, &InputAccum, &mut Output)>,
) {
    for &entity in &order.ensembles {
        let Ok((mut ensemble, input, mut output)) = ensembles.get_mut(entity) else {
            continue;
        };
        let spikes = ensemble.step(&input.0, clock.dt);
        output.0.copy_from_slice(spikes);
    }
}

pub(crate) fn eval_stages(
    order: Res<ExecOrder>,
    mut stages: Query<(&mut Stage, &InputAccum, &mut Output)>,
) {
    for &entity in &order.stages {
        let Ok((mut stage, input, mut output)) = stages.get_mut(entity) else {
            continue;
        };
        match stage.as_mut() {
            Stage::Transform(function) => {
                let value = function(&input.0);
                if value.len() == output.0.len() {
                    output.0.copy_from_slice(&value);
                } else {
                    warn!(entity = ?entity, "transform produced {} values, expected {}", value.len(), output.0.len());
                }
            }
            Stage::Sink => output.0.copy_from_slice(&input.0),
            Stage::Source(_) => {}
        }
    }
}

/// Run lifecycle. `Stopped` is terminal: the network cannot be restarted and
/// probe histories stay frozen and readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Stopped,
}

/// A built network plus its clock, ready to tick. Single-threaded: all
/// mutable state lives inside and is only touched between `step` calls.
pub struct Simulation {
    app: App,
    state: RunState,
    dt: f64,
    probes: Vec<Entity>,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("state", &self.state)
            .field("dt", &self.dt)
            .field("probes", &self.probes)
            .finish_non_exhaustive()
    }
}

impl Simulation {
    pub(crate) fn new(app: App, dt: f64, probes: Vec<Entity>) -> Self {
        Simulation {
            app,
            state: RunState::Idle,
            dt,
            probes,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn clock(&self) -> Clock {
        self.app.world().resource::<Clock>().clone()
    }

    pub fn start(&mut self) {
        match self.state {
            RunState::Idle => self.state = RunState::Running,
            RunState::Running => {}
            RunState::Stopped => warn!("cannot restart a stopped simulation"),
        }
    }

    /// Advance exactly one tick. Ignored unless the simulation is running.
    pub fn step(&mut self) {
        if self.state != RunState::Running {
            warn!(state = ?self.state, "step ignored");
            return;
        }
        self.app.update();
    }

    /// Stop requests only take effect at tick boundaries; there is no
    /// mid-tick cancellation. Stopping drops every input adapter, so
    /// upstream producers blocked on a full queue see a disconnect.
    pub fn stop(&mut self) {
        if self.state == RunState::Stopped {
            return;
        }
        self.state = RunState::Stopped;

        let world = self.app.world_mut();
        let sources = world.resource::<ExecOrder>().sources.clone();
        for entity in sources {
            if let Some(mut stage) = world.entity_mut(entity).get_mut::<Stage>() {
                if matches!(*stage, Stage::Source(_)) {
                    *stage = Stage::Sink;
                }
            }
        }
    }

    pub fn run_ticks(&mut self, ticks: u64) {
        self.start();
        for _ in 0..ticks {
            self.step();
        }
        self.stop();
    }

    /// Run for a stretch of simulated seconds, then stop.
    pub fn run_for(&mut self, duration: f64) {
        self.run_ticks((duration / self.dt).round() as u64);
    }

    /// Recorded `(tick, value)` history of a probe. Empty for handles from a
    /// different builder.
    pub fn probe(&self, handle: ProbeHandle) -> &[(u64, Vec<f64>)] {
        self.probes
            .get(handle.index())
            .and_then(|&entity| self.app.world().entity(entity).get::<Probe>())
            .map(|probe| probe.history.as_slice())
            .unwrap_or(&[])
    }
}
