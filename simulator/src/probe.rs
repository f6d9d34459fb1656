use bevy::prelude::{Component, Entity, Query, Res};
use binaura_core::Clock;
use ndarray::{Array2, ArrayView1};
use synapses::Lowpass;

use crate::ExecOrder;
use crate::Output;

/// What a probe records from its target each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// The target's output value (stages), or its raw output vector.
    Output,
    /// The spike indicator vector of an ensemble.
    Spikes,
    /// The identity-decoded estimate of an ensemble's represented value.
    Decoded,
}

/// Passive recorder attached to a network tap. History is append-only for the
/// duration of the run and stays readable after the simulation stops.
#[derive(Component)]
pub struct Probe {
    pub label: String,
    pub target: Entity,
    pub kind: ProbeKind,
    /// Identity decoders, solved at build time for `ProbeKind::Decoded`.
    pub decoders: Option<Array2<f64>>,
    pub filter: Option<Lowpass>,
    pub history: Vec<(u64, Vec<f64>)>,
}

impl Probe {
    fn record(&mut self, output: &[f64], tick: u64, dt: f64) {
        let raw = match (self.kind, &self.decoders) {
            (ProbeKind::Decoded, Some(decoders)) => {
                let spikes = ArrayView1::from(output);
                (decoders.t().dot(&spikes) / dt).to_vec()
            }
            _ => output.to_vec(),
        };
        let value = match &mut self.filter {
            Some(filter) => filter.step(dt, &raw).to_vec(),
            None => raw,
        };
        self.history.push((tick, value));
    }
}

pub(crate) fn record_probes(
    order: Res<ExecOrder>,
    clock: Res<Clock>,
    mut probes: Query<&mut Probe>,
    outputs: Query<&Output>,
) {
    for &entity in &order.probes {
        let Ok(mut probe) = probes.get_mut(entity) else {
            continue;
        };
        let Ok(output) = outputs.get(probe.target) else {
            continue;
        };
        probe.record(&output.0, clock.tick, clock.dt);
    }
}
