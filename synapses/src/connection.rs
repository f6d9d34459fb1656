use bevy::prelude::{Component, Entity};
use binaura_core::MapFn;
use ndarray::{Array2, ArrayView1};

use crate::Lowpass;

/// Routes one component's output into another component's input through a
/// synaptic filter.
///
/// Spiking sources carry a decoder matrix (neurons × target dims) that turns
/// the spike indicator vector into an estimate of the represented value; any
/// declared function is folded into that matrix at build time. Node sources
/// have no decoder and apply their function directly to the value.
#[derive(Component)]
pub struct Connection {
    pub label: String,
    pub source: Entity,
    pub target: Entity,
    pub decoders: Option<Array2<f64>>,
    pub function: Option<MapFn>,
    pub filter: Lowpass,
}

impl Connection {
    /// Per-tick transmission: decode or transform the source output, then
    /// smooth it through the exponential synapse. The result is the additive
    /// contribution to the target's input for this tick.
    pub fn transmit(&mut self, source_output: &[f64], dt: f64) -> &[f64] {
        let raw = match (&self.decoders, &self.function) {
            // spike indicators scale by 1/dt so the filtered train carries
            // the rate estimate in the represented units
            (Some(decoders), _) => {
                let spikes = ArrayView1::from(source_output);
                (decoders.t().dot(&spikes) / dt).to_vec()
            }
            (None, Some(function)) => function(source_output),
            (None, None) => source_output.to_vec(),
        };
        self.filter.step(dt, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use std::sync::Arc;

    fn entity() -> Entity {
        Entity::from_raw(0)
    }

    #[test]
    fn node_value_passes_through_unfiltered_when_tau_is_zero() {
        let mut conn = Connection {
            label: "passthrough".into(),
            source: entity(),
            target: entity(),
            decoders: None,
            function: None,
            filter: Lowpass::new(0.0, 1),
        };
        assert_eq!(conn.transmit(&[7.25], 0.016), &[7.25]);
    }

    #[test]
    fn functions_apply_to_node_outputs() {
        let mut conn = Connection {
            label: "double".into(),
            source: entity(),
            target: entity(),
            decoders: None,
            function: Some(Arc::new(|x: &[f64]| vec![x[0] * 2.0])),
            filter: Lowpass::new(0.0, 1),
        };
        assert_eq!(conn.transmit(&[3.0], 0.016), &[6.0]);
    }

    #[test]
    fn decoders_turn_spikes_into_a_rate_scaled_estimate() {
        let dt = 0.01;
        let mut conn = Connection {
            label: "decode".into(),
            source: entity(),
            target: entity(),
            decoders: Some(arr2(&[[0.5], [-0.25]])),
            function: None,
            filter: Lowpass::new(0.0, 1),
        };
        // both neurons spike: (0.5 - 0.25) / dt
        assert_eq!(conn.transmit(&[1.0, 1.0], dt), &[25.0]);
        // silence decodes to zero
        assert_eq!(conn.transmit(&[0.0, 0.0], dt), &[0.0]);
    }
}
