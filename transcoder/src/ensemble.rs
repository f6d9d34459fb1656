use bevy::prelude::Component;
use binaura_core::{BuildError, SpikingNeuron};
use ndarray::{Array1, Array2};
use neurons::LifNeuron;
use rand::{rngs::StdRng, Rng};
use rand_distr::{Distribution, Normal};

/// How per-neuron preferred directions are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncoderChoice {
    /// Signed unit vectors: ±1 for one dimension, points on the unit
    /// hypersphere otherwise.
    #[default]
    Random,
    /// All +1 (one-dimensional only): an "On" population that responds to
    /// increases of the represented value.
    Positive,
    /// All −1: the matching "Off" population.
    Negative,
}

#[derive(Debug, Clone)]
pub struct EnsembleSpec {
    pub label: String,
    pub n_neurons: usize,
    pub dimensions: usize,
    pub radius: f64,
    /// Uniform range for per-neuron maximum firing rates, in Hz.
    pub max_rates: (f64, f64),
    /// Uniform range for per-neuron intercepts, in normalized units.
    pub intercepts: (f64, f64),
    pub encoders: EncoderChoice,
    pub tau_rc: f64,
    pub tau_ref: f64,
}

impl EnsembleSpec {
    pub fn new(label: impl Into<String>, n_neurons: usize) -> Self {
        EnsembleSpec {
            label: label.into(),
            n_neurons,
            dimensions: 1,
            radius: 1.0,
            max_rates: (100.0, 200.0),
            intercepts: (-0.95, 0.9),
            encoders: EncoderChoice::Random,
            tau_rc: 0.02,
            tau_ref: 0.002,
        }
    }

    pub fn dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    pub fn max_rates(mut self, low: f64, high: f64) -> Self {
        self.max_rates = (low, high);
        self
    }

    pub fn intercepts(mut self, low: f64, high: f64) -> Self {
        self.intercepts = (low, high);
        self
    }

    pub fn encoders(mut self, encoders: EncoderChoice) -> Self {
        self.encoders = encoders;
        self
    }

    fn validate(&self) -> Result<(), BuildError> {
        if self.n_neurons == 0 {
            return Err(BuildError::EmptyEnsemble(self.label.clone()));
        }
        let invalid = |reason: &str| BuildError::InvalidTuning {
            label: self.label.clone(),
            reason: reason.to_string(),
        };
        if self.intercepts.1 >= 1.0 {
            return Err(invalid("intercepts must stay below 1.0"));
        }
        if self.max_rates.0 <= 0.0 || self.max_rates.1 * self.tau_ref >= 1.0 {
            return Err(invalid("max rates must lie in (0, 1/tau_ref)"));
        }
        if self.radius <= 0.0 {
            return Err(invalid("radius must be positive"));
        }
        if self.dimensions == 0 {
            return Err(invalid("dimensions must be at least 1"));
        }
        Ok(())
    }
}

/// A population of LIF neurons jointly representing a vector in
/// `[-radius, radius]^dimensions` through distributed tuning curves.
#[derive(Component, Debug, Clone)]
pub struct Ensemble {
    pub label: String,
    pub dimensions: usize,
    pub radius: f64,
    /// One unit row per neuron.
    pub encoders: Array2<f64>,
    pub neurons: Vec<LifNeuron>,
    spikes: Vec<f64>,
}

impl Ensemble {
    /// Build the population from sampled max-rate/intercept pairs. All
    /// randomness comes from the caller's seeded generator, so construction
    /// is reproducible.
    pub fn build(spec: &EnsembleSpec, rng: &mut StdRng) -> Result<Self, BuildError> {
        spec.validate()?;

        let encoders = sample_encoders(spec, rng);
        let neurons = (0..spec.n_neurons)
            .map(|_| {
                let max_rate = rng.gen_range(spec.max_rates.0..=spec.max_rates.1);
                let intercept = rng.gen_range(spec.intercepts.0..=spec.intercepts.1);
                LifNeuron::from_tuning(max_rate, intercept, spec.tau_rc, spec.tau_ref)
            })
            .collect();

        Ok(Ensemble {
            label: spec.label.clone(),
            dimensions: spec.dimensions,
            radius: spec.radius,
            encoders,
            neurons,
            spikes: vec![0.0; spec.n_neurons],
        })
    }

    pub fn n_neurons(&self) -> usize {
        self.neurons.len()
    }

    /// Input currents for a represented vector: `J_i = gain_i·(e_i·x)/r + bias_i`.
    pub fn currents(&self, x: &[f64]) -> Array1<f64> {
        let drives = self.drives(x);
        Array1::from_iter(
            self.neurons
                .iter()
                .zip(drives.iter())
                .map(|(n, &d)| n.current(d)),
        )
    }

    /// Noiseless steady-state rates at `x`, used for decoder fitting.
    pub fn rates(&self, x: &[f64]) -> Array1<f64> {
        let drives = self.drives(x);
        Array1::from_iter(
            self.neurons
                .iter()
                .zip(drives.iter())
                .map(|(n, &d)| n.rate(n.current(d))),
        )
    }

    /// Advance every neuron by one tick and return the spike indicator vector.
    pub fn step(&mut self, x: &[f64], dt: f64) -> &[f64] {
        let drives = self.drives(x);
        for (i, (neuron, &drive)) in self.neurons.iter_mut().zip(drives.iter()).enumerate() {
            let current = neuron.current(drive);
            self.spikes[i] = if neuron.step(current, dt) { 1.0 } else { 0.0 };
        }
        &self.spikes
    }

    fn drives(&self, x: &[f64]) -> Array1<f64> {
        let x = Array1::from_iter(x.iter().copied());
        self.encoders.dot(&x) / self.radius
    }
}

fn sample_encoders(spec: &EnsembleSpec, rng: &mut StdRng) -> Array2<f64> {
    let mut encoders = Array2::zeros((spec.n_neurons, spec.dimensions));
    for mut row in encoders.rows_mut() {
        if spec.dimensions == 1 {
            row[0] = match spec.encoders {
                EncoderChoice::Positive => 1.0,
                EncoderChoice::Negative => -1.0,
                EncoderChoice::Random => {
                    if rng.gen_bool(0.5) {
                        1.0
                    } else {
                        -1.0
                    }
                }
            };
        } else {
            // uniform on the unit hypersphere: normalized Gaussian draw
            let normal = Normal::<f64>::new(0.0, 1.0).expect("unit normal is valid");
            loop {
                for v in row.iter_mut() {
                    *v = normal.sample(rng);
                }
                let norm = row.dot(&row).sqrt();
                if norm > 1e-12 {
                    row.mapv_inplace(|v| v / norm);
                    break;
                }
            }
        }
    }
    encoders
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn construction_is_deterministic_under_a_seed() {
        let spec = EnsembleSpec::new("enc", 50);
        let a = Ensemble::build(&spec, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = Ensemble::build(&spec, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a.encoders, b.encoders);
        for (na, nb) in a.neurons.iter().zip(&b.neurons) {
            assert_eq!(na.gain, nb.gain);
            assert_eq!(na.bias, nb.bias);
        }
    }

    #[test]
    fn encoders_have_unit_norm() {
        let spec = EnsembleSpec::new("sphere", 40).dimensions(3);
        let ens = Ensemble::build(&spec, &mut StdRng::seed_from_u64(1)).unwrap();
        for row in ens.encoders.rows() {
            let norm = row.dot(&row).sqrt();
            assert!((norm - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn on_population_is_silent_for_negative_inputs() {
        let spec = EnsembleSpec::new("on", 30)
            .encoders(EncoderChoice::Positive)
            .intercepts(0.05, 0.9);
        let ens = Ensemble::build(&spec, &mut StdRng::seed_from_u64(2)).unwrap();
        assert!(ens.rates(&[-0.5]).iter().all(|&r| r == 0.0));
        assert!(ens.rates(&[0.95]).iter().any(|&r| r > 0.0));
    }

    #[test]
    fn zero_neurons_is_a_build_error() {
        let spec = EnsembleSpec::new("empty", 0);
        let err = Ensemble::build(&spec, &mut StdRng::seed_from_u64(0)).unwrap_err();
        assert!(matches!(err, BuildError::EmptyEnsemble(_)));
    }

    #[test]
    fn invalid_tuning_ranges_are_rejected() {
        let spec = EnsembleSpec::new("bad", 10).intercepts(0.0, 1.0);
        assert!(Ensemble::build(&spec, &mut StdRng::seed_from_u64(0)).is_err());

        let spec = EnsembleSpec::new("fast", 10).max_rates(100.0, 600.0);
        assert!(Ensemble::build(&spec, &mut StdRng::seed_from_u64(0)).is_err());
    }

    #[test]
    fn radius_scales_the_represented_range() {
        let spec = EnsembleSpec::new("wide", 60).radius(40.0);
        let ens = Ensemble::build(&spec, &mut StdRng::seed_from_u64(3)).unwrap();
        // the same normalized point produces the same currents
        let narrow = Ensemble::build(
            &EnsembleSpec::new("wide", 60),
            &mut StdRng::seed_from_u64(3),
        )
        .unwrap();
        let wide = ens.currents(&[20.0]);
        let unit = narrow.currents(&[0.5]);
        for (a, b) in wide.iter().zip(unit.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }
}
