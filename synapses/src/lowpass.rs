/// First-order exponential low-pass, the post-synaptic current model applied
/// to every transmitted signal: `state += (1 − exp(−dt/tau)) · (input − state)`.
///
/// `tau <= 0` disables filtering and passes the input through unchanged.
#[derive(Debug, Clone)]
pub struct Lowpass {
    pub tau: f64,
    state: Vec<f64>,
}

impl Lowpass {
    pub fn new(tau: f64, dimensions: usize) -> Self {
        Lowpass {
            tau,
            state: vec![0.0; dimensions],
        }
    }

    pub fn step(&mut self, dt: f64, input: &[f64]) -> &[f64] {
        if self.tau <= 0.0 {
            self.state.copy_from_slice(input);
        } else {
            // exact discretization of dS/dt = (x - S) / tau over one step,
            // stable and still smoothing when tau is below dt
            let k = -(-dt / self.tau).exp_m1();
            for (state, &x) in self.state.iter_mut().zip(input) {
                *state += k * (x - *state);
            }
        }
        &self.state
    }

    pub fn output(&self) -> &[f64] {
        &self.state
    }
}
