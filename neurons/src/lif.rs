use bevy::reflect::Reflect;
use binaura_core::SpikingNeuron;

/// Leaky integrate-and-fire neuron with a normalized firing threshold of 1.0.
///
/// `gain` and `bias` scale the encoded stimulus into an input current; they
/// are solved once at construction so that the tuning curve passes through
/// `(intercept, 0 Hz)` and `(1.0, max_rate)` along the preferred direction.
#[derive(Debug, Clone, Reflect)]
pub struct LifNeuron {
    pub gain: f64,
    pub bias: f64,
    pub tau_rc: f64,
    pub tau_ref: f64,
    pub voltage: f64,
    pub refractory: f64,
}

impl LifNeuron {
    pub fn new(gain: f64, bias: f64, tau_rc: f64, tau_ref: f64) -> Self {
        LifNeuron {
            gain,
            bias,
            tau_rc,
            tau_ref,
            voltage: 0.0,
            refractory: 0.0,
        }
    }

    /// Solve for the tuning curve through `(intercept, 0)` and `(1, max_rate)`.
    ///
    /// Closed form from the inverse of the steady-state rate equation: the
    /// current at threshold is 1.0, and the current at `max_rate` follows from
    /// inverting `rate()`. Requires `intercept < 1` and `max_rate < 1/tau_ref`.
    pub fn gain_bias(max_rate: f64, intercept: f64, tau_rc: f64, tau_ref: f64) -> (f64, f64) {
        let j_max = 1.0 / (1.0 - ((tau_ref - 1.0 / max_rate) / tau_rc).exp());
        let gain = (j_max - 1.0) / (1.0 - intercept);
        let bias = j_max - gain;
        (gain, bias)
    }

    pub fn from_tuning(max_rate: f64, intercept: f64, tau_rc: f64, tau_ref: f64) -> Self {
        let (gain, bias) = Self::gain_bias(max_rate, intercept, tau_rc, tau_ref);
        Self::new(gain, bias, tau_rc, tau_ref)
    }

    /// Input current for a stimulus projected onto the preferred direction.
    pub fn current(&self, drive: f64) -> f64 {
        self.gain * drive + self.bias
    }

    /// Noiseless steady-state firing rate in Hz for a constant input current.
    pub fn rate(&self, current: f64) -> f64 {
        if current > 1.0 {
            1.0 / (self.tau_ref + self.tau_rc * (1.0 + 1.0 / (current - 1.0)).ln())
        } else {
            0.0
        }
    }
}

impl SpikingNeuron for LifNeuron {
    fn step(&mut self, current: f64, dt: f64) -> bool {
        // Refractory carry-over masks part of the step; the membrane only
        // integrates over the remaining sub-step.
        self.refractory -= dt;
        let dt_live = (dt - self.refractory).clamp(0.0, dt);
        if self.refractory < 0.0 {
            self.refractory = 0.0;
        }

        // Exact exponential solution of dV/dt = (J - V) / tau_rc over dt_live.
        self.voltage -= (current - self.voltage) * (-dt_live / self.tau_rc).exp_m1();

        if self.voltage < 0.0 {
            self.voltage = 0.0;
        }

        if self.voltage >= 1.0 {
            // Time left in this tick after the threshold crossing, recovered
            // from the exact solution. Keeps rates accurate when dt is not
            // small against tau_ref.
            let overshoot = (-(self.voltage - 1.0) / (current - 1.0)).ln_1p();
            let t_spike = if overshoot.is_finite() {
                (dt + self.tau_rc * overshoot).clamp(0.0, dt)
            } else {
                dt
            };
            self.voltage = 0.0;
            self.refractory = self.tau_ref + t_spike;
            return true;
        }

        false
    }

    fn voltage(&self) -> f64 {
        self.voltage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spike_rate(neuron: &mut LifNeuron, current: f64, dt: f64, duration: f64) -> f64 {
        let ticks = (duration / dt) as u64;
        // settle through one refractory + membrane transient first
        for _ in 0..ticks / 10 {
            neuron.step(current, dt);
        }
        let mut spikes = 0u64;
        for _ in 0..ticks {
            if neuron.step(current, dt) {
                spikes += 1;
            }
        }
        spikes as f64 / (ticks as f64 * dt)
    }

    #[test]
    fn rate_matches_analytic_steady_state() {
        let mut neuron = LifNeuron::new(1.0, 0.0, 0.02, 0.002);
        for current in [1.5, 2.0, 5.0, 10.0] {
            let analytic = neuron.rate(current);
            let simulated = spike_rate(&mut neuron, current, 0.0005, 10.0);
            let relative = (simulated - analytic).abs() / analytic;
            assert!(
                relative < 0.05,
                "J={current}: simulated {simulated:.2} Hz vs analytic {analytic:.2} Hz"
            );
        }
    }

    #[test]
    fn subthreshold_current_never_spikes() {
        let mut neuron = LifNeuron::new(1.0, 0.0, 0.02, 0.002);
        for _ in 0..10_000 {
            assert!(!neuron.step(0.9, 0.001));
        }
        assert!(neuron.voltage() < 1.0);
    }

    #[test]
    fn voltage_is_floored_at_zero() {
        let mut neuron = LifNeuron::new(1.0, 0.0, 0.02, 0.002);
        neuron.voltage = 0.5;
        for _ in 0..100 {
            neuron.step(-20.0, 0.001);
        }
        assert_eq!(neuron.voltage(), 0.0);
    }

    #[test]
    fn gain_bias_reproduces_the_two_tuning_points() {
        let (max_rate, intercept) = (180.0, -0.3);
        let neuron = LifNeuron::from_tuning(max_rate, intercept, 0.02, 0.002);

        // zero rate at the intercept, max_rate at the end of the range
        let at_intercept = neuron.rate(neuron.current(intercept));
        let at_one = neuron.rate(neuron.current(1.0));
        assert!(at_intercept < 1e-6, "rate at intercept was {at_intercept}");
        assert!(
            (at_one - max_rate).abs() < 1e-6,
            "rate at 1.0 was {at_one}, expected {max_rate}"
        );

        // just below the intercept the neuron is silent
        assert_eq!(neuron.rate(neuron.current(intercept - 0.01)), 0.0);
    }

    #[test]
    fn refractory_period_caps_the_firing_rate() {
        let mut neuron = LifNeuron::new(1.0, 0.0, 0.02, 0.002);
        // enormous drive: the rate limit is 1 / tau_ref
        let rate = spike_rate(&mut neuron, 1e4, 0.0001, 5.0);
        assert!(rate < 1.0 / 0.002 * 1.01, "rate {rate} exceeds 1/tau_ref");
        assert!(rate > 1.0 / 0.002 * 0.9);
    }
}
