use std::sync::Arc;

use bevy::{prelude::Resource, reflect::Reflect};
use thiserror::Error;

/// Core trait for spiking neurons. The simulator feeds every neuron an input
/// current once per simulation tick and collects the spike flags.
pub trait SpikingNeuron {
    /// Advance the membrane state by `dt` seconds under input current
    /// `current`. Returns true when the neuron spiked during this tick.
    fn step(&mut self, current: f64, dt: f64) -> bool;
    fn voltage(&self) -> f64;
}

/// A pollable per-tick input. Implementations must never block: when no fresh
/// data is available they return the last value they produced.
pub trait SignalSource: Send + Sync {
    fn poll(&mut self, time: f64) -> Vec<f64>;
}

impl<F> SignalSource for F
where
    F: FnMut(f64) -> Vec<f64> + Send + Sync,
{
    fn poll(&mut self, time: f64) -> Vec<f64> {
        self(time)
    }
}

/// A pure vector-to-vector mapping, used for decoded connection functions and
/// transform stages.
pub type MapFn = Arc<dyn Fn(&[f64]) -> Vec<f64> + Send + Sync>;

#[derive(Resource, Reflect, Debug, Clone)]
pub struct Clock {
    /// Simulated time in seconds at the start of the current tick.
    pub time: f64,
    /// Fixed timestep, one audio block period.
    pub dt: f64,
    pub tick: u64,
}

impl Clock {
    pub fn new(dt: f64) -> Self {
        Clock {
            time: 0.0,
            dt,
            tick: 0,
        }
    }
}

/// Build-time failures. The run loop itself is infallible; everything that
/// can go wrong is surfaced before the network starts.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("ensemble `{0}` has no neurons")]
    EmptyEnsemble(String),
    #[error("connection `{connection}` carries {found} dimensions but its target expects {expected}")]
    DimensionMismatch {
        connection: String,
        expected: usize,
        found: usize,
    },
    #[error("decoder fit for `{0}` failed: {1}")]
    DecoderFit(String, String),
    #[error("ensemble `{label}` has an invalid tuning range: {reason}")]
    InvalidTuning { label: String, reason: String },
    #[error("handle {0} does not belong to this builder")]
    UnknownHandle(usize),
    #[error("probe `{0}` is invalid: {1}")]
    InvalidProbe(String, String),
}
