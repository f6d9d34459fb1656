pub mod feature;
pub mod source;

pub use feature::{angle_to_xy, ild_db, ild_to_angle, Calibration, Direction};
pub use source::{block_queue, Block, FeatureSource};

/// Capture sample rate in Hz.
pub const SAMPLE_RATE: u32 = 16_000;
/// Samples per block and per simulation tick.
pub const BLOCK_SIZE: usize = 256;

/// One audio block period in seconds; the simulation timestep is locked to
/// this so the network sees fresh audio every tick (~16 ms).
pub fn block_duration() -> f64 {
    BLOCK_SIZE as f64 / SAMPLE_RATE as f64
}
