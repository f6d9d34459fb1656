pub mod decoder;
pub mod ensemble;

pub use decoder::{eval_points, solve_decoders};
pub use ensemble::{EncoderChoice, Ensemble, EnsembleSpec};
