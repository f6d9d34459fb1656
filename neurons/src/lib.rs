pub mod lif;

pub use lif::LifNeuron;
