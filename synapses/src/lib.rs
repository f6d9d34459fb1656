pub mod connection;
pub mod lowpass;

pub use connection::Connection;
pub use lowpass::Lowpass;
