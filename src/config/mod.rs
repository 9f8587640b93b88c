//! Configuration loading for the fan-out server

pub mod settings;

pub use settings::*;
