//! Command-line interface for running the server and inspecting configuration

pub mod config;
pub mod server;

pub use config::*;
pub use server::*;
