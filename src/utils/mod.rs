//! Utility functions for the fan-out server

pub mod http;
pub mod url;
pub mod time;
pub mod logging;

pub use http::*;
pub use url::*;
pub use time::*;
pub use logging::*;
