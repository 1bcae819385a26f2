//! Logging initialisation for corral binaries.

pub mod logging;
