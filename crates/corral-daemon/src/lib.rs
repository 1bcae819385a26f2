//! The long-running side of the control plane: the queue & health monitor
//! and the auto-scaler, combined into one supervised daemon process.

pub mod daemon;
pub mod monitor;
pub mod scaler;
pub mod shutdown;
