pub mod audit;
pub mod inbox;
pub mod matcher;
pub mod monitor;
pub mod queue;
pub mod registry;
pub mod reserve;
pub mod scaler;
pub mod send;
