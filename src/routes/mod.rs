pub mod artifacts;
pub mod health;
pub mod metrics;
