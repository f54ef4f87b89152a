//! Configuration models for fleets, pool sizing and timeouts.

pub mod fleet;

pub use fleet::{FleetConfig, SizingConfig};
