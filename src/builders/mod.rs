//! Builders to construct fleets from configuration.

pub mod fleet_builder;

pub use fleet_builder::FleetBuilder;
