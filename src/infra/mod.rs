//! Provider and shell adapters: in-memory simulation and REST transport.

#[cfg(feature = "http")]
pub mod http;
pub mod memory;

#[cfg(feature = "http")]
pub use http::RestClient;
pub use memory::{ExecRecord, InMemoryProvisioner, InMemoryShell, InMemorySession, ProvisionerCalls};
