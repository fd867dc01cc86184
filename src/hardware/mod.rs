//! The hardware module contains [crate::transport::TransportManager] implementations
//! for common adapters, as well as a simulated transport for testing

#[cfg(feature = "serial")]
pub mod serial;
pub mod simulation;
