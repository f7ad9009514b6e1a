//! Application Layer - Use cases and port definitions.
//!
//! This layer defines the interfaces (ports) between the domain logic and
//! the infrastructure adapters.

/// Port definitions for subscription forwarding.
pub mod ports;
