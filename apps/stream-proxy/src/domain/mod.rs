//! Domain Layer - Core streaming types and business logic.
//!
//! This layer contains the core domain types for market data fan-out
//! with no external dependencies. All types here are pure Rust with
//! serialization support.

/// Client wire envelope and event types.
pub mod streaming;

/// Subscription registry with wildcard subsumption.
pub mod subscription;
