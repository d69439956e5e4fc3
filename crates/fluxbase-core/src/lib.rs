//! Shared configuration and service plumbing for Fluxbase.
//!
//! This crate holds the unified configuration types loaded from
//! `fluxbase.yaml` and the small cross-crate abstractions (the cluster
//! invalidation bus) that keep the heavier crates decoupled from each other.

pub mod config;
pub mod pubsub;

pub use config::{ConfigError, FluxbaseConfig};
pub use pubsub::{InvalidationBus, Subscription};
