//! crosstrace-core: anonymous identity reconciliation and experiment
//! bucketing for instrumented web applications.
//!
//! Gives a calling application a stable anonymous identity across page
//! loads, cooperating domains, and sign-in events, plus deterministic
//! experiment variant assignment keyed by a stable device identifier.
//!
//! # Architecture
//!
//! ```text
//! inbound URL ──► AnalyticsUrlParams ──► IdentityStore (durable set)
//!                       │    ▲
//!                       ▼    │
//!                 TrackingClient (capability, consumed not implemented)
//!                       ▲
//!                       │
//!               LocalExperiment ──► IdentityStore (assignments)
//! ```
//!
//! # Modules
//!
//! - `url_params`: URL parameter codec and the identity reconciler
//! - `experiment`: weighted, persisted experiment variant assignment
//! - `store`: durable key/value storage with expiry (memory, file, null)
//! - `client`: the tracking-client capability trait and a noop client
//! - `config`: parameter names, store keys, identity TTL
//! - `error`: configuration-error types
//!
//! # Execution model
//!
//! Single-threaded, synchronous, cooperative: everything is designed to
//! run inside one event loop (shared handles are `Rc`, not `Arc`).
//! Instrumentation failures never break the host application; only the
//! configuration errors in [`error`] are surfaced as `Err`.
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod experiment;
pub mod store;
pub mod url_params;

pub use client::{NoopClient, Properties, SharedClient, TrackingClient, UserProperties};
pub use error::{Error, ExperimentError, Result};
pub use experiment::{Experiment, LocalExperiment, RandomSource, ThreadRandom};
pub use store::{FileStore, IdentityStore, MemoryStore, NullStore, SharedStore};
pub use url_params::AnalyticsUrlParams;
