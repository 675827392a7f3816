//! Error types for crosstrace-core.
//!
//! Only configuration mistakes (programmer errors) surface as `Err`:
//! double-binding a tracking client, or defining/engaging an experiment
//! incorrectly. Environment degradation — missing durable storage, an
//! unparsable destination URL, a failing client transport — is handled
//! locally with a documented deterministic fallback and a `tracing` event,
//! and never reaches the caller.

use thiserror::Error;

/// Result type alias using the library's [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the identity reconciler.
#[derive(Error, Debug)]
pub enum Error {
    /// A tracking client is already bound; binding is one-way and one-time.
    #[error("tracking client is already set")]
    ClientAlreadySet,

    /// Experiment configuration errors.
    #[error(transparent)]
    Experiment(#[from] ExperimentError),
}

/// Configuration errors for the experiment engine.
///
/// Every variant names the offending experiment so a failing `define`
/// chain can be traced back to its call site.
#[derive(Error, Debug)]
pub enum ExperimentError {
    /// Target percent was NaN or outside `[0, 100]`.
    #[error(
        "variant target percent must be a percent value between 0 and 100 \
         (experiment {experiment})"
    )]
    PercentOutOfRange {
        experiment: String,
    },

    /// The variant name was already defined for this experiment.
    #[error("variant [{variant} {percent}%] already exists in experiment {experiment}")]
    DuplicateVariant {
        experiment: String,
        variant: String,
        percent: f64,
    },

    /// Cumulative percent would exceed 100. `variants` lists every variant
    /// involved, including the one being defined.
    #[error(
        "incorrect target percent in experiment {experiment}: \
         sum of fractions is greater than 100%: {variants}"
    )]
    PercentOverflow {
        experiment: String,
        variants: String,
    },

    /// `engage` was called with zero defined variants.
    #[error("variants are not defined for experiment {experiment}")]
    NoVariants {
        experiment: String,
    },

    /// `engage` was called while cumulative percent is below 100.
    #[error("experiment {experiment} is not fully defined; current data: {variants}")]
    NotFullyDefined {
        experiment: String,
        variants: String,
    },

    /// The boundary walk failed to assign a variant. Unreachable when the
    /// experiment is fully defined; kept as a guard against a draw source
    /// returning values outside `[0, 1)`.
    #[error("variant assignment failed for experiment {experiment}: {variants}")]
    AssignmentFailed {
        experiment: String,
        variants: String,
    },
}
