//! Deterministic experiment variant assignment keyed by device identifier.
//!
//! A [`LocalExperiment`] is defined as an ordered list of weighted
//! variants whose target percents must sum to exactly 100 before it can
//! be engaged. The first `engage` call for a device id draws a uniform
//! value, walks the variants in definition order accumulating percent
//! boundaries, assigns the first variant whose cumulative boundary
//! exceeds the draw, and persists the result; every later call for the
//! same device id returns the stored variant.
//!
//! Boundaries are exclusive-upper (`draw < cumulative`), so a draw of
//! exactly 0 lands in the first variant with nonzero percent, and edge
//! equality at a boundary favors the earlier-defined variant.
//!
//! Without durable storage the experiment still behaves consistently
//! within a process run: it always returns the first-defined variant.

use std::fmt::Write as _;

use rand::Rng;
use tracing::debug;

use crate::client::{SharedClient, UserProperties};
use crate::config::{EXPERIMENTS_STORE_PREFIX, identity_ttl};
use crate::error::ExperimentError;
use crate::store::SharedStore;

/// Source of uniform draws in `[0, 1)`. Injectable so tests can supply
/// deterministic sequences without weakening production randomness.
pub trait RandomSource {
    fn draw(&mut self) -> f64;
}

/// Default draw source backed by the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn draw(&mut self) -> f64 {
        rand::rng().random::<f64>()
    }
}

/// An experiment assigns a variant to each engaged device id.
pub trait Experiment {
    /// The experiment name (also part of the persistence key).
    fn name(&self) -> &str;

    /// Assign (or recall) the variant for `device_id`.
    fn engage(&mut self, device_id: &str) -> Result<String, ExperimentError>;
}

#[derive(Debug, Clone)]
struct VariantData {
    variant: String,
    target_percent: f64,
}

/// An experiment implemented over the local identity store.
///
/// # Example
///
/// ```
/// use crosstrace_core::experiment::{Experiment, LocalExperiment};
/// use crosstrace_core::store::MemoryStore;
///
/// let mut exp = LocalExperiment::new("banner-test")
///     .with_store(MemoryStore::shared())
///     .define("control", 50.0)?
///     .define("treatment", 50.0)?;
///
/// let variant = exp.engage("device-1")?;
/// assert_eq!(exp.engage("device-1")?, variant);
/// # Ok::<(), crosstrace_core::ExperimentError>(())
/// ```
pub struct LocalExperiment {
    name: String,
    variants: Vec<VariantData>,
    covered_percent: f64,
    store: Option<SharedStore>,
    client: Option<SharedClient>,
    random: Box<dyn RandomSource>,
}

impl std::fmt::Debug for LocalExperiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalExperiment")
            .field("name", &self.name)
            .field("variants", &self.variants)
            .field("covered_percent", &self.covered_percent)
            .finish_non_exhaustive()
    }
}

impl LocalExperiment {
    /// Create an experiment with no storage, no client, and the default
    /// draw source.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variants: Vec::new(),
            covered_percent: 0.0,
            store: None,
            client: None,
            random: Box::new(ThreadRandom),
        }
    }

    /// Persist assignments in `store`. Without a store (or with an
    /// unavailable one) `engage` falls back to the first-defined variant.
    #[must_use]
    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Report assignments to `client` as a set-once user property on
    /// every `engage` call.
    #[must_use]
    pub fn with_client(mut self, client: SharedClient) -> Self {
        self.client = Some(client);
        self
    }

    /// Replace the draw source (tests use this for deterministic draws).
    #[must_use]
    pub fn with_random_source(mut self, random: impl RandomSource + 'static) -> Self {
        self.random = Box::new(random);
        self
    }

    /// Add a variant with a target percent in `[0, 100]`. Chainable.
    ///
    /// Fails when the percent is NaN or out of range, when the variant is
    /// already defined, or when the cumulative percent would exceed 100
    /// (the error lists every variant involved).
    pub fn define(
        mut self,
        variant: impl Into<String>,
        target_percent: f64,
    ) -> Result<Self, ExperimentError> {
        let variant = variant.into();

        if target_percent.is_nan() || !(0.0..=100.0).contains(&target_percent) {
            return Err(ExperimentError::PercentOutOfRange {
                experiment: self.name.clone(),
            });
        }

        if let Some(existing) = self.variants.iter().find(|data| data.variant == variant) {
            return Err(ExperimentError::DuplicateVariant {
                experiment: self.name.clone(),
                variant: existing.variant.clone(),
                percent: existing.target_percent,
            });
        }

        let data = VariantData {
            variant,
            target_percent,
        };

        if self.covered_percent + target_percent > 100.0 {
            let mut all = self.variants.clone();
            all.push(data);
            return Err(ExperimentError::PercentOverflow {
                experiment: self.name.clone(),
                variants: variants_string(&all),
            });
        }

        self.covered_percent += target_percent;
        self.variants.push(data);
        Ok(self)
    }

    fn storage_key(&self, device_id: &str) -> String {
        format!("{EXPERIMENTS_STORE_PREFIX}{}_{device_id}", self.name)
    }

    /// Report the assignment to the bound client. Called on every engage,
    /// not only the first assignment, so the backend converges even if an
    /// earlier report was dropped.
    fn report(&self, variant: &str) {
        if let Some(client) = self.client.as_ref() {
            let mut props = UserProperties::default();
            props.set_once.insert(
                format!("experiment_{}", self.name),
                serde_json::Value::String(format!("{}_{variant}", self.name)),
            );
            client.set_user_properties(props);
        }
    }
}

impl Experiment for LocalExperiment {
    fn name(&self) -> &str {
        &self.name
    }

    fn engage(&mut self, device_id: &str) -> Result<String, ExperimentError> {
        if self.variants.is_empty() {
            return Err(ExperimentError::NoVariants {
                experiment: self.name.clone(),
            });
        }
        if self.covered_percent < 100.0 {
            return Err(ExperimentError::NotFullyDefined {
                experiment: self.name.clone(),
                variants: variants_string(&self.variants),
            });
        }

        let store = match self.store.as_ref() {
            Some(store) if store.is_available() => store,
            _ => {
                // No storage support: return a consistent result.
                return Ok(self.variants[0].variant.clone());
            }
        };

        let key = self.storage_key(device_id);
        if let Some(stored) = store.load(&key) {
            self.report(&stored);
            return Ok(stored);
        }

        let die_roll = self.random.draw() * 100.0;
        let mut margin = 0.0;
        let mut result = None;
        for data in &self.variants {
            margin += data.target_percent;
            if die_roll < margin {
                result = Some(data.variant.clone());
                break;
            }
        }
        let Some(result) = result else {
            return Err(ExperimentError::AssignmentFailed {
                experiment: self.name.clone(),
                variants: variants_string(&self.variants),
            });
        };

        store.save(&key, &result, identity_ttl());
        debug!(experiment = %self.name, device_id, variant = %result, "assigned experiment variant");
        self.report(&result);
        Ok(result)
    }
}

/// Render the variant list for error messages:
/// `variant a: 50%, variant b: 50%`.
fn variants_string(variants: &[VariantData]) -> String {
    let mut out = String::new();
    for (i, data) in variants.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "variant {}: {}%", data.variant, data.target_percent);
    }
    out
}
