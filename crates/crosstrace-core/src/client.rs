//! The tracking client capability.
//!
//! Concrete analytics SDK clients (web, server-side, marketing) live with
//! the embedding application; this crate only consumes the capability. The
//! reconciler and the experiment engine depend on [`TrackingClient`] alone
//! and never on a concrete SDK.
//!
//! Implementations own their transport: network failures must be caught
//! and logged inside the client, never surfaced through this trait.
//! Instrumentation must not be able to break the host application.

use std::rc::Rc;

use tracing::debug;

/// Free-form event or user properties, shaped like a JSON object.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// User property updates: `set` overwrites, `set_once` only writes keys
/// that have no value yet on the backend.
#[derive(Debug, Clone, Default)]
pub struct UserProperties {
    pub set: Properties,
    pub set_once: Properties,
}

/// Capability object for an analytics tracking backend.
///
/// Methods take `&self`: clients are shared, live references and mutate
/// their own SDK state internally.
pub trait TrackingClient {
    /// The identifier for the current device, if the backend has one.
    fn device_id(&self) -> Option<String>;

    /// The identifier for the current session, if the backend has one.
    fn session_id(&self) -> Option<i64>;

    /// Set the current device identifier.
    fn set_device_id(&self, device_id: &str);

    /// Set the current session identifier.
    fn set_session_id(&self, session_id: i64);

    /// Set the current user identifier.
    fn set_user_id(&self, user_id: &str);

    /// Associate all given device identifiers with a user identifier.
    fn link_devices(&self, user_id: &str, device_ids: &[String]);

    /// Apply user property updates.
    fn set_user_properties(&self, props: UserProperties);

    /// Track an event of the given type with optional properties.
    fn track(&self, event_type: &str, props: Option<Properties>);
}

/// Shared handle to a tracking client (single-threaded event loop model).
pub type SharedClient = Rc<dyn TrackingClient>;

/// A client that reports nothing anywhere.
///
/// Useful as the default collaborator when analytics is disabled (e.g.
/// after an opt-out request) and as a stand-in during development.
#[derive(Debug, Clone)]
pub struct NoopClient {
    prefix: String,
    log_events: bool,
}

impl NoopClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            prefix: "NOOP".to_string(),
            log_events: false,
        }
    }

    /// A noop client that emits every tracked event at debug level,
    /// tagged with `prefix`.
    #[must_use]
    pub fn logging(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            log_events: true,
        }
    }
}

impl Default for NoopClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingClient for NoopClient {
    fn device_id(&self) -> Option<String> {
        None
    }

    fn session_id(&self) -> Option<i64> {
        None
    }

    fn set_device_id(&self, _device_id: &str) {}

    fn set_session_id(&self, _session_id: i64) {}

    fn set_user_id(&self, _user_id: &str) {}

    fn link_devices(&self, _user_id: &str, _device_ids: &[String]) {}

    fn set_user_properties(&self, _props: UserProperties) {}

    fn track(&self, event_type: &str, props: Option<Properties>) {
        if self.log_events {
            debug!(prefix = %self.prefix, event = %event_type, ?props, "analytics event");
        }
    }
}
