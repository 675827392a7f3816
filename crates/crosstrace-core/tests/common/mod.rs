//! Shared test doubles for the integration suite.

use std::cell::RefCell;

use crosstrace_core::{Properties, TrackingClient, UserProperties};

/// A tracking client with a mutable identity and full call recording.
#[derive(Debug, Default)]
pub struct FakeBackend {
    pub device_id: RefCell<Option<String>>,
    pub session_id: RefCell<Option<i64>>,
    pub user_id: RefCell<Option<String>>,
    pub events: RefCell<Vec<String>>,
    pub user_property_updates: RefCell<Vec<UserProperties>>,
    pub linked: RefCell<Vec<(String, Vec<String>)>>,
}

impl FakeBackend {
    pub fn with_identity(device_id: &str, session_id: i64) -> Self {
        Self {
            device_id: RefCell::new(Some(device_id.to_string())),
            session_id: RefCell::new(Some(session_id)),
            ..Self::default()
        }
    }
}

impl TrackingClient for FakeBackend {
    fn device_id(&self) -> Option<String> {
        self.device_id.borrow().clone()
    }

    fn session_id(&self) -> Option<i64> {
        *self.session_id.borrow()
    }

    fn set_device_id(&self, device_id: &str) {
        *self.device_id.borrow_mut() = Some(device_id.to_string());
    }

    fn set_session_id(&self, session_id: i64) {
        *self.session_id.borrow_mut() = Some(session_id);
    }

    fn set_user_id(&self, user_id: &str) {
        *self.user_id.borrow_mut() = Some(user_id.to_string());
    }

    fn link_devices(&self, user_id: &str, device_ids: &[String]) {
        self.linked
            .borrow_mut()
            .push((user_id.to_string(), device_ids.to_vec()));
    }

    fn set_user_properties(&self, props: UserProperties) {
        self.user_property_updates.borrow_mut().push(props);
    }

    fn track(&self, event_type: &str, _props: Option<Properties>) {
        self.events.borrow_mut().push(event_type.to_string());
    }
}
