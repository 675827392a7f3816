//! Anonymous identity reconciliation across page loads and cooperating sites.
//!
//! [`AnalyticsUrlParams`] owns the canonical set of anonymous device
//! identifiers for the current page. Identifiers arrive from three places:
//! the durable store (previous page loads), inbound URL query parameters
//! (a cooperating site forwarded its identity), and a live tracking client
//! (the backend already minted an id for this device). The reconciler
//! merges all three into one order-stable set, keeps the store in sync,
//! and renders the set back into a query string for outbound links.
//!
//! # Data flow
//!
//! ```text
//! page load ──► consume_url_parameters(query)
//!                  ├── d_id list ──► merge ──► store + bound client
//!                  └── s_id      ──► session ──► bound client
//! later     ──► set_client(client)   (one-time bind, reconciles both ways)
//! outbound  ──► get_query_string*()  (canonical d_id/s_id parameters)
//! ```
//!
//! # Merge rule
//!
//! Given an inbound ordered list `L` and the client's current id `C`, the
//! new set is `L ++ [C] ++ previous`, deduplicated keeping the first
//! occurrence. The first element of `L` is what gets pushed into the
//! client; the full set is what gets persisted and forwarded.

use std::collections::HashSet;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tracing::warn;
use url::Url;
use url::form_urlencoded;

use crate::client::SharedClient;
use crate::config::{
    DEVICE_IDS_STORE_KEY, URL_PARAM_DEVICE_ID, URL_PARAM_OPT_OUT, URL_PARAM_SESSION_ID,
    identity_ttl,
};
use crate::error::{Error, Result};
use crate::store::SharedStore;

/// Escape set matching JS `encodeURIComponent`: everything except
/// `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Handles analytics-related URL parameters: anonymous device identifiers,
/// the session identifier, and the opt-out request flag.
///
/// Constructed once per page load. Construction reads the persisted
/// identifier set but never touches a tracking client; a client is bound
/// later (at most once) via [`set_client`](Self::set_client).
pub struct AnalyticsUrlParams {
    store: SharedStore,
    /// Canonical device-id set, insertion-ordered and deduplicated.
    device_ids: Vec<String>,
    /// First identifier of the most recent inbound `d_id` parse.
    passed_device_id: Option<String>,
    session_id: Option<i64>,
    opt_out_requested: bool,
    client: Option<SharedClient>,
}

impl AnalyticsUrlParams {
    /// Create a reconciler over the given store, loading any previously
    /// persisted identifiers.
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        let mut this = Self {
            store,
            device_ids: Vec::new(),
            passed_device_id: None,
            session_id: None,
            opt_out_requested: false,
            client: None,
        };
        let stored = this.store.load(DEVICE_IDS_STORE_KEY);
        let stored_ids = stored.as_deref().map(split_device_ids).unwrap_or_default();
        this.merge_device_ids(stored_ids, None);
        this
    }

    /// Create a reconciler already bound to a client. The client is only
    /// held, not called: reconciliation against it happens lazily on the
    /// first parse that needs it.
    #[must_use]
    pub fn with_client(store: SharedStore, client: SharedClient) -> Self {
        let mut this = Self::new(store);
        this.client = Some(client);
        this
    }

    /// Analyze a query string and consume the analytics parameters in it.
    ///
    /// Device ids are merged into the canonical set (first element wins as
    /// the id pushed to a bound client), the session id is recorded, and
    /// the opt-out flag is re-derived from this parse alone.
    ///
    /// Returns the remaining query string with consumed keys stripped and
    /// all other pairs preserved in their original relative order, or
    /// `None` when the result is byte-identical to the input (nothing to
    /// rewrite). An empty input always returns `None`.
    pub fn consume_url_parameters(&mut self, query_string: &str) -> Option<String> {
        let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query_string.as_bytes())
            .into_owned()
            .collect();

        self.opt_out_requested =
            first_value(&pairs, URL_PARAM_OPT_OUT).is_some_and(|value| value == "true");

        if let Some(value) = first_value(&pairs, URL_PARAM_DEVICE_ID)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
        {
            let list = split_device_ids(&value);
            if let Some(first) = list.first() {
                self.passed_device_id = Some(first.clone());
            }
            let current_device_id = self.client.as_ref().and_then(|client| client.device_id());
            let new_current = self.merge_device_ids(list, current_device_id);
            if let (Some(client), Some(id)) = (self.client.as_ref(), new_current) {
                client.set_device_id(&id);
            }
            pairs.retain(|(key, _)| key != URL_PARAM_DEVICE_ID);
        }

        if let Some(value) = first_value(&pairs, URL_PARAM_SESSION_ID)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
        {
            // Malformed session ids are dropped, not propagated.
            if let Ok(session_id) = value.trim().parse::<i64>() {
                self.session_id = Some(session_id);
                if let Some(client) = self.client.as_ref() {
                    client.set_session_id(session_id);
                }
            }
            pairs.retain(|(key, _)| key != URL_PARAM_SESSION_ID);
        }

        let remaining = serialize_pairs(&pairs);
        if remaining == query_string {
            None
        } else {
            Some(remaining)
        }
    }

    /// Bind the tracking client. Binding is one-way and one-time; a second
    /// call fails with [`Error::ClientAlreadySet`].
    ///
    /// On bind, identity is reconciled in both directions: an identifier
    /// passed via URL takes precedence over the client's own device id,
    /// and a session id recorded from a URL parse is pushed into the
    /// client. Afterwards the client is the single source of truth for the
    /// session id.
    pub fn set_client(&mut self, client: SharedClient) -> Result<()> {
        if self.client.is_some() {
            return Err(Error::ClientAlreadySet);
        }

        let client_device_id = client.device_id();
        if let Some(passed) = self.passed_device_id.clone() {
            if client_device_id.as_deref() != Some(passed.as_str()) {
                let pushed = self.merge_device_ids(vec![passed], client_device_id);
                if let Some(id) = pushed {
                    client.set_device_id(&id);
                }
            }
        } else if client_device_id.is_some() {
            // Nothing was passed via URL: just fold the client's own
            // identifier into the durable set.
            self.merge_device_ids(Vec::new(), client_device_id);
        }

        if let Some(session_id) = self.session_id {
            if client.session_id() != Some(session_id) {
                client.set_session_id(session_id);
            }
        }

        self.client = Some(client);
        Ok(())
    }

    /// The bound tracking client, if any.
    #[must_use]
    pub fn client(&self) -> Option<&SharedClient> {
        self.client.as_ref()
    }

    /// All anonymous device ids that can be forwarded to cooperating
    /// sites: the stored set plus the live client's current id. Read-only;
    /// the stored set is not mutated.
    #[must_use]
    pub fn all_device_ids(&self) -> Vec<String> {
        let mut ids = self.device_ids.clone();
        if let Some(current) = self.client.as_ref().and_then(|client| client.device_id()) {
            if !ids.contains(&current) {
                ids.push(current);
            }
        }
        ids
    }

    /// The first device id passed via the most recent inbound URL parse,
    /// if there was one.
    #[must_use]
    pub fn get_passed_device_id(&self) -> Option<&str> {
        self.passed_device_id.as_deref()
    }

    /// The session id to forward to other sites. Reads through the bound
    /// client once one is set.
    #[must_use]
    pub fn get_session_id(&self) -> Option<i64> {
        match self.client.as_ref() {
            Some(client) => client.session_id(),
            None => self.session_id,
        }
    }

    /// The `d_id=...` query fragment for outbound links, or `""` when no
    /// identifiers are known.
    #[must_use]
    pub fn get_device_ids_query_string(&self) -> String {
        let ids = self.all_device_ids();
        if ids.is_empty() {
            return String::new();
        }
        format!(
            "{URL_PARAM_DEVICE_ID}={}",
            encode_uri_component(&ids.join(","))
        )
    }

    /// The `s_id=...` query fragment for outbound links, or `""` when no
    /// session id is known.
    #[must_use]
    pub fn get_session_id_query_string(&self) -> String {
        match self.get_session_id() {
            Some(id) => format!("{URL_PARAM_SESSION_ID}={id}"),
            None => String::new(),
        }
    }

    /// The full query fragment (`d_id` + `s_id`) for outbound links,
    /// forwarded unconditionally.
    #[must_use]
    pub fn get_query_string(&self) -> String {
        let parts = [
            self.get_device_ids_query_string(),
            self.get_session_id_query_string(),
        ];
        parts
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("&")
    }

    /// The query fragment for a link to `destination_url`, suppressed when
    /// the destination shares a registrable domain with `current_url`
    /// (identity does not need forwarding within one site).
    ///
    /// A relative destination returns `""` immediately; an unparsable
    /// absolute destination is logged and returns `""`. Domain matching
    /// uses [`registrable_domain`] and inherits its documented limitation.
    #[must_use]
    pub fn get_query_string_for(&self, destination_url: &str, current_url: &Url) -> String {
        let destination = match Url::parse(destination_url) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                // Relative link: same site by definition, nothing to forward.
                return String::new();
            }
            Err(err) => {
                warn!(destination = %destination_url, error = %err, "unparsable destination URL");
                return String::new();
            }
        };

        let same_site = match (destination.host_str(), current_url.host_str()) {
            (Some(dest), Some(current)) => {
                registrable_domain(dest) == registrable_domain(current)
            }
            _ => false,
        };

        if same_site {
            String::new()
        } else {
            self.get_query_string()
        }
    }

    /// Whether the most recent [`consume_url_parameters`] call carried an
    /// opt-out request. Resets on every parse.
    ///
    /// [`consume_url_parameters`]: Self::consume_url_parameters
    #[must_use]
    pub fn is_opt_out_requested(&self) -> bool {
        self.opt_out_requested
    }

    /// Drop the persisted identifier set from the durable store. In-memory
    /// state is untouched.
    pub fn clear_stored_ids(&self) {
        self.store.remove(DEVICE_IDS_STORE_KEY);
    }

    /// Merge an ordered identifier list and an optional currently observed
    /// client id into the canonical set, persist the result, and return
    /// the first element of the list (the id to push into a client).
    fn merge_device_ids(
        &mut self,
        list: Vec<String>,
        current_device_id: Option<String>,
    ) -> Option<String> {
        let first = list.first().cloned();

        let mut merged = list;
        if let Some(current) = current_device_id {
            merged.push(current);
        }
        merged.extend(self.device_ids.iter().cloned());

        let mut seen = HashSet::new();
        self.device_ids = merged
            .into_iter()
            .filter(|id| !id.trim().is_empty() && seen.insert(id.clone()))
            .collect();

        if !self.device_ids.is_empty() {
            self.store
                .save(DEVICE_IDS_STORE_KEY, &self.device_ids.join(","), identity_ttl());
        }

        first
    }
}

/// Split a `d_id` parameter value into identifiers. Identifiers are
/// separated by commas and/or whitespace; empty fragments are dropped.
fn split_device_ids(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// First value for `key`, mirroring `URLSearchParams.get`.
fn first_value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Serialize pairs back into `application/x-www-form-urlencoded` form,
/// mirroring `URLSearchParams.toString`.
fn serialize_pairs(pairs: &[(String, String)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

fn encode_uri_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

/// Guess the registrable domain of a hostname by label count: the last
/// two labels, or the last three when the second-to-last label has at
/// most two characters (so `example.co.uk` keeps all three).
///
/// This is a heuristic, not a public-suffix lookup, and it has a known
/// failure mode: hostnames under a multi-label public suffix whose
/// second-level label is longer than two characters (e.g. sites hosted
/// under `edge.io`) collapse to the suffix itself, so two distinct sites
/// there are treated as one. Kept as-is deliberately; switching to a
/// public-suffix list would change forwarding behavior for existing
/// cooperating sites.
#[must_use]
pub fn registrable_domain(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }
    let take = if labels[labels.len() - 2].len() <= 2 {
        3
    } else {
        2
    };
    labels[labels.len() - take..].join(".")
}
