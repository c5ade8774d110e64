//! Endpoint aggregator.
//!
//! Sole writer of persisted endpoint state. Each operation holds the state lock
//! for its whole read-modify-write cycle, so two additions of the same key for
//! the same tab can never both pass the "not present" check.

use crate::badge::{Badge, update_badge};
use crate::network::{CompletedDetails, RequestDetails, classify_request, classify_response};
use crate::storage::{ENDPOINTS_KEY, Storage};
use gqlfinder_scanner::result::DedupKey;
use gqlfinder_scanner::{EndpointRecord, EndpointReport, TabId};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Persisted layout: tab id (as decimal string) -> records in detection order.
pub type EndpointMap = BTreeMap<String, Vec<EndpointRecord>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabStatus {
    Loading,
    Complete,
}

/// Tab lifecycle notifications from the browser.
#[derive(Debug, Clone, PartialEq)]
pub enum TabEvent {
    Removed(TabId),
    Updated {
        tab_id: TabId,
        status: Option<TabStatus>,
        url: Option<String>,
    },
}

impl TabEvent {
    /// A new top-level address starting to load in `tab_id`.
    pub fn navigation_started(tab_id: TabId, url: impl Into<String>) -> Self {
        TabEvent::Updated {
            tab_id,
            status: Some(TabStatus::Loading),
            url: Some(url.into()),
        }
    }
}

fn tab_key(tab_id: TabId) -> String {
    tab_id.to_string()
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

struct State<S, B> {
    storage: S,
    badge: B,
    seen: HashMap<TabId, HashSet<DedupKey>>,
}

impl<S: Storage, B: Badge> State<S, B> {
    /// A failed or unreadable load counts as no prior state.
    fn load(&self) -> EndpointMap {
        match self.storage.get(ENDPOINTS_KEY) {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!("Discarding unreadable endpoint state: {}", e);
                EndpointMap::new()
            }),
            Ok(None) => EndpointMap::new(),
            Err(e) => {
                warn!("Failed to read endpoint state: {}", e);
                EndpointMap::new()
            }
        }
    }

    fn save(&mut self, endpoints: &EndpointMap) -> bool {
        let value = match serde_json::to_value(endpoints) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to serialize endpoint state: {}", e);
                return false;
            }
        };
        match self.storage.set(ENDPOINTS_KEY, &value) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to write endpoint state: {}", e);
                false
            }
        }
    }

    fn drop_tab(&mut self, tab_id: TabId) {
        self.seen.remove(&tab_id);
        let mut endpoints = self.load();
        if endpoints.remove(&tab_key(tab_id)).is_some() {
            self.save(&endpoints);
        }
    }
}

pub struct Aggregator<S, B> {
    state: Mutex<State<S, B>>,
}

impl<S: Storage, B: Badge> Aggregator<S, B> {
    /// Build the aggregator, replaying persisted `(url, source)` pairs into the
    /// dedup cache and restoring badge counts.
    pub fn new(storage: S, badge: B) -> Self {
        let mut state = State {
            storage,
            badge,
            seen: HashMap::new(),
        };

        let endpoints = state.load();
        for (key, records) in &endpoints {
            let Ok(tab_id) = key.parse::<TabId>() else {
                debug!("Skipping persisted entry with non-numeric tab key {}", key);
                continue;
            };
            let seen = state.seen.entry(tab_id).or_default();
            seen.extend(records.iter().map(EndpointRecord::key));
            update_badge(&mut state.badge, tab_id, records.len());
        }
        if !endpoints.is_empty() {
            info!("Restored endpoint state for {} tabs", endpoints.len());
        }

        Self {
            state: Mutex::new(state),
        }
    }

    /// Record a detection unless `(url, source)` is already known for the tab.
    /// Returns true when a new record was persisted.
    pub async fn add_endpoint(&self, tab_id: TabId, report: EndpointReport) -> bool {
        let mut state = self.state.lock().await;

        let key: DedupKey = (report.url.clone(), report.source);
        if state
            .seen
            .get(&tab_id)
            .is_some_and(|seen| seen.contains(&key))
        {
            debug!("Tab {}: already recorded {} ({})", tab_id, report.url, report.source);
            return false;
        }

        let mut endpoints = state.load();
        let records = endpoints.entry(tab_key(tab_id)).or_default();
        records.push(EndpointRecord::from_report(report, now_millis()));
        let count = records.len();

        if !state.save(&endpoints) {
            // Leave the key unseen so a later detection can retry the write
            return false;
        }

        info!("Tab {}: GraphQL endpoint {} via {}", tab_id, key.0, key.1);
        state.seen.entry(tab_id).or_default().insert(key);
        update_badge(&mut state.badge, tab_id, count);
        true
    }

    /// Persisted records for a tab; empty for unknown tabs.
    pub async fn get_endpoints(&self, tab_id: TabId) -> Vec<EndpointRecord> {
        let state = self.state.lock().await;
        state.load().remove(&tab_key(tab_id)).unwrap_or_default()
    }

    pub async fn clear_endpoints(&self, tab_id: TabId) {
        let mut state = self.state.lock().await;
        state.drop_tab(tab_id);
        update_badge(&mut state.badge, tab_id, 0);
        debug!("Tab {}: cleared", tab_id);
    }

    pub async fn handle_tab_event(&self, event: TabEvent) {
        match event {
            TabEvent::Removed(tab_id) => {
                let mut state = self.state.lock().await;
                state.drop_tab(tab_id);
                debug!("Tab {}: removed", tab_id);
            }
            TabEvent::Updated {
                tab_id,
                status: Some(TabStatus::Loading),
                url: Some(url),
            } => {
                let mut state = self.state.lock().await;
                state.drop_tab(tab_id);
                update_badge(&mut state.badge, tab_id, 0);
                debug!("Tab {}: navigating to {}, state reset", tab_id, url);
            }
            TabEvent::Updated { .. } => {}
        }
    }

    /// Request-phase network channel.
    pub async fn observe_request(&self, details: &RequestDetails) -> bool {
        match classify_request(details) {
            Some(report) => self.add_endpoint(details.tab_id, report).await,
            None => false,
        }
    }

    /// Response-phase network channel.
    pub async fn observe_response(&self, details: &CompletedDetails) -> bool {
        match classify_response(details) {
            Some(report) => self.add_endpoint(details.tab_id, report).await,
            None => false,
        }
    }

    /// Number of dedup keys cached for a tab.
    pub async fn cached_keys(&self, tab_id: TabId) -> usize {
        let state = self.state.lock().await;
        state.seen.get(&tab_id).map(HashSet::len).unwrap_or_default()
    }
}
