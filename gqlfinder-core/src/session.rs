// Drives the probe, the document scanner and the network channels for one
// loaded page in one tab.

use crate::aggregator::{Aggregator, TabEvent};
use crate::badge::Badge;
use crate::fetch::FetchedPage;
use crate::network::{CompletedDetails, RequestDetails};
use crate::runtime::RuntimeClient;
use crate::storage::Storage;
use gqlfinder_scanner::document::{MutationRecord, ScriptInjector};
use gqlfinder_scanner::page::{PageReporter, ReadyState, WindowId};
use gqlfinder_scanner::{DocumentScanner, PageProbe, ProbeConfig, ScannerConfig, TabId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub scanner: ScannerConfig,
    pub probe: ProbeConfig,
}

impl SessionConfig {
    /// No re-scan delays. A static snapshot does not change after load.
    pub fn immediate() -> Self {
        Self {
            scanner: ScannerConfig {
                rescan_delay: Duration::ZERO,
            },
            probe: ProbeConfig {
                rescan_delay: Duration::ZERO,
                ..ProbeConfig::default()
            },
        }
    }
}

/// A fully loaded page as the content and page contexts would see it.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub url: Url,
    pub html: String,
    /// Page globals, keyed by name
    pub globals: serde_json::Map<String, serde_json::Value>,
    /// Nodes inserted after the initial parse
    pub mutations: Vec<MutationRecord>,
}

impl PageSnapshot {
    pub fn new(url: Url, html: impl Into<String>) -> Self {
        Self {
            url,
            html: html.into(),
            globals: serde_json::Map::new(),
            mutations: Vec::new(),
        }
    }

    pub fn with_globals(mut self, globals: serde_json::Map<String, serde_json::Value>) -> Self {
        self.globals = globals;
        self
    }

    pub fn with_mutations(mut self, mutations: Vec<MutationRecord>) -> Self {
        self.mutations = mutations;
        self
    }
}

/// In a snapshot the probe runs alongside the scanner, so injecting it only
/// needs to be noted.
#[derive(Debug, Default)]
pub struct SnapshotInjector {
    injected: AtomicBool,
}

impl SnapshotInjector {
    pub fn was_injected(&self) -> bool {
        self.injected.load(Ordering::Relaxed)
    }
}

impl ScriptInjector for SnapshotInjector {
    fn inject_script(&self, resource: &str) -> gqlfinder_scanner::error::Result<()> {
        debug!("Probe {} attached to snapshot", resource);
        self.injected.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Run the page and content contexts of `tab_id` over a snapshot until both
/// have finished their scheduled scans.
pub async fn run_page(
    client: &RuntimeClient,
    tab_id: TabId,
    snapshot: &PageSnapshot,
    config: &SessionConfig,
) {
    let window: WindowId = tab_id.unsigned_abs();

    let (window_tx, window_rx) = mpsc::unbounded_channel();
    let (mutation_tx, mutation_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = watch::channel(ReadyState::Complete);

    let probe = PageProbe::with_config(PageReporter::new(window, window_tx), config.probe.clone());
    let scanner = DocumentScanner::new(window, client.tab_sink(tab_id))
        .with_base_url(snapshot.url.clone())
        .with_config(config.scanner.clone());
    let injector = SnapshotInjector::default();

    if !snapshot.mutations.is_empty() {
        let _ = mutation_tx.send(snapshot.mutations.clone());
    }
    drop(mutation_tx);
    drop(ready_tx);

    let probe_ready = ready_rx.clone();
    let globals = &snapshot.globals;
    let probes = async move {
        probe.run_global_probes(globals, probe_ready).await;
        // Dropping the probe closes the window channel
        drop(probe);
    };

    tokio::join!(
        probes,
        scanner.run(
            snapshot.html.as_str(),
            &injector,
            ready_rx,
            window_rx,
            mutation_rx
        )
    );
    debug!("Tab {}: page contexts finished", tab_id);
}

/// Navigate `tab_id` to a fetched page: reset the tab, feed the document
/// request through both network channels, then scan the page.
pub async fn visit<S: Storage, B: Badge>(
    aggregator: &Aggregator<S, B>,
    client: &RuntimeClient,
    tab_id: TabId,
    page: &FetchedPage,
    globals: serde_json::Map<String, serde_json::Value>,
    config: &SessionConfig,
) {
    let url = page.url.as_str();
    aggregator
        .handle_tab_event(TabEvent::navigation_started(tab_id, url))
        .await;

    aggregator
        .observe_request(&RequestDetails::new(tab_id, url, "GET"))
        .await;
    aggregator
        .observe_response(&CompletedDetails::new(tab_id, url, page.headers.clone()))
        .await;

    if page.is_html() {
        let snapshot = PageSnapshot::new(page.url.clone(), page.body.clone()).with_globals(globals);
        run_page(client, tab_id, &snapshot, config).await;
    } else {
        debug!("Tab {}: {} is not HTML, skipping page scan", tab_id, url);
    }
}
