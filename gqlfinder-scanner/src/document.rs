// Document scanner: static and dynamic DOM scans, probe relay and injection

use crate::classifier::script_src_matches;
use crate::error::Result;
use crate::page::{DETECTION_TAG, DetectionPayload, ReadyState, WindowId, WindowMessage};
use crate::result::{EndpointReport, Source};
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// Resource name of the page-context probe script.
pub const PROBE_RESOURCE: &str = "injected.js";

/// Matches shorter than this are noise from minified code.
const MIN_INLINE_MATCH_LEN: usize = 6;

static INLINE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)['"`](https?://[^'"`]*(?:graphql|gql|/api/graph)[^'"`]*)['"`]"#,
        r#"(?i)endpoint\s*[:=]\s*['"`]([^'"`]+graphql[^'"`]*)['"`]"#,
        r#"(?i)url\s*[:=]\s*['"`]([^'"`]+graphql[^'"`]*)['"`]"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid inline pattern"))
    .collect()
});

static SCRIPT_SRC_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script[src]").expect("valid selector"));
static INLINE_SCRIPT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script:not([src])").expect("valid selector"));
static DATA_ATTR_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("[data-graphql], [data-gql], [data-apollo]").expect("valid selector")
});
static META_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"meta[name*="graphql"], meta[property*="graphql"]"#).expect("valid selector")
});

const DATA_ATTRIBUTES: [&str; 3] = ["data-graphql", "data-gql", "data-apollo"];

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Delay after the full load event before the DOM is scanned again
    pub rescan_delay: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            rescan_delay: Duration::from_secs(1),
        }
    }
}

/// Places the probe script into the page's own execution context.
pub trait ScriptInjector {
    fn inject_script(&self, resource: &str) -> Result<()>;
}

/// One-way delivery of reports to the aggregator.
pub trait ReportSink {
    fn send_report(&self, report: EndpointReport);
}

impl ReportSink for mpsc::UnboundedSender<EndpointReport> {
    fn send_report(&self, report: EndpointReport) {
        // Delivery is best-effort; a closed runtime just means nobody is listening
        let _ = self.send(report);
    }
}

/// Supplies the current serialized document. Parsed fresh for every scan.
pub trait DocumentSource {
    fn html(&self) -> String;
}

impl DocumentSource for str {
    fn html(&self) -> String {
        self.to_string()
    }
}

impl DocumentSource for String {
    fn html(&self) -> String {
        self.clone()
    }
}

/// A node added to the document after the initial parse.
#[derive(Debug, Clone, PartialEq)]
pub struct AddedNode {
    pub node_name: String,
    pub src: Option<String>,
}

impl AddedNode {
    pub fn script(src: impl Into<String>) -> Self {
        Self {
            node_name: "SCRIPT".to_string(),
            src: Some(src.into()),
        }
    }

    pub fn element(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            src: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationRecord {
    pub added_nodes: Vec<AddedNode>,
}

/// Resolve a `src` attribute the way the DOM property reports it.
fn resolve_src(base: Option<&Url>, src: &str) -> String {
    base.and_then(|base| base.join(src).ok())
        .map(|url| url.to_string())
        .unwrap_or_else(|| src.to_string())
}

/// External script addresses and endpoints embedded in inline scripts.
pub fn extract_script_endpoints(document: &Html, base: Option<&Url>) -> Vec<EndpointReport> {
    let mut reports = Vec::new();

    for script in document.select(&SCRIPT_SRC_SELECTOR) {
        if let Some(src) = script.value().attr("src")
            && !src.is_empty()
        {
            let src = resolve_src(base, src);
            if script_src_matches(&src) {
                reports.push(EndpointReport::new(src, Source::Script));
            }
        }
    }

    for script in document.select(&INLINE_SCRIPT_SELECTOR) {
        let text: String = script.text().collect();
        reports.extend(extract_inline_endpoints(&text));
    }

    reports
}

/// Every quoted GraphQL-looking address in a script body.
pub fn extract_inline_endpoints(text: &str) -> Vec<EndpointReport> {
    let mut reports = Vec::new();
    for pattern in INLINE_PATTERNS.iter() {
        for captures in pattern.captures_iter(text) {
            if let Some(m) = captures.get(1)
                && m.as_str().chars().count() >= MIN_INLINE_MATCH_LEN
            {
                reports.push(EndpointReport::new(m.as_str(), Source::Script));
            }
        }
    }
    reports
}

/// Marked-up attributes and meta tags.
pub fn extract_page_endpoints(document: &Html) -> Vec<EndpointReport> {
    let mut reports = Vec::new();

    for element in document.select(&DATA_ATTR_SELECTOR) {
        let value = DATA_ATTRIBUTES
            .iter()
            .filter_map(|name| element.value().attr(name))
            .find(|value| !value.is_empty());
        if let Some(value) = value {
            reports.push(EndpointReport::new(value, Source::Dom));
        }
    }

    for meta in document.select(&META_SELECTOR) {
        if let Some(content) = meta.value().attr("content")
            && !content.is_empty()
        {
            reports.push(EndpointReport::new(content, Source::Meta));
        }
    }

    reports
}

/// Content-context scanner for one page.
pub struct DocumentScanner<R> {
    window: WindowId,
    base_url: Option<Url>,
    sink: R,
    config: ScannerConfig,
}

impl<R: ReportSink> DocumentScanner<R> {
    pub fn new(window: WindowId, sink: R) -> Self {
        Self {
            window,
            base_url: None,
            sink,
            config: ScannerConfig::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    pub fn with_config(mut self, config: ScannerConfig) -> Self {
        self.config = config;
        self
    }

    fn send(&self, report: EndpointReport) {
        debug!("Reporting {} ({})", report.url, report.source);
        self.sink.send_report(report);
    }

    fn send_all(&self, reports: Vec<EndpointReport>) -> usize {
        let count = reports.len();
        for report in reports {
            self.send(report);
        }
        count
    }

    pub fn inject_probe(&self, injector: &dyn ScriptInjector) {
        match injector.inject_script(PROBE_RESOURCE) {
            Ok(()) => debug!("Injected {} into window {}", PROBE_RESOURCE, self.window),
            Err(e) => warn!("Could not inject page probe: {}", e),
        }
    }

    /// Forward a probe broadcast. Returns false for messages from other
    /// windows or without the detection tag.
    pub fn relay(&self, message: &WindowMessage) -> bool {
        if message.source_window != self.window {
            return false;
        }
        if message.data.get("type").and_then(|t| t.as_str()) != Some(DETECTION_TAG) {
            return false;
        }

        match serde_json::from_value::<DetectionPayload>(message.data.clone()) {
            Ok(payload) => {
                self.send(payload.into_report());
                true
            }
            Err(e) => {
                debug!("Ignoring malformed probe broadcast: {}", e);
                false
            }
        }
    }

    pub fn scan_script_tags(&self, document: &Html) -> usize {
        self.send_all(extract_script_endpoints(document, self.base_url.as_ref()))
    }

    pub fn scan_page(&self, document: &Html) -> usize {
        self.send_all(extract_page_endpoints(document))
    }

    /// Run both DOM scans over a fresh snapshot.
    pub fn scan_document<D: DocumentSource + ?Sized>(&self, source: &D) -> usize {
        let document = Html::parse_document(&source.html());
        self.scan_script_tags(&document) + self.scan_page(&document)
    }

    pub fn handle_mutations(&self, records: &[MutationRecord]) -> usize {
        let mut count = 0;
        for node in records.iter().flat_map(|record| record.added_nodes.iter()) {
            if !node.node_name.eq_ignore_ascii_case("script") {
                continue;
            }
            if let Some(ref src) = node.src
                && !src.is_empty()
            {
                let src = resolve_src(self.base_url.as_ref(), src);
                if script_src_matches(&src) {
                    self.send(EndpointReport::new(src, Source::Script));
                    count += 1;
                }
            }
        }
        count
    }

    /// Drive the scanner for the lifetime of the page.
    ///
    /// Probe broadcasts and mutations are handled as they arrive. Once the
    /// document is interactive the probe is injected and the DOM scanned; one
    /// more scan runs after the configured delay following the load event.
    /// Returns when every input has closed and the delayed scan has run or can
    /// no longer be scheduled.
    pub async fn run<D: DocumentSource + ?Sized>(
        &self,
        document: &D,
        injector: &dyn ScriptInjector,
        mut ready: watch::Receiver<ReadyState>,
        mut window_messages: mpsc::UnboundedReceiver<WindowMessage>,
        mut mutations: mpsc::UnboundedReceiver<Vec<MutationRecord>>,
    ) {
        let mut initialized = false;
        let mut ready_open = true;
        let mut rescan_armed = false;
        let mut rescan_done = false;
        let rescan = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(rescan);

        loop {
            let state = *ready.borrow();
            if !initialized && state >= ReadyState::Interactive {
                self.inject_probe(injector);
                let found = self.scan_document(document);
                info!("Initial scan of window {} found {} candidates", self.window, found);
                initialized = true;
            }
            if initialized && !rescan_armed && !rescan_done && state == ReadyState::Complete {
                rescan.as_mut().reset(Instant::now() + self.config.rescan_delay);
                rescan_armed = true;
            }

            tokio::select! {
                Some(message) = window_messages.recv() => {
                    self.relay(&message);
                }
                Some(batch) = mutations.recv() => {
                    self.handle_mutations(&batch);
                }
                changed = ready.changed(), if ready_open => {
                    if changed.is_err() {
                        ready_open = false;
                    }
                }
                _ = &mut rescan, if rescan_armed => {
                    rescan_armed = false;
                    rescan_done = true;
                    let found = self.scan_document(document);
                    debug!("Delayed scan of window {} found {} candidates", self.window, found);
                }
                else => break,
            }
        }
    }
}
