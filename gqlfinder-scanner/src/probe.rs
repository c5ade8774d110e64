//! Page-context probe.
//!
//! Wraps the page's network primitives and inspects well-known client globals.
//! Every wrapper delegates to the primitive it wraps and hands back exactly what
//! the primitive returned; detection runs beside the call and can never fail it.

use crate::classifier::{
    is_absolute_http_url, is_graphql_absolute_url, is_graphql_request, socket_url_matches,
};
use crate::error::{Result, ScanError};
use crate::page::{PageReporter, ReadyState, wait_until_interactive};
use crate::request::{BodyInit, RequestOptions};
use crate::result::{Metadata, Source};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// Globals set by popular GraphQL clients, or by pages that expose their endpoint.
pub const KNOWN_GLOBALS: &[&str] = &[
    "__APOLLO_CLIENT__",
    "__RELAY_ENVIRONMENT__",
    "graphql",
    "gql",
    "__GRAPHQL_ENDPOINT__",
];

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Delay before the last global probe, measured from installation
    pub rescan_delay: Duration,
    /// Deepest nesting level searched inside a global object
    pub max_depth: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            rescan_delay: Duration::from_secs(2),
            max_depth: 2,
        }
    }
}

/// Run detection without letting a panic escape into the page's call.
fn guarded<F: FnOnce()>(what: &str, detect: F) {
    if catch_unwind(AssertUnwindSafe(detect)).is_err() {
        debug!("Swallowed panic while inspecting {}", what);
    }
}

// ============================================================================
// fetch
// ============================================================================

/// First argument of a fetch call.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchInput {
    Url(String),
    Request { url: String, method: String },
}

impl FetchInput {
    pub fn url(&self) -> &str {
        match self {
            FetchInput::Url(url) => url,
            FetchInput::Request { url, .. } => url,
        }
    }
}

impl From<&str> for FetchInput {
    fn from(url: &str) -> Self {
        FetchInput::Url(url.to_string())
    }
}

/// The page's primary HTTP call primitive.
pub trait Fetch {
    type Output;

    fn fetch(&self, input: FetchInput, options: RequestOptions) -> Self::Output;
}

pub struct InterceptedFetch<F> {
    inner: F,
    reporter: PageReporter,
}

impl<F: Fetch> InterceptedFetch<F> {
    pub fn new(inner: F, reporter: PageReporter) -> Self {
        Self { inner, reporter }
    }

    pub fn into_inner(self) -> F {
        self.inner
    }

    fn observe(&self, input: &FetchInput, options: &RequestOptions) {
        let url = input.url();
        if is_graphql_request(url, options) {
            let method = match (&options.method, input) {
                (Some(method), _) => method.clone(),
                (None, FetchInput::Request { method, .. }) => method.clone(),
                (None, FetchInput::Url(_)) => "GET".to_string(),
            };
            self.reporter
                .report(url, Source::Fetch, Metadata::with_method(method));
        }
    }
}

impl<F: Fetch> Fetch for InterceptedFetch<F> {
    type Output = F::Output;

    fn fetch(&self, input: FetchInput, options: RequestOptions) -> Self::Output {
        guarded("fetch", || self.observe(&input, &options));
        self.inner.fetch(input, options)
    }
}

// ============================================================================
// XMLHttpRequest
// ============================================================================

/// The legacy request-object API.
pub trait XmlHttpRequest {
    type Error;

    fn open(&mut self, method: &str, url: &str) -> std::result::Result<(), Self::Error>;
    fn send(&mut self, body: Option<BodyInit>) -> std::result::Result<(), Self::Error>;
}

pub struct InterceptedXhr<X> {
    inner: X,
    reporter: PageReporter,
    opened: Option<(String, String)>,
}

impl<X: XmlHttpRequest> InterceptedXhr<X> {
    pub fn new(inner: X, reporter: PageReporter) -> Self {
        Self {
            inner,
            reporter,
            opened: None,
        }
    }

    pub fn inner(&self) -> &X {
        &self.inner
    }

    fn observe_send(&self, body: Option<&BodyInit>) {
        let Some((ref method, ref url)) = self.opened else {
            return;
        };

        let options = RequestOptions {
            method: Some(method.clone()),
            body: body.cloned(),
            headers: None,
        };
        if is_graphql_request(url, &options) {
            self.reporter
                .report(url, Source::Xhr, Metadata::with_method(method.clone()));
        }
    }
}

impl<X: XmlHttpRequest> XmlHttpRequest for InterceptedXhr<X> {
    type Error = X::Error;

    fn open(&mut self, method: &str, url: &str) -> std::result::Result<(), Self::Error> {
        self.opened = Some((method.to_string(), url.to_string()));
        self.inner.open(method, url)
    }

    fn send(&mut self, body: Option<BodyInit>) -> std::result::Result<(), Self::Error> {
        guarded("XHR send", || self.observe_send(body.as_ref()));
        self.inner.send(body)
    }
}

// ============================================================================
// WebSocket
// ============================================================================

/// The real-time socket constructor.
pub trait SocketFactory {
    type Socket;
    type Error;

    fn connect(&self, url: &str, protocols: &[String])
    -> std::result::Result<Self::Socket, Self::Error>;
}

pub struct InterceptedSocketFactory<S> {
    inner: S,
    reporter: PageReporter,
}

impl<S: SocketFactory> InterceptedSocketFactory<S> {
    pub fn new(inner: S, reporter: PageReporter) -> Self {
        Self { inner, reporter }
    }
}

impl<S: SocketFactory> SocketFactory for InterceptedSocketFactory<S> {
    type Socket = S::Socket;
    type Error = S::Error;

    fn connect(
        &self,
        url: &str,
        protocols: &[String],
    ) -> std::result::Result<Self::Socket, Self::Error> {
        guarded("WebSocket", || {
            if socket_url_matches(url) {
                self.reporter
                    .report(url, Source::WebSocket, Metadata::default());
            }
        });
        self.inner.connect(url, protocols)
    }
}

// ============================================================================
// Globals
// ============================================================================

/// A value read from the page's global scope.
#[derive(Clone)]
pub enum GlobalValue {
    Str(String),
    Object(Arc<dyn PropertyBag>),
    /// Numbers, booleans, functions, null
    Other,
}

impl GlobalValue {
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => GlobalValue::Str(s.clone()),
            serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                GlobalValue::Object(Arc::new(JsonBag(value.clone())))
            }
            _ => GlobalValue::Other,
        }
    }

    fn is_truthy(&self) -> bool {
        match self {
            GlobalValue::Str(s) => !s.is_empty(),
            GlobalValue::Object(_) => true,
            GlobalValue::Other => false,
        }
    }
}

/// Enumerable own properties of a page object. Getters may fail.
pub trait PropertyBag: Send + Sync {
    fn keys(&self) -> Vec<String>;
    fn get(&self, key: &str) -> Result<GlobalValue>;
}

/// Read access to the page's globals.
pub trait GlobalScope {
    fn lookup(&self, name: &str) -> Option<GlobalValue>;
}

/// A JSON snapshot of a page object.
pub struct JsonBag(pub serde_json::Value);

impl PropertyBag for JsonBag {
    fn keys(&self) -> Vec<String> {
        match &self.0 {
            serde_json::Value::Object(map) => map.keys().cloned().collect(),
            serde_json::Value::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        }
    }

    fn get(&self, key: &str) -> Result<GlobalValue> {
        let value = match &self.0 {
            serde_json::Value::Object(map) => map.get(key),
            serde_json::Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        value
            .map(GlobalValue::from_json)
            .ok_or_else(|| ScanError::PropertyAccess(key.to_string()))
    }
}

impl GlobalScope for serde_json::Map<String, serde_json::Value> {
    fn lookup(&self, name: &str) -> Option<GlobalValue> {
        self.get(name).map(GlobalValue::from_json)
    }
}

/// Probe the known globals once, reporting URL-shaped values as `Window`
/// as soon as they are found. Returns the URLs reported.
pub fn scan_globals<G: GlobalScope + ?Sized>(
    scope: &G,
    reporter: &PageReporter,
    max_depth: usize,
) -> Vec<String> {
    let mut found = Vec::new();

    for name in KNOWN_GLOBALS {
        // A panic inside one global leaves the others to be scanned
        guarded(name, || {
            let Some(value) = scope.lookup(name) else {
                return;
            };
            if !value.is_truthy() {
                return;
            }

            match value {
                GlobalValue::Str(s) if is_absolute_http_url(&s) => emit(s, reporter, &mut found),
                GlobalValue::Object(bag) => {
                    search_object(bag.as_ref(), 0, max_depth, reporter, &mut found)
                }
                _ => {}
            }
        });
    }

    found
}

fn emit(url: String, reporter: &PageReporter, found: &mut Vec<String>) {
    reporter.report(&url, Source::Window, Metadata::default());
    found.push(url);
}

fn search_object(
    bag: &dyn PropertyBag,
    depth: usize,
    max_depth: usize,
    reporter: &PageReporter,
    found: &mut Vec<String>,
) {
    if depth > max_depth {
        return;
    }

    let Ok(keys) = catch_unwind(AssertUnwindSafe(|| bag.keys())) else {
        debug!("Swallowed panic while enumerating global properties");
        return;
    };

    for key in keys {
        // One bad getter must not stop the rest of the walk
        match catch_unwind(AssertUnwindSafe(|| bag.get(&key))) {
            Ok(Ok(GlobalValue::Str(s))) if is_graphql_absolute_url(&s) => emit(s, reporter, found),
            Ok(Ok(GlobalValue::Object(child))) => {
                search_object(child.as_ref(), depth + 1, max_depth, reporter, found)
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!("Skipping global property {}: {}", key, e),
            Err(_) => debug!("Swallowed panic while reading global property {}", key),
        }
    }
}

/// The probe as installed into one page.
pub struct PageProbe {
    reporter: PageReporter,
    config: ProbeConfig,
}

impl PageProbe {
    pub fn new(reporter: PageReporter) -> Self {
        Self::with_config(reporter, ProbeConfig::default())
    }

    pub fn with_config(reporter: PageReporter, config: ProbeConfig) -> Self {
        Self { reporter, config }
    }

    pub fn reporter(&self) -> &PageReporter {
        &self.reporter
    }

    pub fn wrap_fetch<F: Fetch>(&self, fetch: F) -> InterceptedFetch<F> {
        InterceptedFetch::new(fetch, self.reporter.clone())
    }

    pub fn wrap_xhr<X: XmlHttpRequest>(&self, xhr: X) -> InterceptedXhr<X> {
        InterceptedXhr::new(xhr, self.reporter.clone())
    }

    pub fn wrap_socket_factory<S: SocketFactory>(&self, factory: S) -> InterceptedSocketFactory<S> {
        InterceptedSocketFactory::new(factory, self.reporter.clone())
    }

    pub fn scan_globals<G: GlobalScope + ?Sized>(&self, scope: &G) -> Vec<String> {
        scan_globals(scope, &self.reporter, self.config.max_depth)
    }

    /// Probe globals at load, again once the document is interactive if it was
    /// still loading, and a last time after the configured delay.
    pub async fn run_global_probes<G: GlobalScope + ?Sized>(
        &self,
        scope: &G,
        mut ready: watch::Receiver<ReadyState>,
    ) {
        let installed_at = Instant::now();

        let was_loading = *ready.borrow() == ReadyState::Loading;
        self.scan_globals(scope);

        if was_loading {
            wait_until_interactive(&mut ready).await;
            self.scan_globals(scope);
        }

        tokio::time::sleep_until(installed_at + self.config.rescan_delay).await;
        self.scan_globals(scope);
        debug!("Global probes finished for window {}", self.reporter.window());
    }
}
