// Tests for the page-context probe

use gqlfinder_scanner::error::{Result, ScanError};
use gqlfinder_scanner::page::{DETECTION_TAG, PageReporter, ReadyState, WindowMessage};
use gqlfinder_scanner::probe::{
    Fetch, FetchInput, GlobalScope, GlobalValue, PropertyBag, SocketFactory, XmlHttpRequest,
};
use gqlfinder_scanner::request::{BodyInit, RequestOptions};
use gqlfinder_scanner::{PageProbe, ProbeConfig};
use serde_json::json;
use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const WINDOW: u64 = 7;

fn probe() -> (PageProbe, mpsc::UnboundedReceiver<WindowMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (PageProbe::new(PageReporter::new(WINDOW, tx)), rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<WindowMessage>) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        assert_eq!(message.source_window, WINDOW);
        out.push(message.data);
    }
    out
}

// ============================================================================
// Host primitives
// ============================================================================

#[derive(Default)]
struct RecordingFetch {
    calls: RefCell<Vec<(FetchInput, RequestOptions)>>,
    fail: bool,
}

impl Fetch for RecordingFetch {
    type Output = std::result::Result<u16, String>;

    fn fetch(&self, input: FetchInput, options: RequestOptions) -> Self::Output {
        self.calls.borrow_mut().push((input, options));
        if self.fail {
            Err("network down".to_string())
        } else {
            Ok(200)
        }
    }
}

#[derive(Default)]
struct RecordingXhr {
    opened: Option<(String, String)>,
    sent: Vec<Option<BodyInit>>,
}

impl XmlHttpRequest for RecordingXhr {
    type Error = String;

    fn open(&mut self, method: &str, url: &str) -> std::result::Result<(), Self::Error> {
        self.opened = Some((method.to_string(), url.to_string()));
        Ok(())
    }

    fn send(&mut self, body: Option<BodyInit>) -> std::result::Result<(), Self::Error> {
        self.sent.push(body);
        Ok(())
    }
}

struct EchoSockets;

impl SocketFactory for EchoSockets {
    type Socket = (String, Vec<String>);
    type Error = String;

    fn connect(
        &self,
        url: &str,
        protocols: &[String],
    ) -> std::result::Result<Self::Socket, Self::Error> {
        if url.starts_with("ws") {
            Ok((url.to_string(), protocols.to_vec()))
        } else {
            Err(format!("bad scheme: {}", url))
        }
    }
}

// ============================================================================
// fetch
// ============================================================================

#[test]
fn test_fetch_reports_graphql_post() {
    let (probe, mut rx) = probe();
    let fetch = probe.wrap_fetch(RecordingFetch::default());

    let result = fetch.fetch(
        "https://api.example.com/graphql".into(),
        RequestOptions::new()
            .with_method("POST")
            .with_body(r#"{"query":"query { me { id } }"}"#),
    );
    assert_eq!(result, Ok(200));

    let messages = drain(&mut rx);
    assert_eq!(
        messages,
        vec![json!({
            "type": DETECTION_TAG,
            "url": "https://api.example.com/graphql",
            "source": "fetch()",
            "metadata": {"method": "POST"}
        })]
    );
}

#[test]
fn test_fetch_method_precedence() {
    let (probe, mut rx) = probe();
    let fetch = probe.wrap_fetch(RecordingFetch::default());

    let request = FetchInput::Request {
        url: "https://example.com/graphql".to_string(),
        method: "PUT".to_string(),
    };
    let _ = fetch.fetch(request.clone(), RequestOptions::new());
    let _ = fetch.fetch(request, RequestOptions::new().with_method("PATCH"));
    let _ = fetch.fetch("https://example.com/gql".into(), RequestOptions::new());

    let methods: Vec<_> = drain(&mut rx)
        .into_iter()
        .map(|m| m["metadata"]["method"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(methods, vec!["PUT", "PATCH", "GET"]);
}

#[test]
fn test_fetch_passes_through_unchanged() {
    let (probe, mut rx) = probe();
    let fetch = probe.wrap_fetch(RecordingFetch {
        fail: true,
        ..Default::default()
    });

    let options = RequestOptions::new().with_method("POST").with_body("a=1");
    let result = fetch.fetch("https://example.com/api/users".into(), options.clone());

    // The caller sees exactly the primitive's outcome
    assert_eq!(result, Err("network down".to_string()));
    assert!(drain(&mut rx).is_empty());

    let inner = fetch.into_inner();
    let calls = inner.calls.borrow();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, FetchInput::Url("https://example.com/api/users".to_string()));
    assert_eq!(calls[0].1, options);
}

// ============================================================================
// XMLHttpRequest
// ============================================================================

#[test]
fn test_xhr_reports_on_send_with_open_method() {
    let (probe, mut rx) = probe();
    let mut xhr = probe.wrap_xhr(RecordingXhr::default());

    xhr.open("POST", "https://example.com/api").unwrap();
    assert!(drain(&mut rx).is_empty());

    xhr.send(Some(BodyInit::Text(r#"{"operationName":"Me"}"#.to_string())))
        .unwrap();

    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["source"], "XHR");
    assert_eq!(messages[0]["url"], "https://example.com/api");
    assert_eq!(messages[0]["metadata"]["method"], "POST");

    assert_eq!(
        xhr.inner().opened,
        Some(("POST".to_string(), "https://example.com/api".to_string()))
    );
    assert_eq!(xhr.inner().sent.len(), 1);
}

#[test]
fn test_xhr_ignores_plain_traffic() {
    let (probe, mut rx) = probe();
    let mut xhr = probe.wrap_xhr(RecordingXhr::default());

    xhr.open("GET", "https://example.com/api/users").unwrap();
    xhr.send(None).unwrap();

    assert!(drain(&mut rx).is_empty());
    assert_eq!(xhr.inner().sent, vec![None]);
}

#[test]
fn test_xhr_send_without_open_is_delegated() {
    let (probe, mut rx) = probe();
    let mut xhr = probe.wrap_xhr(RecordingXhr::default());

    xhr.send(Some("query { me }".into())).unwrap();
    assert!(drain(&mut rx).is_empty());
    assert_eq!(xhr.inner().sent.len(), 1);
}

// ============================================================================
// WebSocket
// ============================================================================

#[test]
fn test_socket_reports_and_returns_connection() {
    let (probe, mut rx) = probe();
    let sockets = probe.wrap_socket_factory(EchoSockets);

    let protocols = vec!["graphql-transport-ws".to_string()];
    let socket = sockets
        .connect("wss://example.com/subscriptions", &protocols)
        .unwrap();
    assert_eq!(socket, ("wss://example.com/subscriptions".to_string(), protocols));

    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["source"], "WebSocket");
    assert_eq!(messages[0]["metadata"], json!({}));
}

#[test]
fn test_socket_errors_propagate() {
    let (probe, mut rx) = probe();
    let sockets = probe.wrap_socket_factory(EchoSockets);

    let result = sockets.connect("http://example.com/graphql", &[]);
    assert_eq!(result, Err("bad scheme: http://example.com/graphql".to_string()));
    // Detection still ran
    assert_eq!(drain(&mut rx).len(), 1);

    sockets.connect("wss://chat.example.com/ws", &[]).unwrap();
    assert!(drain(&mut rx).is_empty());
}

// ============================================================================
// Globals
// ============================================================================

fn urls(messages: &[serde_json::Value]) -> Vec<String> {
    messages
        .iter()
        .map(|m| {
            assert_eq!(m["source"], "Window");
            m["url"].as_str().unwrap().to_string()
        })
        .collect()
}

#[test]
fn test_globals_top_level_strings() {
    let (probe, mut rx) = probe();
    let globals = json!({
        "__GRAPHQL_ENDPOINT__": "https://api.example.com/v1",
        "graphql": "/relative/graphql",
        "gql": "",
        "unrelated": "https://api.example.com/graphql"
    });

    let found = probe.scan_globals(globals.as_object().unwrap());
    assert_eq!(found, vec!["https://api.example.com/v1"]);
    assert_eq!(urls(&drain(&mut rx)), found);
}

#[test]
fn test_globals_nested_search_depth() {
    let (probe, mut rx) = probe();
    let globals = json!({
        "__APOLLO_CLIENT__": {
            "link": {
                "options": {"uri": "https://api.example.com/graphql"},
                "deeper": {"too": {"far": "https://hidden.example.com/graphql"}}
            },
            "cdn": "https://cdn.example.com/app.js",
            "version": 3
        }
    });

    let found = probe.scan_globals(globals.as_object().unwrap());
    assert_eq!(found, vec!["https://api.example.com/graphql"]);
    assert_eq!(urls(&drain(&mut rx)), found);
}

#[test]
fn test_globals_custom_depth() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let probe = PageProbe::with_config(
        PageReporter::new(WINDOW, tx),
        ProbeConfig {
            max_depth: 0,
            ..ProbeConfig::default()
        },
    );
    let globals = json!({
        "__RELAY_ENVIRONMENT__": {
            "endpoint": "https://api.example.com/graphql",
            "network": {"url": "https://nested.example.com/graphql"}
        }
    });

    let found = probe.scan_globals(globals.as_object().unwrap());
    assert_eq!(found, vec!["https://api.example.com/graphql"]);
}

struct FlakyBag;

impl PropertyBag for FlakyBag {
    fn keys(&self) -> Vec<String> {
        vec!["broken".to_string(), "uri".to_string()]
    }

    fn get(&self, key: &str) -> Result<GlobalValue> {
        match key {
            "broken" => Err(ScanError::PropertyAccess("getter threw".to_string())),
            _ => Ok(GlobalValue::Str("https://api.example.com/graphql".to_string())),
        }
    }
}

struct ExplodingBag;

impl PropertyBag for ExplodingBag {
    fn keys(&self) -> Vec<String> {
        panic!("enumeration blew up")
    }

    fn get(&self, _key: &str) -> Result<GlobalValue> {
        Ok(GlobalValue::Other)
    }
}

struct PanickingGetterBag;

impl PropertyBag for PanickingGetterBag {
    fn keys(&self) -> Vec<String> {
        vec!["trap".to_string(), "endpoint".to_string()]
    }

    fn get(&self, key: &str) -> Result<GlobalValue> {
        match key {
            "trap" => panic!("getter blew up"),
            _ => Ok(GlobalValue::Str("https://relay.example.com/graphql".to_string())),
        }
    }
}

struct Scope(Vec<(&'static str, GlobalValue)>);

impl GlobalScope for Scope {
    fn lookup(&self, name: &str) -> Option<GlobalValue> {
        self.0
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, value)| value.clone())
    }
}

#[test]
fn test_globals_skip_failing_getters() {
    let (probe, mut rx) = probe();
    let scope = Scope(vec![("__APOLLO_CLIENT__", GlobalValue::Object(Arc::new(FlakyBag)))]);

    let found = probe.scan_globals(&scope);
    assert_eq!(found, vec!["https://api.example.com/graphql"]);
    assert_eq!(drain(&mut rx).len(), 1);
}

#[test]
fn test_globals_panic_is_contained() {
    let (probe, mut rx) = probe();
    let scope = Scope(vec![("gql", GlobalValue::Object(Arc::new(ExplodingBag)))]);

    let found = probe.scan_globals(&scope);
    assert!(found.is_empty());
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn test_globals_panic_spares_other_globals() {
    let (probe, mut rx) = probe();
    let scope = Scope(vec![
        (
            "__APOLLO_CLIENT__",
            GlobalValue::from_json(&json!({"uri": "https://api.example.com/graphql"})),
        ),
        ("gql", GlobalValue::Object(Arc::new(ExplodingBag))),
        (
            "__GRAPHQL_ENDPOINT__",
            GlobalValue::Str("https://edge.example.com/graphql".to_string()),
        ),
    ]);

    let found = probe.scan_globals(&scope);
    assert_eq!(
        found,
        vec!["https://api.example.com/graphql", "https://edge.example.com/graphql"]
    );
    let messages = drain(&mut rx);
    assert_eq!(urls(&messages), found);
}

#[test]
fn test_globals_panicking_getter_spares_siblings() {
    let (probe, mut rx) = probe();
    let scope = Scope(vec![(
        "__RELAY_ENVIRONMENT__",
        GlobalValue::Object(Arc::new(PanickingGetterBag)),
    )]);

    let found = probe.scan_globals(&scope);
    assert_eq!(found, vec!["https://relay.example.com/graphql"]);
    assert_eq!(drain(&mut rx).len(), 1);
}

// ============================================================================
// Schedule
// ============================================================================

struct CountingScope {
    globals: serde_json::Map<String, serde_json::Value>,
    scans: AtomicUsize,
}

impl CountingScope {
    fn new() -> Self {
        let globals = json!({"__GRAPHQL_ENDPOINT__": "https://api.example.com/graphql"});
        Self {
            globals: globals.as_object().unwrap().clone(),
            scans: AtomicUsize::new(0),
        }
    }

    fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

impl GlobalScope for CountingScope {
    fn lookup(&self, name: &str) -> Option<GlobalValue> {
        if name == "__APOLLO_CLIENT__" {
            self.scans.fetch_add(1, Ordering::SeqCst);
        }
        self.globals.lookup(name)
    }
}

#[tokio::test(start_paused = true)]
async fn test_probe_schedule_while_loading() {
    let (probe, mut rx) = probe();
    let scope = CountingScope::new();
    let (ready_tx, ready_rx) = watch::channel(ReadyState::Loading);

    let driver = async {
        tokio::task::yield_now().await;
        assert_eq!(scope.scans(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        ready_tx.send(ReadyState::Interactive).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(scope.scans(), 2);

        // Last probe is two seconds after installation
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(scope.scans(), 2);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(scope.scans(), 3);
    };

    tokio::join!(probe.run_global_probes(&scope, ready_rx), driver);

    assert_eq!(scope.scans(), 3);
    assert_eq!(drain(&mut rx).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_probe_schedule_after_load() {
    let (probe, _rx) = probe();
    let scope = CountingScope::new();
    let (_ready_tx, ready_rx) = watch::channel(ReadyState::Complete);

    let start = tokio::time::Instant::now();
    probe.run_global_probes(&scope, ready_rx).await;

    assert_eq!(scope.scans(), 2);
    assert!(start.elapsed() >= Duration::from_secs(2));
}
