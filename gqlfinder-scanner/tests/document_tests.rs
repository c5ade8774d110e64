// Tests for the document scanner

use gqlfinder_scanner::document::{
    AddedNode, DocumentSource, MutationRecord, PROBE_RESOURCE, ScriptInjector,
    extract_inline_endpoints, extract_page_endpoints, extract_script_endpoints,
};
use gqlfinder_scanner::error::{Result, ScanError};
use gqlfinder_scanner::page::{DETECTION_TAG, ReadyState, WindowMessage};
use gqlfinder_scanner::{DocumentScanner, EndpointReport, Metadata, ScannerConfig, Source};
use scraper::Html;
use serde_json::json;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use url::Url;

const WINDOW: u64 = 3;

const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta name="graphql-endpoint" content="https://api.example.com/graphql">
  <meta property="og:graphql" content="">
  <meta name="description" content="A graphql shop">
  <script src="/js/apollo-client.js"></script>
  <script src="/js/app.js"></script>
  <script src=""></script>
</head>
<body>
  <div data-graphql="/api/graphql"></div>
  <section data-gql="" data-apollo="https://apollo.example.com/graphql"></section>
  <span data-gql=""></span>
  <script>
    const client = new Client({ endpoint: "/v2/graphql" });
    fetch('https://api.example.com/gql/batch');
  </script>
</body>
</html>"#;

fn base() -> Url {
    Url::parse("https://shop.example.com/products/").unwrap()
}

fn scanner() -> (
    DocumentScanner<mpsc::UnboundedSender<EndpointReport>>,
    mpsc::UnboundedReceiver<EndpointReport>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DocumentScanner::new(WINDOW, tx).with_base_url(base()), rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<EndpointReport>) -> Vec<(String, Source)> {
    let mut out = Vec::new();
    while let Ok(report) = rx.try_recv() {
        out.push((report.url, report.source));
    }
    out
}

fn pair(url: &str, source: Source) -> (String, Source) {
    (url.to_string(), source)
}

// ============================================================================
// Static extraction
// ============================================================================

#[test]
fn test_script_sources_are_resolved_and_filtered() {
    let document = Html::parse_document(PAGE);
    let base = base();
    let reports = extract_script_endpoints(&document, Some(&base));
    let found: Vec<_> = reports.into_iter().map(|r| (r.url, r.source)).collect();

    assert!(found.contains(&pair("https://shop.example.com/js/apollo-client.js", Source::Script)));
    assert!(!found.iter().any(|(url, _)| url.ends_with("/js/app.js")));
}

#[test]
fn test_inline_script_patterns() {
    let found: Vec<String> = extract_inline_endpoints(
        r#"
        const a = "https://api.example.com/graphql";
        const b = `http://localhost:4000/api/graph`;
        config.endpoint = '/internal/graphql';
        const opts = { url: "/v3/graphql" };
        const noise = "https://cdn.example.com/app.js";
        "#,
    )
    .into_iter()
    .map(|r| {
        assert_eq!(r.source, Source::Script);
        r.url
    })
    .collect();

    assert!(found.contains(&"https://api.example.com/graphql".to_string()));
    assert!(found.contains(&"http://localhost:4000/api/graph".to_string()));
    assert!(found.contains(&"/internal/graphql".to_string()));
    assert!(found.contains(&"/v3/graphql".to_string()));
    assert!(!found.iter().any(|url| url.contains("cdn.example.com")));
}

#[test]
fn test_inline_script_without_candidates() {
    assert!(extract_inline_endpoints("console.log('hello world');").is_empty());
}

#[test]
fn test_page_attributes_and_meta() {
    let document = Html::parse_document(PAGE);
    let found: Vec<_> = extract_page_endpoints(&document)
        .into_iter()
        .map(|r| (r.url, r.source))
        .collect();

    assert_eq!(
        found,
        vec![
            pair("/api/graphql", Source::Dom),
            pair("https://apollo.example.com/graphql", Source::Dom),
            pair("https://api.example.com/graphql", Source::Meta),
        ]
    );
}

// ============================================================================
// Scanner operations
// ============================================================================

#[test]
fn test_scan_document_reports_everything() {
    let (scanner, mut rx) = scanner();
    let count = scanner.scan_document(PAGE);
    let found = drain(&mut rx);

    assert_eq!(count, found.len());
    assert!(found.contains(&pair("https://shop.example.com/js/apollo-client.js", Source::Script)));
    assert!(found.contains(&pair("/v2/graphql", Source::Script)));
    assert!(found.contains(&pair("https://api.example.com/gql/batch", Source::Script)));
    assert!(found.contains(&pair("/api/graphql", Source::Dom)));
    assert!(found.contains(&pair("https://api.example.com/graphql", Source::Meta)));
}

#[test]
fn test_relay_forwards_tagged_messages_from_own_window() {
    let (scanner, mut rx) = scanner();

    let payload = json!({
        "type": DETECTION_TAG,
        "url": "https://api.example.com/graphql",
        "source": "fetch()",
        "metadata": {"method": "POST"}
    });
    assert!(scanner.relay(&WindowMessage {
        source_window: WINDOW,
        data: payload.clone(),
    }));

    let report = rx.try_recv().unwrap();
    assert_eq!(report.source, Source::Fetch);
    assert_eq!(report.metadata, Metadata::with_method("POST"));

    // Another frame
    assert!(!scanner.relay(&WindowMessage {
        source_window: WINDOW + 1,
        data: payload,
    }));
    // Unrelated page chatter
    assert!(!scanner.relay(&WindowMessage {
        source_window: WINDOW,
        data: json!({"type": "ANALYTICS", "url": "https://x.example.com/graphql"}),
    }));
    // Tagged but malformed
    assert!(!scanner.relay(&WindowMessage {
        source_window: WINDOW,
        data: json!({"type": DETECTION_TAG, "url": 42}),
    }));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_mutations_report_added_scripts_only() {
    let (scanner, mut rx) = scanner();
    let records = vec![
        MutationRecord {
            added_nodes: vec![
                AddedNode::script("/chunks/relay-modern.js"),
                AddedNode::script("/chunks/vendor.js"),
                AddedNode::element("DIV"),
            ],
        },
        MutationRecord {
            added_nodes: vec![AddedNode {
                node_name: "script".to_string(),
                src: Some("https://cdn.example.com/graphql-ws.js".to_string()),
            }],
        },
    ];

    assert_eq!(scanner.handle_mutations(&records), 2);
    assert_eq!(
        drain(&mut rx),
        vec![
            pair("https://shop.example.com/chunks/relay-modern.js", Source::Script),
            pair("https://cdn.example.com/graphql-ws.js", Source::Script),
        ]
    );
}

// ============================================================================
// Lifecycle
// ============================================================================

#[derive(Default)]
struct RecordingInjector {
    injected: Mutex<Vec<String>>,
    fail: bool,
}

impl ScriptInjector for RecordingInjector {
    fn inject_script(&self, resource: &str) -> Result<()> {
        if self.fail {
            return Err(ScanError::Injection("no document element".to_string()));
        }
        self.injected.lock().unwrap().push(resource.to_string());
        Ok(())
    }
}

struct CountingDocument {
    html: &'static str,
    reads: AtomicUsize,
}

impl CountingDocument {
    fn new(html: &'static str) -> Self {
        Self {
            html,
            reads: AtomicUsize::new(0),
        }
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl DocumentSource for CountingDocument {
    fn html(&self) -> String {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.html.to_string()
    }
}

#[tokio::test(start_paused = true)]
async fn test_run_follows_document_lifecycle() {
    let (scanner, mut rx) = scanner();
    let document = CountingDocument::new(PAGE);
    let injector = RecordingInjector::default();

    let (ready_tx, ready_rx) = watch::channel(ReadyState::Loading);
    let (window_tx, window_rx) = mpsc::unbounded_channel();
    let (mutation_tx, mutation_rx) = mpsc::unbounded_channel();

    let driver = async {
        // Probe broadcasts are relayed even before the DOM is ready
        window_tx
            .send(WindowMessage {
                source_window: WINDOW,
                data: json!({
                    "type": DETECTION_TAG,
                    "url": "wss://api.example.com/subscriptions",
                    "source": "WebSocket"
                }),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(document.reads(), 0);
        assert!(injector.injected.lock().unwrap().is_empty());

        ready_tx.send(ReadyState::Interactive).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(document.reads(), 1);
        assert_eq!(*injector.injected.lock().unwrap(), vec![PROBE_RESOURCE.to_string()]);

        mutation_tx
            .send(vec![MutationRecord {
                added_nodes: vec![AddedNode::script("/late/apollo-link.js")],
            }])
            .unwrap();

        ready_tx.send(ReadyState::Complete).unwrap();
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(document.reads(), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(document.reads(), 2);

        drop(ready_tx);
        drop(window_tx);
        drop(mutation_tx);
    };

    tokio::join!(
        scanner.run(&document, &injector, ready_rx, window_rx, mutation_rx),
        driver
    );

    let found = drain(&mut rx);
    assert_eq!(found[0], pair("wss://api.example.com/subscriptions", Source::WebSocket));
    assert!(found.contains(&pair("https://shop.example.com/late/apollo-link.js", Source::Script)));
    // Initial and delayed scans both report
    let meta = pair("https://api.example.com/graphql", Source::Meta);
    assert_eq!(found.iter().filter(|f| **f == meta).count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_run_scans_even_when_injection_fails() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scanner = DocumentScanner::new(WINDOW, tx).with_config(ScannerConfig {
        rescan_delay: Duration::ZERO,
    });
    let injector = RecordingInjector {
        fail: true,
        ..Default::default()
    };

    let (ready_tx, ready_rx) = watch::channel(ReadyState::Complete);
    let (window_tx, window_rx) = mpsc::unbounded_channel::<WindowMessage>();
    let (mutation_tx, mutation_rx) = mpsc::unbounded_channel();
    drop(ready_tx);
    drop(window_tx);
    drop(mutation_tx);

    scanner
        .run(PAGE, &injector, ready_rx, window_rx, mutation_rx)
        .await;

    let found = drain(&mut rx);
    let meta = pair("https://api.example.com/graphql", Source::Meta);
    assert_eq!(found.iter().filter(|f| **f == meta).count(), 2);
    assert!(injector.injected.lock().unwrap().is_empty());
}
