use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Browser tab identifier. Negative values mean "not associated with a tab".
pub type TabId = i64;

/// Detection channel that produced an endpoint signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Source {
    /// Browser-level observation of a request or its completed response
    #[serde(rename = "Network")]
    Network,
    #[serde(rename = "Script")]
    Script,
    #[serde(rename = "DOM")]
    Dom,
    #[serde(rename = "Meta")]
    Meta,
    #[serde(rename = "Window")]
    Window,
    #[serde(rename = "fetch()")]
    Fetch,
    #[serde(rename = "XHR")]
    Xhr,
    #[serde(rename = "WebSocket")]
    WebSocket,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Network => "Network",
            Source::Script => "Script",
            Source::Dom => "DOM",
            Source::Meta => "Meta",
            Source::Window => "Window",
            Source::Fetch => "fetch()",
            Source::Xhr => "XHR",
            Source::WebSocket => "WebSocket",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Auxiliary attributes attached to a detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Metadata {
    pub fn with_method(method: impl Into<String>) -> Self {
        Self {
            method: Some(method.into()),
            extra: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.method.is_none() && self.extra.is_empty()
    }
}

/// One detection as it travels from a scanner or probe to the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointReport {
    pub url: String,
    pub source: Source,
    #[serde(default)]
    pub metadata: Metadata,
}

impl EndpointReport {
    pub fn new(url: impl Into<String>, source: Source) -> Self {
        Self {
            url: url.into(),
            source,
            metadata: Metadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Key used to suppress redundant insertion within one tab.
pub type DedupKey = (String, Source);

/// A persisted detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointRecord {
    pub url: String,
    pub source: Source,
    #[serde(default)]
    pub metadata: Metadata,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl EndpointRecord {
    pub fn from_report(report: EndpointReport, timestamp: i64) -> Self {
        Self {
            url: report.url,
            source: report.source,
            metadata: report.metadata,
            timestamp,
        }
    }

    pub fn key(&self) -> DedupKey {
        (self.url.clone(), self.source)
    }
}
