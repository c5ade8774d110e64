// In-page messaging and document lifecycle shared by the probe and the scanner

use crate::result::{EndpointReport, Metadata, Source};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Type tag carried by every probe broadcast.
pub const DETECTION_TAG: &str = "GRAPHQL_DETECTED";

/// Identifies the window a broadcast was posted from.
pub type WindowId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    Loading,
    Interactive,
    Complete,
}

/// Body of a probe broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub source: Source,
    #[serde(default)]
    pub metadata: Metadata,
}

impl DetectionPayload {
    pub fn new(url: impl Into<String>, source: Source, metadata: Metadata) -> Self {
        Self {
            kind: DETECTION_TAG.to_string(),
            url: url.into(),
            source,
            metadata,
        }
    }

    pub fn into_report(self) -> EndpointReport {
        EndpointReport::new(self.url, self.source).with_metadata(self.metadata)
    }
}

/// A same-origin window message. Any page script can post one, so `data` is untyped.
#[derive(Debug, Clone)]
pub struct WindowMessage {
    pub source_window: WindowId,
    pub data: serde_json::Value,
}

/// Posts detections to the page's own window.
#[derive(Debug, Clone)]
pub struct PageReporter {
    window: WindowId,
    tx: mpsc::UnboundedSender<WindowMessage>,
}

impl PageReporter {
    pub fn new(window: WindowId, tx: mpsc::UnboundedSender<WindowMessage>) -> Self {
        Self { window, tx }
    }

    pub fn window(&self) -> WindowId {
        self.window
    }

    pub fn report(&self, url: &str, source: Source, metadata: Metadata) {
        let payload = DetectionPayload::new(url, source, metadata);
        let data = match serde_json::to_value(&payload) {
            Ok(data) => data,
            Err(e) => {
                debug!("Dropping unserializable detection for {}: {}", url, e);
                return;
            }
        };

        // Nobody listening is a normal state for a one-way broadcast
        let _ = self.tx.send(WindowMessage {
            source_window: self.window,
            data,
        });
    }
}

/// Wait until the document has left the loading state.
pub async fn wait_until_interactive(ready: &mut watch::Receiver<ReadyState>) {
    let _ = ready.wait_for(|state| *state >= ReadyState::Interactive).await;
}
