// Cross-context message contract between scanners, the popup and the aggregator

use crate::aggregator::Aggregator;
use crate::badge::Badge;
use crate::storage::Storage;
use gqlfinder_scanner::document::ReportSink;
use gqlfinder_scanner::{EndpointRecord, EndpointReport, Metadata, Source, TabId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Wire form of a runtime message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    GraphqlEndpointFound {
        url: String,
        source: Source,
        #[serde(default)]
        metadata: Metadata,
    },
    GetEndpoints {
        #[serde(rename = "tabId")]
        tab_id: TabId,
    },
    ClearEndpoints {
        #[serde(rename = "tabId")]
        tab_id: TabId,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Endpoints { endpoints: Vec<EndpointRecord> },
    Cleared { success: bool },
}

/// A request in flight. `sender_tab` is filled in by the transport for
/// messages coming from a page; `reply` is absent for one-way messages.
#[derive(Debug)]
pub struct Envelope {
    pub request: Request,
    pub sender_tab: Option<TabId>,
    pub reply: Option<oneshot::Sender<Response>>,
}

impl<S: Storage, B: Badge> Aggregator<S, B> {
    pub async fn handle(&self, envelope: Envelope) {
        let Envelope {
            request,
            sender_tab,
            reply,
        } = envelope;

        let response = match request {
            Request::GraphqlEndpointFound {
                url,
                source,
                metadata,
            } => {
                match sender_tab {
                    Some(tab_id) if tab_id >= 0 => {
                        let report = EndpointReport::new(url, source).with_metadata(metadata);
                        self.add_endpoint(tab_id, report).await;
                    }
                    _ => debug!("Dropping detection of {} without a sender tab", url),
                }
                None
            }
            Request::GetEndpoints { tab_id } => Some(Response::Endpoints {
                endpoints: self.get_endpoints(tab_id).await,
            }),
            Request::ClearEndpoints { tab_id } => {
                self.clear_endpoints(tab_id).await;
                Some(Response::Cleared { success: true })
            }
        };

        if let (Some(reply), Some(response)) = (reply, response) {
            // The asker may have gone away; that is not our problem
            let _ = reply.send(response);
        }
    }

    /// Process messages until every sender is gone.
    pub async fn serve(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<Envelope>) {
        while let Some(envelope) = inbox.recv().await {
            self.handle(envelope).await;
        }
        debug!("Runtime inbox closed");
    }
}

/// Sending half of the runtime, as seen from scanners and the popup.
#[derive(Debug, Clone)]
pub struct RuntimeClient {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl RuntimeClient {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn post(&self, envelope: Envelope) {
        let _ = self.tx.send(envelope);
    }

    async fn ask(&self, request: Request) -> Option<Response> {
        let (reply, response) = oneshot::channel();
        self.post(Envelope {
            request,
            sender_tab: None,
            reply: Some(reply),
        });
        response.await.ok()
    }

    /// Fire-and-forget detection from a page in `tab_id`.
    pub fn endpoint_found(&self, tab_id: TabId, report: EndpointReport) {
        self.post(Envelope {
            request: Request::GraphqlEndpointFound {
                url: report.url,
                source: report.source,
                metadata: report.metadata,
            },
            sender_tab: Some(tab_id),
            reply: None,
        });
    }

    pub async fn get_endpoints(&self, tab_id: TabId) -> Vec<EndpointRecord> {
        match self.ask(Request::GetEndpoints { tab_id }).await {
            Some(Response::Endpoints { endpoints }) => endpoints,
            _ => Vec::new(),
        }
    }

    pub async fn clear_endpoints(&self, tab_id: TabId) -> bool {
        matches!(
            self.ask(Request::ClearEndpoints { tab_id }).await,
            Some(Response::Cleared { success: true })
        )
    }

    /// A report sink bound to one tab, for a page's document scanner.
    pub fn tab_sink(&self, tab_id: TabId) -> TabSink {
        TabSink {
            tab_id,
            client: self.clone(),
        }
    }
}

/// Forwards a page's reports to the runtime tagged with its tab.
#[derive(Debug, Clone)]
pub struct TabSink {
    tab_id: TabId,
    client: RuntimeClient,
}

impl ReportSink for TabSink {
    fn send_report(&self, report: EndpointReport) {
        self.client.endpoint_found(self.tab_id, report);
    }
}
