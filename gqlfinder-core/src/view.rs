// Popup view model: grouping, labels and the popup's calls into the runtime

use crate::error::ExportError;
use crate::export::{ExportDocument, build_export};
use crate::runtime::RuntimeClient;
use chrono::{DateTime, Utc};
use colored::Colorize;
use gqlfinder_scanner::{EndpointRecord, Metadata, TabId};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewFormat {
    Text,
    Json,
}

impl ViewFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" => Some(ViewFormat::Text),
            "json" => Some(ViewFormat::Json),
            _ => None,
        }
    }
}

/// One displayed entry: every record sharing a URL merged together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointCard {
    pub url: String,
    /// Sources in detection order, comma-joined
    pub source: String,
    /// Timestamp of the first record for this URL
    pub timestamp: i64,
    pub metadata: Metadata,
}

/// Group records by URL, keeping first-seen order and the first record's
/// timestamp and metadata.
pub fn group_by_url(records: &[EndpointRecord]) -> Vec<EndpointCard> {
    let mut cards: Vec<EndpointCard> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for record in records {
        match index.get(record.url.as_str()) {
            Some(&i) => {
                let card = &mut cards[i];
                card.source.push_str(", ");
                card.source.push_str(record.source.as_str());
            }
            None => {
                index.insert(record.url.as_str(), cards.len());
                cards.push(EndpointCard {
                    url: record.url.clone(),
                    source: record.source.as_str().to_string(),
                    timestamp: record.timestamp,
                    metadata: record.metadata.clone(),
                });
            }
        }
    }

    cards
}

/// Coarse relative age, both arguments in epoch milliseconds.
pub fn time_ago(timestamp: i64, now: i64) -> String {
    let seconds = (now - timestamp).div_euclid(1000);
    if seconds < 60 {
        "Just now".to_string()
    } else if seconds < 3600 {
        format!("{}m ago", seconds / 60)
    } else if seconds < 86400 {
        format!("{}h ago", seconds / 3600)
    } else {
        format!("{}d ago", seconds / 86400)
    }
}

/// Tags shown under a card. Only the HTTP method is surfaced.
pub fn metadata_tags(metadata: &Metadata) -> Vec<String> {
    metadata.method.iter().cloned().collect()
}

pub fn render_text(tab_id: TabId, records: &[EndpointRecord], now: i64) -> String {
    let cards = group_by_url(records);

    let mut out = String::new();
    out.push_str(&format!("{}\n", "═".repeat(60).bright_blue().bold()));
    out.push_str(&format!(
        "  {} {}  {} {}\n",
        "Tab".bright_white().bold(),
        tab_id,
        "Endpoints:".bright_white().bold(),
        records.len()
    ));
    out.push_str(&format!("{}\n", "═".repeat(60).bright_blue().bold()));

    if cards.is_empty() {
        out.push_str("\n  No GraphQL endpoints detected\n");
        return out;
    }

    for card in cards {
        out.push('\n');
        out.push_str(&format!(
            "  {}  {}\n",
            card.source.bright_cyan(),
            time_ago(card.timestamp, now).bright_black()
        ));
        out.push_str(&format!("  {}\n", card.url.bright_white()));
        let tags = metadata_tags(&card.metadata);
        if !tags.is_empty() {
            out.push_str(&format!("  {}\n", tags.join(" ").yellow()));
        }
    }

    out
}

pub fn render_json(records: &[EndpointRecord]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&group_by_url(records))
}

/// System clipboard as seen by the popup.
pub trait Clipboard {
    type Error: fmt::Display;

    fn write_text(&mut self, text: &str) -> Result<(), Self::Error>;
}

/// Opens a URL in a new tab.
pub trait TabOpener {
    fn open_tab(&mut self, url: &str);
}

/// Transient message shown over the popup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub is_error: bool,
}

impl Notification {
    /// How long a notification stays on screen
    pub const DISPLAY_TIME: Duration = Duration::from_secs(2);

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: true,
        }
    }
}

/// The popup for one tab. Always waits on the runtime; never reads storage.
pub struct Popup {
    tab_id: TabId,
    client: RuntimeClient,
    endpoints: Vec<EndpointRecord>,
}

impl Popup {
    pub fn new(tab_id: TabId, client: RuntimeClient) -> Self {
        Self {
            tab_id,
            client,
            endpoints: Vec::new(),
        }
    }

    pub async fn load(&mut self) -> &[EndpointRecord] {
        self.endpoints = self.client.get_endpoints(self.tab_id).await;
        &self.endpoints
    }

    pub async fn clear(&mut self) -> bool {
        let cleared = self.client.clear_endpoints(self.tab_id).await;
        if cleared {
            self.endpoints.clear();
        }
        cleared
    }

    pub fn endpoints(&self) -> &[EndpointRecord] {
        &self.endpoints
    }

    pub fn cards(&self) -> Vec<EndpointCard> {
        group_by_url(&self.endpoints)
    }

    pub fn export(&self, now: DateTime<Utc>) -> Result<ExportDocument, ExportError> {
        build_export(self.tab_id, &self.endpoints, now)
    }

    /// Copy a card's URL. The only action whose failure the user sees.
    pub fn copy<C: Clipboard + ?Sized>(&self, clipboard: &mut C, url: &str) -> Notification {
        match clipboard.write_text(url) {
            Ok(()) => Notification::info("Copied to clipboard!"),
            Err(e) => {
                debug!("Clipboard write failed: {}", e);
                Notification::error("Failed to copy")
            }
        }
    }

    pub fn open<O: TabOpener + ?Sized>(&self, opener: &mut O, url: &str) {
        opener.open_tab(url);
    }
}
