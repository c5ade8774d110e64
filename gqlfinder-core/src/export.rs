// Export of a tab's endpoints as a downloadable JSON document

use crate::error::ExportError;
use chrono::{DateTime, SecondsFormat, Utc};
use gqlfinder_scanner::{EndpointRecord, Metadata, Source, TabId};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub export_date: String,
    pub tab_id: TabId,
    pub endpoint_count: usize,
    pub endpoints: Vec<ExportedEndpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedEndpoint {
    pub url: String,
    pub source: Source,
    pub metadata: Metadata,
    pub timestamp: i64,
    pub detected_at: String,
}

/// ISO-8601 with millisecond precision and a `Z` suffix.
pub fn iso_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn iso_from_millis(millis: i64) -> Result<String, ExportError> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(iso_timestamp)
        .ok_or(ExportError::InvalidTimestamp(millis))
}

/// Build the export document. Every persisted record is exported, not the
/// grouped view.
pub fn build_export(
    tab_id: TabId,
    records: &[EndpointRecord],
    now: DateTime<Utc>,
) -> Result<ExportDocument, ExportError> {
    if records.is_empty() {
        return Err(ExportError::Empty);
    }

    let endpoints = records
        .iter()
        .map(|record| {
            Ok(ExportedEndpoint {
                url: record.url.clone(),
                source: record.source,
                metadata: record.metadata.clone(),
                timestamp: record.timestamp,
                detected_at: iso_from_millis(record.timestamp)?,
            })
        })
        .collect::<Result<Vec<_>, ExportError>>()?;

    Ok(ExportDocument {
        export_date: iso_timestamp(now),
        tab_id,
        endpoint_count: endpoints.len(),
        endpoints,
    })
}

pub fn export_file_name(now: DateTime<Utc>) -> String {
    format!("graphql-endpoints-{}.json", now.timestamp_millis())
}

pub fn render_export(document: &ExportDocument) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(document)?)
}

pub fn write_export(document: &ExportDocument, path: &Path) -> Result<(), ExportError> {
    let mut file = File::create(path)?;
    file.write_all(render_export(document)?.as_bytes())?;
    Ok(())
}
