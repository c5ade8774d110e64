// Browser-level traffic observation, independent of the page scanners

use gqlfinder_scanner::classifier::{headers_match, is_graphql_related};
use gqlfinder_scanner::{EndpointReport, Metadata, Source, TabId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request body as reported by the browser before the request is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequestBody {
    /// Raw upload chunks
    Raw(Vec<Vec<u8>>),
    /// Parsed form-encoded fields
    FormData(BTreeMap<String, Vec<String>>),
}

impl RequestBody {
    /// Canonical string form used for classification.
    pub fn canonical(&self) -> String {
        match self {
            RequestBody::Raw(chunks) => chunks
                .iter()
                .map(|chunk| String::from_utf8_lossy(chunk))
                .collect(),
            RequestBody::FormData(fields) => serde_json::to_string(fields).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDetails {
    pub tab_id: TabId,
    pub url: String,
    pub method: String,
    pub request_body: Option<RequestBody>,
}

impl RequestDetails {
    pub fn new(tab_id: TabId, url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            tab_id,
            url: url.into(),
            method: method.into(),
            request_body: None,
        }
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.request_body = Some(body);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpHeader {
    pub name: String,
    pub value: Option<String>,
}

impl HttpHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedDetails {
    pub tab_id: TabId,
    pub url: String,
    pub response_headers: Vec<HttpHeader>,
}

impl CompletedDetails {
    pub fn new(tab_id: TabId, url: impl Into<String>, response_headers: Vec<HttpHeader>) -> Self {
        Self {
            tab_id,
            url: url.into(),
            response_headers,
        }
    }
}

/// Request-phase classification. `None` for background requests and misses.
pub fn classify_request(details: &RequestDetails) -> Option<EndpointReport> {
    if details.tab_id < 0 {
        return None;
    }

    let body = details
        .request_body
        .as_ref()
        .map(RequestBody::canonical)
        .unwrap_or_default();

    is_graphql_related(&details.url, Some(&body)).then(|| {
        EndpointReport::new(details.url.clone(), Source::Network)
            .with_metadata(Metadata::with_method(details.method.clone()))
    })
}

/// Response-phase classification on headers, falling back to the URL.
pub fn classify_response(details: &CompletedDetails) -> Option<EndpointReport> {
    if details.tab_id < 0 {
        return None;
    }

    let graphql_headers = headers_match(
        details
            .response_headers
            .iter()
            .map(|h| (h.name.as_str(), h.value.as_deref().unwrap_or_default())),
    );

    (graphql_headers || is_graphql_related(&details.url, None))
        .then(|| EndpointReport::new(details.url.clone(), Source::Network))
}
