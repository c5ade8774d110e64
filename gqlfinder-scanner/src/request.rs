// Request option shapes that page code hands to the network primitives

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Body passed to a fetch call or an XHR send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BodyInit {
    Text(String),
    Json(serde_json::Value),
    /// Structured form fields, in insertion order
    Form(Vec<(String, String)>),
    Bytes(Vec<u8>),
}

impl BodyInit {
    /// Canonical string form used for classification.
    pub fn canonical(&self) -> String {
        match self {
            BodyInit::Text(text) => text.clone(),
            BodyInit::Json(value) => value.to_string(),
            BodyInit::Form(fields) => {
                let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
                for (name, value) in fields {
                    grouped.entry(name.as_str()).or_default().push(value.as_str());
                }
                serde_json::to_string(&grouped).unwrap_or_default()
            }
            BodyInit::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

impl From<&str> for BodyInit {
    fn from(text: &str) -> Self {
        BodyInit::Text(text.to_string())
    }
}

impl From<String> for BodyInit {
    fn from(text: String) -> Self {
        BodyInit::Text(text)
    }
}

/// Header collection passed alongside a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HeadersInit {
    /// A `Headers`-like ordered list of name/value pairs
    List(Vec<(String, String)>),
    /// A plain object mapping
    Map(BTreeMap<String, String>),
}

impl HeadersInit {
    /// Serialized key/value form used for classification.
    pub fn canonical(&self) -> String {
        let map: BTreeMap<String, String> = match self {
            HeadersInit::List(pairs) => pairs
                .iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
                .collect(),
            HeadersInit::Map(map) => map.clone(),
        };
        serde_json::to_string(&map).unwrap_or_default()
    }
}

/// Options accompanying a page-initiated request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    pub method: Option<String>,
    pub body: Option<BodyInit>,
    pub headers: Option<HeadersInit>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<BodyInit>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_headers(mut self, headers: HeadersInit) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Method with the fetch default applied.
    pub fn effective_method(&self) -> String {
        self.method.clone().unwrap_or_else(|| "GET".to_string())
    }
}
