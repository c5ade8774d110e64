// GraphQL heuristics shared by every detection channel

use crate::request::RequestOptions;
use regex::Regex;
use std::sync::LazyLock;

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)graphql|/gql\b|/api/graph|__graphql|query.*operation|mutation.*operation")
        .expect("valid url pattern")
});

static BODY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:query|mutation|subscription)\s*[{(]|__typename|operationName")
        .expect("valid body pattern")
});

static HEADER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)graphql|apollo|hasura").expect("valid header pattern"));

static SOCKET_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)graphql|gql|subscriptions|apollo").expect("valid socket pattern")
});

static SCRIPT_SRC_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)graphql|gql|apollo|relay").expect("valid script pattern"));

static ABSOLUTE_URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://").expect("valid absolute url pattern"));

static GRAPHQL_ABSOLUTE_URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^https?://.*graphql").expect("valid graphql url pattern"));

pub fn url_matches(url: &str) -> bool {
    URL_PATTERN.is_match(url)
}

/// Operation syntax (`query {`, `mutation(`...) or GraphQL-only field names.
pub fn body_matches(body: &str) -> bool {
    BODY_PATTERN.is_match(body)
}

pub fn header_text_matches(text: &str) -> bool {
    HEADER_PATTERN.is_match(text)
}

/// True when any header name or value mentions graphql, apollo or hasura.
pub fn headers_match<'a, I>(headers: I) -> bool
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    headers
        .into_iter()
        .any(|(name, value)| header_text_matches(name) || header_text_matches(value))
}

/// Narrower check applied to socket connection URLs.
pub fn socket_url_matches(url: &str) -> bool {
    SOCKET_PATTERN.is_match(url)
}

/// Loose check applied to script `src` addresses.
pub fn script_src_matches(src: &str) -> bool {
    SCRIPT_SRC_PATTERN.is_match(src)
}

pub fn is_absolute_http_url(value: &str) -> bool {
    ABSOLUTE_URL_PATTERN.is_match(value)
}

pub fn is_graphql_absolute_url(value: &str) -> bool {
    GRAPHQL_ABSOLUTE_URL_PATTERN.is_match(value)
}

/// Decide whether a URL (and optional body) looks like GraphQL traffic.
pub fn is_graphql_related(url: &str, body: Option<&str>) -> bool {
    if url_matches(url) {
        return true;
    }

    match body {
        Some(body) if !body.is_empty() => body_matches(body),
        _ => false,
    }
}

/// Page-context variant that also looks at the request headers.
pub fn is_graphql_request(url: &str, options: &RequestOptions) -> bool {
    if url_matches(url) {
        return true;
    }

    if let Some(ref body) = options.body
        && body_matches(&body.canonical())
    {
        return true;
    }

    if let Some(ref headers) = options.headers
        && header_text_matches(&headers.canonical())
    {
        return true;
    }

    false
}
