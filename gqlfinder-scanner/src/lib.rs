pub mod classifier;
pub mod document;
pub mod error;
pub mod page;
pub mod probe;
pub mod request;
pub mod result;

pub use classifier::{is_graphql_related, is_graphql_request};
pub use document::{DocumentScanner, ScannerConfig};
pub use error::ScanError;
pub use probe::{PageProbe, ProbeConfig};
pub use result::{EndpointRecord, EndpointReport, Metadata, Source, TabId};
