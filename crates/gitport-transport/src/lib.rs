//! Transport for the smart-HTTP wire protocol: URL handling, the
//! pluggable HTTP client seam, and the discovery/request cycle.
//!
//! Higher-level protocol logic (pkt-line framing, negotiation) lives in
//! `gitport-protocol`; this crate only moves request and response
//! bodies and validates that the far side actually speaks the smart
//! protocol.

pub mod http;
pub mod url;

pub use http::{HttpClient, HttpRequest, HttpResponse, ReqwestClient, SmartHttpTransport};
pub use url::GitUrl;

/// Errors from transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unknown transport for URL: {0}")]
    UnknownTransport(String),

    #[error("HTTP error {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("remote did not send a smart-HTTP response (preview: {preview:?})")]
    SmartHttp { preview: String, response: Vec<u8> },

    #[error("transport request failed: {0}")]
    Request(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The two smart services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// Fetch side (`git-upload-pack`).
    UploadPack,
    /// Push side (`git-receive-pack`).
    ReceivePack,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::UploadPack => "git-upload-pack",
            Service::ReceivePack => "git-receive-pack",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connected smart transport: one discovery round, then
/// request/response cycles against the service endpoint.
pub trait SmartTransport {
    /// GET `<url>/info/refs?service=…`, returning the advertisement body.
    fn discover(&mut self, service: Service) -> Result<Vec<u8>, TransportError>;

    /// POST a request body to the service endpoint, returning the
    /// response body.
    fn request(&mut self, service: Service, body: Vec<u8>) -> Result<Vec<u8>, TransportError>;

    /// Whether to send `Git-Protocol: version=2` on subsequent calls.
    fn set_protocol_v2(&mut self, enabled: bool);
}
