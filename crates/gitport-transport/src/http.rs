//! The HTTP client seam and the smart-HTTP request cycle.
//!
//! Hosts supply an [`HttpClient`]; the engine never follows redirects
//! itself and treats any non-smart response (wrong content type, HTML
//! body) as a hard error carrying a preview of what came back.

use std::collections::HashMap;

use tracing::debug;

use crate::{GitUrl, Service, SmartTransport, TransportError};

/// A request the engine hands to the host HTTP client.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: &'static str,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

/// The host client's answer.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Capability set required of the host environment's HTTP stack.
pub trait HttpClient {
    fn request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Default [`HttpClient`] backed by a blocking reqwest client.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .expect("reqwest client construction"),
        }
    }
}

impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestClient {
    fn request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            "POST" => self.client.post(&request.url),
            _ => self.client.get(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .map_err(|e| TransportError::Request(e.to_string()))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// User agent advertised on every request.
pub const USER_AGENT: &str = concat!("git/gitport@", env!("CARGO_PKG_VERSION"));

/// Smart-HTTP transport over a pluggable client.
pub struct SmartHttpTransport<C> {
    url: GitUrl,
    client: C,
    protocol_v2: bool,
}

impl<C: HttpClient> SmartHttpTransport<C> {
    pub fn new(url: GitUrl, client: C) -> Self {
        Self {
            url,
            client,
            protocol_v2: false,
        }
    }

    pub fn url(&self) -> &GitUrl {
        &self.url
    }

    fn common_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![("User-Agent".to_string(), USER_AGENT.to_string())];
        if self.protocol_v2 {
            headers.push(("Git-Protocol".to_string(), "version=2".to_string()));
        }
        headers
    }

    /// Reject responses that are clearly not smart protocol: wrong
    /// content type or a body that opens like an HTML page.
    fn check_smart(
        &self,
        response: &HttpResponse,
        expected_type: &str,
        url: &str,
    ) -> Result<(), TransportError> {
        if response.status != 200 {
            return Err(TransportError::HttpStatus {
                url: url.to_string(),
                status: response.status,
            });
        }
        let content_type = response.header("content-type").unwrap_or("");
        let body_preview = &response.body[..response.body.len().min(256)];
        let looks_like_html = body_preview.first() == Some(&b'<');
        if !content_type.starts_with(expected_type) || looks_like_html {
            return Err(TransportError::SmartHttp {
                preview: String::from_utf8_lossy(body_preview).into_owned(),
                response: response.body.clone(),
            });
        }
        Ok(())
    }
}

impl<C: HttpClient> SmartTransport for SmartHttpTransport<C> {
    fn discover(&mut self, service: Service) -> Result<Vec<u8>, TransportError> {
        let url = format!("{}/info/refs?service={}", self.url.base(), service);
        debug!(%url, "ref discovery");

        let response = self.client.request(HttpRequest {
            url: url.clone(),
            method: "GET",
            headers: self.common_headers(),
            body: None,
        })?;

        self.check_smart(
            &response,
            &format!("application/x-{service}-advertisement"),
            &url,
        )?;
        Ok(response.body)
    }

    fn request(&mut self, service: Service, body: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let url = format!("{}/{}", self.url.base(), service);
        debug!(%url, bytes = body.len(), "service request");

        let mut headers = self.common_headers();
        headers.push((
            "Content-Type".to_string(),
            format!("application/x-{service}-request"),
        ));
        headers.push((
            "Accept".to_string(),
            format!("application/x-{service}-result"),
        ));

        let response = self.client.request(HttpRequest {
            url: url.clone(),
            method: "POST",
            headers,
            body: Some(body),
        })?;

        self.check_smart(&response, &format!("application/x-{service}-result"), &url)?;
        Ok(response.body)
    }

    fn set_protocol_v2(&mut self, enabled: bool) {
        self.protocol_v2 = enabled;
    }
}
