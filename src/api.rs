//! Client for the results API.
//!
//! Three read-only endpoints, all keyed by code:
//! - `data/regions/local/{code}.json` children of any administrative node
//! - `data/regions/precinct/{code[..2]}/{code}.json` precincts of a barangay
//! - `data/er/{code[..3]}/{code}.json` election return of a precinct

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{AdminNode, NodeListing, ReturnDocument};
use crate::settings::Settings;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}")]
    Status { status: u16 },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response has no `{0}` key")]
    MissingKey(&'static str),
    #[error("invalid header {name}: {reason}")]
    Header { name: String, reason: String },
}

pub struct Response {
    pub status: u16,
    pub body: String,
}

/// Blocking GET, one request at a time.
pub trait Transport {
    fn get(&self, url: &str) -> Result<Response, ApiError>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(settings: &Settings) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        for (name, value) in settings.request_headers() {
            let key = HeaderName::from_bytes(name.as_bytes()).map_err(|e| ApiError::Header {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            let val = HeaderValue::from_str(&value).map_err(|e| ApiError::Header {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            headers.insert(key, val);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(HttpTransport { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<Response, ApiError> {
        let resp = self.client.get(url).send()?;
        let status = resp.status().as_u16();
        let body = resp.text()?;
        Ok(Response { status, body })
    }
}

/// Result of asking for one precinct's election return.
#[derive(Debug)]
pub enum PrecinctReturn {
    Loaded(ReturnDocument),
    /// Non-200 status or transport failure.
    NoData { status: Option<u16>, reason: String },
    /// 200 but the body could not be flattened.
    Malformed { reason: String },
}

impl PrecinctReturn {
    pub fn status(&self) -> Option<u16> {
        match self {
            PrecinctReturn::Loaded(_) | PrecinctReturn::Malformed { .. } => Some(200),
            PrecinctReturn::NoData { status, .. } => *status,
        }
    }
}

pub struct ApiClient<T> {
    transport: T,
    base_url: String,
}

impl ApiClient<HttpTransport> {
    pub fn from_settings(settings: &Settings) -> Result<Self, ApiError> {
        Ok(Self::new(HttpTransport::new(settings)?, &settings.base_url))
    }
}

impl<T: Transport> ApiClient<T> {
    pub fn new(transport: T, base_url: &str) -> Self {
        ApiClient {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn local_url(&self, code: &str) -> String {
        format!("{}/data/regions/local/{}.json", self.base_url, code)
    }

    pub fn precinct_url(&self, code: &str) -> String {
        format!(
            "{}/data/regions/precinct/{}/{}.json",
            self.base_url,
            prefix(code, 2),
            code
        )
    }

    pub fn return_url(&self, code: &str) -> String {
        format!("{}/data/er/{}/{}.json", self.base_url, prefix(code, 3), code)
    }

    /// Children of an administrative node. Any failure means no children.
    pub fn fetch_children(&self, code: &str, label: &str) -> Vec<AdminNode> {
        self.children_at(&self.local_url(code), code, label)
    }

    /// Precincts of a barangay. Any failure means no precincts.
    pub fn fetch_precincts(&self, barangay_code: &str, label: &str) -> Vec<AdminNode> {
        self.children_at(&self.precinct_url(barangay_code), barangay_code, label)
    }

    pub fn fetch_precinct_return(&self, code: &str) -> PrecinctReturn {
        let body = match self.fetch_ok(&self.return_url(code)) {
            Ok(body) => body,
            Err(ApiError::Status { status }) => {
                info!(status, code, "precinct return unavailable");
                return PrecinctReturn::NoData {
                    status: Some(status),
                    reason: format!("status {}", status),
                };
            }
            Err(e) => {
                warn!(code, error = %e, "precinct return request failed");
                return PrecinctReturn::NoData {
                    status: None,
                    reason: e.to_string(),
                };
            }
        };

        match serde_json::from_str::<ReturnDocument>(&body) {
            Ok(doc) => {
                info!(
                    status = 200,
                    code,
                    cluster = %doc.information.precinct_in_cluster,
                    "precinct return OK"
                );
                PrecinctReturn::Loaded(doc)
            }
            Err(e) => {
                warn!(code, error = %e, "precinct return is malformed");
                PrecinctReturn::Malformed {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn children_at(&self, url: &str, parent: &str, label: &str) -> Vec<AdminNode> {
        match self.listing(url) {
            Ok(mut nodes) => {
                for node in &mut nodes {
                    match node.master_code.as_deref() {
                        Some(m) if m == parent => {}
                        Some(m) => {
                            warn!(code = %node.code, master = m, parent, "master code mismatch, using parent");
                            node.master_code = Some(parent.to_string());
                        }
                        None => node.master_code = Some(parent.to_string()),
                    }
                }
                info!(status = 200, code = parent, label, count = nodes.len(), "fetched records");
                nodes
            }
            Err(ApiError::Status { status }) => {
                info!(status, code = parent, label, count = 0, "fetched records");
                Vec::new()
            }
            Err(e) => {
                warn!(code = parent, label, error = %e, "treating as no children");
                Vec::new()
            }
        }
    }

    fn listing(&self, url: &str) -> Result<Vec<AdminNode>, ApiError> {
        let body = self.fetch_ok(url)?;
        let listing: NodeListing = serde_json::from_str(&body)?;
        listing.regions.ok_or(ApiError::MissingKey("regions"))
    }

    fn fetch_ok(&self, url: &str) -> Result<String, ApiError> {
        let resp = self.transport.get(url)?;
        if resp.status != 200 {
            return Err(ApiError::Status {
                status: resp.status,
            });
        }
        Ok(resp.body)
    }
}

/// First `n` characters of a code, used as a routing path segment.
fn prefix(code: &str, n: usize) -> &str {
    match code.char_indices().nth(n) {
        Some((idx, _)) => &code[..idx],
        None => code,
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::{ApiError, Response, Transport};

    /// In-memory transport keyed by full URL; unknown URLs answer 404.
    #[derive(Default)]
    pub struct FakeTransport {
        routes: HashMap<String, (u16, String)>,
        pub calls: RefCell<Vec<String>>,
    }

    impl FakeTransport {
        pub fn route(mut self, url: &str, status: u16, body: &str) -> Self {
            self.routes
                .insert(url.to_string(), (status, body.to_string()));
            self
        }

        pub fn called(&self, url: &str) -> bool {
            self.calls.borrow().iter().any(|c| c == url)
        }
    }

    impl Transport for FakeTransport {
        fn get(&self, url: &str) -> Result<Response, ApiError> {
            self.calls.borrow_mut().push(url.to_string());
            let (status, body) = self
                .routes
                .get(url)
                .cloned()
                .unwrap_or((404, "Not Found".to_string()));
            Ok(Response { status, body })
        }
    }

    impl<T: Transport> Transport for &T {
        fn get(&self, url: &str) -> Result<Response, ApiError> {
            (**self).get(url)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeTransport;
    use super::*;

    const BASE: &str = "http://api.test";

    #[test]
    fn endpoint_paths() {
        let api = ApiClient::new(FakeTransport::default(), "http://api.test/");
        assert_eq!(api.local_url("0"), "http://api.test/data/regions/local/0.json");
        assert_eq!(
            api.precinct_url("1301001"),
            "http://api.test/data/regions/precinct/13/1301001.json"
        );
        assert_eq!(
            api.return_url("13010001"),
            "http://api.test/data/er/130/13010001.json"
        );
        // shorter than the routing prefix
        assert_eq!(api.return_url("P1"), "http://api.test/data/er/P1/P1.json");
    }

    #[test]
    fn children_carry_parent_code() {
        let body = r#"{"regions": [
            {"categoryCode": "3", "code": "1301", "name": "MANILA"},
            {"categoryCode": "3", "masterCode": "13", "code": "1302", "name": "QUEZON CITY"},
            {"categoryCode": "3", "masterCode": "99", "code": "1303", "name": "PASAY"}
        ]}"#;
        let transport =
            FakeTransport::default().route("http://api.test/data/regions/local/13.json", 200, body);
        let api = ApiClient::new(transport, BASE);

        let nodes = api.fetch_children("13", "NCR");
        assert_eq!(nodes.len(), 3);
        assert!(nodes.iter().all(|n| n.master_code.as_deref() == Some("13")));
    }

    #[test]
    fn failures_mean_no_children() {
        let transport = FakeTransport::default()
            .route("http://api.test/data/regions/local/1.json", 500, "oops")
            .route("http://api.test/data/regions/local/2.json", 200, "<html>")
            .route("http://api.test/data/regions/local/3.json", 200, r#"{"other": []}"#);
        let api = ApiClient::new(transport, BASE);

        assert!(api.fetch_children("1", "a").is_empty());
        assert!(api.fetch_children("2", "b").is_empty());
        assert!(api.fetch_children("3", "c").is_empty());
        assert!(api.fetch_children("4", "unrouted").is_empty());
    }

    #[test]
    fn precinct_return_outcomes() {
        let doc = std::fs::read_to_string("tests/fixtures/er_flat.json").unwrap();
        let transport = FakeTransport::default()
            .route("http://api.test/data/er/P1/P1.json", 200, &doc)
            .route("http://api.test/data/er/P3/P3.json", 200, r#"{"information": {}}"#);
        let api = ApiClient::new(transport, BASE);

        assert!(matches!(api.fetch_precinct_return("P1"), PrecinctReturn::Loaded(_)));

        let missing = api.fetch_precinct_return("P2");
        assert_eq!(missing.status(), Some(404));
        assert!(matches!(missing, PrecinctReturn::NoData { .. }));

        assert!(matches!(
            api.fetch_precinct_return("P3"),
            PrecinctReturn::Malformed { .. }
        ));
    }

    #[test]
    fn prefix_handles_short_and_multibyte_codes() {
        assert_eq!(prefix("13010001", 3), "130");
        assert_eq!(prefix("13", 3), "13");
        assert_eq!(prefix("ñab", 2), "ña");
    }
}
