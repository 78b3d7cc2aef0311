//! Transparent forwarding of every non-chunk call to the origin

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::HeaderName;
use hyper::http::request::Parts;
use hyper::{HeaderMap, Response};
use log::debug;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_forwardable(name: &HeaderName) -> bool {
    let name = name.as_str();
    name != "host" && name != "content-length" && !HOP_BY_HOP.contains(&name)
}

fn filter_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| is_forwardable(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[derive(Debug, Clone)]
pub struct Passthrough {
    http: reqwest::Client,
    base_url: String,
}

impl Passthrough {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Passthrough {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Replay the request against the origin and relay its response
    pub async fn forward(
        &self,
        parts: &Parts,
        body: Bytes,
    ) -> Result<Response<Full<Bytes>>, reqwest::Error> {
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", self.base_url, path);
        debug!("passthrough: {} {}", parts.method, url);

        let upstream = self
            .http
            .request(parts.method.clone(), &url)
            .headers(filter_headers(&parts.headers))
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let headers = filter_headers(upstream.headers());
        let bytes = upstream.bytes().await?;

        let mut response = Response::new(Full::new(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}
