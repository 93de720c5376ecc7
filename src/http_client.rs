//! Outbound HTTP client seam (spec.md §1 "external collaborators", §6
//! "External interfaces"). The engine depends only on the [`OutboundHttpClient`]
//! trait; [`ReqwestHttpClient`] is the concrete implementation used outside
//! tests, grounded on the teacher's preference for `reqwest` as its async
//! HTTP stack.

use crate::model::{Body, Request, Response};
use async_trait::async_trait;

#[async_trait]
pub trait OutboundHttpClient: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response, String>;
}

pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .build()
            .unwrap_or_default();
        ReqwestHttpClient { client }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        ReqwestHttpClient::new("HyperSwitch")
    }
}

#[async_trait]
impl OutboundHttpClient for ReqwestHttpClient {
    async fn send(&self, request: Request) -> Result<Response, String> {
        let url = request.uri.to_string();
        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|e| e.to_string())?;
        let mut builder = self.client.request(method, &url);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        builder = match &request.body {
            Body::Empty => builder,
            Body::Json(v) => builder.json(v),
            Body::Text(s) => builder.body(s.clone()),
            Body::Bytes(b) => builder.body(b.clone()),
        };

        let resp = builder.send().await.map_err(|e| e.to_string())?;
        let status = resp.status().as_u16();
        let mut headers = crate::model::Headers::new();
        for (name, value) in resp.headers() {
            if let Ok(v) = value.to_str() {
                headers.set(name.as_str(), v.to_string());
            }
        }
        let bytes = resp.bytes().await.map_err(|e| e.to_string())?;
        let body = serde_json::from_slice(&bytes)
            .map(Body::Json)
            .unwrap_or_else(|_| Body::Bytes(bytes.to_vec()));

        let mut response = Response::new(status, body);
        response.headers = headers;
        Ok(response)
    }
}

/// An in-memory double for tests: returns a fixed response (or records and
/// echoes back the request) without any real networking.
#[cfg(test)]
pub struct StubHttpClient {
    pub response: Response,
}

#[cfg(test)]
#[async_trait]
impl OutboundHttpClient for StubHttpClient {
    async fn send(&self, _request: Request) -> Result<Response, String> {
        Ok(self.response.clone())
    }
}
