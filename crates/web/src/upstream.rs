//! Upstream management API relay
//!
//! Every data call is a single-element batch POSTed to
//! `<base>/wapi/<version>/request`. The upstream presents a self-signed
//! certificate, so validation is disabled on the client.

use bytes::Bytes;
use gridshim_common::{Error, Result};
use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::debug;

/// Upstream connection settings
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub wapi_version: String,
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://127.0.0.1".to_string(),
            wapi_version: "v2.12".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// How a call authenticates against the upstream.
#[derive(Debug, Clone)]
pub enum Credentials {
    Basic { username: String, password: String },
    /// Upstream session cookie as a `name=value` pair
    Cookie(String),
}

/// Response as seen by the relay
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Bytes,
    /// First `Set-Cookie` returned by the upstream, if any
    pub cookie: Option<String>,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| Error::UpstreamProtocol {
            status: self.status,
            message: format!("unexpected body: {}", e),
        })
    }

    /// Turn a non-2xx status into an error.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::UpstreamProtocol {
                status: self.status,
                message: String::from_utf8_lossy(&self.body).into_owned(),
            })
        }
    }
}

#[derive(Serialize)]
struct BatchEntry<'a> {
    method: &'a str,
    object: &'a str,
    args: BatchArgs<'a>,
}

#[derive(Serialize)]
struct BatchArgs<'a> {
    #[serde(rename = "_return_fields")]
    return_fields: &'a str,
}

/// HTTP client for the upstream API
#[derive(Clone)]
pub struct UpstreamRelay {
    client: reqwest::Client,
    config: UpstreamConfig,
}

impl UpstreamRelay {
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build upstream client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/wapi/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.wapi_version,
            path
        )
    }

    /// Send one batch request for `object`.
    pub async fn call(
        &self,
        method: &str,
        object: &str,
        return_fields: &str,
        credentials: &Credentials,
    ) -> Result<UpstreamResponse> {
        let batch = [BatchEntry {
            method,
            object,
            args: BatchArgs { return_fields },
        }];
        debug!("Upstream {} {} (fields: {})", method, object, return_fields);

        let request = self
            .client
            .post(self.url("request"))
            .header(CONTENT_TYPE, "application/json")
            .json(&batch);
        self.send(authorize(request, credentials)).await
    }

    /// Plain GET on `resource` with `query` parameters.
    pub async fn get(
        &self,
        resource: &str,
        query: &[(&str, &str)],
        credentials: &Credentials,
    ) -> Result<UpstreamResponse> {
        debug!("Upstream GET {}", resource);
        let request = self.client.get(self.url(resource)).query(query);
        self.send(authorize(request, credentials)).await
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<UpstreamResponse> {
        let response = request.send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status().as_u16();
        let cookie = response
            .headers()
            .get(SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(cookie_pair);
        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;

        debug!(
            "Upstream answered {} ({} bytes, cookie rotated: {})",
            status,
            body.len(),
            cookie.is_some()
        );

        Ok(UpstreamResponse {
            status,
            body,
            cookie,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout {
                seconds: self.config.timeout.as_secs(),
            }
        } else {
            Error::Transport(e.to_string())
        }
    }
}

fn authorize(request: reqwest::RequestBuilder, credentials: &Credentials) -> reqwest::RequestBuilder {
    match credentials {
        Credentials::Basic { username, password } => request.basic_auth(username, Some(password)),
        Credentials::Cookie(cookie) => request.header(COOKIE, cookie.as_str()),
    }
}

/// `name=value` part of a `Set-Cookie` header value.
fn cookie_pair(header: &str) -> Option<String> {
    let pair = header.split(';').next()?.trim();
    if pair.contains('=') && !pair.starts_with('=') {
        Some(pair.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_pair() {
        assert_eq!(
            cookie_pair("ibapauth=\"ip=10.0.0.1,client=API\"; httponly; Path=/").as_deref(),
            Some("ibapauth=\"ip=10.0.0.1,client=API\"")
        );
        assert_eq!(cookie_pair("a=b").as_deref(), Some("a=b"));
        assert_eq!(cookie_pair("garbage"), None);
        assert_eq!(cookie_pair("=value; Path=/"), None);
    }

    #[test]
    fn test_batch_body_shape() {
        let batch = [BatchEntry {
            method: "GET",
            object: "grid",
            args: BatchArgs {
                return_fields: "name",
            },
        }];
        let value = serde_json::to_value(batch).unwrap();
        assert_eq!(
            value,
            serde_json::json!([{"method": "GET", "object": "grid", "args": {"_return_fields": "name"}}])
        );
    }

    #[test]
    fn test_urls() {
        let relay = UpstreamRelay::new(UpstreamConfig {
            base_url: "https://127.0.0.1/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(relay.url("request"), "https://127.0.0.1/wapi/v2.12/request");
        assert_eq!(relay.url("userprofile"), "https://127.0.0.1/wapi/v2.12/userprofile");
    }

    #[test]
    fn test_response_status_handling() {
        let ok = UpstreamResponse {
            status: 201,
            body: Bytes::from_static(b"[[{\"name\": \"Infoblox\"}]]"),
            cookie: None,
        };
        assert!(ok.is_success());
        let rows: Vec<Vec<serde_json::Value>> = ok.json().unwrap();
        assert_eq!(rows[0][0]["name"], "Infoblox");

        let denied = UpstreamResponse {
            status: 401,
            body: Bytes::from_static(b"Authorization Required"),
            cookie: None,
        };
        match denied.error_for_status() {
            Err(Error::UpstreamProtocol { status, .. }) => assert_eq!(status, 401),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_transport() {
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let relay = UpstreamRelay::new(UpstreamConfig {
            base_url: format!("http://127.0.0.1:{}", port),
            timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .unwrap();

        let err = relay
            .call("GET", "grid", "name", &Credentials::Cookie("ibapauth=x".into()))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
