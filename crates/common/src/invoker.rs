//! Script invocation
//!
//! Privileged actions on the appliance are performed by named local scripts
//! exposed through a small HTTP exec endpoint. [`ScriptInvoker`] abstracts that
//! endpoint so callers can be tested against fakes.

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::debug;

/// Raw result of a script invocation
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    pub status: u16,
    pub body: Bytes,
}

impl ScriptOutput {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// Decode the JSON payload.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Executes a named local action.
#[async_trait]
pub trait ScriptInvoker: Send + Sync {
    /// Run `name` with `args`. Transport failures are reported as
    /// [`Error::Transport`]; any HTTP status is returned as-is.
    async fn invoke(&self, name: &str, args: &[String], timeout: Duration) -> Result<ScriptOutput>;
}

#[derive(Serialize)]
struct ExecRequest<'a> {
    name: &'a str,
    args: &'a [String],
}

/// Invoker backed by the appliance exec endpoint.
#[derive(Clone)]
pub struct HttpScriptInvoker {
    client: reqwest::Client,
    url: String,
}

impl HttpScriptInvoker {
    pub fn new(address: &str, port: u16) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("http://{}:{}/nios/api/v1.0/nios/1/exec", address, port),
        }
    }
}

#[async_trait]
impl ScriptInvoker for HttpScriptInvoker {
    async fn invoke(&self, name: &str, args: &[String], timeout: Duration) -> Result<ScriptOutput> {
        debug!("Invoking script {} with args {:?}", name, args);

        let response = self
            .client
            .post(&self.url)
            .timeout(timeout)
            .json(&ExecRequest { name, args })
            .send()
            .await
            .map_err(|e| Error::Transport(format!("script {}: {}", name, e)))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("script {}: {}", name, e)))?;

        debug!("Script {} returned {} ({} bytes)", name, status, body.len());

        Ok(ScriptOutput { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP responder that captures the request text.
    async fn spawn_exec_endpoint(
        reply: &'static str,
    ) -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut request = String::new();
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                request.push_str(&String::from_utf8_lossy(&buf[..n]));
                if n == 0 || request.ends_with("]}") {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                reply.len(),
                reply
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            request
        });

        (port, handle)
    }

    #[tokio::test]
    async fn test_invoke_posts_name_and_args() {
        let (port, server) = spawn_exec_endpoint(r#"{"status":"SUCCESS","error":""}"#).await;
        let invoker = HttpScriptInvoker::new("127.0.0.1", port);

        let output = invoker
            .invoke(
                "trigger_hotfix_manifest",
                &["--trigger".to_string()],
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert!(output.is_success());
        let reply: serde_json::Value = output.json().unwrap();
        assert_eq!(reply["status"], "SUCCESS");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /nios/api/v1.0/nios/1/exec"));
        assert!(request.contains(r#""name":"trigger_hotfix_manifest""#));
        assert!(request.contains(r#""args":["--trigger"]"#));
    }

    #[tokio::test]
    async fn test_invoke_unreachable_is_transport_error() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let invoker = HttpScriptInvoker::new("127.0.0.1", port);

        let err = invoker
            .invoke("collect_grid_data", &[], Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
