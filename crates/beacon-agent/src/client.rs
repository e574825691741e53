//! Minimal HTTP/1 client for the registry endpoints.

use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::Full;
use serde::Serialize;
use tracing::debug;

/// Body of `POST /register`.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterBody<'a> {
    pub name: &'a str,
    pub host: &'a str,
    pub port: u16,
}

/// Body of `POST /heartbeat`.
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatBody<'a> {
    pub name: &'a str,
}

/// POST a JSON body to `http://{server}{path}`.
///
/// Returns the response status, or `None` if the request could not be
/// completed (connect error, handshake failure, timeout).
pub async fn post_json<T: Serialize>(
    server: &str,
    path: &str,
    body: &T,
    timeout: Duration,
) -> Option<StatusCode> {
    let payload = match serde_json::to_vec(body) {
        Ok(p) => p,
        Err(e) => {
            debug!(error = %e, %path, "failed to encode request body");
            return None;
        }
    };

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(server).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %server, "registry connection failed");
                return None;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %server, "registry handshake failed");
                return None;
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("POST")
            .uri(path)
            .header("host", server)
            .header("content-type", "application/json")
            .header("user-agent", "beacon-agent/0.1")
            .body(Full::new(Bytes::from(payload)))
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %path, "failed to build request");
                return None;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) => Some(resp.status()),
            Err(e) => {
                debug!(error = %e, %server, %path, "registry request failed");
                None
            }
        }
    })
    .await;

    match result {
        Ok(status) => status,
        Err(_) => {
            debug!(%server, %path, "registry request timed out");
            None
        }
    }
}
