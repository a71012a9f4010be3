//! HTTP transport — JSON envelopes over HTTP/1.1.
//!
//! Each call opens a connection to the host's agent address, POSTs the
//! request envelope to `/rpc/{topic}`, and decodes the reply envelope.
//! Connection and protocol failures are `Unreachable`; an undecodable reply
//! is `Malformed`. Timeouts are applied by [`crate::rpc::AgentClient`].

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use serde_json::Value;
use tracing::debug;

use crate::rpc::{AgentTransport, RpcError, RpcMessage, RpcReply, RpcResult, queue_for};

/// Transport that reaches agents over HTTP.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    /// Host → agent `address:port`.
    addresses: HashMap<String, String>,
}

impl HttpTransport {
    pub fn new(addresses: HashMap<String, String>) -> Self {
        Self { addresses }
    }

    /// The agent address configured for `host`.
    pub fn address_of(&self, host: &str) -> Option<&str> {
        self.addresses.get(host).map(String::as_str)
    }
}

#[async_trait]
impl AgentTransport for HttpTransport {
    async fn call(&self, topic: &str, host: &str, message: RpcMessage) -> RpcResult<Value> {
        let queue = queue_for(topic, host);
        let method = message.method.clone();
        let address = self
            .address_of(host)
            .ok_or_else(|| RpcError::unreachable(&queue, &method, "no agent address configured"))?;
        let uri = format!("http://{address}/rpc/{topic}");

        let body = serde_json::to_vec(&message)
            .map_err(|e| RpcError::unreachable(&queue, &method, format!("encode request: {e}")))?;

        let stream = tokio::net::TcpStream::connect(address)
            .await
            .map_err(|e| RpcError::unreachable(&queue, &method, format!("connect {address}: {e}")))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| RpcError::unreachable(&queue, &method, format!("handshake: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = ::http::Request::builder()
            .method("POST")
            .uri(&uri)
            .header("host", address)
            .header("content-type", "application/json")
            .header("user-agent", "fleetgrid-scheduler/0.1")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| RpcError::unreachable(&queue, &method, format!("build request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| RpcError::unreachable(&queue, &method, format!("send: {e}")))?;
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| RpcError::unreachable(&queue, &method, format!("read body: {e}")))?
            .to_bytes();
        debug!(%uri, %status, len = bytes.len(), "agent replied");

        match serde_json::from_slice::<RpcReply>(&bytes) {
            Ok(RpcReply::Result(value)) => Ok(value),
            Ok(RpcReply::Error(fault)) => Err(RpcError::from_fault(&queue, &method, fault)),
            Err(_) if !status.is_success() => Err(RpcError::Rejected {
                queue,
                method,
                message: format!("http status {status}"),
            }),
            Err(e) => Err(RpcError::malformed(&queue, &method, e)),
        }
    }
}
