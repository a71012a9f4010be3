//! Agent RPC — request/reply calls to compute and volume agents.
//!
//! Requests are `{"method": <name>, "args": {...}}` envelopes addressed to
//! the queue `{topic}.{host}`. Replies are either `{"result": <value>}` or
//! `{"error": {"kind": "not_found" | "remote", "message": ...}}`.
//!
//! [`AgentTransport`] delivers envelopes; [`AgentClient`] adds the bounded
//! timeout and typed wrappers for the methods the scheduler consumes. No
//! call is ever retried here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Create a probe file in the agent's instances directory; returns its path.
pub const MKTMPFILE: &str = "mktmpfile";
/// Check a probe file is visible (and remove it); returns `true` or NotFound.
pub const CONFIRM_TMPFILE: &str = "confirm_tmpfile";
/// Check a CPU description is runnable on the agent's host.
pub const COMPARE_CPU: &str = "compare_cpu";

/// Queue name for the agent serving `topic` on `host`.
pub fn queue_for(topic: &str, host: &str) -> String {
    format!("{topic}.{host}")
}

/// Request envelope sent to an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcMessage {
    pub method: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl RpcMessage {
    pub fn new(method: &str) -> Self {
        Self {
            method: method.to_string(),
            args: Map::new(),
        }
    }

    pub fn with_arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }

    /// A string argument, if present.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }
}

/// Reply envelope returned by an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RpcReply {
    Result(Value),
    Error(RemoteFault),
}

impl From<Result<Value, RemoteFault>> for RpcReply {
    fn from(outcome: Result<Value, RemoteFault>) -> Self {
        match outcome {
            Ok(value) => RpcReply::Result(value),
            Err(fault) => RpcReply::Error(fault),
        }
    }
}

/// An error raised on the agent side while handling a call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteFault {
    pub kind: FaultKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The referenced object does not exist on the agent.
    NotFound,
    /// Any other agent-side failure.
    Remote,
}

impl RemoteFault {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::NotFound,
            message: message.into(),
        }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Remote,
            message: message.into(),
        }
    }
}

pub type RpcResult<T> = Result<T, RpcError>;

/// Failure of a single agent call.
///
/// `Timeout` and `Unreachable` mean the agent could not be consulted;
/// `Rejected` and `NotFound` mean it answered with an error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("{method} on {queue} timed out after {timeout:?}")]
    Timeout {
        queue: String,
        method: String,
        timeout: Duration,
    },

    #[error("{queue} unreachable for {method}: {reason}")]
    Unreachable {
        queue: String,
        method: String,
        reason: String,
    },

    #[error("{queue} rejected {method}: {message}")]
    Rejected {
        queue: String,
        method: String,
        message: String,
    },

    #[error("{queue} reported not found for {method}: {message}")]
    NotFound {
        queue: String,
        method: String,
        message: String,
    },

    #[error("malformed reply from {queue} for {method}: {reason}")]
    Malformed {
        queue: String,
        method: String,
        reason: String,
    },
}

impl RpcError {
    /// Map an agent-side fault to the matching error.
    pub fn from_fault(queue: &str, method: &str, fault: RemoteFault) -> Self {
        match fault.kind {
            FaultKind::NotFound => RpcError::NotFound {
                queue: queue.to_string(),
                method: method.to_string(),
                message: fault.message,
            },
            FaultKind::Remote => RpcError::Rejected {
                queue: queue.to_string(),
                method: method.to_string(),
                message: fault.message,
            },
        }
    }

    pub fn unreachable(queue: &str, method: &str, reason: impl ToString) -> Self {
        RpcError::Unreachable {
            queue: queue.to_string(),
            method: method.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(queue: &str, method: &str, reason: impl ToString) -> Self {
        RpcError::Malformed {
            queue: queue.to_string(),
            method: method.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the agent answered (as opposed to not being reachable at all).
    pub fn is_remote_answer(&self) -> bool {
        matches!(self, RpcError::Rejected { .. } | RpcError::NotFound { .. })
    }
}

/// Delivers request envelopes to agents and returns their replies.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Send `message` to the agent serving `topic` on `host` and wait for
    /// its reply. Agent-side faults come back as `Rejected`/`NotFound`.
    async fn call(&self, topic: &str, host: &str, message: RpcMessage) -> RpcResult<Value>;
}

/// Typed, timeout-bounded client for one agent topic.
#[derive(Clone)]
pub struct AgentClient {
    transport: Arc<dyn AgentTransport>,
    topic: String,
    timeout: Duration,
}

impl AgentClient {
    pub fn new(transport: Arc<dyn AgentTransport>, topic: &str, timeout: Duration) -> Self {
        Self {
            transport,
            topic: topic.to_string(),
            timeout,
        }
    }

    /// Issue a raw call to `host`, bounded by the configured timeout.
    pub async fn call(&self, host: &str, message: RpcMessage) -> RpcResult<Value> {
        let queue = queue_for(&self.topic, host);
        let method = message.method.clone();
        debug!(%queue, %method, "agent call");

        match tokio::time::timeout(self.timeout, self.transport.call(&self.topic, host, message))
            .await
        {
            Ok(reply) => reply,
            Err(_) => Err(RpcError::Timeout {
                queue,
                method,
                timeout: self.timeout,
            }),
        }
    }

    /// Ask `host` to create a probe file; returns the file's path.
    pub async fn mktmpfile(&self, host: &str) -> RpcResult<String> {
        let value = self.call(host, RpcMessage::new(MKTMPFILE)).await?;
        match value {
            Value::String(path) => Ok(path),
            other => Err(RpcError::malformed(
                &queue_for(&self.topic, host),
                MKTMPFILE,
                format!("expected path string, got {other}"),
            )),
        }
    }

    /// Ask `host` whether the probe file at `path` is visible.
    pub async fn confirm_tmpfile(&self, host: &str, path: &str) -> RpcResult<bool> {
        let message = RpcMessage::new(CONFIRM_TMPFILE).with_arg("path", path);
        let value = self.call(host, message).await?;
        self.expect_bool(host, CONFIRM_TMPFILE, value)
    }

    /// Ask `host` whether it can run guests built for `cpu_info`.
    pub async fn compare_cpu(&self, host: &str, cpu_info: &str) -> RpcResult<bool> {
        let message = RpcMessage::new(COMPARE_CPU).with_arg("cpu_info", cpu_info);
        let value = self.call(host, message).await?;
        self.expect_bool(host, COMPARE_CPU, value)
    }

    fn expect_bool(&self, host: &str, method: &str, value: Value) -> RpcResult<bool> {
        value.as_bool().ok_or_else(|| {
            RpcError::malformed(
                &queue_for(&self.topic, host),
                method,
                format!("expected boolean, got {value}"),
            )
        })
    }
}
