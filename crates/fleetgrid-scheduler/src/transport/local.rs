//! In-process transport — routes calls to registered agent handlers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::agent::AgentHandler;
use crate::rpc::{AgentTransport, RpcError, RpcMessage, RpcResult, queue_for};

/// Transport that delivers calls to handlers living in the same process.
///
/// Handlers are keyed by queue (`{topic}.{host}`). A call to a queue with
/// no registered handler fails as `Unreachable`, like a host whose agent is
/// not listening.
#[derive(Default)]
pub struct LocalTransport {
    agents: RwLock<HashMap<String, Arc<dyn AgentHandler>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler serving `topic` on `host`.
    pub fn register(&self, topic: &str, host: &str, handler: Arc<dyn AgentHandler>) {
        let queue = queue_for(topic, host);
        debug!(%queue, "agent handler registered");
        self.write_agents().insert(queue, handler);
    }

    /// Remove the handler for `topic` on `host`. Returns true if one existed.
    pub fn unregister(&self, topic: &str, host: &str) -> bool {
        self.write_agents().remove(&queue_for(topic, host)).is_some()
    }

    fn write_agents(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn AgentHandler>>> {
        // A panicked writer cannot leave the map half-updated; keep serving.
        self.agents.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AgentTransport for LocalTransport {
    async fn call(&self, topic: &str, host: &str, message: RpcMessage) -> RpcResult<Value> {
        let queue = queue_for(topic, host);
        let handler = {
            let agents = self.agents.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            agents.get(&queue).cloned()
        };
        let Some(handler) = handler else {
            return Err(RpcError::unreachable(&queue, &message.method, "no agent listening"));
        };

        let method = message.method.clone();
        handler
            .handle(message)
            .await
            .map_err(|fault| RpcError::from_fault(&queue, &method, fault))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RemoteFault;

    struct Echo;

    #[async_trait]
    impl AgentHandler for Echo {
        async fn handle(&self, message: RpcMessage) -> Result<Value, RemoteFault> {
            match message.str_arg("fail") {
                Some("missing") => Err(RemoteFault::not_found("no such thing")),
                Some(other) => Err(RemoteFault::remote(other)),
                None => Ok(Value::String(message.method)),
            }
        }
    }

    #[tokio::test]
    async fn routes_by_topic_and_host() {
        let transport = LocalTransport::new();
        transport.register("compute", "host-a", Arc::new(Echo));

        let reply = transport
            .call("compute", "host-a", RpcMessage::new("ping"))
            .await
            .unwrap();
        assert_eq!(reply, Value::String("ping".to_string()));

        let err = transport
            .call("volume", "host-a", RpcMessage::new("ping"))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Unreachable { ref queue, .. } if queue == "volume.host-a"));
    }

    #[tokio::test]
    async fn faults_become_remote_answers() {
        let transport = LocalTransport::new();
        transport.register("compute", "host-a", Arc::new(Echo));

        let err = transport
            .call("compute", "host-a", RpcMessage::new("x").with_arg("fail", "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::NotFound { .. }));

        let err = transport
            .call("compute", "host-a", RpcMessage::new("x").with_arg("fail", "boom"))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Rejected { ref message, .. } if message == "boom"));
    }

    #[tokio::test]
    async fn unregister_makes_host_unreachable() {
        let transport = LocalTransport::new();
        transport.register("compute", "host-a", Arc::new(Echo));
        assert!(transport.unregister("compute", "host-a"));
        assert!(!transport.unregister("compute", "host-a"));

        let err = transport
            .call("compute", "host-a", RpcMessage::new("ping"))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Unreachable { .. }));
    }
}
