//! Shared-storage probe.
//!
//! The destination agent creates a probe file in its instances directory and
//! the source agent is asked whether it can see it. A visible file means the
//! two hosts share the backing store for guest disks.

use tracing::{debug, error, info};

use crate::error::SchedulerResult;
use crate::rpc::{AgentClient, RpcError};

/// Runs the two-host probe over the compute agents.
#[derive(Clone)]
pub struct SharedStorageProber {
    client: AgentClient,
}

impl SharedStorageProber {
    pub fn new(client: AgentClient) -> Self {
        Self { client }
    }

    /// Whether `source` and `dest` share instance storage.
    ///
    /// `Ok(false)` is the "not shared" verdict: the source could not see the
    /// destination's probe file. Any failure to create the probe file, and
    /// any transport failure while confirming it, is `Remote`.
    pub async fn shares_storage(&self, source: &str, dest: &str) -> SchedulerResult<bool> {
        let path = self.client.mktmpfile(dest).await.inspect_err(|e| {
            error!(
                %source,
                %dest,
                answered = e.is_remote_answer(),
                error = %e,
                "cannot create probe file on destination"
            );
        })?;
        debug!(%source, %dest, %path, "probe file created");

        match self.client.confirm_tmpfile(source, &path).await {
            Ok(true) => {
                debug!(%source, %dest, "storage shared");
                Ok(true)
            }
            Ok(false) | Err(RpcError::NotFound { .. }) => {
                info!(%source, %dest, %path, "probe file not visible from source");
                Ok(false)
            }
            Err(e) => {
                error!(
                    %source,
                    %dest,
                    answered = e.is_remote_answer(),
                    error = %e,
                    "probe confirmation failed"
                );
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::agent::{CpuInfo, ProbeAgent};
    use crate::error::SchedulerError;
    use crate::transport::LocalTransport;

    fn cpu() -> CpuInfo {
        CpuInfo {
            arch: "x86_64".to_string(),
            vendor: "Intel".to_string(),
            model: "Haswell".to_string(),
            features: Vec::new(),
        }
    }

    fn prober(transport: LocalTransport) -> SharedStorageProber {
        let client = AgentClient::new(Arc::new(transport), "compute", Duration::from_secs(1));
        SharedStorageProber::new(client)
    }

    #[tokio::test]
    async fn common_directory_is_shared() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new();
        transport.register("compute", "host-a", Arc::new(ProbeAgent::new("host-a", dir.path(), cpu())));
        transport.register("compute", "host-b", Arc::new(ProbeAgent::new("host-b", dir.path(), cpu())));

        assert!(prober(transport).shares_storage("host-a", "host-b").await.unwrap());
        // Source removed the probe file after confirming it.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn separate_directories_are_not_shared() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new();
        transport.register("compute", "host-a", Arc::new(ProbeAgent::new("host-a", a.path(), cpu())));
        transport.register("compute", "host-b", Arc::new(ProbeAgent::new("host-b", b.path(), cpu())));

        assert!(!prober(transport).shares_storage("host-a", "host-b").await.unwrap());
    }

    #[tokio::test]
    async fn repeated_not_shared_verdicts_do_not_pile_up_files() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new();
        transport.register("compute", "host-a", Arc::new(ProbeAgent::new("host-a", a.path(), cpu())));
        transport.register(
            "compute",
            "host-b",
            Arc::new(ProbeAgent::new("host-b", b.path(), cpu()).with_stale_after(Duration::ZERO)),
        );

        let prober = prober(transport);
        for _ in 0..10 {
            assert!(!prober.shares_storage("host-a", "host-b").await.unwrap());
        }
        assert!(std::fs::read_dir(b.path()).unwrap().count() <= 1);
    }

    #[tokio::test]
    async fn destination_failure_is_remote_not_a_verdict() {
        let a = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new();
        transport.register("compute", "host-a", Arc::new(ProbeAgent::new("host-a", a.path(), cpu())));
        transport.register(
            "compute",
            "host-b",
            Arc::new(ProbeAgent::new("host-b", std::path::Path::new("/nonexistent/fleetgrid"), cpu())),
        );

        let err = prober(transport).shares_storage("host-a", "host-b").await.unwrap_err();
        assert!(matches!(err, SchedulerError::Remote(RpcError::Rejected { .. })));
    }

    #[tokio::test]
    async fn unreachable_source_is_remote() {
        let b = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new();
        transport.register("compute", "host-b", Arc::new(ProbeAgent::new("host-b", b.path(), cpu())));

        let err = prober(transport).shares_storage("host-a", "host-b").await.unwrap_err();
        assert!(matches!(err, SchedulerError::Remote(RpcError::Unreachable { .. })));
    }
}
