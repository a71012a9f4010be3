//! Agent-side handlers for the pre-migration probes.
//!
//! [`ProbeAgent`] answers the three calls the scheduler makes before a live
//! migration: `mktmpfile` and `confirm_tmpfile` against the host's
//! instances directory, and `compare_cpu` against the host's CPU
//! description. Probe paths travel as file names relative to the instances
//! directory, so hosts that mount the same store at different points still
//! agree. It runs behind [`crate::transport::LocalTransport`] in
//! single-process setups and tests.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::rpc::{COMPARE_CPU, CONFIRM_TMPFILE, MKTMPFILE, RemoteFault, RpcMessage};

/// Serves agent RPC methods for one (topic, host).
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn handle(&self, message: RpcMessage) -> Result<Value, RemoteFault>;
}

/// Host CPU description exchanged through `compare_cpu`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CpuInfo {
    pub arch: String,
    pub vendor: String,
    pub model: String,
    #[serde(default)]
    pub features: Vec<String>,
}

impl CpuInfo {
    pub fn parse(blob: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(blob)
    }

    pub fn to_blob(&self) -> String {
        // A struct of strings always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Whether a guest started on a host described by `guest` can run here:
    /// same architecture and vendor, and every guest feature present locally.
    pub fn can_host(&self, guest: &CpuInfo) -> bool {
        if self.arch != guest.arch || self.vendor != guest.vendor {
            return false;
        }
        let local: HashSet<&str> = self.features.iter().map(String::as_str).collect();
        guest.features.iter().all(|f| local.contains(f.as_str()))
    }
}

const PROBE_PREFIX: &str = "fleetgrid-probe-";

/// Probe files older than this are left over from validations whose source
/// never confirmed them. Must stay well above the RPC timeout so a probe in
/// flight from another host sharing the directory is never swept.
pub const DEFAULT_PROBE_STALE_AFTER: Duration = Duration::from_secs(10 * 60);

/// Probe handler for a compute host.
pub struct ProbeAgent {
    host: String,
    instances_path: PathBuf,
    cpu: CpuInfo,
    stale_after: Duration,
}

impl ProbeAgent {
    /// Create an agent for `host` whose guests live under `instances_path`.
    pub fn new(host: &str, instances_path: &Path, cpu: CpuInfo) -> Self {
        Self {
            host: host.to_string(),
            instances_path: instances_path.to_path_buf(),
            cpu,
            stale_after: DEFAULT_PROBE_STALE_AFTER,
        }
    }

    /// Age at which an unconfirmed probe file is swept.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    fn mktmpfile(&self) -> Result<Value, RemoteFault> {
        self.sweep_stale_probes();
        let file = tempfile::Builder::new()
            .prefix(PROBE_PREFIX)
            .tempfile_in(&self.instances_path)
            .map_err(|e| {
                RemoteFault::remote(format!(
                    "cannot create probe file in {}: {e}",
                    self.instances_path.display()
                ))
            })?;
        let (_, path) = file
            .keep()
            .map_err(|e| RemoteFault::remote(format!("cannot keep probe file: {e}")))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| RemoteFault::remote("probe file has no name"))?;
        debug!(host = %self.host, path = %path.display(), "probe file created");
        Ok(Value::String(name))
    }

    /// Remove this agent's probe files that nobody confirmed in time. A
    /// "not shared" verdict leaves the file behind, since only the source
    /// deletes it. Failures are logged and never fail the probe.
    fn sweep_stale_probes(&self) {
        let entries = match std::fs::read_dir(&self.instances_path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    host = %self.host,
                    path = %self.instances_path.display(),
                    error = %e,
                    "cannot scan for stale probe files"
                );
                return;
            }
        };
        let now = SystemTime::now();
        for entry in entries.flatten() {
            if !entry.file_name().to_string_lossy().starts_with(PROBE_PREFIX) {
                continue;
            }
            let path = entry.path();
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!(host = %self.host, path = %path.display(), error = %e, "cannot stat probe file");
                    continue;
                }
            };
            // Timestamps ahead of our clock count as brand new.
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age < self.stale_after {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(host = %self.host, path = %path.display(), ?age, "stale probe file removed"),
                Err(e) => {
                    warn!(host = %self.host, path = %path.display(), error = %e, "stale probe file cleanup failed")
                }
            }
        }
    }

    fn confirm_tmpfile(&self, message: &RpcMessage) -> Result<Value, RemoteFault> {
        let name = message
            .str_arg("path")
            .ok_or_else(|| RemoteFault::remote("confirm_tmpfile requires a path argument"))?;
        let path = self.resolve_probe_path(name)?;
        if !path.exists() {
            info!(host = %self.host, path = %path.display(), "probe file not visible");
            return Err(RemoteFault::not_found(format!("{} does not exist", path.display())));
        }
        if let Err(e) = std::fs::remove_file(&path) {
            warn!(host = %self.host, path = %path.display(), error = %e, "probe file cleanup failed");
        }
        Ok(Value::Bool(true))
    }

    /// Probe paths are file names relative to the instances directory.
    fn resolve_probe_path(&self, name: &str) -> Result<PathBuf, RemoteFault> {
        let relative = Path::new(name);
        let mut components = relative.components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(file)), None) => Ok(self.instances_path.join(file)),
            _ => Err(RemoteFault::remote(format!(
                "probe path {name:?} is not a plain file name"
            ))),
        }
    }

    fn compare_cpu(&self, message: &RpcMessage) -> Result<Value, RemoteFault> {
        let blob = message
            .str_arg("cpu_info")
            .ok_or_else(|| RemoteFault::remote("compare_cpu requires a cpu_info argument"))?;
        let guest = CpuInfo::parse(blob)
            .map_err(|e| RemoteFault::remote(format!("unparseable cpu_info: {e}")))?;
        let compatible = self.cpu.can_host(&guest);
        if !compatible {
            info!(
                host = %self.host,
                guest_model = %guest.model,
                local_model = %self.cpu.model,
                "cpu not compatible"
            );
        }
        Ok(Value::Bool(compatible))
    }
}

#[async_trait]
impl AgentHandler for ProbeAgent {
    async fn handle(&self, message: RpcMessage) -> Result<Value, RemoteFault> {
        match message.method.as_str() {
            MKTMPFILE => self.mktmpfile(),
            CONFIRM_TMPFILE => self.confirm_tmpfile(&message),
            COMPARE_CPU => self.compare_cpu(&message),
            other => Err(RemoteFault::remote(format!("unknown method {other}"))),
        }
    }
}
