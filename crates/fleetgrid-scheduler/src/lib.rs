//! fleetgrid-scheduler — live-migration validation and host placement.
//!
//! Decides whether a running instance may be live-migrated to a proposed
//! destination, runs the cross-host probes a hypervisor migration needs,
//! and marks the instance (and its volumes) as migrating once everything
//! checks out. Also hosts the placement policy contract.
//!
//! # Architecture
//!
//! ```text
//! LiveMigrationValidator
//!   ├── FleetDirectory (reads via FleetRepository, liveness filtering)
//!   ├── SharedStorageProber ──┐
//!   ├── CompatibilityChecker ─┴── AgentClient (timeout) ── AgentTransport
//!   │                                                       ├── LocalTransport → ProbeAgent
//!   │                                                       └── HttpTransport
//!   ├── capacity (memory headroom)
//!   └── WorkloadStateTransitioner (atomic batch via FleetRepository)
//!
//! Scheduler (trait)
//!   └── RoundRobinScheduler (RoundRobinBalancer over live hosts)
//! ```

pub mod agent;
pub mod capacity;
pub mod compat;
pub mod config;
pub mod directory;
pub mod error;
pub mod liveness;
pub mod load_balancer;
pub mod repository;
pub mod rpc;
pub mod scheduler;
pub mod storage_probe;
pub mod transition;
pub mod transport;
pub mod validator;

pub use agent::{AgentHandler, CpuInfo, ProbeAgent};
pub use compat::CompatibilityChecker;
pub use config::SchedulerConfig;
pub use directory::FleetDirectory;
pub use error::{SchedulerError, SchedulerResult};
pub use liveness::LivenessTracker;
pub use load_balancer::RoundRobinBalancer;
pub use repository::FleetRepository;
pub use rpc::{AgentClient, AgentTransport, RpcError, RpcMessage};
pub use scheduler::{Placement, PlacementRequest, RoundRobinScheduler, Scheduler};
pub use storage_probe::SharedStorageProber;
pub use transition::WorkloadStateTransitioner;
pub use transport::{HttpTransport, LocalTransport};
pub use validator::{LiveMigrationValidator, MigrationPhase};
