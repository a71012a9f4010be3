//! redb table definitions for the FleetGrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Service records keyed by `{topic}/{host}`.
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");

/// Instance records keyed by instance id.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Volume records keyed by volume id.
pub const VOLUMES: TableDefinition<&str, &[u8]> = TableDefinition::new("volumes");
