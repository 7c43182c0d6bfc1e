//! redb table definitions for the hostpool inventory store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Reservation keys follow the pattern `{host_id}:{record_id}`.

use redb::TableDefinition;

/// Hosts (with their disks embedded) keyed by `{host_id}`.
pub const HOSTS: TableDefinition<&str, &[u8]> = TableDefinition::new("hosts");

/// Compute reservations keyed by `{host_id}:{record_id}`.
pub const USED_COMPUTES: TableDefinition<&str, &[u8]> = TableDefinition::new("used_computes");

/// Disk reservations keyed by `{host_id}:{record_id}`.
pub const USED_DISKS: TableDefinition<&str, &[u8]> = TableDefinition::new("used_disks");

/// Port reservations keyed by `{host_id}:{record_id}`.
pub const USED_PORTS: TableDefinition<&str, &[u8]> = TableDefinition::new("used_ports");
