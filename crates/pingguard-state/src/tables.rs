//! redb table definitions for the pingguard state store.
//!
//! Each table uses `&str` keys and `&[u8]` values.

use redb::TableDefinition;

/// Ping histories keyed by target IP address.
pub const HISTORIES: TableDefinition<&str, &[u8]> = TableDefinition::new("histories");

/// Remediation state under [`REMEDIATION_KEY`].
pub const REMEDIATION: TableDefinition<&str, &[u8]> = TableDefinition::new("remediation");

/// Raw pre-clear or unreadable values keyed by `{key}.{epoch_millis}`.
pub const BACKUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("backups");

/// The single key of the remediation table.
pub const REMEDIATION_KEY: &str = "last_triggered";
