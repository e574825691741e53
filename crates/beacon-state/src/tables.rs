//! redb table definitions for the Beacon registry store.

use redb::TableDefinition;

/// Service records keyed by `{name}`, JSON-serialized.
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");
