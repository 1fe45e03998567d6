//! redb table definitions for the modelgate state store.
//!
//! Values are opaque bytes; expiry lives in a side table so that a single
//! write transaction updates both together.

use redb::TableDefinition;

/// Raw values keyed by logical key (`tier_state`, `session:{id}`).
pub const VALUES: TableDefinition<&str, &[u8]> = TableDefinition::new("values");

/// Absolute expiry (unix milliseconds) for keys written with a TTL.
pub const EXPIRY: TableDefinition<&str, u64> = TableDefinition::new("expiry");
