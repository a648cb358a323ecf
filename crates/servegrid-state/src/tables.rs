//! redb table definitions.
//!
//! Keys are task names; values are JSON arrays.

use redb::TableDefinition;

/// `Vec<String>` of container ids per task, in creation order.
pub const CONTAINERS: TableDefinition<&str, &[u8]> = TableDefinition::new("containers");

/// `Vec<AnomalyRecommendResult>` per task, newest first.
pub const HISTORY: TableDefinition<&str, &[u8]> = TableDefinition::new("history");
