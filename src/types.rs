//! Core identifiers shared by every other module: the version number and
//! the canonical object key.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A monotonically increasing catalog version. `0` is the sentinel meaning
/// "never assigned" (see spec Data Model, Version).
pub type Version = u64;

/// Sentinel value for "no version has ever been assigned to this object".
pub const NO_VERSION: Version = 0;

/// The kind of schema object a [`crate::payload::Object`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    Database,
    Table,
    View,
    Function,
    DataSource,
    HdfsCachePool,
    Principal,
    Privilege,
    Catalog,
}

impl Kind {
    /// Tables and views are "heavy": they may be incomplete shells awaiting
    /// background load and carry a per-object lock.
    pub fn is_heavy(self) -> bool {
        matches!(self, Kind::Table | Kind::View)
    }

    fn tag(self) -> &'static str {
        match self {
            Kind::Database => "DATABASE",
            Kind::Table => "TABLE",
            Kind::View => "VIEW",
            Kind::Function => "FUNCTION",
            Kind::DataSource => "DATA_SOURCE",
            Kind::HdfsCachePool => "HDFS_CACHE_POOL",
            Kind::Principal => "PRINCIPAL",
            Kind::Privilege => "PRIVILEGE",
            Kind::Catalog => "CATALOG",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Canonical object key: `<kind>:<scoped-name>`.
///
/// Uniqueness across all objects of all kinds is an invariant enforced by
/// [`crate::registry::Registry`]: two objects of different kinds never
/// collide because the kind is part of the key itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    kind: Kind,
    scoped_name: String,
}

impl ObjectKey {
    pub fn new(kind: Kind, scoped_name: impl Into<String>) -> Self {
        Self {
            kind,
            scoped_name: scoped_name.into(),
        }
    }

    pub fn database(name: impl Into<String>) -> Self {
        Self::new(Kind::Database, name)
    }

    pub fn table(db: &str, table: &str) -> Self {
        Self::new(Kind::Table, format!("{db}.{table}"))
    }

    pub fn view(db: &str, view: &str) -> Self {
        Self::new(Kind::View, format!("{db}.{view}"))
    }

    pub fn function(db: &str, function: &str) -> Self {
        Self::new(Kind::Function, format!("{db}.{function}"))
    }

    pub fn data_source(name: impl Into<String>) -> Self {
        Self::new(Kind::DataSource, name)
    }

    pub fn cache_pool(name: impl Into<String>) -> Self {
        Self::new(Kind::HdfsCachePool, name)
    }

    pub fn principal(name: impl Into<String>) -> Self {
        Self::new(Kind::Principal, name)
    }

    pub fn privilege(principal: &str, privilege: &str) -> Self {
        Self::new(Kind::Privilege, format!("{principal}.{privilege}"))
    }

    /// The one and only terminal `CATALOG` record key (§4.4 step 6).
    pub fn catalog() -> Self {
        Self::new(Kind::Catalog, "CATALOG")
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn scoped_name(&self) -> &str {
        &self.scoped_name
    }

    /// For TABLE/VIEW/FUNCTION keys, split `db.name` back into its parts.
    pub fn db_and_local_name(&self) -> Option<(&str, &str)> {
        self.scoped_name.split_once('.')
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.scoped_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_canonical_form() {
        let key = ObjectKey::table("analytics", "events");
        assert_eq!(key.to_string(), "TABLE:analytics.events");
    }

    #[test]
    fn heavy_kinds() {
        assert!(Kind::Table.is_heavy());
        assert!(Kind::View.is_heavy());
        assert!(!Kind::Database.is_heavy());
        assert!(!Kind::Function.is_heavy());
    }

    #[test]
    fn db_and_local_name_split() {
        let key = ObjectKey::table("db1", "t1");
        assert_eq!(key.db_and_local_name(), Some(("db1", "t1")));

        let key = ObjectKey::database("db1");
        assert_eq!(key.db_and_local_name(), None);
    }
}
