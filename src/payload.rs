//! Kind-specific object payloads and the minimal/full publication shapes
//! described by the northbound publication contract.

use crate::types::{Kind, ObjectKey, Version};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabasePayload {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePayload {
    pub db_name: String,
    pub table_name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewPayload {
    pub db_name: String,
    pub view_name: String,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionPayload {
    pub db_name: String,
    pub function_name: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourcePayload {
    pub name: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePoolPayload {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalPayload {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegePayload {
    pub principal: String,
    pub privilege: String,
}

/// The identity carried by the synthetic terminal `CATALOG` record. A
/// coordinator treats a change in `service_id` as an implicit full
/// invalidation ("Service identity" support).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogIdentity {
    pub service_id: u64,
    pub version: Version,
}

/// A tagged variant standing in for dynamic dispatch (DESIGN NOTES,
/// "Dynamic dispatch"): the delta builder and registry match on the tag
/// rather than calling through a trait object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObjectPayload {
    Database(DatabasePayload),
    Table(TablePayload),
    View(ViewPayload),
    Function(FunctionPayload),
    DataSource(DataSourcePayload),
    CachePool(CachePoolPayload),
    Principal(PrincipalPayload),
    Privilege(PrivilegePayload),
    Catalog(CatalogIdentity),
}

impl ObjectPayload {
    pub fn kind(&self) -> Kind {
        match self {
            ObjectPayload::Database(_) => Kind::Database,
            ObjectPayload::Table(_) => Kind::Table,
            ObjectPayload::View(_) => Kind::View,
            ObjectPayload::Function(_) => Kind::Function,
            ObjectPayload::DataSource(_) => Kind::DataSource,
            ObjectPayload::CachePool(_) => Kind::HdfsCachePool,
            ObjectPayload::Principal(_) => Kind::Principal,
            ObjectPayload::Privilege(_) => Kind::Privilege,
            ObjectPayload::Catalog(_) => Kind::Catalog,
        }
    }
}

/// A fully materialized object plus its version, as returned by registry
/// snapshots and consumed by the delta builder.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedObject {
    pub key: ObjectKey,
    pub version: Version,
    pub payload: ObjectPayload,
    /// Always `true` for non-heavy kinds; for TABLE/VIEW reflects whether
    /// the shell has been materialized by the table loader.
    pub loaded: bool,
}

/// The minimization rule from the external-interfaces section: what goes
/// out on the `MINIMAL` topic for each kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MinimalPayload {
    Database {
        db_name: String,
    },
    TableOrView {
        db_name: String,
        table_name: String,
    },
    Function {
        function_name: String,
    },
    /// PRINCIPAL/PRIVILEGE/CATALOG: no useful minimization, ship the full
    /// payload on both topics.
    Full(ObjectPayload),
    /// DATA_SOURCE/HDFS_CACHE_POOL: never published on the minimal topic.
    NotPublished,
}

impl VersionedObject {
    pub fn minimal_payload(&self) -> MinimalPayload {
        match &self.payload {
            ObjectPayload::Database(d) => MinimalPayload::Database {
                db_name: d.name.clone(),
            },
            ObjectPayload::Table(t) => MinimalPayload::TableOrView {
                db_name: t.db_name.clone(),
                table_name: t.table_name.clone(),
            },
            ObjectPayload::View(v) => MinimalPayload::TableOrView {
                db_name: v.db_name.clone(),
                table_name: v.view_name.clone(),
            },
            ObjectPayload::Function(f) => MinimalPayload::Function {
                function_name: f.function_name.clone(),
            },
            ObjectPayload::DataSource(_) | ObjectPayload::CachePool(_) => {
                MinimalPayload::NotPublished
            }
            p @ (ObjectPayload::Principal(_)
            | ObjectPayload::Privilege(_)
            | ObjectPayload::Catalog(_)) => MinimalPayload::Full(p.clone()),
        }
    }
}

/// A tombstone's minimal payload: sufficient for a coordinator to
/// invalidate its replica without the full former contents (Data Model,
/// Delete Log).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TombstonePayload {
    pub key_kind: Kind,
    pub scoped_name: String,
}

impl From<&ObjectKey> for TombstonePayload {
    fn from(key: &ObjectKey) -> Self {
        Self {
            key_kind: key.kind(),
            scoped_name: key.scoped_name().to_string(),
        }
    }
}

/// One record handed to the publication sink: either an update (`deleted =
/// false`) or a tombstone (`deleted = true`).
#[derive(Debug, Clone)]
pub struct PublishRecord {
    pub key: ObjectKey,
    pub version: Version,
    pub payload: Vec<u8>,
    pub deleted: bool,
}
