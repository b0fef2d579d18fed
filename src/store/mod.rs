//! Collaborator stores: the durable object store holding uploaded files and
//! the durable record store holding per-image review state.
//!
//! Both are external systems accessed through narrow trait contracts; every
//! writer updates a disjoint or idempotent subset of record fields, so no
//! cross-worker locking exists anywhere in the pipeline.

pub mod memory;
pub mod postgres;
pub mod s3;

use crate::messages::{MetadataField, ReviewStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Per-image review state.
///
/// `id` is the object key, immutable and unique. A record may exist with
/// only `created_at` populated (pre-review) or fully populated; partial
/// updates never clobber fields they do not name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageRecord {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub caption: Option<String>,
    pub date: Option<String>,
    pub name: Option<String>,
    pub status: Option<ReviewStatus>,
    pub reason: Option<String>,
    pub reviewed_at: Option<String>,
}

/// A partial, last-write-wins update of an image record.
///
/// Each variant is applied as a single conditional field-set operation
/// against the store; the three metadata fields and the review triple are
/// disjoint, which keeps concurrent writers commutative.
#[derive(Debug, Clone)]
pub enum RecordUpdate {
    /// Set exactly one metadata field
    Metadata {
        field: MetadataField,
        value: String,
    },
    /// Set status, reason and the review timestamp together
    Review {
        status: ReviewStatus,
        reason: String,
        reviewed_at: String,
    },
}

/// Durable key-value record store holding per-image state
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Unconditionally put a fresh record keyed by `id` with `created_at`
    /// set. Reprocessing the same key overwrites the record; `id` is
    /// immutable and the record is otherwise empty at creation time.
    async fn put(&self, id: &str, created_at: DateTime<Utc>) -> Result<()>;

    /// Apply a partial field update to the record identified by `id`,
    /// leaving all other fields untouched. Creates the record if it does not
    /// exist yet (updates and intake races are order-independent).
    async fn update_fields(&self, id: &str, update: RecordUpdate) -> Result<()>;
}

/// Durable object store holding the uploaded files
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Delete an object; deleting a missing object is not an error
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;
}
