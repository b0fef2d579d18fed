//! In-memory store implementations for tests and local runs.

use crate::messages::MetadataField;
use crate::store::{ImageRecord, ObjectStore, RecordStore, RecordUpdate};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// In-memory record store keyed by image id
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<String, ImageRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a record by id
    pub fn get(&self, id: &str) -> Option<ImageRecord> {
        self.records.read().unwrap().get(id).cloned()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }
}

#[async_trait::async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn put(&self, id: &str, created_at: DateTime<Utc>) -> Result<()> {
        let record = ImageRecord {
            id: id.to_string(),
            created_at: Some(created_at),
            ..ImageRecord::default()
        };
        self.records
            .write()
            .unwrap()
            .insert(id.to_string(), record);
        Ok(())
    }

    async fn update_fields(&self, id: &str, update: RecordUpdate) -> Result<()> {
        let mut records = self.records.write().unwrap();
        let record = records.entry(id.to_string()).or_insert_with(|| ImageRecord {
            id: id.to_string(),
            ..ImageRecord::default()
        });

        match update {
            RecordUpdate::Metadata { field, value } => match field {
                MetadataField::Caption => record.caption = Some(value),
                MetadataField::Date => record.date = Some(value),
                MetadataField::Name => record.name = Some(value),
            },
            RecordUpdate::Review {
                status,
                reason,
                reviewed_at,
            } => {
                record.status = Some(status);
                record.reason = Some(reason);
                record.reviewed_at = Some(reviewed_at);
            }
        }

        Ok(())
    }
}

/// In-memory object store keyed by (bucket, key)
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashSet<(String, String)>>,
    deleted: RwLock<Vec<(String, String)>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object (upstream upload)
    pub fn put_object(&self, bucket: impl Into<String>, key: impl Into<String>) {
        self.objects
            .write()
            .unwrap()
            .insert((bucket.into(), key.into()));
    }

    /// Whether an object currently exists
    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .read()
            .unwrap()
            .contains(&(bucket.to_string(), key.to_string()))
    }

    /// Deletions issued so far, in order
    pub fn deletions(&self) -> Vec<(String, String)> {
        self.deleted.read().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.objects
            .write()
            .unwrap()
            .remove(&(bucket.to_string(), key.to_string()));
        self.deleted
            .write()
            .unwrap()
            .push((bucket.to_string(), key.to_string()));
        Ok(())
    }
}
