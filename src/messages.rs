//! Wire payloads exchanged between the review workers.
//!
//! Every payload is JSON; routing attributes (such as `metadata_type`) travel
//! on the envelope, not in the payload, so they can be inspected and filtered
//! without deserializing the message body.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Envelope attribute naming the metadata field a message targets
pub const METADATA_TYPE_ATTRIBUTE: &str = "metadata_type";

/// Envelope attribute naming the role of the message producer
pub const USER_TYPE_ATTRIBUTE: &str = "user_type";

/// Object-creation notification emitted by the object store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectCreatedNotification {
    #[serde(rename = "Records", default)]
    pub records: Vec<ObjectRecord>,
}

/// One created object inside a notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: BucketRef,
    pub object: ObjectRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketRef {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRef {
    pub key: String,
}

/// Bucket and decoded key of a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectCreatedNotification {
    /// Build a notification for a single object (upstream feeders, tests)
    pub fn single(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            records: vec![ObjectRecord {
                s3: S3Entity {
                    bucket: BucketRef {
                        name: bucket.into(),
                    },
                    object: ObjectRef { key: key.into() },
                },
            }],
        }
    }
}

impl ObjectRecord {
    /// Bucket name and URL-decoded object key
    pub fn location(&self) -> ObjectLocation {
        ObjectLocation {
            bucket: self.s3.bucket.name.clone(),
            key: decode_object_key(&self.s3.object.key),
        }
    }
}

/// Decode an object key as it appears in a creation notification.
///
/// Keys arrive URL-encoded with `+` standing in for spaces. Invalid escape
/// sequences are kept literally rather than failing the whole notification.
pub fn decode_object_key(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match hex_pair(bytes[i + 1], bytes[i + 2]) {
                    Some(decoded) => {
                        out.push(decoded);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

/// Lowercased file extension of a key (substring after the last `.`)
pub fn file_extension(key: &str) -> Option<String> {
    let (_, ext) = key.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Metadata field a typed metadata message may target.
///
/// The field is chosen at runtime from the envelope's `metadata_type`
/// attribute and mapped explicitly to a field update; there is no free-form
/// property access anywhere in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataField {
    Caption,
    Date,
    Name,
}

impl MetadataField {
    /// All routable metadata fields, in attribute form
    pub const ATTRIBUTE_VALUES: [&'static str; 3] = ["Caption", "Date", "Name"];

    /// Parse the `metadata_type` attribute value
    pub fn from_attribute(value: &str) -> Option<Self> {
        match value {
            "Caption" => Some(Self::Caption),
            "Date" => Some(Self::Date),
            "Name" => Some(Self::Name),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Caption => "Caption",
            Self::Date => "Date",
            Self::Name => "Name",
        }
    }
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review status of an image record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a typed metadata message.
///
/// Fields are optional so that a missing field is reported as malformed input
/// (logged and discarded) instead of a deserialization failure with no
/// context about which field was absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

/// Payload of a moderation status message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub update: Option<StatusUpdate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(default)]
    pub status: Option<ReviewStatus>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Derived notification event, produced once per successful status update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub id: String,
    pub status: ReviewStatus,
    pub reason: String,
}
