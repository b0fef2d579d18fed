use crate::delivery::dispatcher::{Worker, WorkerError};
use crate::delivery::Envelope;
use crate::messages::{MetadataField, MetadataMessage, METADATA_TYPE_ATTRIBUTE};
use crate::store::{RecordStore, RecordUpdate};
use std::sync::Arc;
use tracing::info;

/// Applies typed metadata messages as single-field updates.
///
/// The target field comes from the envelope's `metadata_type` attribute, not
/// the payload; the broker filter guarantees only routable types arrive, and
/// anything else is treated as malformed input.
pub struct MetadataApplier {
    records: Arc<dyn RecordStore>,
}

impl MetadataApplier {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }
}

#[async_trait::async_trait]
impl Worker for MetadataApplier {
    fn name(&self) -> &'static str {
        "metadata-applier"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), WorkerError> {
        let field = envelope
            .attribute(METADATA_TYPE_ATTRIBUTE)
            .and_then(MetadataField::from_attribute)
            .ok_or_else(|| {
                WorkerError::malformed("missing or unknown metadata_type attribute")
            })?;

        let message: MetadataMessage = envelope
            .decode_json()
            .map_err(|e| WorkerError::malformed(e.to_string()))?;

        let id = message
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| WorkerError::malformed("metadata message without id"))?;
        let value = message
            .value
            .filter(|value| !value.is_empty())
            .ok_or_else(|| WorkerError::malformed("metadata message without value"))?;

        self.records
            .update_fields(&id, RecordUpdate::Metadata { field, value: value.clone() })
            .await?;

        info!(id = %id, field = %field, value = %value, "Metadata applied");
        metrics::counter!("darkroom.metadata.applied").increment(1);
        Ok(())
    }
}
