use crate::types::FeatureRow;
use anyhow::Result;
use async_trait::async_trait;

/// Binary label produced by a classifier.
pub type Label = u32;

#[async_trait]
pub trait Engine {
    /// Classify one sample. Errors cover everything from a shape mismatch
    /// to a failure inside the model itself.
    async fn predict(&self, row: FeatureRow) -> Result<Label>;

    /// Human readable name for a label, if the model carries one.
    fn label_name(&self, _label: Label) -> Option<&str> {
        None
    }
}
