use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::Label;
use crate::error::PredictError;

/// One sample reshaped from the request body: a single row of `len()` features.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    values: Vec<f64>,
}

impl FeatureRow {
    #[cfg(test)]
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Pull the `features` array out of a predict body.
    ///
    /// A missing, empty or non-array field is the client's fault and maps to
    /// [`PredictError::InvalidInput`]. An array holding anything other than
    /// numbers is an execution error, the same class as a shape mismatch
    /// reported by the classifier.
    pub fn from_body(body: &Value) -> Result<Self, PredictError> {
        let items = match body.get("features") {
            Some(Value::Array(items)) if !items.is_empty() => items,
            _ => return Err(PredictError::InvalidInput),
        };

        let values = items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                item.as_f64().ok_or_else(|| {
                    anyhow::anyhow!("could not convert feature {index} to float: {item}")
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self { values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.values
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PredictResponse {
    pub prediction: Label,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
