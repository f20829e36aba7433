use serde::{Deserialize, Serialize};

use super::error::ApiError;

/// Standard response wrapper returned by every backend endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl<T> Envelope<T> {
    /// Unwrap the payload, treating `success: false` or a missing `data`
    /// field as a rejected request.
    pub fn into_data(self) -> Result<T, ApiError> {
        if !self.success {
            return Err(ApiError::Unsuccessful(
                self.message.unwrap_or_else(|| "no message".to_string()),
            ));
        }
        self.data
            .ok_or_else(|| ApiError::InvalidResponse("envelope has no data".to_string()))
    }
}
