//! Request and reply messages

use crate::types::{Hash, SongId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const NOT_FOUND: &str = "Not Found";
pub const INTERNAL_SERVER_ERROR: &str = "Internal server error";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadTrackByUrlRequest {
    pub song_id: SongId,
    pub url: String,
    pub is_caching: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicIsSuccessResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindTrackByFingerprintRequest {
    /// hash -> timestamp offset within the snippet
    pub fingerprint: HashMap<Hash, Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
}

impl ErrorDetail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindTrackByFingerprintResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song_id: Option<SongId>,
    /// Offset of the snippet within the stored track
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song_metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorDetail>,
}

impl FindTrackByFingerprintResponse {
    pub fn is_match(&self) -> bool {
        self.song_id.is_some() && self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteTrackByIdRequest {
    pub song_id: SongId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_map_accepts_string_keys() {
        let request: FindTrackByFingerprintRequest =
            serde_json::from_value(json!({"fingerprint": {"17": 40, "18446744073709551615": 0}})).unwrap();
        assert_eq!(request.fingerprint.get(&17), Some(&40));
        assert_eq!(request.fingerprint.get(&u64::MAX), Some(&0));
    }

    #[test]
    fn test_find_reply_omits_empty_fields() {
        let not_found = FindTrackByFingerprintResponse {
            errors: vec![ErrorDetail::new(NOT_FOUND)],
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&not_found).unwrap(),
            json!({"errors": [{"message": "Not Found"}]})
        );
        assert!(!not_found.is_match());
    }
}
