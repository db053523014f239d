//! Upload identifiers and the canonical upload record.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for an upload.
///
/// Identifiers are random v4 UUIDs drawn from the OS CSPRNG, so they are
/// unguessable and safe to expose in upload URLs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(Uuid);

impl UploadId {
    /// Generate a new random upload ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidUploadId(format!("{s:?}: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for UploadId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observable lifecycle state of an upload.
///
/// Terminated uploads have no state: their record no longer exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// Created, no bytes accepted yet.
    Created,
    /// Some bytes accepted, more expected.
    Writing,
    /// All declared bytes accepted.
    Complete,
}

impl UploadState {
    /// Check if the upload can still receive bytes.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Created | Self::Writing)
    }
}

/// Canonical metadata record for one upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadInfo {
    /// Upload identifier, immutable after creation.
    pub id: UploadId,
    /// Declared total length in bytes. Meaningless while `size_is_deferred`.
    pub size: u64,
    /// The client has not declared the length yet.
    #[serde(default)]
    pub size_is_deferred: bool,
    /// Bytes accepted so far.
    pub offset: u64,
    /// Client-supplied metadata, returned verbatim.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// This upload is a segment of a later final upload.
    #[serde(default)]
    pub is_partial: bool,
    /// This upload is the concatenation of `partial_uploads`.
    #[serde(default)]
    pub is_final: bool,
    /// Ordered partial uploads, only set on final uploads.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partial_uploads: Vec<UploadId>,
    /// When the upload was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl UploadInfo {
    /// Create a fresh record with a known size and no bytes accepted.
    pub fn new(id: UploadId, size: u64) -> Self {
        Self {
            id,
            size,
            size_is_deferred: false,
            offset: 0,
            metadata: BTreeMap::new(),
            is_partial: false,
            is_final: false,
            partial_uploads: Vec::new(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Create a fresh record whose size will be declared later.
    pub fn deferred(id: UploadId) -> Self {
        Self {
            size_is_deferred: true,
            ..Self::new(id, 0)
        }
    }

    /// True iff every declared byte has been accepted.
    pub fn is_complete(&self) -> bool {
        !self.size_is_deferred && self.offset == self.size
    }

    /// Derive the lifecycle state from the offset.
    pub fn state(&self) -> UploadState {
        if self.is_complete() {
            UploadState::Complete
        } else if self.offset == 0 {
            UploadState::Created
        } else {
            UploadState::Writing
        }
    }

    /// Bytes still expected, or `None` while the size is deferred.
    pub fn remaining(&self) -> Option<u64> {
        if self.size_is_deferred {
            None
        } else {
            Some(self.size.saturating_sub(self.offset))
        }
    }

    /// Check the structural invariants of the record.
    pub fn validate(&self) -> crate::Result<()> {
        if self.is_partial && self.is_final {
            return Err(crate::Error::InvalidUpload(
                "an upload cannot be both partial and final".to_string(),
            ));
        }
        if !self.is_final && !self.partial_uploads.is_empty() {
            return Err(crate::Error::InvalidUpload(
                "only final uploads may reference partial uploads".to_string(),
            ));
        }
        if self.is_final && self.size_is_deferred {
            return Err(crate::Error::InvalidUpload(
                "final uploads cannot defer their length".to_string(),
            ));
        }
        if self.size_is_deferred && self.size != 0 {
            return Err(crate::Error::InvalidUpload(
                "deferred uploads must not declare a size".to_string(),
            ));
        }
        if !self.size_is_deferred && self.offset > self.size {
            return Err(crate::Error::InvalidUpload(format!(
                "offset {} exceeds size {}",
                self.offset, self.size
            )));
        }
        Ok(())
    }

    /// Serialize to the JSON sidecar format.
    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    /// Parse the JSON sidecar format.
    pub fn from_json(data: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(data).map_err(|e| crate::Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_id_roundtrip() {
        let id = UploadId::new();
        let parsed: UploadId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.as_uuid(), parsed.as_uuid());
        assert!(UploadId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_upload_ids_are_unique() {
        let a = UploadId::new();
        let b = UploadId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_uuid().get_version_num(), 4);
    }

    #[test]
    fn test_state_follows_offset() {
        let mut info = UploadInfo::new(UploadId::new(), 10);
        assert_eq!(info.state(), UploadState::Created);
        assert!(info.state().is_active());

        info.offset = 5;
        assert_eq!(info.state(), UploadState::Writing);
        assert_eq!(info.remaining(), Some(5));

        info.offset = 10;
        assert_eq!(info.state(), UploadState::Complete);
        assert!(!info.state().is_active());
    }

    #[test]
    fn test_deferred_upload_is_never_complete() {
        let info = UploadInfo::deferred(UploadId::new());
        assert!(!info.is_complete());
        assert_eq!(info.remaining(), None);
        assert!(info.validate().is_ok());
    }

    #[test]
    fn test_zero_length_upload_is_complete() {
        let info = UploadInfo::new(UploadId::new(), 0);
        assert!(info.is_complete());
    }

    #[test]
    fn test_validate_rejects_partial_and_final() {
        let mut info = UploadInfo::new(UploadId::new(), 3);
        info.is_partial = true;
        info.is_final = true;
        assert!(info.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_offset_past_size() {
        let mut info = UploadInfo::new(UploadId::new(), 3);
        info.offset = 4;
        assert!(info.validate().is_err());
    }

    #[test]
    fn test_sidecar_json_shape() {
        let mut info = UploadInfo::new(UploadId::new(), 7);
        info.metadata.insert("filename".to_string(), "a.txt".to_string());

        let json: serde_json::Value = serde_json::from_slice(&info.to_json().unwrap()).unwrap();
        assert_eq!(json["id"], info.id.to_string());
        assert_eq!(json["size"], 7);
        assert_eq!(json["metadata"]["filename"], "a.txt");
        assert!(json.get("partial_uploads").is_none());

        let decoded = UploadInfo::from_json(&info.to_json().unwrap()).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn test_sidecar_defaults_missing_flags() {
        let id = UploadId::new();
        let json = format!(
            r#"{{"id":"{id}","size":4,"offset":0,"created_at":"2024-01-01T00:00:00Z"}}"#
        );
        let info = UploadInfo::from_json(json.as_bytes()).unwrap();
        assert!(!info.is_partial);
        assert!(!info.is_final);
        assert!(info.metadata.is_empty());
    }
}
