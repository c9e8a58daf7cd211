use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A JSON object, used for entry metadata.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Filesystem-flavored attributes of an entry, plus the partial
/// metadata snapshot embedded at list time. Attributes are immutable
/// once the entry is returned from List.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryAttributes {
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub atime: Option<OffsetDateTime>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub mtime: Option<OffsetDateTime>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub ctime: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Partial metadata. Full metadata is fetched by the Metadata
    /// operation; this is the summary embedded in list results.
    #[serde(default, skip_serializing_if = "JsonObject::is_empty")]
    pub meta: JsonObject,
}

impl EntryAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_mtime(mut self, mtime: OffsetDateTime) -> Self {
        self.mtime = Some(mtime);
        self
    }

    pub fn with_ctime(mut self, ctime: OffsetDateTime) -> Self {
        self.ctime = Some(ctime);
        self
    }

    pub fn with_atime(mut self, atime: OffsetDateTime) -> Self {
        self.atime = Some(atime);
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_meta(mut self, meta: JsonObject) -> Self {
        self.meta = meta;
        self
    }
}
