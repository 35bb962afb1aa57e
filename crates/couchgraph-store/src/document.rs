use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{StoreError, StoreResult};

/// Reserved key holding the document id.
pub const ID_KEY: &str = "_id";
/// Reserved key holding the revision token.
pub const REV_KEY: &str = "_rev";
/// Reserved key holding attachment metadata.
pub const ATTACHMENTS_KEY: &str = "_attachments";

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

/// Attachment entry as it appears under `_attachments`.
///
/// Written documents carry inline `data` (base64); fetched documents carry
/// stubs with `length` and `digest` only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentInfo {
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stub: bool,
}

impl AttachmentInfo {
    /// An attachment carried inline as base64.
    pub fn inline(content_type: impl Into<String>, content: &[u8]) -> Self {
        Self {
            content_type: content_type.into(),
            data: Some(BASE64.encode(content)),
            length: Some(content.len() as u64),
            digest: None,
            stub: false,
        }
    }

    /// A reference to an attachment already held by the store.
    pub fn stub(content_type: impl Into<String>, length: u64, digest: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            data: None,
            length: Some(length),
            digest: Some(digest.into()),
            stub: true,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::new();
        map.insert("content_type".into(), JsonValue::String(self.content_type.clone()));
        if let Some(data) = &self.data {
            map.insert("data".into(), JsonValue::String(data.clone()));
        }
        if let Some(length) = self.length {
            map.insert("length".into(), JsonValue::from(length));
        }
        if let Some(digest) = &self.digest {
            map.insert("digest".into(), JsonValue::String(digest.clone()));
        }
        if self.stub {
            map.insert("stub".into(), JsonValue::Bool(true));
        }
        JsonValue::Object(map)
    }

    /// Decode the inline payload, if present.
    pub fn decode_data(&self) -> StoreResult<Option<Vec<u8>>> {
        self.data
            .as_deref()
            .map(|data| {
                BASE64
                    .decode(data)
                    .map_err(|e| StoreError::Serialization(format!("attachment data: {e}")))
            })
            .transpose()
    }
}

/// An attachment payload with its content type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentBlob {
    pub content_type: String,
    pub data: Vec<u8>,
}

impl AttachmentBlob {
    pub fn new(content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Content digest in the `blake3-<hex>` form reported on stubs.
    pub fn digest(&self) -> String {
        format!("blake3-{}", blake3::hash(&self.data).to_hex())
    }

    pub fn to_inline(&self) -> AttachmentInfo {
        AttachmentInfo::inline(self.content_type.clone(), &self.data)
    }

    pub fn to_stub(&self) -> AttachmentInfo {
        AttachmentInfo::stub(self.content_type.clone(), self.data.len() as u64, self.digest())
    }
}

// ---------------------------------------------------------------------------
// RawDocument
// ---------------------------------------------------------------------------

/// A document as exchanged with the store.
///
/// `body` holds every top-level key except `_id`, `_rev`, and
/// `_attachments`, which are lifted into their own fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawDocument {
    pub id: String,
    pub rev: Option<String>,
    pub body: Map<String, JsonValue>,
    pub attachments: BTreeMap<String, AttachmentInfo>,
}

impl RawDocument {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_rev(mut self, rev: impl Into<String>) -> Self {
        self.rev = Some(rev.into());
        self
    }

    pub fn with_body(mut self, body: Map<String, JsonValue>) -> Self {
        self.body = body;
        self
    }

    /// Builder-style body insert.
    pub fn with_field(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.body.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.body.get(key)
    }

    /// Full JSON form with the reserved keys in place.
    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::with_capacity(self.body.len() + 3);
        map.insert(ID_KEY.into(), JsonValue::String(self.id.clone()));
        if let Some(rev) = &self.rev {
            map.insert(REV_KEY.into(), JsonValue::String(rev.clone()));
        }
        for (key, value) in &self.body {
            map.insert(key.clone(), value.clone());
        }
        if !self.attachments.is_empty() {
            let attachments = self
                .attachments
                .iter()
                .map(|(name, info)| (name.clone(), info.to_json()))
                .collect();
            map.insert(ATTACHMENTS_KEY.into(), JsonValue::Object(attachments));
        }
        JsonValue::Object(map)
    }

    /// Parse a full JSON document.
    pub fn from_json(value: JsonValue) -> StoreResult<Self> {
        let JsonValue::Object(map) = value else {
            return Err(StoreError::InvalidDocument("document is not an object".into()));
        };
        let (mut id, mut rev, mut attachments) = (None, None, BTreeMap::new());
        let mut body = Map::with_capacity(map.len());
        for (key, value) in map {
            match key.as_str() {
                ID_KEY => id = Some(value),
                REV_KEY => rev = Some(value),
                ATTACHMENTS_KEY => attachments = serde_json::from_value(value)?,
                _ => {
                    body.insert(key, value);
                }
            }
        }
        let id = match id {
            Some(JsonValue::String(id)) => id,
            _ => return Err(StoreError::InvalidDocument("missing `_id`".into())),
        };
        let rev = match rev {
            Some(JsonValue::String(rev)) => Some(rev),
            Some(JsonValue::Null) | None => None,
            Some(other) => {
                return Err(StoreError::InvalidDocument(format!(
                    "`_rev` must be a string, got {other}"
                )))
            }
        };
        Ok(Self {
            id,
            rev,
            body,
            attachments,
        })
    }
}

/// Per-item outcome of a batched write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BulkWriteResult {
    /// The document was written at `rev`.
    Written { id: String, rev: String },
    /// The supplied revision was stale.
    Conflict { id: String },
    /// The item was rejected for another reason.
    Failed { id: String, reason: String },
}

impl BulkWriteResult {
    pub fn id(&self) -> &str {
        match self {
            Self::Written { id, .. } | Self::Conflict { id } | Self::Failed { id, .. } => id,
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}
