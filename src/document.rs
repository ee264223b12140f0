//! Nested document model for design documents.
//!
//! A [`Document`] mirrors the JSON shape a CouchDB-compatible server expects:
//! an `_id`, an optional `_rev`, arbitrarily nested string-keyed fields, and a
//! flat `_attachments` map. The builder folds directory contents into this
//! tree via [`Document::merge_at`].

use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, Serializer};

/// One value inside a document: raw text or a nested node.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(untagged)]
pub enum DocValue {
    Text(String),
    Node(BTreeMap<String, DocValue>),
}

/// One file under an `_attachments` directory, ready for upload.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Attachment {
    /// Base64-encoded file content (standard alphabet, no wrapping).
    pub data: String,
    /// MIME type guessed from the filename; `text/plain` when unresolvable.
    pub content_type: String,
}

/// A design document under assembly or upload.
///
/// `_id` is fixed at construction. `_rev` is only ever set from a
/// server-reported revision token, never invented locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    id: String,
    rev: Option<String>,
    fields: BTreeMap<String, DocValue>,
    attachments: BTreeMap<String, Attachment>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            fields: BTreeMap::new(),
            attachments: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn rev(&self) -> Option<&str> {
        self.rev.as_deref()
    }

    /// Record the server-reported revision token.
    pub fn set_rev(&mut self, rev: impl Into<String>) {
        self.rev = Some(rev.into());
    }

    /// Merge a directory's file map into the tree at the nested location
    /// given by `segments`, creating intermediate nodes as needed.
    ///
    /// A non-node value sitting where a path segment needs a node is
    /// replaced. Leaf merging follows [`merge_nodes`].
    pub fn merge_at(&mut self, segments: &[String], entries: BTreeMap<String, DocValue>) {
        let mut target = &mut self.fields;
        for segment in segments {
            let slot = target
                .entry(segment.clone())
                .or_insert_with(|| DocValue::Node(BTreeMap::new()));
            if !matches!(slot, DocValue::Node(_)) {
                *slot = DocValue::Node(BTreeMap::new());
            }
            match slot {
                DocValue::Node(node) => target = node,
                DocValue::Text(_) => unreachable!("slot was just normalized to a node"),
            }
        }
        merge_nodes(target, entries);
    }

    /// Look up a value by path segments, for inspection and tests.
    pub fn value_at(&self, segments: &[&str]) -> Option<&DocValue> {
        let (first, rest) = segments.split_first()?;
        let mut current = self.fields.get(*first)?;
        for segment in rest {
            match current {
                DocValue::Node(node) => current = node.get(*segment)?,
                DocValue::Text(_) => return None,
            }
        }
        Some(current)
    }

    pub fn insert_attachment(&mut self, key: impl Into<String>, attachment: Attachment) {
        self.attachments.insert(key.into(), attachment);
    }

    pub fn attachments(&self) -> &BTreeMap<String, Attachment> {
        &self.attachments
    }
}

/// Recursive key-by-key merge of `incoming` into `target`.
///
/// A key absent from `target`, or present with a mismatched shape (node vs
/// text), is replaced by the incoming value; two nodes merge recursively.
pub fn merge_nodes(target: &mut BTreeMap<String, DocValue>, incoming: BTreeMap<String, DocValue>) {
    for (key, value) in incoming {
        match (target.get_mut(&key), value) {
            (Some(DocValue::Node(existing)), DocValue::Node(new)) => merge_nodes(existing, new),
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("_id", &self.id)?;
        if let Some(rev) = &self.rev {
            map.serialize_entry("_rev", rev)?;
        }
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        if !self.attachments.is_empty() {
            map.serialize_entry("_attachments", &self.attachments)?;
        }
        map.end()
    }
}
