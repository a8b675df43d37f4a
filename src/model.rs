//! Data model shared by client and server (spec.md §3).

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::datestamp::Granularity;

/// Immutable record descriptor. Never mutated after construction by a
/// reader (client side) or a `Repository` (server side).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub identifier: String,
    pub datestamp: NaiveDateTime,
    pub set_spec: Vec<String>,
    pub deleted: bool,
    /// The source `<header>` XML, when the caller retained it. Never
    /// populated by the server builder; only by a client-side reader
    /// that chose to keep it for passthrough.
    #[serde(skip)]
    pub source_xml: Option<String>,
}

impl Header {
    pub fn new(identifier: impl Into<String>, datestamp: NaiveDateTime) -> Self {
        Header {
            identifier: identifier.into(),
            datestamp,
            set_spec: Vec::new(),
            deleted: false,
            source_xml: None,
        }
    }

    pub fn with_set_spec(mut self, set_spec: Vec<String>) -> Self {
        self.set_spec = set_spec;
        self
    }

    pub fn deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// A field value produced by a metadata reader: either a single string
/// or an ordered sequence of strings (spec.md's `bytes`/`text` vs
/// `bytesList`/`textList` field types collapse to the same shape once
/// read — the distinction only matters to the reader's XPath-like
/// extraction, not to the stored value).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Single(String),
    Many(Vec<String>),
}

impl FieldValue {
    pub fn as_single(&self) -> Option<&str> {
        match self {
            FieldValue::Single(s) => Some(s),
            FieldValue::Many(v) => v.first().map(String::as_str),
        }
    }

    pub fn as_many(&self) -> &[String] {
        match self {
            FieldValue::Single(s) => std::slice::from_ref(s),
            FieldValue::Many(v) => v,
        }
    }
}

/// A mapping from field name to value, produced by a format-specific
/// reader, plus the source element when available.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(skip)]
    pub source_xml: Option<String>,
}

impl Metadata {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

/// How a repository handles tombstones for deleted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletedRecordPolicy {
    No,
    Transient,
    Persistent,
}

impl DeletedRecordPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletedRecordPolicy::No => "no",
            DeletedRecordPolicy::Transient => "transient",
            DeletedRecordPolicy::Persistent => "persistent",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "no" => Some(DeletedRecordPolicy::No),
            "transient" => Some(DeletedRecordPolicy::Transient),
            "persistent" => Some(DeletedRecordPolicy::Persistent),
            _ => None,
        }
    }
}

/// Repository descriptor returned by the `Identify` verb.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identify {
    pub repository_name: String,
    pub base_url: String,
    pub protocol_version: String,
    pub admin_emails: Vec<String>,
    pub earliest_datestamp: NaiveDateTime,
    pub deleted_record: DeletedRecordPolicy,
    pub granularity: Granularity,
    pub compression: Vec<String>,
    pub descriptions: Vec<String>,
}

impl Identify {
    /// `true` unless the repository advertises a compression scheme
    /// other than the identity (do-nothing) one.
    pub fn has_nontrivial_compression(&self) -> bool {
        !(self.compression.is_empty() || self.compression == ["identity"])
    }
}

/// A (prefix, schema URL, namespace URI) triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFormat {
    pub metadata_prefix: String,
    pub schema: String,
    pub metadata_namespace: String,
}

/// A named grouping of records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Set {
    pub set_spec: String,
    pub set_name: String,
    pub set_description: Option<String>,
}

/// A (Header, Metadata?, About?) triple. `metadata` is `None` iff
/// `header.deleted` is `true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub header: Header,
    pub metadata: Option<Metadata>,
    pub about: Option<String>,
}

impl Record {
    pub fn new(header: Header, metadata: Option<Metadata>) -> Self {
        debug_assert!(
            !(header.deleted && metadata.is_some()),
            "a deleted record must not carry metadata"
        );
        Record {
            header,
            metadata,
            about: None,
        }
    }
}
