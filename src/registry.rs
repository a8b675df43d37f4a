//! The metadata format registry (spec.md component C), grounded on
//! `oaipmh.metadata.MetadataRegistry` / `MetadataReader` in the original
//! implementation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{OaiError, Result};
use crate::model::{FieldValue, Metadata};
use crate::xmltree::Element;

/// How a declarative reader extracts one field from a subtree, matching
/// spec.md's table exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Single path-match result, stored as a byte string (we treat this
    /// identically to `Text` since Rust strings are UTF-8 throughout;
    /// the distinction pyoai made between `str` and `unicode` in Python 2
    /// does not exist here).
    Bytes,
    BytesList,
    Text,
    TextList,
}

/// A field's extraction rule: its type, plus the path (as understood by
/// [`Element::find_path`]) to match under the reader's root element.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub field_type: FieldType,
    pub path: &'static str,
}

pub type FieldMap = &'static [(&'static str, FieldSpec)];

/// A declarative reader: a field map plus the namespace prefixes the
/// paths in that field map assume. The namespace map is retained mostly
/// for documentation and for writers that need it to declare `xmlns`
/// attributes; lookups themselves match literal prefixed tag names (see
/// `xmltree` module docs).
#[derive(Debug, Clone)]
pub struct MetadataReader {
    fields: FieldMap,
    pub namespaces: &'static [(&'static str, &'static str)],
}

impl MetadataReader {
    pub const fn new(
        fields: FieldMap,
        namespaces: &'static [(&'static str, &'static str)],
    ) -> Self {
        MetadataReader { fields, namespaces }
    }

    /// Read a metadata subtree (the element below `<metadata>`) into a
    /// [`Metadata`] value.
    pub fn read(&self, element: &Element) -> Result<Metadata> {
        let mut fields = std::collections::BTreeMap::new();
        for (name, spec) in self.fields {
            let matches = element.find_path(spec.path);
            let value = match spec.field_type {
                FieldType::Bytes | FieldType::Text => {
                    FieldValue::Single(matches.first().map(|e| e.text.clone()).unwrap_or_default())
                }
                FieldType::BytesList | FieldType::TextList => {
                    FieldValue::Many(matches.iter().map(|e| e.text.clone()).collect())
                }
            };
            fields.insert((*name).to_string(), value);
        }
        Ok(Metadata {
            fields,
            source_xml: element.to_xml_string().ok(),
        })
    }
}

/// A writer appends the serialized form of a [`Metadata`] value under a
/// given parent element. Writers are plain functions, matching
/// `oaipmh.metadata`'s `(element, metadata) -> None` contract; keeping
/// them as function pointers (rather than trait objects) means the
/// registry can stay `Clone` and `Send + Sync` without extra ceremony.
pub type MetadataWriter = fn(&Metadata) -> Element;

/// prefix -> (reader?, writer?). At most one of each per prefix.
#[derive(Clone, Default)]
pub struct MetadataRegistry {
    readers: HashMap<String, Arc<MetadataReader>>,
    writers: HashMap<String, MetadataWriter>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        MetadataRegistry::default()
    }

    /// A registry pre-populated with the `oai_dc` reader and writer,
    /// matching pyoai's `global_metadata_registry` default population.
    pub fn with_defaults() -> Self {
        let mut registry = MetadataRegistry::new();
        registry.register_reader("oai_dc", oai_dc::READER.clone());
        registry.register_writer("oai_dc", oai_dc::write);
        registry
    }

    pub fn register_reader(&mut self, prefix: impl Into<String>, reader: MetadataReader) {
        self.readers.insert(prefix.into(), Arc::new(reader));
    }

    pub fn register_writer(&mut self, prefix: impl Into<String>, writer: MetadataWriter) {
        self.writers.insert(prefix.into(), writer);
    }

    pub fn has_reader(&self, prefix: &str) -> bool {
        self.readers.contains_key(prefix)
    }

    pub fn has_writer(&self, prefix: &str) -> bool {
        self.writers.contains_key(prefix)
    }

    pub fn read_metadata(&self, prefix: &str, element: &Element) -> Result<Metadata> {
        let reader = self
            .readers
            .get(prefix)
            .ok_or_else(|| OaiError::CannotDisseminateFormat(prefix.to_string()))?;
        reader.read(element)
    }

    pub fn write_metadata(&self, prefix: &str, metadata: &Metadata) -> Result<Element> {
        let writer = self
            .writers
            .get(prefix)
            .ok_or_else(|| OaiError::CannotDisseminateFormat(prefix.to_string()))?;
        Ok(writer(metadata))
    }
}

/// The default Dublin Core (`oai_dc`) reader and writer, matching
/// `oaipmh.metadata.oai_dc_reader` field for field.
pub mod oai_dc {
    use super::*;
    use std::sync::LazyLock;

    pub const NS_OAI_DC: &str = "http://www.openarchives.org/OAI/2.0/oai_dc/";
    pub const NS_DC: &str = "http://purl.org/dc/elements/1.1/";
    pub const SCHEMA_LOCATION: &str =
        "http://www.openarchives.org/OAI/2.0/oai_dc/ http://www.openarchives.org/OAI/2.0/oai_dc.xsd";

    const FIELDS: FieldMap = &[
        (
            "title",
            FieldSpec {
                field_type: FieldType::TextList,
                path: "oai_dc:dc/dc:title",
            },
        ),
        (
            "creator",
            FieldSpec {
                field_type: FieldType::TextList,
                path: "oai_dc:dc/dc:creator",
            },
        ),
        (
            "subject",
            FieldSpec {
                field_type: FieldType::TextList,
                path: "oai_dc:dc/dc:subject",
            },
        ),
        (
            "description",
            FieldSpec {
                field_type: FieldType::TextList,
                path: "oai_dc:dc/dc:description",
            },
        ),
        (
            "publisher",
            FieldSpec {
                field_type: FieldType::TextList,
                path: "oai_dc:dc/dc:publisher",
            },
        ),
        (
            "contributor",
            FieldSpec {
                field_type: FieldType::TextList,
                path: "oai_dc:dc/dc:contributor",
            },
        ),
        (
            "date",
            FieldSpec {
                field_type: FieldType::TextList,
                path: "oai_dc:dc/dc:date",
            },
        ),
        (
            "type",
            FieldSpec {
                field_type: FieldType::TextList,
                path: "oai_dc:dc/dc:type",
            },
        ),
        (
            "format",
            FieldSpec {
                field_type: FieldType::TextList,
                path: "oai_dc:dc/dc:format",
            },
        ),
        (
            "identifier",
            FieldSpec {
                field_type: FieldType::TextList,
                path: "oai_dc:dc/dc:identifier",
            },
        ),
        (
            "source",
            FieldSpec {
                field_type: FieldType::TextList,
                path: "oai_dc:dc/dc:source",
            },
        ),
        (
            "language",
            FieldSpec {
                field_type: FieldType::TextList,
                path: "oai_dc:dc/dc:language",
            },
        ),
        (
            "relation",
            FieldSpec {
                field_type: FieldType::TextList,
                path: "oai_dc:dc/dc:relation",
            },
        ),
        (
            "coverage",
            FieldSpec {
                field_type: FieldType::TextList,
                path: "oai_dc:dc/dc:coverage",
            },
        ),
        (
            "rights",
            FieldSpec {
                field_type: FieldType::TextList,
                path: "oai_dc:dc/dc:rights",
            },
        ),
    ];

    const NAMESPACES: &[(&str, &str)] = &[("oai_dc", NS_OAI_DC), ("dc", NS_DC)];

    pub static READER: LazyLock<MetadataReader> =
        LazyLock::new(|| MetadataReader::new(FIELDS, NAMESPACES));

    /// Emit `<oai_dc:dc>` carrying the `xsi:schemaLocation` attribute and
    /// one `<dc:NAME>` child per non-empty value, matching the original
    /// `oai_dc` writer.
    pub fn write(metadata: &Metadata) -> Element {
        let mut dc = Element::new("oai_dc:dc");
        dc.attrs.push(("xmlns:oai_dc".into(), NS_OAI_DC.into()));
        dc.attrs.push(("xmlns:dc".into(), NS_DC.into()));
        dc.attrs.push((
            "xmlns:xsi".into(),
            "http://www.w3.org/2001/XMLSchema-instance".into(),
        ));
        dc.attrs
            .push(("xsi:schemaLocation".into(), SCHEMA_LOCATION.into()));

        for (name, _spec) in FIELDS {
            let Some(value) = metadata.get(name) else {
                continue;
            };
            for v in value.as_many() {
                if v.is_empty() {
                    continue;
                }
                let mut child = Element::new(format!("dc:{name}"));
                child.text = v.clone();
                dc.children.push(child);
            }
        }
        dc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> MetadataRegistry {
        MetadataRegistry::with_defaults()
    }

    #[test]
    fn oai_dc_reads_all_fifteen_dc_elements() {
        let xml = br#"<metadata>
            <oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/" xmlns:dc="http://purl.org/dc/elements/1.1/">
                <dc:title>A title</dc:title>
                <dc:title>Another title</dc:title>
                <dc:creator>Jane Doe</dc:creator>
                <dc:rights>public domain</dc:rights>
            </oai_dc:dc>
        </metadata>"#;
        let root = Element::parse(xml).unwrap();
        let metadata = registry().read_metadata("oai_dc", &root).unwrap();

        assert_eq!(
            metadata.get("title").unwrap().as_many(),
            &["A title".to_string(), "Another title".to_string()]
        );
        assert_eq!(
            metadata.get("creator").unwrap().as_many(),
            &["Jane Doe".to_string()]
        );
        assert!(metadata.get("subject").unwrap().as_many().is_empty());
    }

    #[test]
    fn oai_dc_writer_skips_empty_values() {
        let mut metadata = Metadata::default();
        metadata
            .fields
            .insert("title".into(), FieldValue::Many(vec!["Hi".into()]));
        metadata
            .fields
            .insert("creator".into(), FieldValue::Many(vec![]));

        let element = oai_dc::write(&metadata);
        assert_eq!(element.name, "oai_dc:dc");
        assert_eq!(element.children_named("dc:title").count(), 1);
        assert_eq!(element.children_named("dc:creator").count(), 0);
        assert_eq!(
            element.attr("xsi:schemaLocation"),
            Some(oai_dc::SCHEMA_LOCATION)
        );
    }

    #[test]
    fn unknown_prefix_is_cannot_disseminate_format() {
        let el = Element::new("metadata");
        let err = registry().read_metadata("made-up", &el).unwrap_err();
        assert!(matches!(err, OaiError::CannotDisseminateFormat(_)));
    }
}
