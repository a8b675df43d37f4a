//! Translating parsed `<OAI-PMH>` response trees back into the data model
//! (spec.md §4.7 step 4/5, the "per-verb extraction" the request engine
//! hands off to).
//!
//! Grounded on `buildHeader` / `buildRecords` / `buildIdentifiers` /
//! `buildSets` in `oaipmh.client` (original_source): each walks a known
//! shape of element rather than a general XPath query, since this crate's
//! [`Element`](crate::xmltree::Element) only supports literal child-path
//! lookup (see `xmltree` module docs).

use crate::datestamp;
use crate::error::{OaiError, Result};
use crate::model::{DeletedRecordPolicy, Header, Identify, Metadata, MetadataFormat, Record, Set};
use crate::registry::MetadataRegistry;
use crate::xmltree::Element;

fn text_of(parent: &Element, child: &str) -> Option<String> {
    parent.child_named(child).map(|e| e.text.clone())
}

fn required_text(parent: &Element, child: &str) -> Result<String> {
    text_of(parent, child)
        .ok_or_else(|| OaiError::XmlSyntax(format!("missing <{child}> element")))
}

/// Extract the `<error code="...">text</error>` child of an `<OAI-PMH>`
/// root, if present, as the taxonomy error it names (spec.md §4.7 step 5).
/// An unrecognised code becomes [`OaiError::Unknown`].
pub fn error_from_envelope(root: &Element) -> Option<OaiError> {
    let error_el = root.child_named("error")?;
    let code = error_el.attr("code").unwrap_or("unknown");
    Some(OaiError::from_wire_code(code, error_el.text.clone()))
}

/// Find the verb-named payload element directly below `<OAI-PMH>`, e.g.
/// `<ListRecords>` or `<Identify>`.
fn verb_element<'a>(root: &'a Element, verb: &str) -> Result<&'a Element> {
    root.child_named(verb)
        .ok_or_else(|| OaiError::XmlSyntax(format!("response is missing <{verb}>")))
}

/// Read a `<resumptionToken>` child, treating a present-but-blank element
/// the same as an absent one (`ResumptionListGenerator`'s `token.strip()
/// == ''` check in the original).
fn resumption_token_of(parent: &Element) -> Option<String> {
    parent
        .child_named("resumptionToken")
        .map(|e| e.text.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn header_from_element(el: &Element) -> Result<Header> {
    let identifier = required_text(el, "identifier")?;
    let datestamp_text = required_text(el, "datestamp")?;
    let datestamp = datestamp::parse(&datestamp_text, false)?;
    let set_spec = el
        .children_named("setSpec")
        .map(|e| e.text.clone())
        .collect();
    let deleted = el.attr("status") == Some("deleted");
    Ok(Header {
        identifier,
        datestamp,
        set_spec,
        deleted,
        source_xml: el.to_xml_string().ok(),
    })
}

fn record_from_element(
    el: &Element,
    prefix: &str,
    registry: &MetadataRegistry,
) -> Result<Record> {
    let header_el = el
        .child_named("header")
        .ok_or_else(|| OaiError::XmlSyntax("<record> is missing <header>".to_string()))?;
    let header = header_from_element(header_el)?;

    let metadata: Option<Metadata> = match el.child_named("metadata") {
        Some(metadata_el) if !header.deleted => {
            Some(registry.read_metadata(prefix, metadata_el)?)
        }
        _ => None,
    };

    let about = el.child_named("about").and_then(|e| e.to_xml_string().ok());

    Ok(Record {
        header,
        metadata,
        about,
    })
}

/// Extract the single record from a `GetRecord` response.
pub fn get_record(root: &Element, prefix: &str, registry: &MetadataRegistry) -> Result<Record> {
    let verb_el = verb_element(root, "GetRecord")?;
    let record_el = verb_el
        .child_named("record")
        .ok_or_else(|| OaiError::XmlSyntax("GetRecord response has no <record>".to_string()))?;
    record_from_element(record_el, prefix, registry)
}

/// Known `<Identify>` child element names, used to separate the eight
/// scalar/sequence fields spec.md names from arbitrary description
/// fragments (everything else), mirroring how the server writer only ever
/// emits these names for the typed fields.
const IDENTIFY_FIELDS: &[&str] = &[
    "repositoryName",
    "baseURL",
    "protocolVersion",
    "adminEmail",
    "earliestDatestamp",
    "deletedRecord",
    "granularity",
    "compression",
];

pub fn identify(root: &Element) -> Result<Identify> {
    let verb_el = verb_element(root, "Identify")?;

    let repository_name = required_text(verb_el, "repositoryName")?;
    let base_url = required_text(verb_el, "baseURL")?;
    let protocol_version = required_text(verb_el, "protocolVersion")?;
    let admin_emails = verb_el
        .children_named("adminEmail")
        .map(|e| e.text.clone())
        .collect();
    let earliest_datestamp = datestamp::parse(&required_text(verb_el, "earliestDatestamp")?, false)?;
    let deleted_record_text = required_text(verb_el, "deletedRecord")?;
    let deleted_record = DeletedRecordPolicy::from_wire(&deleted_record_text).ok_or_else(|| {
        OaiError::XmlSyntax(format!("unrecognised deletedRecord value: {deleted_record_text}"))
    })?;
    let granularity = datestamp::Granularity::from_wire(&required_text(verb_el, "granularity")?)?;
    let compression = verb_el
        .children_named("compression")
        .map(|e| e.text.clone())
        .collect();
    let descriptions = verb_el
        .children
        .iter()
        .filter(|c| !IDENTIFY_FIELDS.contains(&c.name.as_str()))
        .filter_map(|c| c.to_xml_string().ok())
        .collect();

    Ok(Identify {
        repository_name,
        base_url,
        protocol_version,
        admin_emails,
        earliest_datestamp,
        deleted_record,
        granularity,
        compression,
        descriptions,
    })
}

pub fn list_metadata_formats(root: &Element) -> Result<Vec<MetadataFormat>> {
    let verb_el = verb_element(root, "ListMetadataFormats")?;
    verb_el
        .children_named("metadataFormat")
        .map(|el| {
            Ok(MetadataFormat {
                metadata_prefix: required_text(el, "metadataPrefix")?,
                schema: required_text(el, "schema")?,
                metadata_namespace: required_text(el, "metadataNamespace")?,
            })
        })
        .collect()
}

/// Headers plus the next-page token, for the first (non-token) page of a
/// `ListIdentifiers` response.
pub fn list_identifiers(root: &Element) -> Result<(Vec<Header>, Option<String>)> {
    let verb_el = verb_element(root, "ListIdentifiers")?;
    let headers = verb_el
        .children_named("header")
        .map(header_from_element)
        .collect::<Result<Vec<_>>>()?;
    Ok((headers, resumption_token_of(verb_el)))
}

pub fn list_records(
    root: &Element,
    prefix: &str,
    registry: &MetadataRegistry,
) -> Result<(Vec<Record>, Option<String>)> {
    let verb_el = verb_element(root, "ListRecords")?;
    let records = verb_el
        .children_named("record")
        .map(|el| record_from_element(el, prefix, registry))
        .collect::<Result<Vec<_>>>()?;
    Ok((records, resumption_token_of(verb_el)))
}

fn set_from_element(el: &Element) -> Result<Set> {
    Ok(Set {
        set_spec: required_text(el, "setSpec")?,
        set_name: required_text(el, "setName")?,
        set_description: text_of(el, "setDescription"),
    })
}

pub fn list_sets(root: &Element) -> Result<(Vec<Set>, Option<String>)> {
    let verb_el = verb_element(root, "ListSets")?;
    let sets = verb_el
        .children_named("set")
        .map(set_from_element)
        .collect::<Result<Vec<_>>>()?;
    Ok((sets, resumption_token_of(verb_el)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> Element {
        Element::parse(xml.as_bytes()).unwrap()
    }

    #[test]
    fn error_from_envelope_decodes_known_code() {
        let root = parse(
            r#"<OAI-PMH><responseDate>2020-01-01T00:00:00Z</responseDate>
               <error code="badVerb">Illegal verb: Frotz</error></OAI-PMH>"#,
        );
        let err = error_from_envelope(&root).unwrap();
        assert!(matches!(err, OaiError::BadVerb(msg) if msg == "Illegal verb: Frotz"));
    }

    #[test]
    fn error_from_envelope_absent_on_success() {
        let root = parse(r#"<OAI-PMH><Identify></Identify></OAI-PMH>"#);
        assert!(error_from_envelope(&root).is_none());
    }

    #[test]
    fn header_from_element_reads_deleted_status() {
        let el = parse(
            r#"<header status="deleted"><identifier>oai:repo:1</identifier>
               <datestamp>2005-07-04T14:35:10Z</datestamp>
               <setSpec>a</setSpec><setSpec>b</setSpec></header>"#,
        );
        let header = header_from_element(&el).unwrap();
        assert_eq!(header.identifier, "oai:repo:1");
        assert!(header.deleted);
        assert_eq!(header.set_spec, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn list_identifiers_blank_resumption_token_is_none() {
        let root = parse(
            r#"<OAI-PMH><ListIdentifiers>
               <header><identifier>1</identifier><datestamp>2005-07-04</datestamp></header>
               <resumptionToken></resumptionToken>
               </ListIdentifiers></OAI-PMH>"#,
        );
        let (headers, token) = list_identifiers(&root).unwrap();
        assert_eq!(headers.len(), 1);
        assert!(token.is_none());
    }

    #[test]
    fn list_identifiers_nonblank_resumption_token_carries_through() {
        let root = parse(
            r#"<OAI-PMH><ListIdentifiers>
               <header><identifier>1</identifier><datestamp>2005-07-04</datestamp></header>
               <resumptionToken>abc123</resumptionToken>
               </ListIdentifiers></OAI-PMH>"#,
        );
        let (_, token) = list_identifiers(&root).unwrap();
        assert_eq!(token.as_deref(), Some("abc123"));
    }

    #[test]
    fn identify_separates_descriptions_from_known_fields() {
        let root = parse(
            r#"<OAI-PMH><Identify>
               <repositoryName>Test Repo</repositoryName>
               <baseURL>http://example.org/oai</baseURL>
               <protocolVersion>2.0</protocolVersion>
               <adminEmail>admin@example.org</adminEmail>
               <earliestDatestamp>2000-01-01T00:00:00Z</earliestDatestamp>
               <deletedRecord>transient</deletedRecord>
               <granularity>YYYY-MM-DDThh:mm:ssZ</granularity>
               <description><oai-identifier>x</oai-identifier></description>
               </Identify></OAI-PMH>"#,
        );
        let identify = identify(&root).unwrap();
        assert_eq!(identify.repository_name, "Test Repo");
        assert_eq!(identify.deleted_record, DeletedRecordPolicy::Transient);
        assert_eq!(identify.descriptions.len(), 1);
    }

    #[test]
    fn list_sets_reads_optional_description() {
        let root = parse(
            r#"<OAI-PMH><ListSets>
               <set><setSpec>a</setSpec><setName>A</setName></set>
               <set><setSpec>b</setSpec><setName>B</setName><setDescription>desc</setDescription></set>
               </ListSets></OAI-PMH>"#,
        );
        let (sets, token) = list_sets(&root).unwrap();
        assert_eq!(sets.len(), 2);
        assert!(token.is_none());
        assert_eq!(sets[1].set_description.as_deref(), Some("desc"));
    }
}
