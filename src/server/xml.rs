//! The response XML builder (spec.md component H): wraps a verb's
//! payload, or a protocol error, in the `<OAI-PMH>` envelope.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use crate::datestamp;
use crate::error::OaiError;
use crate::model::{Header, Identify, MetadataFormat, Record, Set};
use crate::registry::MetadataRegistry;
use crate::xmltree::Element;

use super::{ListPage, ServerConfig};

const OAI_PMH_NS: &str = "http://www.openarchives.org/OAI/2.0/";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
const SCHEMA_LOCATION: &str =
    "http://www.openarchives.org/OAI/2.0/ http://www.openarchives.org/OAI/2.0/OAI-PMH.xsd";

fn envelope(
    config: &ServerConfig,
    response_date: NaiveDateTime,
    verb: Option<&str>,
    request_args: &BTreeMap<String, String>,
    body: Element,
) -> String {
    let mut root = Element::new("OAI-PMH");
    root.attrs.push(("xmlns".into(), OAI_PMH_NS.into()));
    root.attrs.push(("xmlns:xsi".into(), XSI_NS.into()));
    root.attrs
        .push(("xsi:schemaLocation".into(), SCHEMA_LOCATION.into()));
    for (prefix, uri) in &config.extra_namespaces {
        root.attrs.push((format!("xmlns:{prefix}"), uri.clone()));
    }

    let mut response_date_el = Element::new("responseDate");
    response_date_el.text = datestamp::serialize(response_date, datestamp::Granularity::Second);
    root.children.push(response_date_el);

    let mut request_el = Element::new("request");
    if let Some(verb) = verb {
        request_el.attrs.push(("verb".into(), verb.to_string()));
    }
    for (key, value) in request_args {
        if key == "verb" {
            continue;
        }
        request_el.attrs.push((key.clone(), value.clone()));
    }
    request_el.text = config.base_url.clone();
    root.children.push(request_el);

    root.children.push(body);

    let mut writer = quick_xml::Writer::new(Vec::new());
    let _ = writer.write_event(quick_xml::events::Event::Decl(
        quick_xml::events::BytesDecl::new("1.0", Some("UTF-8"), None),
    ));
    root.write_to(&mut writer)
        .expect("in-memory XML write cannot fail");
    String::from_utf8(writer.into_inner()).expect("writer only receives valid UTF-8 text")
}

/// Render a protocol error as a complete `<OAI-PMH>` document. `verb` is
/// omitted from `<request>` when the failure is `badVerb` or the verb
/// was never determined, matching the protocol's rule that `<request>`
/// only ever echoes arguments that were legible.
pub fn error(
    config: &ServerConfig,
    response_date: NaiveDateTime,
    verb: Option<&str>,
    request_args: &BTreeMap<String, String>,
    err: &OaiError,
) -> String {
    let code = err.wire_code().unwrap_or("unknown");
    let mut element = Element::new("error");
    element.attrs.push(("code".into(), code.to_string()));
    element.text = err.to_string();
    envelope(config, response_date, verb, request_args, element)
}

fn header_element(header: &Header) -> Element {
    let mut el = Element::new("header");
    if header.deleted {
        el.attrs.push(("status".into(), "deleted".into()));
    }
    let mut identifier = Element::new("identifier");
    identifier.text = header.identifier.clone();
    el.children.push(identifier);

    let mut datestamp_el = Element::new("datestamp");
    datestamp_el.text = datestamp::serialize(header.datestamp, datestamp::Granularity::Second);
    el.children.push(datestamp_el);

    for set_spec in &header.set_spec {
        let mut s = Element::new("setSpec");
        s.text = set_spec.clone();
        el.children.push(s);
    }
    el
}

fn record_element(
    record: &Record,
    prefix: &str,
    registry: &MetadataRegistry,
) -> crate::error::Result<Element> {
    let mut el = Element::new("record");
    el.children.push(header_element(&record.header));
    if let Some(metadata) = &record.metadata {
        let mut wrapper = Element::new("metadata");
        wrapper.children.push(registry.write_metadata(prefix, metadata)?);
        el.children.push(wrapper);
    }
    if let Some(about) = &record.about {
        let fragment = Element::parse(about.as_bytes())?;
        let mut wrapper = Element::new("about");
        wrapper.children.push(fragment);
        el.children.push(wrapper);
    }
    Ok(el)
}

fn resumption_token_element(token: Option<&str>) -> Option<Element> {
    token.map(|t| {
        let mut el = Element::new("resumptionToken");
        el.text = t.to_string();
        el
    })
}

pub fn get_record(
    record: &Record,
    prefix: &str,
    registry: &MetadataRegistry,
) -> crate::error::Result<Element> {
    let mut el = Element::new("GetRecord");
    el.children.push(record_element(record, prefix, registry)?);
    Ok(el)
}

pub fn identify(identify: &Identify) -> crate::error::Result<Element> {
    let mut el = Element::new("Identify");

    let mut name = Element::new("repositoryName");
    name.text = identify.repository_name.clone();
    el.children.push(name);

    let mut base_url = Element::new("baseURL");
    base_url.text = identify.base_url.clone();
    el.children.push(base_url);

    let mut protocol_version = Element::new("protocolVersion");
    protocol_version.text = identify.protocol_version.clone();
    el.children.push(protocol_version);

    for email in &identify.admin_emails {
        let mut e = Element::new("adminEmail");
        e.text = email.clone();
        el.children.push(e);
    }

    let mut earliest = Element::new("earliestDatestamp");
    earliest.text = datestamp::serialize(identify.earliest_datestamp, identify.granularity);
    el.children.push(earliest);

    let mut deleted_record = Element::new("deletedRecord");
    deleted_record.text = identify.deleted_record.as_str().to_string();
    el.children.push(deleted_record);

    let mut granularity = Element::new("granularity");
    granularity.text = identify.granularity.as_str().to_string();
    el.children.push(granularity);

    if identify.has_nontrivial_compression() {
        for scheme in &identify.compression {
            let mut c = Element::new("compression");
            c.text = scheme.clone();
            el.children.push(c);
        }
    }

    for description in &identify.descriptions {
        el.children.push(Element::parse(description.as_bytes())?);
    }

    Ok(el)
}

pub fn list_identifiers(page: &ListPage<Header>) -> Element {
    let mut el = Element::new("ListIdentifiers");
    for header in &page.items {
        el.children.push(header_element(header));
    }
    if let Some(token) = resumption_token_element(page.resumption_token.as_deref()) {
        el.children.push(token);
    }
    el
}

pub fn list_metadata_formats(formats: &[MetadataFormat]) -> Element {
    let mut el = Element::new("ListMetadataFormats");
    for format in formats {
        let mut f = Element::new("metadataFormat");

        let mut prefix = Element::new("metadataPrefix");
        prefix.text = format.metadata_prefix.clone();
        f.children.push(prefix);

        let mut schema = Element::new("schema");
        schema.text = format.schema.clone();
        f.children.push(schema);

        let mut ns = Element::new("metadataNamespace");
        ns.text = format.metadata_namespace.clone();
        f.children.push(ns);

        el.children.push(f);
    }
    el
}

pub fn list_records(
    page: &ListPage<Record>,
    prefix: &str,
    registry: &MetadataRegistry,
) -> crate::error::Result<Element> {
    let mut el = Element::new("ListRecords");
    for record in &page.items {
        el.children.push(record_element(record, prefix, registry)?);
    }
    if let Some(token) = resumption_token_element(page.resumption_token.as_deref()) {
        el.children.push(token);
    }
    Ok(el)
}

fn set_element(set: &Set) -> Element {
    let mut el = Element::new("set");

    let mut spec = Element::new("setSpec");
    spec.text = set.set_spec.clone();
    el.children.push(spec);

    let mut name = Element::new("setName");
    name.text = set.set_name.clone();
    el.children.push(name);

    if let Some(description) = &set.set_description {
        let mut d = Element::new("setDescription");
        d.text = description.clone();
        el.children.push(d);
    }

    el
}

pub fn list_sets(page: &ListPage<Set>) -> Element {
    let mut el = Element::new("ListSets");
    for set in &page.items {
        el.children.push(set_element(set));
    }
    if let Some(token) = resumption_token_element(page.resumption_token.as_deref()) {
        el.children.push(token);
    }
    el
}

/// Render a successful verb response.
pub fn success(
    config: &ServerConfig,
    response_date: NaiveDateTime,
    verb: &str,
    request_args: &BTreeMap<String, String>,
    body: Element,
) -> String {
    envelope(config, response_date, Some(verb), request_args, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn error_envelope_carries_the_wire_code() {
        let config = ServerConfig::new("http://example.org/oai");
        let rendered = error(
            &config,
            dt(2020, 1, 1),
            None,
            &BTreeMap::new(),
            &OaiError::BadVerb("Foo".into()),
        );
        assert!(rendered.contains(r#"code="badVerb""#));
        assert!(rendered.contains("<OAI-PMH"));
    }

    #[test]
    fn success_envelope_echoes_request_arguments() {
        let config = ServerConfig::new("http://example.org/oai");
        let mut args = BTreeMap::new();
        args.insert("metadataPrefix".to_string(), "oai_dc".to_string());
        let body = Element::new("Identify");
        let rendered = success(&config, dt(2020, 1, 1), "Identify", &args, body);
        assert!(rendered.contains(r#"metadataPrefix="oai_dc""#));
        assert!(rendered.contains(r#"verb="Identify""#));
    }

    #[test]
    fn header_element_marks_deleted_status() {
        let header = Header::new("oai:repo:1", dt(2020, 1, 1)).deleted(true);
        let el = header_element(&header);
        assert_eq!(el.attr("status"), Some("deleted"));
    }

    fn base_identify(compression: Vec<String>) -> Identify {
        Identify {
            repository_name: "Test Repo".into(),
            base_url: "http://example.org/oai".into(),
            protocol_version: "2.0".into(),
            admin_emails: vec!["admin@example.org".into()],
            earliest_datestamp: dt(2000, 1, 1),
            deleted_record: crate::model::DeletedRecordPolicy::No,
            granularity: crate::datestamp::Granularity::Second,
            compression,
            descriptions: vec![],
        }
    }

    #[test]
    fn identify_omits_compression_when_identity_only() {
        let el = identify(&base_identify(vec!["identity".into()])).unwrap();
        assert_eq!(el.children_named("compression").count(), 0);
    }

    #[test]
    fn identify_emits_compression_when_nontrivial() {
        let el = identify(&base_identify(vec!["gzip".into()])).unwrap();
        let schemes: Vec<&str> = el.children_named("compression").map(|e| e.text.as_str()).collect();
        assert_eq!(schemes, vec!["gzip"]);
    }
}
