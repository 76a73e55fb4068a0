//! XML response rendering.
//!
//! Error bodies and container listings are XML-encoded in the blob
//! service wire format.  This module produces those payloads using
//! `quick-xml`.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

// ── Error response ──────────────────────────────────────────────────

/// Render an `<Error>` XML document.
///
/// ```xml
/// <?xml version="1.0" encoding="utf-8"?>
/// <Error>
///   <Code>LeaseAlreadyPresent</Code>
///   <Message>There is already a lease present.</Message>
///   <RequestId>0A1B2C3D4E5F6071</RequestId>
/// </Error>
/// ```
pub fn render_error(code: &str, message: &str, request_id: &str) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    write_decl(&mut writer);

    write_simple_element_group(
        &mut writer,
        "Error",
        &[
            ("Code", code),
            ("Message", message),
            ("RequestId", request_id),
        ],
    );

    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

// ── EnumerationResults ──────────────────────────────────────────────

/// One blob entry in a container listing.
#[derive(Debug, Clone)]
pub struct BlobListing<'a> {
    pub name: &'a str,
    pub etag: &'a str,
    pub content_length: u64,
    pub last_modified: &'a str,
    pub lease_status: &'a str,
    pub lease_state: &'a str,
    /// `infinite` or `fixed`, present only while the blob is locked.
    pub lease_duration: Option<&'a str>,
}

/// Render the `<EnumerationResults>` document for a container listing.
pub fn render_blob_list(container: &str, blobs: &[BlobListing<'_>]) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    write_decl(&mut writer);

    let mut root = BytesStart::new("EnumerationResults");
    root.push_attribute(("ContainerName", container));
    writer
        .write_event(Event::Start(root))
        .expect("start root");

    writer
        .write_event(Event::Start(BytesStart::new("Blobs")))
        .expect("start blobs");
    for blob in blobs {
        writer
            .write_event(Event::Start(BytesStart::new("Blob")))
            .expect("start blob");
        write_text_element(&mut writer, "Name", blob.name);

        let length = blob.content_length.to_string();
        let mut properties = vec![
            ("Last-Modified", blob.last_modified),
            ("Etag", blob.etag),
            ("Content-Length", length.as_str()),
            ("LeaseStatus", blob.lease_status),
            ("LeaseState", blob.lease_state),
        ];
        if let Some(duration) = blob.lease_duration {
            properties.push(("LeaseDuration", duration));
        }
        write_simple_element_group(&mut writer, "Properties", &properties);

        writer
            .write_event(Event::End(BytesEnd::new("Blob")))
            .expect("end blob");
    }
    writer
        .write_event(Event::End(BytesEnd::new("Blobs")))
        .expect("end blobs");

    writer
        .write_event(Event::End(BytesEnd::new("EnumerationResults")))
        .expect("end root");

    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

// ── Helpers ─────────────────────────────────────────────────────────

fn write_decl(writer: &mut Writer<Cursor<Vec<u8>>>) {
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .expect("xml decl");
}

fn write_text_element(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str, text: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .expect("start tag");
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .expect("text");
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .expect("end tag");
}

/// Write a parent element containing a flat list of child text elements.
fn write_simple_element_group(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    parent: &str,
    children: &[(&str, &str)],
) {
    writer
        .write_event(Event::Start(BytesStart::new(parent)))
        .expect("start parent");
    for (tag, value) in children {
        write_text_element(writer, tag, value);
    }
    writer
        .write_event(Event::End(BytesEnd::new(parent)))
        .expect("end parent");
}
