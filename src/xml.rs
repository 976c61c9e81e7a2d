//! S3 response XML rendering.
//!
//! Every success and error body in the S3 wire protocol is XML. This module
//! owns the emitters; the inbound-body parsers (`<Delete>`,
//! `<CompleteMultipartUpload>`, `<AccessControlPolicy>`,
//! `<CreateBucketConfiguration>`) live beside the handlers that consume them
//! since each is only ever read by one operation.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// Characters S3's `encoding-type=url` leaves unescaped, mirroring the
/// canonical SigV4 URI-encoding rule set (§4.5) minus the slash exception --
/// list responses encode `/` like any other reserved character.
const S3_QUERY_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'&')
    .add(b'+')
    .add(b':')
    .add(b';')
    .add(b'=')
    .add(b'@')
    .add(b'[')
    .add(b']')
    .add(b'\\')
    .add(b'^')
    .add(b'|');

/// URL-encode a list-response string value per §4.2's `encoding-type=url` rule.
pub fn url_encode_listing_value(s: &str) -> String {
    utf8_percent_encode(s, S3_QUERY_ENCODE_SET).to_string()
}

fn new_writer() -> Writer<Cursor<Vec<u8>>> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .expect("xml decl");
    writer
}

fn finish(writer: Writer<Cursor<Vec<u8>>>) -> String {
    String::from_utf8(writer.into_inner().into_inner()).expect("xml writer produces valid utf-8")
}

// ── Error ───────────────────────────────────────────────────────────

/// Render an `<Error>` document. No `xmlns` on the root, per §4.1.
pub fn render_error(code: &str, message: &str, resource: &str, request_id: &str) -> String {
    let mut writer = new_writer();
    write_element_group(
        &mut writer,
        "Error",
        None,
        &[
            ("Code", code),
            ("Message", message),
            ("Resource", resource),
            ("RequestId", request_id),
        ],
    );
    finish(writer)
}

const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

// ── ListAllMyBucketsResult ──────────────────────────────────────────

pub fn render_list_buckets_result(
    owner_id: &str,
    owner_display: &str,
    buckets: &[(&str, &str)],
) -> String {
    let mut writer = new_writer();
    start_root(&mut writer, "ListAllMyBucketsResult");

    write_element_group(
        &mut writer,
        "Owner",
        None,
        &[("ID", owner_id), ("DisplayName", owner_display)],
    );

    open(&mut writer, "Buckets");
    for (name, created) in buckets {
        write_element_group(&mut writer, "Bucket", None, &[("Name", name), ("CreationDate", created)]);
    }
    close(&mut writer, "Buckets");

    end_root(&mut writer, "ListAllMyBucketsResult");
    finish(writer)
}

// ── ListBucketResult ────────────────────────────────────────────────

/// One `Contents` entry shared by both ListObjects versions.
pub struct ObjectEntry<'a> {
    pub key: &'a str,
    pub last_modified: &'a str,
    pub etag: &'a str,
    pub size: u64,
    pub storage_class: &'a str,
    /// Present only when the caller requested `fetch-owner=true` (V2) or
    /// unconditionally (V1, per §4.8).
    pub owner: Option<(&'a str, &'a str)>,
}

fn maybe_encode<'a>(value: &'a str, url_encode: bool, scratch: &'a mut String) -> &'a str {
    if url_encode {
        *scratch = url_encode_listing_value(value);
        scratch.as_str()
    } else {
        value
    }
}

#[allow(clippy::too_many_arguments)]
pub fn render_list_objects_result_v2(
    bucket: &str,
    prefix: &str,
    delimiter: &str,
    max_keys: u32,
    is_truncated: bool,
    key_count: u32,
    entries: &[ObjectEntry<'_>],
    common_prefixes: &[&str],
    continuation_token: Option<&str>,
    next_continuation_token: Option<&str>,
    start_after: Option<&str>,
    url_encode: bool,
) -> String {
    let mut writer = new_writer();
    start_root(&mut writer, "ListBucketResult");

    write_text(&mut writer, "Name", bucket);
    let mut scratch = String::new();
    write_text(&mut writer, "Prefix", maybe_encode(prefix, url_encode, &mut scratch));
    if !delimiter.is_empty() {
        write_text(&mut writer, "Delimiter", maybe_encode(delimiter, url_encode, &mut scratch));
    }
    write_text(&mut writer, "MaxKeys", &max_keys.to_string());
    write_text(&mut writer, "KeyCount", &key_count.to_string());
    write_text(&mut writer, "IsTruncated", bool_text(is_truncated));
    if url_encode {
        write_text(&mut writer, "EncodingType", "url");
    }

    if let Some(t) = continuation_token {
        write_text(&mut writer, "ContinuationToken", t);
    }
    if let Some(t) = next_continuation_token {
        write_text(&mut writer, "NextContinuationToken", t);
    }
    if let Some(sa) = start_after.filter(|s| !s.is_empty()) {
        write_text(&mut writer, "StartAfter", maybe_encode(sa, url_encode, &mut scratch));
    }

    for entry in entries {
        open(&mut writer, "Contents");
        write_text(&mut writer, "Key", maybe_encode(entry.key, url_encode, &mut scratch));
        write_text(&mut writer, "LastModified", entry.last_modified);
        write_text(&mut writer, "ETag", entry.etag);
        write_text(&mut writer, "Size", &entry.size.to_string());
        write_text(&mut writer, "StorageClass", entry.storage_class);
        if let Some((id, name)) = entry.owner {
            write_element_group(&mut writer, "Owner", None, &[("ID", id), ("DisplayName", name)]);
        }
        close(&mut writer, "Contents");
    }

    for cp in common_prefixes {
        open(&mut writer, "CommonPrefixes");
        write_text(&mut writer, "Prefix", maybe_encode(cp, url_encode, &mut scratch));
        close(&mut writer, "CommonPrefixes");
    }

    end_root(&mut writer, "ListBucketResult");
    finish(writer)
}

#[allow(clippy::too_many_arguments)]
pub fn render_list_objects_result_v1(
    bucket: &str,
    prefix: &str,
    delimiter: &str,
    marker: &str,
    max_keys: u32,
    is_truncated: bool,
    entries: &[ObjectEntry<'_>],
    common_prefixes: &[&str],
    next_marker: Option<&str>,
    url_encode: bool,
) -> String {
    let mut writer = new_writer();
    start_root(&mut writer, "ListBucketResult");

    let mut scratch = String::new();
    write_text(&mut writer, "Name", bucket);
    write_text(&mut writer, "Prefix", maybe_encode(prefix, url_encode, &mut scratch));
    write_text(&mut writer, "Marker", maybe_encode(marker, url_encode, &mut scratch));
    if !delimiter.is_empty() {
        write_text(&mut writer, "Delimiter", maybe_encode(delimiter, url_encode, &mut scratch));
    }
    write_text(&mut writer, "MaxKeys", &max_keys.to_string());
    write_text(&mut writer, "IsTruncated", bool_text(is_truncated));
    if url_encode {
        write_text(&mut writer, "EncodingType", "url");
    }
    if let Some(nm) = next_marker {
        write_text(&mut writer, "NextMarker", maybe_encode(nm, url_encode, &mut scratch));
    }

    for entry in entries {
        open(&mut writer, "Contents");
        write_text(&mut writer, "Key", maybe_encode(entry.key, url_encode, &mut scratch));
        write_text(&mut writer, "LastModified", entry.last_modified);
        write_text(&mut writer, "ETag", entry.etag);
        write_text(&mut writer, "Size", &entry.size.to_string());
        write_text(&mut writer, "StorageClass", entry.storage_class);
        if let Some((id, name)) = entry.owner {
            write_element_group(&mut writer, "Owner", None, &[("ID", id), ("DisplayName", name)]);
        }
        close(&mut writer, "Contents");
    }

    for cp in common_prefixes {
        open(&mut writer, "CommonPrefixes");
        write_text(&mut writer, "Prefix", maybe_encode(cp, url_encode, &mut scratch));
        close(&mut writer, "CommonPrefixes");
    }

    end_root(&mut writer, "ListBucketResult");
    finish(writer)
}

// ── DeleteResult ────────────────────────────────────────────────────

pub struct DeletedEntry<'a> {
    pub key: &'a str,
}

pub struct DeleteErrorEntry<'a> {
    pub key: &'a str,
    pub code: &'a str,
    pub message: &'a str,
}

pub fn render_delete_result(
    deleted: &[DeletedEntry<'_>],
    errors: &[DeleteErrorEntry<'_>],
    quiet: bool,
) -> String {
    let mut writer = new_writer();
    start_root(&mut writer, "DeleteResult");

    if !quiet {
        for entry in deleted {
            write_element_group(&mut writer, "Deleted", None, &[("Key", entry.key)]);
        }
    }

    for entry in errors {
        write_element_group(
            &mut writer,
            "Error",
            None,
            &[("Key", entry.key), ("Code", entry.code), ("Message", entry.message)],
        );
    }

    end_root(&mut writer, "DeleteResult");
    finish(writer)
}

// ── CopyObjectResult / CopyPartResult ───────────────────────────────

pub fn render_copy_object_result(etag: &str, last_modified: &str) -> String {
    let mut writer = new_writer();
    write_element_group(
        &mut writer,
        "CopyObjectResult",
        None,
        &[("LastModified", last_modified), ("ETag", etag)],
    );
    finish(writer)
}

pub fn render_copy_part_result(etag: &str, last_modified: &str) -> String {
    let mut writer = new_writer();
    write_element_group(
        &mut writer,
        "CopyPartResult",
        None,
        &[("LastModified", last_modified), ("ETag", etag)],
    );
    finish(writer)
}

// ── Multipart result documents ──────────────────────────────────────

pub fn render_initiate_multipart_upload_result(bucket: &str, key: &str, upload_id: &str) -> String {
    let mut writer = new_writer();
    write_element_group(
        &mut writer,
        "InitiateMultipartUploadResult",
        None,
        &[("Bucket", bucket), ("Key", key), ("UploadId", upload_id)],
    );
    finish(writer)
}

pub fn render_complete_multipart_upload_result(
    location: &str,
    bucket: &str,
    key: &str,
    etag: &str,
) -> String {
    let mut writer = new_writer();
    write_element_group(
        &mut writer,
        "CompleteMultipartUploadResult",
        None,
        &[("Location", location), ("Bucket", bucket), ("Key", key), ("ETag", etag)],
    );
    finish(writer)
}

// ── LocationConstraint ──────────────────────────────────────────────

/// us-east-1 (and the unset region) render as a self-closing empty element.
pub fn render_location_constraint(region: &str) -> String {
    let mut writer = new_writer();
    let elem = BytesStart::new("LocationConstraint").with_attributes([("xmlns", S3_XMLNS)]);

    if region == "us-east-1" || region.is_empty() {
        writer.write_event(Event::Empty(elem)).expect("empty LocationConstraint");
    } else {
        writer.write_event(Event::Start(elem)).expect("start LocationConstraint");
        writer.write_event(Event::Text(BytesText::new(region))).expect("region text");
        writer
            .write_event(Event::End(BytesEnd::new("LocationConstraint")))
            .expect("end LocationConstraint");
    }

    finish(writer)
}

// ── AccessControlPolicy ─────────────────────────────────────────────

pub fn render_access_control_policy(acl: &crate::metadata::store::Acl) -> String {
    let mut writer = new_writer();
    start_root(&mut writer, "AccessControlPolicy");

    write_element_group(
        &mut writer,
        "Owner",
        None,
        &[("ID", &acl.owner.id), ("DisplayName", &acl.owner.display_name)],
    );

    open(&mut writer, "AccessControlList");
    for grant in &acl.grants {
        open(&mut writer, "Grant");
        match &grant.grantee {
            crate::metadata::store::AclGrantee::CanonicalUser { id, display_name } => {
                let mut grantee = BytesStart::new("Grantee");
                grantee.push_attribute(("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"));
                grantee.push_attribute(("xsi:type", "CanonicalUser"));
                writer.write_event(Event::Start(grantee)).expect("start Grantee");
                write_text(&mut writer, "ID", id);
                write_text(&mut writer, "DisplayName", display_name);
                writer.write_event(Event::End(BytesEnd::new("Grantee"))).expect("end Grantee");
            }
            crate::metadata::store::AclGrantee::Group { uri } => {
                let mut grantee = BytesStart::new("Grantee");
                grantee.push_attribute(("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"));
                grantee.push_attribute(("xsi:type", "Group"));
                writer.write_event(Event::Start(grantee)).expect("start Grantee");
                write_text(&mut writer, "URI", uri);
                writer.write_event(Event::End(BytesEnd::new("Grantee"))).expect("end Grantee");
            }
        }
        write_text(&mut writer, "Permission", &grant.permission);
        close(&mut writer, "Grant");
    }
    close(&mut writer, "AccessControlList");

    end_root(&mut writer, "AccessControlPolicy");
    finish(writer)
}

// ── ListMultipartUploadsResult ──────────────────────────────────────

pub struct UploadEntry<'a> {
    pub key: &'a str,
    pub upload_id: &'a str,
    pub initiated: &'a str,
    pub storage_class: &'a str,
    pub owner_id: &'a str,
    pub owner_display: &'a str,
}

#[allow(clippy::too_many_arguments)]
pub fn render_list_multipart_uploads_result(
    bucket: &str,
    key_marker: &str,
    upload_id_marker: &str,
    max_uploads: u32,
    is_truncated: bool,
    entries: &[UploadEntry<'_>],
    next_key_marker: Option<&str>,
    next_upload_id_marker: Option<&str>,
    prefix: &str,
    url_encode: bool,
) -> String {
    let mut writer = new_writer();
    start_root(&mut writer, "ListMultipartUploadsResult");

    let mut scratch = String::new();
    write_text(&mut writer, "Bucket", bucket);
    write_text(&mut writer, "KeyMarker", maybe_encode(key_marker, url_encode, &mut scratch));
    write_text(&mut writer, "UploadIdMarker", upload_id_marker);
    if let Some(nkm) = next_key_marker {
        write_text(&mut writer, "NextKeyMarker", maybe_encode(nkm, url_encode, &mut scratch));
    }
    if let Some(nuim) = next_upload_id_marker {
        write_text(&mut writer, "NextUploadIdMarker", nuim);
    }
    write_text(&mut writer, "MaxUploads", &max_uploads.to_string());
    write_text(&mut writer, "IsTruncated", bool_text(is_truncated));
    if !prefix.is_empty() {
        write_text(&mut writer, "Prefix", maybe_encode(prefix, url_encode, &mut scratch));
    }
    if url_encode {
        write_text(&mut writer, "EncodingType", "url");
    }

    for entry in entries {
        open(&mut writer, "Upload");
        write_text(&mut writer, "Key", maybe_encode(entry.key, url_encode, &mut scratch));
        write_text(&mut writer, "UploadId", entry.upload_id);
        write_element_group(&mut writer, "Initiator", None, &[("ID", entry.owner_id), ("DisplayName", entry.owner_display)]);
        write_element_group(&mut writer, "Owner", None, &[("ID", entry.owner_id), ("DisplayName", entry.owner_display)]);
        write_text(&mut writer, "StorageClass", entry.storage_class);
        write_text(&mut writer, "Initiated", entry.initiated);
        close(&mut writer, "Upload");
    }

    end_root(&mut writer, "ListMultipartUploadsResult");
    finish(writer)
}

// ── ListPartsResult ──────────────────────────────────────────────────

pub struct PartEntry<'a> {
    pub part_number: u32,
    pub last_modified: &'a str,
    pub etag: &'a str,
    pub size: u64,
}

#[allow(clippy::too_many_arguments)]
pub fn render_list_parts_result(
    bucket: &str,
    key: &str,
    upload_id: &str,
    part_number_marker: u32,
    max_parts: u32,
    is_truncated: bool,
    parts: &[PartEntry<'_>],
    next_part_number_marker: Option<u32>,
    storage_class: &str,
    owner_id: &str,
    owner_display: &str,
) -> String {
    let mut writer = new_writer();
    start_root(&mut writer, "ListPartsResult");

    write_text(&mut writer, "Bucket", bucket);
    write_text(&mut writer, "Key", key);
    write_text(&mut writer, "UploadId", upload_id);
    write_element_group(&mut writer, "Initiator", None, &[("ID", owner_id), ("DisplayName", owner_display)]);
    write_element_group(&mut writer, "Owner", None, &[("ID", owner_id), ("DisplayName", owner_display)]);
    write_text(&mut writer, "StorageClass", storage_class);
    write_text(&mut writer, "PartNumberMarker", &part_number_marker.to_string());
    if let Some(npm) = next_part_number_marker {
        write_text(&mut writer, "NextPartNumberMarker", &npm.to_string());
    }
    write_text(&mut writer, "MaxParts", &max_parts.to_string());
    write_text(&mut writer, "IsTruncated", bool_text(is_truncated));

    for part in parts {
        open(&mut writer, "Part");
        write_text(&mut writer, "PartNumber", &part.part_number.to_string());
        write_text(&mut writer, "LastModified", part.last_modified);
        write_text(&mut writer, "ETag", part.etag);
        write_text(&mut writer, "Size", &part.size.to_string());
        close(&mut writer, "Part");
    }

    end_root(&mut writer, "ListPartsResult");
    finish(writer)
}

// ── Low-level helpers ────────────────────────────────────────────────

fn bool_text(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

fn start_root(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str) {
    let root = BytesStart::new(name).with_attributes([("xmlns", S3_XMLNS)]);
    writer.write_event(Event::Start(root)).expect("start root");
}

fn end_root(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str) {
    writer.write_event(Event::End(BytesEnd::new(name))).expect("end root");
}

fn open(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str) {
    writer.write_event(Event::Start(BytesStart::new(tag))).expect("start tag");
}

fn close(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str) {
    writer.write_event(Event::End(BytesEnd::new(tag))).expect("end tag");
}

fn write_text(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str, text: &str) {
    open(writer, tag);
    writer.write_event(Event::Text(BytesText::new(text))).expect("text");
    close(writer, tag);
}

/// Write a flat parent/children group, optionally with a namespace attribute
/// on the parent (used by the handful of top-level non-list documents that
/// render a single group as their whole body, e.g. `CopyObjectResult`).
fn write_element_group(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    parent: &str,
    xmlns: Option<&str>,
    children: &[(&str, &str)],
) {
    let start = match xmlns {
        Some(ns) => BytesStart::new(parent).with_attributes([("xmlns", ns)]),
        None => BytesStart::new(parent),
    };
    writer.write_event(Event::Start(start)).expect("start parent");
    for (tag, value) in children {
        write_text(writer, tag, value);
    }
    close(writer, parent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::store::{Acl, AclGrant, AclGrantee, AclOwner};

    #[test]
    fn error_has_no_xmlns() {
        let xml = render_error("NoSuchBucket", "nope", "/b", "REQID");
        assert!(!xml.contains("xmlns"));
        assert!(xml.contains("<Code>NoSuchBucket</Code>"));
        assert!(xml.contains("<RequestId>REQID</RequestId>"));
    }

    #[test]
    fn success_roots_carry_xmlns() {
        let xml = render_list_buckets_result("o1", "owner", &[("b1", "2026-01-01T00:00:00.000Z")]);
        assert!(xml.contains(r#"xmlns="http://s3.amazonaws.com/doc/2006-03-01/""#));
    }

    #[test]
    fn location_constraint_empty_for_us_east_1() {
        let xml = render_location_constraint("us-east-1");
        assert!(xml.contains("<LocationConstraint xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\"/>"));
    }

    #[test]
    fn location_constraint_text_for_other_region() {
        let xml = render_location_constraint("eu-west-1");
        assert!(xml.contains(">eu-west-1<"));
    }

    #[test]
    fn grantee_carries_xsi_type() {
        let acl = Acl {
            owner: AclOwner { id: "o1".into(), display_name: "owner".into() },
            grants: vec![AclGrant {
                grantee: AclGrantee::CanonicalUser { id: "o1".into(), display_name: "owner".into() },
                permission: "FULL_CONTROL".into(),
            }],
        };
        let xml = render_access_control_policy(&acl);
        assert!(xml.contains(r#"xsi:type="CanonicalUser""#));
        assert!(xml.contains(r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance""#));
    }

    #[test]
    fn listing_url_encodes_key_with_slash() {
        let entries = [ObjectEntry {
            key: "data/file one.txt",
            last_modified: "2026-01-01T00:00:00.000Z",
            etag: "\"abc\"",
            size: 10,
            storage_class: "STANDARD",
            owner: None,
        }];
        let xml = render_list_objects_result_v2(
            "b", "data%2F", "", 1000, false, 1, &entries, &[], None, None, None, true,
        );
        assert!(xml.contains("<EncodingType>url</EncodingType>"));
        assert!(xml.contains("<Key>data%2Ffile%20one.txt</Key>"));
    }

    #[test]
    fn delete_result_quiet_suppresses_deleted_entries() {
        let deleted = [DeletedEntry { key: "a" }];
        let xml = render_delete_result(&deleted, &[], true);
        assert!(!xml.contains("<Deleted>"));
    }

    #[test]
    fn xml_escapes_special_characters() {
        let xml = render_error("InvalidArgument", "bad <value> & \"quote\"", "/r", "ID");
        assert!(xml.contains("&lt;value&gt;"));
        assert!(xml.contains("&amp;"));
    }
}
