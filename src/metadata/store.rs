//! Metadata store trait and the record types that flow through it.
//!
//! A metadata store owns everything about a bucket, object, or multipart
//! upload except the object bytes themselves: names, ACLs, user metadata,
//! ETags, timestamps. The trait is written against hand-pinned futures
//! (rather than `async-trait`) so it stays usable as a trait object behind
//! `Arc<dyn MetadataStore>` without an extra allocation per call on stable
//! Rust.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

// ── ACL types ──────────────────────────────────────────────────────

/// An S3 access control list, persisted as JSON alongside the resource it
/// protects.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Acl {
    #[serde(default)]
    pub owner: AclOwner,
    #[serde(default)]
    pub grants: Vec<AclGrant>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AclOwner {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclGrant {
    pub grantee: AclGrantee,
    pub permission: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AclGrantee {
    CanonicalUser {
        id: String,
        #[serde(default)]
        display_name: String,
    },
    Group {
        uri: String,
    },
}

impl Acl {
    /// The default ACL every newly created bucket or object gets: a single
    /// FULL_CONTROL grant to its owner.
    pub fn full_control(owner_id: &str, display_name: &str) -> Self {
        Acl {
            owner: AclOwner {
                id: owner_id.to_string(),
                display_name: display_name.to_string(),
            },
            grants: vec![AclGrant {
                grantee: AclGrantee::CanonicalUser {
                    id: owner_id.to_string(),
                    display_name: display_name.to_string(),
                },
                permission: "FULL_CONTROL".to_string(),
            }],
        }
    }
}

// ── Credential types ───────────────────────────────────────────────

/// A signing credential: an access key ID, its secret, and the identity it
/// authenticates as.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub access_key_id: String,
    pub secret_key: String,
    pub owner_id: String,
    pub display_name: String,
    pub active: bool,
    pub created_at: String,
}

// ── Record types ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BucketRecord {
    pub name: String,
    pub created_at: String,
    pub region: String,
    pub owner_id: String,
    pub owner_display: String,
    /// JSON-serialized [`Acl`].
    pub acl: String,
}

#[derive(Debug, Clone)]
pub struct ObjectRecord {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    /// Quoted ETag, e.g. `"d41d8cd98f00b204e9800998ecf8427e"`.
    pub etag: String,
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
    /// Raw `Expires` header value (RFC 7231 date string).
    pub expires: Option<String>,
    pub storage_class: String,
    /// JSON-serialized [`Acl`].
    pub acl: String,
    pub last_modified: String,
    pub user_metadata: HashMap<String, String>,
    pub delete_marker: bool,
}

#[derive(Debug, Clone)]
pub struct MultipartUploadRecord {
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
    pub expires: Option<String>,
    pub storage_class: String,
    /// JSON-serialized [`Acl`].
    pub acl: String,
    pub user_metadata: HashMap<String, String>,
    pub owner_id: String,
    pub owner_display: String,
    pub initiated_at: String,
}

#[derive(Debug, Clone)]
pub struct PartRecord {
    pub part_number: u32,
    pub size: u64,
    pub etag: String,
    pub last_modified: String,
}

// ── List result types ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ListObjectsResult {
    pub objects: Vec<ObjectRecord>,
    pub common_prefixes: Vec<String>,
    pub next_continuation_token: Option<String>,
    pub is_truncated: bool,
}

#[derive(Debug, Clone)]
pub struct ListUploadsResult {
    pub uploads: Vec<MultipartUploadRecord>,
    pub is_truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_upload_id_marker: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListPartsResult {
    pub parts: Vec<PartRecord>,
    pub is_truncated: bool,
    pub next_part_number_marker: Option<u32>,
}

/// Per-key outcome of a batch `DeleteObjects` call (§4.3): a failure on one
/// key never aborts the rest of the batch.
#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    pub key: String,
    pub error: Option<DeleteOutcomeError>,
}

#[derive(Debug, Clone)]
pub struct DeleteOutcomeError {
    pub code: String,
    pub message: String,
}

// ── Trait ───────────────────────────────────────────────────────────

/// Everything the S3 handlers need from persistent metadata storage.
///
/// Implementations must be safe to share across the whole process behind an
/// `Arc` and to call concurrently from many request tasks.
pub trait MetadataStore: Send + Sync + 'static {
    // ── Buckets ─────────────────────────────────────────────────────

    fn create_bucket(
        &self,
        record: BucketRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    fn get_bucket(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<BucketRecord>>> + Send + '_>>;

    fn bucket_exists(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    fn list_buckets(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<BucketRecord>>> + Send + '_>>;

    fn delete_bucket(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    fn update_bucket_acl(
        &self,
        name: &str,
        acl: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    // ── Objects ─────────────────────────────────────────────────────

    /// Insert or replace an object record.
    fn put_object(
        &self,
        record: ObjectRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ObjectRecord>>> + Send + '_>>;

    fn object_exists(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        max_keys: u32,
        start_after: &str,
        continuation_token: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ListObjectsResult>> + Send + '_>>;

    fn delete_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Delete multiple objects independently; one key's failure is reported
    /// without aborting the rest.
    fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<DeleteOutcome>>> + Send + '_>>;

    fn update_object_acl(
        &self,
        bucket: &str,
        key: &str,
        acl: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Count objects in a bucket, used by the `BucketNotEmpty` check on delete.
    fn count_objects(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<u64>> + Send + '_>>;

    /// Count in-progress multipart uploads targeting a bucket, used by the
    /// `BucketNotEmpty` check on delete -- an incomplete upload occupies the
    /// bucket's namespace until it is aborted or completed.
    fn count_uploads(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<u64>> + Send + '_>>;

    // ── Multipart uploads ───────────────────────────────────────────

    fn create_multipart_upload(
        &self,
        record: MultipartUploadRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    fn get_multipart_upload(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<MultipartUploadRecord>>> + Send + '_>>;

    /// Record an uploaded part, replacing any prior upload of the same part number.
    fn put_part(
        &self,
        upload_id: &str,
        part: PartRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    fn list_parts(
        &self,
        upload_id: &str,
        max_parts: u32,
        part_number_marker: u32,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ListPartsResult>> + Send + '_>>;

    /// All parts for an upload, in ascending part-number order, for
    /// `CompleteMultipartUpload` validation.
    fn get_parts_for_completion(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<PartRecord>>> + Send + '_>>;

    /// Insert the assembled object and drop the upload's part bookkeeping,
    /// as a single transaction.
    fn complete_multipart_upload(
        &self,
        upload_id: &str,
        final_object: ObjectRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Drop an upload and its parts (used by both explicit abort and startup reaping).
    fn delete_multipart_upload(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        max_uploads: u32,
        key_marker: &str,
        upload_id_marker: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ListUploadsResult>> + Send + '_>>;

    /// Multipart uploads initiated before `cutoff_unix_secs`, across every
    /// bucket — used by crash-only startup to reap stale uploads (§4.12,
    /// `multipart_upload_ttl_days`). Returns the reaped upload IDs.
    fn reap_expired_uploads(
        &self,
        cutoff_unix_secs: i64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<String>>> + Send + '_>>;

    // ── Credentials ─────────────────────────────────────────────────

    fn get_credential(
        &self,
        access_key_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<CredentialRecord>>> + Send + '_>>;

    /// Insert a credential only if its access key ID isn't already present,
    /// so repeated startups never reset an existing secret (§7).
    fn put_credential_if_absent(
        &self,
        record: CredentialRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}
