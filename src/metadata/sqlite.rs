//! SQLite-backed metadata store.
//!
//! Built on `rusqlite` with the `bundled` feature, so no system SQLite
//! library is required. Every trait method wraps a synchronous rusqlite
//! call behind a `Mutex<Connection>` — metadata operations are cheap and
//! this keeps the implementation straightforward; if it ever becomes a
//! contention point a connection pool is the natural next step.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::store::{
    BucketRecord, CredentialRecord, DeleteOutcome, ListObjectsResult, ListPartsResult,
    ListUploadsResult, MetadataStore, MultipartUploadRecord, ObjectRecord, PartRecord,
};

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

/// Metadata store backed by a single SQLite database file.
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Open (or create) the database at `path` and initialize the schema.
    /// Pass `":memory:"` for an ephemeral database (tests).
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create tables and indexes if they don't already exist. Idempotent,
    /// so it's safe to call on every startup (crash-only recovery, §4.12).
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS buckets (
                name           TEXT PRIMARY KEY,
                region         TEXT NOT NULL DEFAULT 'us-east-1',
                owner_id       TEXT NOT NULL,
                owner_display  TEXT NOT NULL DEFAULT '',
                acl            TEXT NOT NULL DEFAULT '{}',
                created_at     TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS objects (
                bucket              TEXT NOT NULL,
                key                 TEXT NOT NULL,
                size                INTEGER NOT NULL,
                etag                TEXT NOT NULL,
                content_type        TEXT NOT NULL DEFAULT 'application/octet-stream',
                content_encoding    TEXT,
                content_language    TEXT,
                content_disposition TEXT,
                cache_control       TEXT,
                expires             TEXT,
                storage_class       TEXT NOT NULL DEFAULT 'STANDARD',
                acl                 TEXT NOT NULL DEFAULT '{}',
                user_metadata       TEXT NOT NULL DEFAULT '{}',
                last_modified       TEXT NOT NULL,
                delete_marker       INTEGER NOT NULL DEFAULT 0,

                PRIMARY KEY (bucket, key),
                FOREIGN KEY (bucket) REFERENCES buckets(name) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_objects_bucket ON objects(bucket);
            CREATE INDEX IF NOT EXISTS idx_objects_bucket_key ON objects(bucket, key);

            CREATE TABLE IF NOT EXISTS multipart_uploads (
                upload_id           TEXT PRIMARY KEY,
                bucket              TEXT NOT NULL,
                key                 TEXT NOT NULL,
                content_type        TEXT NOT NULL DEFAULT 'application/octet-stream',
                content_encoding    TEXT,
                content_language    TEXT,
                content_disposition TEXT,
                cache_control       TEXT,
                expires             TEXT,
                storage_class       TEXT NOT NULL DEFAULT 'STANDARD',
                acl                 TEXT NOT NULL DEFAULT '{}',
                user_metadata       TEXT NOT NULL DEFAULT '{}',
                owner_id            TEXT NOT NULL,
                owner_display       TEXT NOT NULL DEFAULT '',
                initiated_at        TEXT NOT NULL,

                FOREIGN KEY (bucket) REFERENCES buckets(name) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_uploads_bucket ON multipart_uploads(bucket);
            CREATE INDEX IF NOT EXISTS idx_uploads_bucket_key ON multipart_uploads(bucket, key);

            CREATE TABLE IF NOT EXISTS multipart_parts (
                upload_id      TEXT NOT NULL,
                part_number    INTEGER NOT NULL,
                size           INTEGER NOT NULL,
                etag           TEXT NOT NULL,
                last_modified  TEXT NOT NULL,

                PRIMARY KEY (upload_id, part_number),
                FOREIGN KEY (upload_id) REFERENCES multipart_uploads(upload_id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS credentials (
                access_key_id  TEXT PRIMARY KEY,
                secret_key     TEXT NOT NULL,
                owner_id       TEXT NOT NULL,
                display_name   TEXT NOT NULL DEFAULT '',
                active         INTEGER NOT NULL DEFAULT 1,
                created_at     TEXT NOT NULL
            );
            ",
        )?;

        let existing: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .optional()?
            .flatten();

        if existing.unwrap_or(0) < SCHEMA_VERSION {
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, iso8601_now()],
            )?;
        }

        Ok(())
    }

    /// Seed the default credential from config at startup. Idempotent —
    /// a credential that already exists keeps its stored secret (§7).
    pub fn seed_credential(&self, access_key: &str, secret_key: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute(
            "INSERT OR IGNORE INTO credentials (access_key_id, secret_key, owner_id, display_name, active, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![access_key, secret_key, access_key, access_key, iso8601_now()],
        )?;
        Ok(())
    }
}

/// Escape `%` and `_` in a LIKE pattern fragment so a literal prefix
/// containing those characters doesn't act as a wildcard.
fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Current time as an ISO-8601 string (`2026-02-23T12:00:00.000Z`).
/// Built from `SystemTime` rather than pulling in a date-time crate just
/// for this.
fn iso8601_now() -> String {
    let since_epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    iso8601_from_unix(since_epoch.as_secs() as i64, since_epoch.subsec_millis())
}

/// Format a Unix timestamp (possibly negative, for cutoffs before 1970) as
/// ISO-8601. Zero-padded fields keep this lexicographically comparable to
/// other ISO-8601 timestamps, which `reap_expired_uploads` relies on.
fn iso8601_from_unix(secs: i64, millis: u32) -> String {
    let days = secs.div_euclid(86400);
    let day_secs = secs.rem_euclid(86400);
    let hours = day_secs / 3600;
    let minutes = (day_secs % 3600) / 60;
    let seconds = day_secs % 60;

    let (year, month, day) = days_to_ymd(days);
    format!("{year:04}-{month:02}-{day:02}T{hours:02}:{minutes:02}:{seconds:02}.{millis:03}Z")
}

/// Convert days since the Unix epoch to (year, month, day), per Howard
/// Hinnant's civil-from-days algorithm.
fn days_to_ymd(days: i64) -> (i32, u32, u32) {
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if m <= 2 { y + 1 } else { y };
    (year as i32, m as u32, d as u32)
}

fn serialize_user_metadata(meta: &HashMap<String, String>) -> String {
    serde_json::to_string(meta).unwrap_or_else(|_| "{}".to_string())
}

fn deserialize_user_metadata(json: &str) -> HashMap<String, String> {
    serde_json::from_str(json).unwrap_or_default()
}

fn map_object_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ObjectRecord> {
    let size: i64 = row.get(2)?;
    let user_meta_json: String = row.get(12)?;
    let delete_marker: i32 = row.get(14)?;
    Ok(ObjectRecord {
        bucket: row.get(0)?,
        key: row.get(1)?,
        size: size as u64,
        etag: row.get(3)?,
        content_type: row.get(4)?,
        content_encoding: row.get(5)?,
        content_language: row.get(6)?,
        content_disposition: row.get(7)?,
        cache_control: row.get(8)?,
        expires: row.get(9)?,
        storage_class: row.get(10)?,
        acl: row.get(11)?,
        last_modified: row.get(13)?,
        user_metadata: deserialize_user_metadata(&user_meta_json),
        delete_marker: delete_marker != 0,
    })
}

fn map_upload_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MultipartUploadRecord> {
    let user_meta_json: String = row.get(11)?;
    Ok(MultipartUploadRecord {
        upload_id: row.get(0)?,
        bucket: row.get(1)?,
        key: row.get(2)?,
        content_type: row.get(3)?,
        content_encoding: row.get(4)?,
        content_language: row.get(5)?,
        content_disposition: row.get(6)?,
        cache_control: row.get(7)?,
        expires: row.get(8)?,
        storage_class: row.get(9)?,
        acl: row.get(10)?,
        user_metadata: deserialize_user_metadata(&user_meta_json),
        owner_id: row.get(12)?,
        owner_display: row.get(13)?,
        initiated_at: row.get(14)?,
    })
}

const OBJECT_COLUMNS: &str = "bucket, key, size, etag, content_type, content_encoding,
     content_language, content_disposition, cache_control, expires,
     storage_class, acl, user_metadata, last_modified, delete_marker";

const UPLOAD_COLUMNS: &str = "upload_id, bucket, key, content_type, content_encoding,
     content_language, content_disposition, cache_control, expires,
     storage_class, acl, user_metadata, owner_id, owner_display, initiated_at";

// ── MetadataStore implementation ───────────────────────────────────

impl MetadataStore for SqliteMetadataStore {
    // ── Buckets ─────────────────────────────────────────────────────

    fn create_bucket(
        &self,
        record: BucketRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT INTO buckets (name, region, owner_id, owner_display, acl, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.name,
                    record.region,
                    record.owner_id,
                    record.owner_display,
                    record.acl,
                    record.created_at,
                ],
            )?;
            Ok(())
        })
    }

    fn get_bucket(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<BucketRecord>>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let result = conn
                .query_row(
                    "SELECT name, region, owner_id, owner_display, acl, created_at
                     FROM buckets WHERE name = ?1",
                    params![name],
                    |row| {
                        Ok(BucketRecord {
                            name: row.get(0)?,
                            region: row.get(1)?,
                            owner_id: row.get(2)?,
                            owner_display: row.get(3)?,
                            acl: row.get(4)?,
                            created_at: row.get(5)?,
                        })
                    },
                )
                .optional()?;
            Ok(result)
        })
    }

    fn bucket_exists(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM buckets WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    fn list_buckets(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<BucketRecord>>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let mut stmt = conn.prepare(
                "SELECT name, region, owner_id, owner_display, acl, created_at FROM buckets ORDER BY name",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(BucketRecord {
                    name: row.get(0)?,
                    region: row.get(1)?,
                    owner_id: row.get(2)?,
                    owner_display: row.get(3)?,
                    acl: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }

    fn delete_bucket(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute("DELETE FROM buckets WHERE name = ?1", params![name])?;
            Ok(())
        })
    }

    fn update_bucket_acl(
        &self,
        name: &str,
        acl: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let name = name.to_string();
        let acl = acl.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute("UPDATE buckets SET acl = ?1 WHERE name = ?2", params![acl, name])?;
            Ok(())
        })
    }

    // ── Objects ─────────────────────────────────────────────────────

    fn put_object(
        &self,
        record: ObjectRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let user_meta_json = serialize_user_metadata(&record.user_metadata);
            conn.execute(
                &format!("INSERT OR REPLACE INTO objects ({OBJECT_COLUMNS}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)"),
                params![
                    record.bucket,
                    record.key,
                    record.size as i64,
                    record.etag,
                    record.content_type,
                    record.content_encoding,
                    record.content_language,
                    record.content_disposition,
                    record.cache_control,
                    record.expires,
                    record.storage_class,
                    record.acl,
                    user_meta_json,
                    record.last_modified,
                    record.delete_marker as i32,
                ],
            )?;
            Ok(())
        })
    }

    fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ObjectRecord>>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let result = conn
                .query_row(
                    &format!("SELECT {OBJECT_COLUMNS} FROM objects WHERE bucket = ?1 AND key = ?2"),
                    params![bucket, key],
                    map_object_row,
                )
                .optional()?;
            Ok(result)
        })
    }

    fn object_exists(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM objects WHERE bucket = ?1 AND key = ?2",
                params![bucket, key],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        max_keys: u32,
        start_after: &str,
        continuation_token: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ListObjectsResult>> + Send + '_>> {
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();
        let delimiter = delimiter.to_string();
        let start_after = start_after.to_string();
        let continuation_token = continuation_token.map(|s| s.to_string());
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");

            let effective_start = continuation_token.as_deref().unwrap_or(&start_after);
            let like_pattern = format!("{}%", escape_like(&prefix));
            let fetch_limit = max_keys as i64 + 1;

            let mut stmt = conn.prepare(&format!(
                "SELECT {OBJECT_COLUMNS} FROM objects
                 WHERE bucket = ?1 AND key > ?2 AND key LIKE ?3 ESCAPE '\\'
                 ORDER BY key
                 LIMIT ?4"
            ))?;

            let rows = stmt.query_map(
                params![bucket, effective_start, like_pattern, fetch_limit],
                map_object_row,
            )?;

            let all_objects = rows.collect::<Result<Vec<_>, _>>()?;

            if delimiter.is_empty() {
                let is_truncated = all_objects.len() > max_keys as usize;
                let objects: Vec<ObjectRecord> = all_objects.into_iter().take(max_keys as usize).collect();
                let next_token = is_truncated.then(|| objects.last().map(|o| o.key.clone())).flatten();
                Ok(ListObjectsResult {
                    objects,
                    common_prefixes: Vec::new(),
                    next_continuation_token: next_token,
                    is_truncated,
                })
            } else {
                let mut objects = Vec::new();
                let mut common_prefixes = std::collections::BTreeSet::new();
                let mut count = 0u32;

                for obj in all_objects {
                    if count >= max_keys {
                        break;
                    }
                    let after_prefix = &obj.key[prefix.len()..];
                    if let Some(pos) = after_prefix.find(&delimiter) {
                        let cp = format!("{}{}{}", prefix, &after_prefix[..pos], delimiter);
                        if common_prefixes.insert(cp) {
                            count += 1;
                        }
                    } else {
                        objects.push(obj);
                        count += 1;
                    }
                }

                let is_truncated = count >= max_keys;
                let next_token = if is_truncated {
                    objects
                        .last()
                        .map(|o| o.key.clone())
                        .or_else(|| common_prefixes.iter().last().cloned())
                } else {
                    None
                };

                Ok(ListObjectsResult {
                    objects,
                    common_prefixes: common_prefixes.into_iter().collect(),
                    next_continuation_token: next_token,
                    is_truncated,
                })
            }
        })
    }

    fn delete_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute("DELETE FROM objects WHERE bucket = ?1 AND key = ?2", params![bucket, key])?;
            Ok(())
        })
    }

    fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<DeleteOutcome>>> + Send + '_>> {
        let bucket = bucket.to_string();
        let keys = keys.to_vec();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let mut stmt = conn.prepare("DELETE FROM objects WHERE bucket = ?1 AND key = ?2")?;
            let mut outcomes = Vec::with_capacity(keys.len());
            for key in keys {
                // A missing key is not an error: S3 reports DeleteObjects as
                // successful for keys that never existed.
                match stmt.execute(params![bucket, key]) {
                    Ok(_) => outcomes.push(DeleteOutcome { key, error: None }),
                    Err(e) => outcomes.push(DeleteOutcome {
                        key,
                        error: Some(super::store::DeleteOutcomeError {
                            code: "InternalError".to_string(),
                            message: e.to_string(),
                        }),
                    }),
                }
            }
            Ok(outcomes)
        })
    }

    fn update_object_acl(
        &self,
        bucket: &str,
        key: &str,
        acl: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        let acl = acl.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "UPDATE objects SET acl = ?1 WHERE bucket = ?2 AND key = ?3",
                params![acl, bucket, key],
            )?;
            Ok(())
        })
    }

    fn count_objects(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<u64>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM objects WHERE bucket = ?1",
                params![bucket],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    fn count_uploads(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<u64>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM multipart_uploads WHERE bucket = ?1",
                params![bucket],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    // ── Multipart uploads ───────────────────────────────────────────

    fn create_multipart_upload(
        &self,
        record: MultipartUploadRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let user_meta_json = serialize_user_metadata(&record.user_metadata);
            conn.execute(
                &format!("INSERT INTO multipart_uploads ({UPLOAD_COLUMNS}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)"),
                params![
                    record.upload_id,
                    record.bucket,
                    record.key,
                    record.content_type,
                    record.content_encoding,
                    record.content_language,
                    record.content_disposition,
                    record.cache_control,
                    record.expires,
                    record.storage_class,
                    record.acl,
                    user_meta_json,
                    record.owner_id,
                    record.owner_display,
                    record.initiated_at,
                ],
            )?;
            Ok(())
        })
    }

    fn get_multipart_upload(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<MultipartUploadRecord>>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let result = conn
                .query_row(
                    &format!("SELECT {UPLOAD_COLUMNS} FROM multipart_uploads WHERE upload_id = ?1"),
                    params![upload_id],
                    map_upload_row,
                )
                .optional()?;
            Ok(result)
        })
    }

    fn put_part(
        &self,
        upload_id: &str,
        part: PartRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT OR REPLACE INTO multipart_parts (upload_id, part_number, size, etag, last_modified)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![upload_id, part.part_number, part.size as i64, part.etag, part.last_modified],
            )?;
            Ok(())
        })
    }

    fn list_parts(
        &self,
        upload_id: &str,
        max_parts: u32,
        part_number_marker: u32,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ListPartsResult>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let fetch_limit = max_parts as i64 + 1;
            let mut stmt = conn.prepare(
                "SELECT part_number, size, etag, last_modified
                 FROM multipart_parts WHERE upload_id = ?1 AND part_number > ?2
                 ORDER BY part_number LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![upload_id, part_number_marker, fetch_limit], |row| {
                let size: i64 = row.get(1)?;
                Ok(PartRecord {
                    part_number: row.get(0)?,
                    size: size as u64,
                    etag: row.get(2)?,
                    last_modified: row.get(3)?,
                })
            })?;
            let mut parts = rows.collect::<Result<Vec<_>, _>>()?;
            let is_truncated = parts.len() > max_parts as usize;
            if is_truncated {
                parts.truncate(max_parts as usize);
            }
            let next_marker = is_truncated.then(|| parts.last().map(|p| p.part_number)).flatten();
            Ok(ListPartsResult {
                parts,
                is_truncated,
                next_part_number_marker: next_marker,
            })
        })
    }

    fn get_parts_for_completion(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<PartRecord>>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let mut stmt = conn.prepare(
                "SELECT part_number, size, etag, last_modified
                 FROM multipart_parts WHERE upload_id = ?1 ORDER BY part_number",
            )?;
            let rows = stmt.query_map(params![upload_id], |row| {
                let size: i64 = row.get(1)?;
                Ok(PartRecord {
                    part_number: row.get(0)?,
                    size: size as u64,
                    etag: row.get(2)?,
                    last_modified: row.get(3)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }

    fn complete_multipart_upload(
        &self,
        upload_id: &str,
        final_object: ObjectRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn.lock().expect("mutex poisoned");
            let tx = conn.transaction()?;
            let user_meta_json = serialize_user_metadata(&final_object.user_metadata);

            tx.execute(
                &format!("INSERT OR REPLACE INTO objects ({OBJECT_COLUMNS}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)"),
                params![
                    final_object.bucket,
                    final_object.key,
                    final_object.size as i64,
                    final_object.etag,
                    final_object.content_type,
                    final_object.content_encoding,
                    final_object.content_language,
                    final_object.content_disposition,
                    final_object.cache_control,
                    final_object.expires,
                    final_object.storage_class,
                    final_object.acl,
                    user_meta_json,
                    final_object.last_modified,
                    final_object.delete_marker as i32,
                ],
            )?;
            tx.execute("DELETE FROM multipart_parts WHERE upload_id = ?1", params![upload_id])?;
            tx.execute("DELETE FROM multipart_uploads WHERE upload_id = ?1", params![upload_id])?;
            tx.commit()?;
            Ok(())
        })
    }

    fn delete_multipart_upload(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            // ON DELETE CASCADE drops the parts too.
            conn.execute("DELETE FROM multipart_uploads WHERE upload_id = ?1", params![upload_id])?;
            Ok(())
        })
    }

    fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        max_uploads: u32,
        key_marker: &str,
        upload_id_marker: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ListUploadsResult>> + Send + '_>> {
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();
        let key_marker = key_marker.to_string();
        let upload_id_marker = upload_id_marker.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let like_pattern = format!("{}%", escape_like(&prefix));
            let fetch_limit = max_uploads as i64 + 1;

            let mut uploads = Vec::new();
            if key_marker.is_empty() {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {UPLOAD_COLUMNS} FROM multipart_uploads
                     WHERE bucket = ?1 AND key LIKE ?2 ESCAPE '\\'
                     ORDER BY key, initiated_at LIMIT ?3"
                ))?;
                let rows = stmt.query_map(params![bucket, like_pattern, fetch_limit], map_upload_row)?;
                uploads.extend(rows.collect::<Result<Vec<_>, _>>()?);
            } else if upload_id_marker.is_empty() {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {UPLOAD_COLUMNS} FROM multipart_uploads
                     WHERE bucket = ?1 AND key LIKE ?2 ESCAPE '\\' AND key > ?4
                     ORDER BY key, initiated_at LIMIT ?3"
                ))?;
                let rows =
                    stmt.query_map(params![bucket, like_pattern, fetch_limit, key_marker], map_upload_row)?;
                uploads.extend(rows.collect::<Result<Vec<_>, _>>()?);
            } else {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {UPLOAD_COLUMNS} FROM multipart_uploads
                     WHERE bucket = ?1 AND key LIKE ?2 ESCAPE '\\'
                       AND (key > ?4 OR (key = ?4 AND upload_id > ?5))
                     ORDER BY key, initiated_at LIMIT ?3"
                ))?;
                let rows = stmt.query_map(
                    params![bucket, like_pattern, fetch_limit, key_marker, upload_id_marker],
                    map_upload_row,
                )?;
                uploads.extend(rows.collect::<Result<Vec<_>, _>>()?);
            }

            let is_truncated = uploads.len() > max_uploads as usize;
            if is_truncated {
                uploads.truncate(max_uploads as usize);
            }

            let (next_key_marker, next_upload_id_marker) = if is_truncated {
                match uploads.last() {
                    Some(last) => (Some(last.key.clone()), Some(last.upload_id.clone())),
                    None => (None, None),
                }
            } else {
                (None, None)
            };

            Ok(ListUploadsResult {
                uploads,
                is_truncated,
                next_key_marker,
                next_upload_id_marker,
            })
        })
    }

    fn reap_expired_uploads(
        &self,
        cutoff_unix_secs: i64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<String>>> + Send + '_>> {
        Box::pin(async move {
            let mut conn = self.conn.lock().expect("mutex poisoned");
            let tx = conn.transaction()?;
            let cutoff = iso8601_from_unix(cutoff_unix_secs, 0);

            let expired: Vec<String> = {
                let mut stmt = tx.prepare("SELECT upload_id FROM multipart_uploads WHERE initiated_at < ?1")?;
                let rows = stmt.query_map(params![cutoff], |row| row.get(0))?;
                rows.collect::<Result<Vec<_>, _>>()?
            };

            for upload_id in &expired {
                tx.execute("DELETE FROM multipart_parts WHERE upload_id = ?1", params![upload_id])?;
                tx.execute("DELETE FROM multipart_uploads WHERE upload_id = ?1", params![upload_id])?;
            }

            tx.commit()?;
            Ok(expired)
        })
    }

    // ── Credentials ─────────────────────────────────────────────────

    fn get_credential(
        &self,
        access_key_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<CredentialRecord>>> + Send + '_>> {
        let access_key_id = access_key_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let result = conn
                .query_row(
                    "SELECT access_key_id, secret_key, owner_id, display_name, active, created_at
                     FROM credentials WHERE access_key_id = ?1 AND active = 1",
                    params![access_key_id],
                    |row| {
                        let active: i32 = row.get(4)?;
                        Ok(CredentialRecord {
                            access_key_id: row.get(0)?,
                            secret_key: row.get(1)?,
                            owner_id: row.get(2)?,
                            display_name: row.get(3)?,
                            active: active != 0,
                            created_at: row.get(5)?,
                        })
                    },
                )
                .optional()?;
            Ok(result)
        })
    }

    fn put_credential_if_absent(
        &self,
        record: CredentialRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT OR IGNORE INTO credentials
                    (access_key_id, secret_key, owner_id, display_name, active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.access_key_id,
                    record.secret_key,
                    record.owner_id,
                    record.display_name,
                    record.active as i32,
                    record.created_at,
                ],
            )?;
            Ok(())
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SqliteMetadataStore {
        SqliteMetadataStore::new(":memory:").expect("failed to create in-memory store")
    }

    fn make_bucket(name: &str) -> BucketRecord {
        BucketRecord {
            name: name.to_string(),
            created_at: "2026-02-23T00:00:00.000Z".to_string(),
            region: "us-east-1".to_string(),
            owner_id: "test-owner".to_string(),
            owner_display: "Test Owner".to_string(),
            acl: "{}".to_string(),
        }
    }

    fn make_object(bucket: &str, key: &str, size: u64) -> ObjectRecord {
        ObjectRecord {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size,
            etag: format!("\"etag-{key}\""),
            content_type: "application/octet-stream".to_string(),
            content_encoding: None,
            content_language: None,
            content_disposition: None,
            cache_control: None,
            expires: None,
            storage_class: "STANDARD".to_string(),
            acl: "{}".to_string(),
            last_modified: "2026-02-23T00:00:00.000Z".to_string(),
            user_metadata: HashMap::new(),
            delete_marker: false,
        }
    }

    fn make_upload(bucket: &str, key: &str, upload_id: &str, initiated_at: &str) -> MultipartUploadRecord {
        MultipartUploadRecord {
            upload_id: upload_id.to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type: "application/octet-stream".to_string(),
            content_encoding: None,
            content_language: None,
            content_disposition: None,
            cache_control: None,
            expires: None,
            storage_class: "STANDARD".to_string(),
            acl: "{}".to_string(),
            user_metadata: HashMap::new(),
            owner_id: "test-owner".to_string(),
            owner_display: "Test Owner".to_string(),
            initiated_at: initiated_at.to_string(),
        }
    }

    #[tokio::test]
    async fn test_schema_idempotent() {
        let store = test_store();
        store.init_db().expect("second init_db failed");
        store.init_db().expect("third init_db failed");
    }

    #[tokio::test]
    async fn test_create_and_get_bucket() {
        let store = test_store();
        store.create_bucket(make_bucket("test-bucket")).await.unwrap();
        let fetched = store.get_bucket("test-bucket").await.unwrap().unwrap();
        assert_eq!(fetched.name, "test-bucket");
        assert_eq!(fetched.owner_id, "test-owner");
    }

    #[tokio::test]
    async fn test_bucket_exists() {
        let store = test_store();
        assert!(!store.bucket_exists("nonexistent").await.unwrap());
        store.create_bucket(make_bucket("exists")).await.unwrap();
        assert!(store.bucket_exists("exists").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_buckets_sorted() {
        let store = test_store();
        store.create_bucket(make_bucket("gamma")).await.unwrap();
        store.create_bucket(make_bucket("alpha")).await.unwrap();
        store.create_bucket(make_bucket("beta")).await.unwrap();

        let buckets = store.list_buckets().await.unwrap();
        let names: Vec<&str> = buckets.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn test_delete_bucket() {
        let store = test_store();
        store.create_bucket(make_bucket("to-delete")).await.unwrap();
        store.delete_bucket("to-delete").await.unwrap();
        assert!(!store.bucket_exists("to-delete").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_and_get_object_roundtrip() {
        let store = test_store();
        store.create_bucket(make_bucket("mybucket")).await.unwrap();

        let mut obj = make_object("mybucket", "hello.txt", 5);
        obj.content_type = "text/plain".to_string();
        obj.user_metadata.insert("x-amz-meta-author".to_string(), "tester".to_string());
        store.put_object(obj).await.unwrap();

        let fetched = store.get_object("mybucket", "hello.txt").await.unwrap().unwrap();
        assert_eq!(fetched.size, 5);
        assert_eq!(fetched.content_type, "text/plain");
        assert_eq!(fetched.user_metadata.get("x-amz-meta-author").unwrap(), "tester");
    }

    #[tokio::test]
    async fn test_put_object_upsert_overwrites() {
        let store = test_store();
        store.create_bucket(make_bucket("mybucket")).await.unwrap();
        store.put_object(make_object("mybucket", "key", 10)).await.unwrap();
        store.put_object(make_object("mybucket", "key", 20)).await.unwrap();
        let obj = store.get_object("mybucket", "key").await.unwrap().unwrap();
        assert_eq!(obj.size, 20);
    }

    #[tokio::test]
    async fn test_delete_objects_reports_all_keys_including_missing() {
        let store = test_store();
        store.create_bucket(make_bucket("mybucket")).await.unwrap();
        store.put_object(make_object("mybucket", "a", 1)).await.unwrap();

        let outcomes = store
            .delete_objects("mybucket", &["a".to_string(), "does-not-exist".to_string()])
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.error.is_none()));
        assert!(!store.object_exists("mybucket", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_count_objects() {
        let store = test_store();
        store.create_bucket(make_bucket("mybucket")).await.unwrap();
        assert_eq!(store.count_objects("mybucket").await.unwrap(), 0);
        store.put_object(make_object("mybucket", "a", 1)).await.unwrap();
        store.put_object(make_object("mybucket", "b", 2)).await.unwrap();
        assert_eq!(store.count_objects("mybucket").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_objects_with_delimiter_groups_common_prefixes() {
        let store = test_store();
        store.create_bucket(make_bucket("mybucket")).await.unwrap();
        store.put_object(make_object("mybucket", "docs/a.txt", 1)).await.unwrap();
        store.put_object(make_object("mybucket", "docs/b.txt", 2)).await.unwrap();
        store.put_object(make_object("mybucket", "images/c.png", 3)).await.unwrap();
        store.put_object(make_object("mybucket", "root.txt", 4)).await.unwrap();

        let result = store.list_objects("mybucket", "", "/", 1000, "", None).await.unwrap();
        assert_eq!(result.objects.len(), 1);
        assert_eq!(result.objects[0].key, "root.txt");
        assert_eq!(result.common_prefixes, vec!["docs/".to_string(), "images/".to_string()]);
    }

    #[tokio::test]
    async fn test_list_objects_prefix_with_underscore_is_not_a_wildcard() {
        let store = test_store();
        store.create_bucket(make_bucket("mybucket")).await.unwrap();
        store.put_object(make_object("mybucket", "a_b.txt", 1)).await.unwrap();
        store.put_object(make_object("mybucket", "aXb.txt", 2)).await.unwrap();

        let result = store.list_objects("mybucket", "a_b", "", 1000, "", None).await.unwrap();
        assert_eq!(result.objects.len(), 1);
        assert_eq!(result.objects[0].key, "a_b.txt");
    }

    #[tokio::test]
    async fn test_list_objects_pagination_via_continuation_token() {
        let store = test_store();
        store.create_bucket(make_bucket("mybucket")).await.unwrap();
        store.put_object(make_object("mybucket", "a", 1)).await.unwrap();
        store.put_object(make_object("mybucket", "b", 2)).await.unwrap();
        store.put_object(make_object("mybucket", "c", 3)).await.unwrap();

        let page1 = store.list_objects("mybucket", "", "", 2, "", None).await.unwrap();
        assert_eq!(page1.objects.len(), 2);
        assert!(page1.is_truncated);

        let page2 = store
            .list_objects("mybucket", "", "", 2, "", page1.next_continuation_token.as_deref())
            .await
            .unwrap();
        assert_eq!(page2.objects.len(), 1);
        assert!(!page2.is_truncated);
    }

    #[tokio::test]
    async fn test_multipart_lifecycle() {
        let store = test_store();
        store.create_bucket(make_bucket("mybucket")).await.unwrap();
        let upload = make_upload("mybucket", "big.bin", "upload-1", "2026-02-23T00:00:00.000Z");
        store.create_multipart_upload(upload).await.unwrap();

        store
            .put_part(
                "upload-1",
                PartRecord {
                    part_number: 1,
                    size: 5_000_000,
                    etag: "\"part1\"".to_string(),
                    last_modified: "2026-02-23T00:01:00.000Z".to_string(),
                },
            )
            .await
            .unwrap();
        store
            .put_part(
                "upload-1",
                PartRecord {
                    part_number: 2,
                    size: 1_000,
                    etag: "\"part2\"".to_string(),
                    last_modified: "2026-02-23T00:02:00.000Z".to_string(),
                },
            )
            .await
            .unwrap();

        let parts = store.get_parts_for_completion("upload-1").await.unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].part_number, 1);

        store
            .complete_multipart_upload("upload-1", make_object("mybucket", "big.bin", 5_001_000))
            .await
            .unwrap();

        assert!(store.get_multipart_upload("upload-1").await.unwrap().is_none());
        assert!(store.object_exists("mybucket", "big.bin").await.unwrap());
        assert!(store.get_parts_for_completion("upload-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reap_expired_uploads() {
        let store = test_store();
        store.create_bucket(make_bucket("mybucket")).await.unwrap();
        store
            .create_multipart_upload(make_upload("mybucket", "old.bin", "old-upload", "2020-01-01T00:00:00.000Z"))
            .await
            .unwrap();
        store
            .create_multipart_upload(make_upload("mybucket", "new.bin", "new-upload", "2026-01-01T00:00:00.000Z"))
            .await
            .unwrap();

        // Cutoff between the two initiation times.
        let cutoff = iso8601_to_unix_for_test("2023-01-01T00:00:00.000Z");
        let reaped = store.reap_expired_uploads(cutoff).await.unwrap();
        assert_eq!(reaped, vec!["old-upload".to_string()]);
        assert!(store.get_multipart_upload("old-upload").await.unwrap().is_none());
        assert!(store.get_multipart_upload("new-upload").await.unwrap().is_some());
    }

    fn iso8601_to_unix_for_test(s: &str) -> i64 {
        // Minimal parser sufficient for the fixed test inputs above.
        let year: i64 = s[0..4].parse().unwrap();
        let mut days: i64 = 0;
        for y in 1970..year {
            let leap = (y % 4 == 0 && y % 100 != 0) || y % 400 == 0;
            days += if leap { 366 } else { 365 };
        }
        days * 86400
    }

    #[tokio::test]
    async fn test_credential_seed_is_idempotent() {
        let store = test_store();
        store.seed_credential("AKID", "original-secret").unwrap();
        store.seed_credential("AKID", "different-secret").unwrap();
        let cred = store.get_credential("AKID").await.unwrap().unwrap();
        assert_eq!(cred.secret_key, "original-secret");
    }

    #[tokio::test]
    async fn test_put_credential_if_absent_does_not_overwrite() {
        let store = test_store();
        let record = CredentialRecord {
            access_key_id: "AKID".to_string(),
            secret_key: "first".to_string(),
            owner_id: "owner".to_string(),
            display_name: "owner".to_string(),
            active: true,
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
        };
        store.put_credential_if_absent(record.clone()).await.unwrap();
        store
            .put_credential_if_absent(CredentialRecord {
                secret_key: "second".to_string(),
                ..record
            })
            .await
            .unwrap();
        assert_eq!(store.get_credential("AKID").await.unwrap().unwrap().secret_key, "first");
    }
}
