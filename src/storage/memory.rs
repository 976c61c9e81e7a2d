//! In-memory storage backend with optional SQLite snapshot persistence.
//!
//! Objects and multipart parts are held in `tokio::sync::RwLock<HashMap<...>>`
//! maps. An optional snapshot mechanism periodically serialises the full
//! in-memory state to a SQLite database so that data can survive restarts.
//!
//! A configurable memory limit (`max_size_bytes`) caps total stored bytes.
//! Unlike [`super::local::LocalBackend`], this backend still materializes
//! each object fully in memory once received; the streaming contract at the
//! trait boundary only means callers never have to buffer the whole body
//! themselves before handing it to `put`.

use bytes::Bytes;
use md5::{Digest, Md5};
use rusqlite::{params, Connection};
use sha2::Sha256;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::AsyncReadExt;

use super::backend::{composite_multipart_etag, ByteStream, PutResult, StorageBackend};

type ObjectKey = (String, String);
type PartKey = (String, u32);

/// In-memory storage backend.
pub struct MemoryBackend {
    objects: tokio::sync::RwLock<HashMap<ObjectKey, Bytes>>,
    parts: tokio::sync::RwLock<HashMap<PartKey, Bytes>>,
    current_size: tokio::sync::RwLock<u64>,
    /// Maximum bytes allowed. 0 means unlimited.
    max_size_bytes: u64,
    /// Persistence mode: "none" or "snapshot".
    persistence: String,
    snapshot_path: PathBuf,
    snapshot_interval_seconds: u64,
    shutdown: Arc<AtomicBool>,
}

impl MemoryBackend {
    /// Create a new `MemoryBackend`.
    ///
    /// If `persistence` is `"snapshot"` and a snapshot file exists at
    /// `snapshot_path`, the previous state is restored from it.
    ///
    /// After construction, call [`start_background_snapshot`] to enable
    /// periodic persistence (if desired).
    pub fn new(
        max_size_bytes: u64,
        persistence: &str,
        snapshot_path: &str,
        snapshot_interval_seconds: u64,
    ) -> anyhow::Result<Self> {
        let (objects_map, parts_map, total_size) =
            if persistence == "snapshot" && Path::new(snapshot_path).exists() {
                Self::read_snapshot_into_maps(snapshot_path)?
            } else {
                (HashMap::new(), HashMap::new(), 0u64)
            };

        let backend = Self {
            objects: tokio::sync::RwLock::new(objects_map),
            parts: tokio::sync::RwLock::new(parts_map),
            current_size: tokio::sync::RwLock::new(total_size),
            max_size_bytes,
            persistence: persistence.to_string(),
            snapshot_path: PathBuf::from(snapshot_path),
            snapshot_interval_seconds,
            shutdown: Arc::new(AtomicBool::new(false)),
        };

        if total_size > 0 {
            tracing::info!("loaded snapshot from {:?}", snapshot_path);
        }

        Ok(backend)
    }

    fn compute_etag(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        format!("\"{}\"", hex::encode(hasher.finalize()))
    }

    #[allow(dead_code)]
    fn compute_content_hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    async fn check_capacity(&self, additional: u64) -> anyhow::Result<()> {
        if self.max_size_bytes == 0 {
            return Ok(());
        }
        let current = *self.current_size.read().await;
        if current + additional > self.max_size_bytes {
            anyhow::bail!(
                "memory limit exceeded: current={current}, additional={additional}, max={}",
                self.max_size_bytes
            );
        }
        Ok(())
    }

    async fn adjust_size(&self, delta: i64) {
        let mut size = self.current_size.write().await;
        if delta >= 0 {
            *size = size.saturating_add(delta as u64);
        } else {
            *size = size.saturating_sub((-delta) as u64);
        }
    }

    async fn drain(mut body: ByteStream) -> anyhow::Result<Bytes> {
        let mut buf = Vec::new();
        body.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    // ── Snapshot persistence ───────────────────────────────────────

    /// Write the current in-memory state to the snapshot SQLite file.
    pub fn snapshot(&self) -> anyhow::Result<()> {
        let objects = match self.objects.try_read() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!("snapshot skipped: could not acquire objects lock");
                return Ok(());
            }
        };
        let parts = match self.parts.try_read() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!("snapshot skipped: could not acquire parts lock");
                return Ok(());
            }
        };

        let tmp_path = self.snapshot_path.with_extension("tmp");
        if let Some(parent) = tmp_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _ = std::fs::remove_file(&tmp_path);

        let conn = Connection::open(&tmp_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS object_snapshots (
                 bucket TEXT NOT NULL,
                 key    TEXT NOT NULL,
                 data   BLOB NOT NULL,
                 PRIMARY KEY (bucket, key)
             );
             CREATE TABLE IF NOT EXISTS part_snapshots (
                 upload_id   TEXT NOT NULL,
                 part_number INTEGER NOT NULL,
                 data        BLOB NOT NULL,
                 PRIMARY KEY (upload_id, part_number)
             );",
        )?;

        {
            let mut stmt = conn
                .prepare("INSERT OR REPLACE INTO object_snapshots (bucket, key, data) VALUES (?1, ?2, ?3)")?;
            for ((bucket, key), data) in objects.iter() {
                stmt.execute(params![bucket, key, data.as_ref()])?;
            }
        }
        {
            let mut stmt = conn.prepare(
                "INSERT OR REPLACE INTO part_snapshots (upload_id, part_number, data) VALUES (?1, ?2, ?3)",
            )?;
            for ((upload_id, part_number), data) in parts.iter() {
                stmt.execute(params![upload_id, part_number, data.as_ref()])?;
            }
        }

        drop(objects);
        drop(parts);

        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        drop(conn);

        std::fs::rename(&tmp_path, &self.snapshot_path)?;
        let _ = std::fs::remove_file(tmp_path.with_extension("tmp-wal"));
        let _ = std::fs::remove_file(tmp_path.with_extension("tmp-shm"));

        tracing::debug!("snapshot written to {:?}", self.snapshot_path);
        Ok(())
    }

    fn read_snapshot_into_maps(
        snapshot_path: &str,
    ) -> anyhow::Result<(HashMap<ObjectKey, Bytes>, HashMap<PartKey, Bytes>, u64)> {
        let conn = Connection::open(snapshot_path)?;
        let mut objects_map: HashMap<ObjectKey, Bytes> = HashMap::new();
        let mut parts_map: HashMap<PartKey, Bytes> = HashMap::new();
        let mut total_size: u64 = 0;

        {
            let mut stmt = conn.prepare("SELECT bucket, key, data FROM object_snapshots")?;
            let rows = stmt.query_map([], |row| {
                let bucket: String = row.get(0)?;
                let key: String = row.get(1)?;
                let data: Vec<u8> = row.get(2)?;
                Ok((bucket, key, data))
            })?;
            for row in rows {
                let (bucket, key, data) = row?;
                total_size += data.len() as u64;
                objects_map.insert((bucket, key), Bytes::from(data));
            }
        }
        {
            let mut stmt = conn.prepare("SELECT upload_id, part_number, data FROM part_snapshots")?;
            let rows = stmt.query_map([], |row| {
                let upload_id: String = row.get(0)?;
                let part_number: i64 = row.get(1)?;
                let data: Vec<u8> = row.get(2)?;
                Ok((upload_id, part_number as u32, data))
            })?;
            for row in rows {
                let (upload_id, part_number, data) = row?;
                total_size += data.len() as u64;
                parts_map.insert((upload_id, part_number), Bytes::from(data));
            }
        }

        tracing::info!(
            "read snapshot from {:?} ({} objects, {} parts, {} bytes)",
            snapshot_path,
            objects_map.len(),
            parts_map.len(),
            total_size,
        );

        Ok((objects_map, parts_map, total_size))
    }

    /// Load state from the snapshot SQLite file (async, for runtime use).
    pub async fn load_snapshot(&self) -> anyhow::Result<()> {
        let path = self.snapshot_path.to_str().unwrap_or("").to_string();
        let (objects_map, parts_map, total_size) =
            tokio::task::spawn_blocking(move || Self::read_snapshot_into_maps(&path)).await??;

        let mut objects = self.objects.write().await;
        let mut parts = self.parts.write().await;
        let mut size = self.current_size.write().await;

        *objects = objects_map;
        *parts = parts_map;
        *size = total_size;

        Ok(())
    }

    /// Start a background tokio task that periodically writes snapshots.
    pub fn start_background_snapshot(self: &Arc<Self>) {
        if self.persistence != "snapshot" || self.snapshot_interval_seconds == 0 {
            return;
        }

        let backend = Arc::clone(self);
        let interval_secs = self.snapshot_interval_seconds;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            interval.tick().await;

            loop {
                interval.tick().await;
                if backend.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = backend.snapshot() {
                    tracing::error!("background snapshot failed: {e}");
                }
            }
        });
    }

    /// Perform a final snapshot (if persistence is enabled) and signal the
    /// background task to stop.
    pub async fn close(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if self.persistence == "snapshot" {
            if let Err(e) = self.snapshot() {
                tracing::error!("final snapshot on close failed: {e}");
            }
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn put(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<PutResult>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let data = Self::drain(body).await?;
            let new_len = data.len() as u64;
            let map_key = (bucket, key);

            let old_len = {
                let objects = self.objects.read().await;
                objects.get(&map_key).map(|d| d.len() as u64)
            };
            let delta = new_len as i64 - old_len.unwrap_or(0) as i64;
            if delta > 0 {
                self.check_capacity(delta as u64).await?;
            }

            let etag = Self::compute_etag(&data);
            {
                let mut objects = self.objects.write().await;
                objects.insert(map_key, data);
            }
            self.adjust_size(delta).await;

            Ok(PutResult { etag, size: new_len })
        })
    }

    fn get(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ByteStream>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let objects = self.objects.read().await;
            match objects.get(&(bucket.clone(), key.clone())) {
                Some(data) => Ok(Box::pin(std::io::Cursor::new(data.clone())) as ByteStream),
                None => anyhow::bail!("object not found: {bucket}/{key}"),
            }
        })
    }

    fn get_range(
        &self,
        bucket: &str,
        key: &str,
        start: u64,
        end: u64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ByteStream>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let objects = self.objects.read().await;
            let data = objects
                .get(&(bucket.clone(), key.clone()))
                .ok_or_else(|| anyhow::anyhow!("object not found: {bucket}/{key}"))?;
            let start = start.min(data.len() as u64) as usize;
            let end = (end + 1).min(data.len() as u64) as usize;
            let slice = data.slice(start..end.max(start));
            Ok(Box::pin(std::io::Cursor::new(slice)) as ByteStream)
        })
    }

    fn delete(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let mut objects = self.objects.write().await;
            if let Some(data) = objects.remove(&(bucket, key)) {
                drop(objects);
                self.adjust_size(-(data.len() as i64)).await;
            }
            Ok(())
        })
    }

    fn exists(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let objects = self.objects.read().await;
            Ok(objects.contains_key(&(bucket, key)))
        })
    }

    fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        let src_key_pair = (src_bucket.to_string(), src_key.to_string());
        let dst_key_pair = (dst_bucket.to_string(), dst_key.to_string());
        Box::pin(async move {
            let data = {
                let objects = self.objects.read().await;
                objects
                    .get(&src_key_pair)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("source object not found: {}/{}", src_key_pair.0, src_key_pair.1))?
            };

            let new_len = data.len() as u64;
            let old_len = {
                let objects = self.objects.read().await;
                objects.get(&dst_key_pair).map(|d| d.len() as u64)
            };
            let delta = new_len as i64 - old_len.unwrap_or(0) as i64;
            if delta > 0 {
                self.check_capacity(delta as u64).await?;
            }

            let etag = Self::compute_etag(&data);
            {
                let mut objects = self.objects.write().await;
                objects.insert(dst_key_pair, data);
            }
            self.adjust_size(delta).await;

            Ok(etag)
        })
    }

    fn put_part(
        &self,
        _bucket: &str,
        upload_id: &str,
        part_number: u32,
        body: ByteStream,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<PutResult>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let data = Self::drain(body).await?;
            let new_len = data.len() as u64;
            let map_key = (upload_id, part_number);

            let old_len = {
                let parts = self.parts.read().await;
                parts.get(&map_key).map(|d| d.len() as u64)
            };
            let delta = new_len as i64 - old_len.unwrap_or(0) as i64;
            if delta > 0 {
                self.check_capacity(delta as u64).await?;
            }

            let etag = Self::compute_etag(&data);
            {
                let mut parts = self.parts.write().await;
                parts.insert(map_key, data);
            }
            self.adjust_size(delta).await;

            Ok(PutResult { etag, size: new_len })
        })
    }

    fn assemble_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[(u32, String)],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        let upload_id = upload_id.to_string();
        let parts = parts.to_vec();
        Box::pin(async move {
            let mut combined_data: Vec<u8> = Vec::new();
            {
                let parts_map = self.parts.read().await;
                for (part_number, _etag) in &parts {
                    let part_data = parts_map
                        .get(&(upload_id.clone(), *part_number))
                        .ok_or_else(|| anyhow::anyhow!("part not found: {upload_id}/{part_number}"))?;
                    combined_data.extend_from_slice(part_data.as_ref());
                }
            }

            let assembled = Bytes::from(combined_data);
            let part_etags: Vec<String> = parts.iter().map(|(_, etag)| etag.clone()).collect();
            let composite_etag = composite_multipart_etag(&part_etags);

            let map_key = (bucket, key);
            let new_len = assembled.len() as u64;
            let old_len = {
                let objects = self.objects.read().await;
                objects.get(&map_key).map(|d| d.len() as u64)
            };
            let delta = new_len as i64 - old_len.unwrap_or(0) as i64;
            if delta > 0 {
                self.check_capacity(delta as u64).await?;
            }

            {
                let mut objects = self.objects.write().await;
                objects.insert(map_key, assembled);
            }
            self.adjust_size(delta).await;

            Ok(composite_etag)
        })
    }

    fn delete_parts(
        &self,
        _bucket: &str,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let mut parts = self.parts.write().await;
            let keys_to_remove: Vec<PartKey> = parts
                .keys()
                .filter(|(uid, _)| uid == &upload_id)
                .cloned()
                .collect();

            let mut freed: u64 = 0;
            for k in keys_to_remove {
                if let Some(data) = parts.remove(&k) {
                    freed += data.len() as u64;
                }
            }
            drop(parts);

            if freed > 0 {
                self.adjust_size(-(freed as i64)).await;
            }

            Ok(())
        })
    }

    fn create_bucket(
        &self,
        _bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        // In-memory backend: buckets are implicit in the storage key.
        Box::pin(async move { Ok(()) })
    }

    fn delete_bucket(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            let mut objects = self.objects.write().await;
            let keys_to_remove: Vec<ObjectKey> = objects
                .keys()
                .filter(|(b, _)| b == &bucket)
                .cloned()
                .collect();

            let mut freed: u64 = 0;
            for k in keys_to_remove {
                if let Some(data) = objects.remove(&k) {
                    freed += data.len() as u64;
                }
            }
            drop(objects);

            if freed > 0 {
                self.adjust_size(-(freed as i64)).await;
            }

            Ok(())
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_backend() -> MemoryBackend {
        MemoryBackend::new(0, "none", "", 0).expect("failed to create backend")
    }

    fn test_backend_with_limit(max_bytes: u64) -> MemoryBackend {
        MemoryBackend::new(max_bytes, "none", "", 0).expect("failed to create backend")
    }

    fn stream_of(data: &'static [u8]) -> ByteStream {
        Box::pin(std::io::Cursor::new(data))
    }

    #[tokio::test]
    async fn test_put_and_get_roundtrip() {
        let backend = test_backend();
        backend.create_bucket("test-bucket").await.unwrap();

        let result = backend.put("test-bucket", "key.txt", stream_of(b"hello world")).await.unwrap();
        assert!(result.etag.starts_with('"'));
        assert_eq!(result.size, 11);

        let mut stream = backend.get("test-bucket", "key.txt").await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello world");
    }

    #[tokio::test]
    async fn test_put_empty_object() {
        let backend = test_backend();
        let result = backend.put("test-bucket", "empty.txt", stream_of(b"")).await.unwrap();
        assert_eq!(result.etag, "\"d41d8cd98f00b204e9800998ecf8427e\"");
        assert_eq!(result.size, 0);
    }

    #[tokio::test]
    async fn test_delete_existing_and_nonexistent() {
        let backend = test_backend();
        backend.put("test-bucket", "key.txt", stream_of(b"data")).await.unwrap();
        assert!(backend.exists("test-bucket", "key.txt").await.unwrap());

        backend.delete("test-bucket", "key.txt").await.unwrap();
        assert!(!backend.exists("test-bucket", "key.txt").await.unwrap());
        backend.delete("test-bucket", "key.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_nonexistent_returns_error() {
        let backend = test_backend();
        assert!(backend.get("test-bucket", "no-such-key").await.is_err());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let backend = test_backend();
        let r1 = backend.put("test-bucket", "key.txt", stream_of(b"version 1")).await.unwrap();
        let r2 = backend.put("test-bucket", "key.txt", stream_of(b"version 2")).await.unwrap();
        assert_ne!(r1.etag, r2.etag);

        let mut stream = backend.get("test-bucket", "key.txt").await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"version 2");
    }

    #[tokio::test]
    async fn test_get_range() {
        let backend = test_backend();
        backend.put("test-bucket", "key.txt", stream_of(b"0123456789")).await.unwrap();

        let mut stream = backend.get_range("test-bucket", "key.txt", 2, 5).await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"2345");
    }

    #[tokio::test]
    async fn test_copy_object_different_buckets() {
        let backend = test_backend();
        backend.create_bucket("src-bucket").await.unwrap();
        backend.create_bucket("dst-bucket").await.unwrap();

        backend.put("src-bucket", "key.txt", stream_of(b"cross-bucket copy")).await.unwrap();
        let etag = backend.copy_object("src-bucket", "key.txt", "dst-bucket", "key.txt").await.unwrap();
        assert!(etag.starts_with('"'));

        let mut stream = backend.get("dst-bucket", "key.txt").await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"cross-bucket copy");
    }

    #[tokio::test]
    async fn test_copy_object_nonexistent_source() {
        let backend = test_backend();
        let result = backend.copy_object("test-bucket", "no-such-key", "test-bucket", "dest.txt").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_multipart_assemble_roundtrip() {
        let backend = test_backend();
        backend.create_bucket("test-bucket").await.unwrap();

        let p1 = backend.put_part("test-bucket", "upload-001", 1, stream_of(b"hello ")).await.unwrap();
        let p2 = backend.put_part("test-bucket", "upload-001", 2, stream_of(b"world")).await.unwrap();

        let parts = vec![(1u32, p1.etag), (2u32, p2.etag)];
        let composite_etag = backend
            .assemble_parts("test-bucket", "assembled.txt", "upload-001", &parts)
            .await
            .unwrap();
        assert!(composite_etag.ends_with("-2\""));

        let mut stream = backend.get("test-bucket", "assembled.txt").await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello world");

        backend.delete_parts("test-bucket", "upload-001").await.unwrap();
        backend.delete_parts("test-bucket", "upload-001").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_limit_put() {
        let backend = test_backend_with_limit(10);
        backend.put("test-bucket", "a.txt", stream_of(b"hello")).await.unwrap();
        let result = backend.put("test-bucket", "b.txt", stream_of(b"world!")).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("memory limit exceeded"));
    }

    #[tokio::test]
    async fn test_memory_limit_delete_frees_space() {
        let backend = test_backend_with_limit(10);
        backend.put("test-bucket", "a.txt", stream_of(b"hello")).await.unwrap();
        backend.delete("test-bucket", "a.txt").await.unwrap();
        backend.put("test-bucket", "b.txt", stream_of(b"world!!!!")).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_and_delete_bucket() {
        let backend = test_backend();
        backend.create_bucket("mybucket").await.unwrap();
        backend.put("mybucket", "obj.txt", stream_of(b"data")).await.unwrap();
        backend.delete_bucket("mybucket").await.unwrap();
        assert!(!backend.exists("mybucket", "obj.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_snapshot_and_restore() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let snap_path = dir.path().join("snapshot.db");
        let snap_str = snap_path.to_str().unwrap();

        {
            let backend = MemoryBackend::new(0, "snapshot", snap_str, 0).unwrap();
            backend.put("bucket", "key1.txt", stream_of(b"data one")).await.unwrap();
            backend.put("bucket", "key2.txt", stream_of(b"data two")).await.unwrap();
            backend.put_part("bucket", "upload-1", 1, stream_of(b"part-a")).await.unwrap();
            backend.snapshot().unwrap();
        }

        {
            let backend = MemoryBackend::new(0, "snapshot", snap_str, 0).unwrap();
            let mut stream = backend.get("bucket", "key1.txt").await.unwrap();
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).await.unwrap();
            assert_eq!(buf, b"data one");

            let parts = backend.parts.read().await;
            assert!(parts.contains_key(&("upload-1".to_string(), 1)));
        }
    }

    #[tokio::test]
    async fn test_close_snapshots() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let snap_path = dir.path().join("close-snapshot.db");
        let snap_str = snap_path.to_str().unwrap();

        let backend = MemoryBackend::new(0, "snapshot", snap_str, 0).unwrap();
        backend.put("bucket", "key.txt", stream_of(b"close data")).await.unwrap();
        backend.close().await;

        assert!(snap_path.exists());
    }

    #[tokio::test]
    async fn test_no_snapshot_when_persistence_none() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let snap_path = dir.path().join("should-not-exist.db");
        let snap_str = snap_path.to_str().unwrap();

        let backend = MemoryBackend::new(0, "none", snap_str, 0).unwrap();
        backend.put("bucket", "key.txt", stream_of(b"data")).await.unwrap();
        backend.close().await;

        assert!(!snap_path.exists());
    }
}
