//! Local filesystem storage backend.
//!
//! Objects are stored as flat files under a configurable root directory,
//! keyed by `{bucket}/{key}`. All writes follow the crash-only pattern:
//! write to a temp file under `.tmp/`, fsync, then atomically rename into
//! place, so a crash mid-write never leaves a partial object visible.

use md5::{Digest, Md5};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use super::backend::{ByteStream, PutResult, StorageBackend};

const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Stores objects on the local filesystem.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a new `LocalBackend` rooted at `root`, creating it if absent.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join(".tmp"))?;
        Ok(Self { root })
    }

    /// Resolve a bucket/key pair to an absolute file path, rejecting any
    /// component that would escape `root`.
    fn resolve(&self, bucket: &str, key: &str) -> anyhow::Result<PathBuf> {
        for part in [bucket, key] {
            for component in std::path::Path::new(part).components() {
                if let std::path::Component::ParentDir = component {
                    anyhow::bail!("path traversal detected in storage key");
                }
            }
        }
        Ok(self.root.join(bucket).join(key))
    }

    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(".tmp").join(format!("tmp-{id}"))
    }

    fn part_path(&self, upload_id: &str, part_number: u32) -> PathBuf {
        self.root.join(".multipart").join(upload_id).join(part_number.to_string())
    }

    /// Stream `body` into a temp file, fsync, then rename to `final_path`.
    /// Returns the ETag (quoted hex MD5) and byte count written.
    async fn write_streamed(&self, body: ByteStream, final_path: &PathBuf) -> anyhow::Result<PutResult> {
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.temp_path();
        let mut file = tokio::fs::File::create(&tmp_path).await?;

        let mut body = body;
        let mut hasher = Md5::new();
        let mut size: u64 = 0;
        let mut buf = vec![0u8; COPY_CHUNK_SIZE];
        loop {
            let n = body.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
            file.write_all(&buf[..n]).await?;
        }
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, final_path).await?;
        let etag = format!("\"{}\"", hex::encode(hasher.finalize()));
        Ok(PutResult { etag, size })
    }

    async fn open_stream(path: &PathBuf) -> anyhow::Result<ByteStream> {
        if !tokio::fs::try_exists(path).await? {
            anyhow::bail!("object not found");
        }
        let file = tokio::fs::File::open(path).await?;
        Ok(Box::pin(file))
    }
}

impl StorageBackend for LocalBackend {
    fn put(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<PutResult>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let final_path = self.resolve(&bucket, &key)?;
            self.write_streamed(body, &final_path).await
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
            let path = self.resolve(&bucket, &key)?;
            Self::open_stream(&path).await
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
            let path = self.resolve(&bucket, &key)?;
            if !tokio::fs::try_exists(&path).await? {
                anyhow::bail!("object not found");
            }
            let mut file = tokio::fs::File::open(&path).await?;
            file.seek(std::io::SeekFrom::Start(start)).await?;
            let stream = file.take(end.saturating_sub(start) + 1);
            Ok(Box::pin(stream) as ByteStream)
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
            let path = self.resolve(&bucket, &key)?;
            // Idempotent: a missing file is not an error.
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
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
            let path = self.resolve(&bucket, &key)?;
            Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
        })
    }

    fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        let src_bucket = src_bucket.to_string();
        let src_key = src_key.to_string();
        let dst_bucket = dst_bucket.to_string();
        let dst_key = dst_key.to_string();
        Box::pin(async move {
            let src_path = self.resolve(&src_bucket, &src_key)?;
            if !tokio::fs::try_exists(&src_path).await? {
                anyhow::bail!("source object not found");
            }
            let dst_path = self.resolve(&dst_bucket, &dst_key)?;
            let src_stream = Self::open_stream(&src_path).await?;
            let result = self.write_streamed(src_stream, &dst_path).await?;
            Ok(result.etag)
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
            let final_path = self.part_path(&upload_id, part_number);
            self.write_streamed(body, &final_path).await
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
            let final_path = self.resolve(&bucket, &key)?;
            if let Some(parent) = final_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let tmp_path = self.temp_path();
            let mut output = tokio::fs::File::create(&tmp_path).await?;

            for (part_number, _etag) in &parts {
                let part_path = self.part_path(&upload_id, *part_number);
                let mut part_file = tokio::fs::File::open(&part_path)
                    .await
                    .map_err(|e| anyhow::anyhow!("failed to read part {part_number}: {e}"))?;
                tokio::io::copy(&mut part_file, &mut output).await?;
            }
            output.sync_all().await?;
            drop(output);
            tokio::fs::rename(&tmp_path, &final_path).await?;

            let part_etags: Vec<String> = parts.into_iter().map(|(_, etag)| etag).collect();
            Ok(super::backend::composite_multipart_etag(&part_etags))
        })
    }

    fn delete_parts(
        &self,
        _bucket: &str,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let part_dir = self.root.join(".multipart").join(&upload_id);
            match tokio::fs::remove_dir_all(&part_dir).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn create_bucket(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let path = self.root.join(bucket);
        Box::pin(async move {
            tokio::fs::create_dir_all(&path).await?;
            Ok(())
        })
    }

    fn delete_bucket(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let path = self.root.join(bucket);
        Box::pin(async move {
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_backend() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let backend = LocalBackend::new(dir.path()).expect("failed to create backend");
        (dir, backend)
    }

    fn stream_of(data: &'static [u8]) -> ByteStream {
        Box::pin(std::io::Cursor::new(data))
    }

    #[tokio::test]
    async fn test_put_and_get_roundtrip() {
        let (_dir, backend) = test_backend();
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
        let (_dir, backend) = test_backend();
        backend.create_bucket("test-bucket").await.unwrap();

        let result = backend.put("test-bucket", "empty.txt", stream_of(b"")).await.unwrap();
        assert_eq!(result.etag, "\"d41d8cd98f00b204e9800998ecf8427e\"");
        assert_eq!(result.size, 0);
    }

    #[tokio::test]
    async fn test_put_creates_parent_dirs() {
        let (_dir, backend) = test_backend();
        backend.create_bucket("test-bucket").await.unwrap();

        backend.put("test-bucket", "a/b/c/deep.txt", stream_of(b"nested")).await.unwrap();
        let mut stream = backend.get("test-bucket", "a/b/c/deep.txt").await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"nested");
    }

    #[tokio::test]
    async fn test_delete_existing_and_nonexistent() {
        let (_dir, backend) = test_backend();
        backend.create_bucket("test-bucket").await.unwrap();
        backend.put("test-bucket", "key.txt", stream_of(b"data")).await.unwrap();
        assert!(backend.exists("test-bucket", "key.txt").await.unwrap());

        backend.delete("test-bucket", "key.txt").await.unwrap();
        assert!(!backend.exists("test-bucket", "key.txt").await.unwrap());
        // Idempotent.
        backend.delete("test-bucket", "key.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_nonexistent_returns_error() {
        let (_dir, backend) = test_backend();
        backend.create_bucket("test-bucket").await.unwrap();
        assert!(backend.get("test-bucket", "no-such-key").await.is_err());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let (_dir, backend) = test_backend();
        backend.create_bucket("test-bucket").await.unwrap();

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
        let (_dir, backend) = test_backend();
        backend.create_bucket("test-bucket").await.unwrap();
        backend.put("test-bucket", "key.txt", stream_of(b"0123456789")).await.unwrap();

        let mut stream = backend.get_range("test-bucket", "key.txt", 2, 5).await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"2345");
    }

    #[tokio::test]
    async fn test_copy_object_cross_bucket() {
        let (_dir, backend) = test_backend();
        backend.create_bucket("src-bucket").await.unwrap();
        backend.create_bucket("dst-bucket").await.unwrap();

        let put_result = backend.put("src-bucket", "key.txt", stream_of(b"cross-bucket copy")).await.unwrap();
        let copy_etag = backend.copy_object("src-bucket", "key.txt", "dst-bucket", "key.txt").await.unwrap();
        assert_eq!(put_result.etag, copy_etag);

        let mut stream = backend.get("dst-bucket", "key.txt").await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"cross-bucket copy");
    }

    #[tokio::test]
    async fn test_copy_object_nonexistent_source() {
        let (_dir, backend) = test_backend();
        backend.create_bucket("test-bucket").await.unwrap();
        let result = backend.copy_object("test-bucket", "no-such-key", "test-bucket", "dest.txt").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_multipart_assemble_roundtrip() {
        let (_dir, backend) = test_backend();
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
        // Idempotent.
        backend.delete_parts("test-bucket", "upload-001").await.unwrap();
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (_dir, backend) = test_backend();
        backend.create_bucket("test-bucket").await.unwrap();
        let result = backend.put("test-bucket", "../escape.txt", stream_of(b"data")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_create_and_delete_bucket() {
        let (_dir, backend) = test_backend();
        backend.create_bucket("mybucket").await.unwrap();
        backend.put("mybucket", "obj.txt", stream_of(b"data")).await.unwrap();
        backend.delete_bucket("mybucket").await.unwrap();
        assert!(!backend.exists("mybucket", "obj.txt").await.unwrap());
    }
}
