//! Abstract storage backend trait.
//!
//! Every storage backend implements [`StorageBackend`] in terms of async
//! byte streams rather than buffered `Bytes`, so a multi-gigabyte object
//! never needs to sit fully in memory on its way to or from disk.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, ReadBuf};

/// A boxed, type-erased async byte stream. Used both for request bodies
/// handed to a backend and for object bodies a backend hands back.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Adapts an already-buffered [`Bytes`] body (e.g. an axum extractor that
/// collected a small XML payload) into a [`ByteStream`] for callers that
/// only have the whole body in hand already.
struct BytesReader(Bytes);

impl AsyncRead for BytesReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let n = std::cmp::min(buf.remaining(), self.0.len());
        if n > 0 {
            let chunk = self.0.split_to(n);
            buf.put_slice(&chunk);
        }
        Poll::Ready(Ok(()))
    }
}

/// Wrap an in-memory [`Bytes`] buffer as a [`ByteStream`].
pub fn bytes_to_stream(data: Bytes) -> ByteStream {
    Box::pin(BytesReader(data))
}

/// Outcome of writing an object or a part: its ETag and the number of
/// bytes actually written, computed while streaming rather than after
/// the fact.
#[derive(Debug, Clone)]
pub struct PutResult {
    /// Quoted ETag, e.g. `"d41d8cd98f00b204e9800998ecf8427e"`.
    pub etag: String,
    pub size: u64,
}

/// Async object storage contract. Implementations must be safe to share
/// behind an `Arc` and called concurrently from many request tasks.
pub trait StorageBackend: Send + Sync + 'static {
    /// Stream `body` to storage at `bucket`/`key`, returning its ETag and
    /// size as computed during the write.
    fn put(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<PutResult>> + Send + '_>>;

    /// Open a stream over the object at `bucket`/`key`.
    fn get(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ByteStream>> + Send + '_>>;

    /// Open a stream over a byte range `[start, end]` (inclusive) of the
    /// object at `bucket`/`key`, for Range GET support (§4.2).
    fn get_range(
        &self,
        bucket: &str,
        key: &str,
        start: u64,
        end: u64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ByteStream>> + Send + '_>>;

    /// Delete the object at `bucket`/`key`.
    fn delete(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Check whether an object exists at `bucket`/`key`.
    fn exists(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// Copy an object from `src_key` in `src_bucket` to `dst_key` in
    /// `dst_bucket`, returning the ETag of the new object. Implementations
    /// should avoid reading the whole object into memory when the backend
    /// offers a native copy.
    fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>>;

    /// Stream a single part of a multipart upload, returning its ETag and size.
    fn put_part(
        &self,
        bucket: &str,
        upload_id: &str,
        part_number: u32,
        body: ByteStream,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<PutResult>> + Send + '_>>;

    /// Assemble previously uploaded parts (in order) into the final object
    /// at `bucket`/`key`, returning the composite ETag (§4.8). `parts` is
    /// `(part_number, part_etag)` in ascending order.
    fn assemble_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[(u32, String)],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>>;

    /// Delete all part data associated with a multipart upload.
    fn delete_parts(
        &self,
        bucket: &str,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Create whatever on-disk/in-memory structure a bucket needs before
    /// objects can be stored in it.
    fn create_bucket(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Remove a bucket's storage structure. Callers are responsible for
    /// verifying the bucket is empty first (§4.1 `BucketNotEmpty`).
    fn delete_bucket(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}

/// Compute the composite multipart ETag S3 uses: MD5 of the concatenated
/// *binary* per-part MD5 digests, hex-encoded, suffixed with `-N` where N
/// is the part count (§4.8). `part_etags` are the quoted per-part ETags
/// returned by [`StorageBackend::put_part`].
pub fn composite_multipart_etag(part_etags: &[String]) -> String {
    use md5::{Digest, Md5};

    let mut combined = Md5::new();
    for etag in part_etags {
        let hex = etag.trim_matches('"');
        if let Ok(bytes) = hex::decode(hex) {
            combined.update(&bytes);
        }
    }
    let digest = combined.finalize();
    format!("\"{}-{}\"", hex::encode(digest), part_etags.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_etag_matches_known_vector() {
        // Two parts whose MD5s are well-known: md5("") and md5("a").
        let part1 = "\"d41d8cd98f00b204e9800998ecf8427e\"".to_string();
        let part2 = "\"0cc175b9c0f1b6a831c399e269772661\"".to_string();
        let composite = composite_multipart_etag(&[part1, part2]);
        assert!(composite.ends_with("-2\""));
        assert!(composite.starts_with('"'));
    }

    #[test]
    fn composite_etag_empty_parts() {
        let composite = composite_multipart_etag(&[]);
        assert!(composite.ends_with("-0\""));
    }
}
