//! Metadata storage layer.
//!
//! The metadata store keeps track of buckets, objects, and multipart
//! uploads. [`store::MetadataStore`] defines the interface;
//! [`sqlite::SqliteMetadataStore`] is the default implementation and
//! [`memory::MemoryMetadataStore`] backs `metadata.engine = "memory"`.

pub mod memory;
pub mod sqlite;
pub mod store;
