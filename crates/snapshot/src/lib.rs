//! Incremental, content-addressed snapshots of source folders
//!
//! [`SnapshotService::create_snapshot`] builds the folder's content tree,
//! diffs it against the cached tree of the project, uploads only changed
//! files and commits a manifest whose id is derived from the tree digest.

pub mod config;
pub mod error;
pub mod http;
pub mod manifest;
pub mod pool;
pub mod remote;
pub mod scm;
pub mod service;
pub mod upload;

// Re-exports
pub use config::{SnapshotConfig, UploadSettings};
pub use error::SnapshotError;
pub use http::HttpRemote;
pub use manifest::{FileRevision, SnapshotManifest};
pub use pool::{PoolClosed, WorkerPool};
pub use remote::{BlobSource, BlobTransport, DirectoryRemote, SnapshotRemote};
pub use service::{exclude_with, SnapshotOptions, SnapshotService};
pub use upload::{SnapshotUploader, UploadFile, UploadReport};
