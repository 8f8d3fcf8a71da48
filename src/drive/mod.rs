// 云端对象存储模块

pub mod auth;
pub mod backend;
pub mod client;
pub mod google;
pub mod limiter;
pub mod memory;
pub mod stream;
pub mod types;

pub use auth::{OAuthCredentials, TokenManager};
pub use backend::DriveBackend;
pub use client::{RemoteStoreClient, DEFAULT_MAX_IDS_PER_REQUEST};
pub use google::{GoogleDriveBackend, GoogleDriveOptions};
pub use limiter::{ApiLimiter, DEFAULT_API_CONCURRENCY};
pub use memory::MemoryBackend;
pub use stream::{ByteStream, ProgressFn, StreamProgress};
pub use types::{CreatedObject, DriveError, FolderSpec, ObjectSpec, RemoteObject};
