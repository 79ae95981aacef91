//! # tether-storage
//!
//! Object storage backends for Tether attachments.
//!
//! ## Features
//!
//! - `Storage` trait: write/read/delete/exists/copy/move/public-url
//! - Streaming writes from local files for backends that support them
//! - `MemoryStorage` for tests, `LocalStorage` for the filesystem
//!
//! ## Example
//!
//! ```rust,ignore
//! use tether_storage::{MemoryStorage, Storage};
//!
//! let storage = MemoryStorage::new();
//! storage.write("/d/a.txt", bytes::Bytes::from("hello")).await?;
//! assert_eq!(storage.read("/d/a.txt").await?, "hello");
//! ```

pub mod backend;
pub mod local;
pub mod memory;

pub use backend::{basename, dirname, join_path, Storage, StorageError, StorageResult};
pub use local::LocalStorage;
pub use memory::MemoryStorage;
