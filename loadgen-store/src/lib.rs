//! Object store client used by the load generator.
//!
//! The load generator only needs a narrow slice of an object store: writing a blob, streaming it
//! back, asking for its size and making sure the target buckets exist. This crate exposes that
//! slice as the [`ObjectStore`] trait with two implementations:
//!
//! - [`S3Store`] talks to any S3-compatible endpoint (AWS, MinIO, SeaweedFS, ...).
//! - [`InMemoryStore`] keeps everything in a `HashMap` and can inject faults, which is what the
//!   engine tests run against.
//!
//! All failures are reported as [`StoreError`]. A missing object is always the structured
//! [`StoreError::NotFound`] variant so callers can tell it apart from transport failures without
//! looking at error messages.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod error;
mod in_memory;
mod s3_compatible;
mod store;
pub mod stream;

pub use error::{StoreError, StoreResult};
pub use in_memory::{Fault, InMemoryStore};
pub use s3_compatible::{S3Config, S3Store};
pub use store::{GetResponse, ObjectStore, SharedStore};
pub use stream::PayloadStream;
