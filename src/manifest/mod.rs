//! Manifest model
//!
//! Typed representation of one application version: the modules it is made
//! of, their content digests and the dependency edges between them. Pure
//! data; fetching a manifest is the loader's job.

pub mod digest;
pub mod model;
pub mod order;

pub use digest::Digest;
pub use model::{application_manifest_file_name, Manifest, Module, PREBUILT_MANIFEST_FILE_NAME};
pub use order::resolve_load_order;
