//! Support code shared across the workspace.

pub mod serde_format;

pub use serde_format::SerdeFormat;
