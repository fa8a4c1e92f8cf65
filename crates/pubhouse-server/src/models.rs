//! API models for requests and responses

pub mod admin;
pub mod api;
pub mod package;

// Re-export commonly used types
pub use admin::*;
pub use api::*;
pub use package::*;
