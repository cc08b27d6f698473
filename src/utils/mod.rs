//! Small shared helpers.

pub mod partial_json;

pub use partial_json::parse_partial_json;
