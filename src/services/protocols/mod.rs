//! Built-in cursor protocols.

mod json_api;
mod json_lines;
mod oai_pmh;

pub use json_api::{JsonCursor, JsonOffset};
pub use json_lines::JsonLines;
pub use oai_pmh::OaiPmh;
