//! Records, on-disk layout, document grammar and the content store

pub mod content_store;
pub mod document;
pub mod paths;
pub mod schema;
pub mod types;
