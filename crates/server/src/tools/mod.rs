//! Tool implementations. Each module exposes plain async functions taking
//! the shared config and the caller's session; the rmcp glue in
//! `crate::server` stays a thin layer over these.

pub mod bash;
pub mod create_file;
pub mod find;
pub mod grep;
pub mod str_replace;
pub mod view;
