//! MCP tool surface and transports for the boris sandbox server.
//!
//! `boris` (the core crate) owns sessions, path scoping and shell
//! execution; this crate wires those into rmcp tool handlers and exposes
//! them over streamable HTTP or stdio.

pub mod auth;
pub mod http;
pub mod result;
pub mod server;
pub mod stdio;
pub mod tools;

pub use server::BorisServer;
