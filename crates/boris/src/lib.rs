//! Core state and execution machinery for the boris sandbox server.
//!
//! This crate owns everything that must stay correct under concurrent,
//! reconnectable MCP clients: per-connection [`session::Session`] state,
//! the [`registry::SessionRegistry`], the path-scoping
//! [`resolver::Resolver`], and the [`exec`] module's foreground/background
//! shell execution with cwd tracking. The MCP tool surface and transports
//! live in the `boris-server` crate.

#[cfg(not(unix))]
compile_error!("boris relies on Unix process groups (setpgid/killpg) and does not build elsewhere");

pub mod config;
pub mod error;
pub mod exec;
pub mod registry;
pub mod resolver;
pub mod session;
