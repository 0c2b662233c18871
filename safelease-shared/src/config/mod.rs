//! # Configuration
//!
//! Layered configuration shared by the chat server and the CLI.

#[cfg(not(target_arch = "wasm32"))]
pub mod server;
