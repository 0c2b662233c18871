#![cfg_attr(not(test), forbid(unsafe_code))]

//! SafeLease realtime chat server.
//!
//! Authenticated WebSocket connections join two-party conversation rooms,
//! receive the conversation history on join, and observe every message in
//! the order it was persisted. A small HTTP surface exposes history, key
//! derivation, health, and metrics.

pub mod app_state;
pub mod auth;
pub mod db;
pub mod handlers;
pub mod http;
pub mod middleware;
pub mod openapi;
pub mod realtime;
pub mod routes;
pub mod server;
pub mod services;
mod tracer;
