#![cfg_attr(not(test), forbid(unsafe_code))]

//! Types shared by the SafeLease chat server, its CLI, and browser clients.

pub mod client;
pub mod config;
pub mod models;
