pub mod chat;
pub mod completion;
pub mod config;
pub mod spec;
pub mod token;
