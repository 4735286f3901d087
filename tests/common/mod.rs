//! Integration test common infrastructure.
//!
//! Provides a scripted stand-in for the chat server plus helpers for
//! spawning bot instances against it.

pub mod server;

#[allow(unused_imports)]
pub use server::{BotProcess, TestServer};
